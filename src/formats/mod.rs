//! On-disk record formats.
//!
//! Two formats exist: plain text files (`lines`), read as (line number, line) and written as
//! `key value` lines, and length-prefixed binary files (`writelog`) that round-trip arbitrary
//! keys and values. Intermediate data is written as WriteLog by default.

pub mod lines;
pub mod util;
pub mod writelog;

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MRError, Result};
use crate::record_types::{Record, RecordStream};

/// Identifies the codec of a dataset split or input file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    #[serde(rename = "txt", alias = "text")]
    Text,
    #[serde(rename = "wlg", alias = "writelog", alias = "hexfile")]
    WriteLog,
}

impl Default for Format {
    fn default() -> Format {
        Format::WriteLog
    }
}

impl Format {
    pub fn from_name(name: &str) -> Result<Format> {
        match name {
            "txt" | "text" => Ok(Format::Text),
            "wlg" | "writelog" | "hexfile" => Ok(Format::WriteLog),
            other => Err(MRError::UnknownFormat(String::from(other))),
        }
    }

    /// The identifier of this format; also used as file extension.
    pub fn name(&self) -> &'static str {
        match *self {
            Format::Text => "txt",
            Format::WriteLog => "wlg",
        }
    }

    /// Guesses the format from a file extension; anything unknown is read as text.
    pub fn for_path(path: &Path) -> Format {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| Format::from_name(e).ok())
            .unwrap_or(Format::Text)
    }

    /// Creates (or truncates) `path` and returns a writer for it.
    pub fn open_writer(&self, path: &Path) -> Result<Box<dyn RecordWriter + Send>> {
        let f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let w = io::BufWriter::new(f);
        Ok(match *self {
            Format::Text => Box::new(lines::LinesWriter::new_to_write(w)),
            Format::WriteLog => Box::new(writelog::WriteLogWriter::new(w)),
        })
    }

    /// Opens `path` and returns the records in file order.
    pub fn open_reader(&self, path: &Path) -> Result<RecordStream<'static>> {
        Ok(match *self {
            Format::Text => Box::new(util::PosRecordIterator::new(
                lines::new_from_file(path)?,
                path,
            )),
            Format::WriteLog => Box::new(util::RecordReadIterator::new(
                writelog::WriteLogReader::new_from_file(path)?,
                path,
            )),
        })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = MRError;
    fn from_str(s: &str) -> Result<Format> {
        Format::from_name(s)
    }
}

/// Sequential record output of one split.
pub trait RecordWriter {
    fn write_record(&mut self, record: &Record) -> Result<()>;
    /// Flushes buffered output. Must be called before the file is read back.
    fn finish(&mut self) -> Result<()>;
    fn records_written(&self) -> usize;
}
