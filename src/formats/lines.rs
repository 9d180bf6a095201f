//! Module that uses text files as input to the mapper phase and as final output.
//! This module implements only an iterator yielding single lines;
//! using the PosRecordIterator from formats::util, the necessary key/value
//! iterator can be implemented.

use std::fs;
use std::io;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::Result;
use crate::formats::RecordWriter;
use crate::record_types::Record;

pub struct LinesReader<Src: BufRead> {
    src: io::Lines<Src>,
}

/// Returns a LinesReader reading from the given file. If you have several
/// files, you can easily use the chain() method to chain several readers.
pub fn new_from_file(path: &Path) -> io::Result<LinesReader<io::BufReader<fs::File>>> {
    fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map(|f| LinesReader::new(io::BufReader::new(f)))
}

impl<Src: BufRead> LinesReader<Src> {
    pub fn new(src: Src) -> LinesReader<Src> {
        LinesReader { src: src.lines() }
    }
}

/// Iterate over the lines from a LinesReader. Read errors are passed on.
impl<Src: BufRead> Iterator for LinesReader<Src> {
    type Item = io::Result<String>;
    fn next(&mut self) -> Option<Self::Item> {
        self.src.next()
    }
}

/// Writer emitting one `key value` line per record.
pub struct LinesWriter<W: Write> {
    file: W,
    written: usize,
}

impl LinesWriter<io::BufWriter<fs::File>> {
    pub fn new_to_file(path: &Path) -> io::Result<LinesWriter<io::BufWriter<fs::File>>> {
        let f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(LinesWriter::new_to_write(io::BufWriter::new(f)))
    }
}

impl<W: Write> LinesWriter<W> {
    pub fn new_to_write(w: W) -> LinesWriter<W> {
        LinesWriter {
            file: w,
            written: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.file
    }
}

impl<W: Write> RecordWriter for LinesWriter<W> {
    fn write_record(&mut self, record: &Record) -> Result<()> {
        writeln!(self.file, "{} {}", record.key, record.value)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    fn records_written(&self) -> usize {
        self.written
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::formats::util::PosRecordIterator;
    use std::path::PathBuf;

    #[test]
    fn test_read_lines_numbered() {
        let src = io::Cursor::new("abc def\n\nhello world\n");
        let records: Vec<Record> =
            PosRecordIterator::new(LinesReader::new(src), &PathBuf::from("mem"))
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(
            records,
            vec![
                Record::new("1", "abc def"),
                Record::new("2", ""),
                Record::new("3", "hello world"),
            ]
        );
    }

    #[test]
    fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let cnt = new_from_file(&path).unwrap().count();
        assert_eq!(cnt, 3);
        assert!(new_from_file(&dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_write_lines() {
        let mut w = LinesWriter::new_to_write(Vec::new());
        for i in 0..10 {
            w.write_record(&Record::new(i.to_string(), "abc def")).unwrap();
        }
        w.finish().unwrap();
        assert_eq!(w.records_written(), 10);

        let buf = w.into_inner();
        assert_eq!(buf.len(), 10 * "0 abc def\n".len());
        assert!(String::from_utf8(buf).unwrap().starts_with("0 abc def\n1 abc def\n"));
    }
}
