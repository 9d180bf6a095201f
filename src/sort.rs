//! Sorting/comparison functions, and the strategies used to sort a reduce task's input.
//!
//! A reduce task needs its shard in key order. `InMemorySort` holds the whole shard in memory;
//! `ExternalSort` bounds that by sorting fixed-size runs, spilling each run to an anonymous
//! WriteLog file and merging the runs with a `ShardMergeIterator`.

use std::cmp::{Ord, Ordering};
use std::fmt;
use std::fs;
use std::io::{self, Seek, SeekFrom};
use std::path::PathBuf;

use tracing::debug;

use crate::error::{MRError, Result};
use crate::formats::util::RecordReadIterator;
use crate::formats::writelog::{WriteLogReader, WriteLogWriter};
use crate::formats::RecordWriter;
use crate::record_types::{Record, RecordStream};
use crate::shard_merge::ShardMergeIterator;

/// Function type to be used as custom compare function.
pub type Comparer<T> = fn(a: &T, b: &T) -> Ordering;

/// Comparer<T: Ord>
#[inline]
pub fn default_generic_compare<T: Ord>(a: &T, b: &T) -> Ordering {
    a.cmp(b)
}

/// Orders records by key only, so that a stable sort keeps the values of one key in
/// input order.
#[inline]
pub fn record_key_compare(a: &Record, b: &Record) -> Ordering {
    a.key.cmp(&b.key)
}

/// Like record_key_compare, but errors sort first so a merge surfaces them immediately.
#[inline]
fn result_key_compare(a: &Result<Record>, b: &Result<Record>) -> Ordering {
    match (a, b) {
        (Err(_), _) => Ordering::Less,
        (_, Err(_)) => Ordering::Greater,
        (Ok(a), Ok(b)) => record_key_compare(a, b),
    }
}

/// Turns the input shard of a task into a stream sorted by key.
pub trait SortStrategy: Send + Sync + fmt::Debug {
    fn sort<'a>(&self, input: RecordStream<'a>) -> Result<RecordStream<'static>>;
}

/// Collects the whole shard and sorts it in memory (stable, by key).
#[derive(Clone, Copy, Debug, Default)]
pub struct InMemorySort;

impl SortStrategy for InMemorySort {
    fn sort<'a>(&self, input: RecordStream<'a>) -> Result<RecordStream<'static>> {
        let mut records = input.collect::<Result<Vec<Record>>>()?;
        records.sort_by(record_key_compare);
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

/// Sorts runs of at most `chunk_size` records in memory, spills them, and merges the runs.
#[derive(Clone, Debug)]
pub struct ExternalSort {
    chunk_size: usize,
    scratch: Option<PathBuf>,
}

impl ExternalSort {
    /// `scratch` is the directory for spilled runs; None uses the system temp directory.
    pub fn new(chunk_size: usize, scratch: Option<PathBuf>) -> Result<ExternalSort> {
        if chunk_size == 0 {
            return Err(MRError::config("external sort chunk size must be positive"));
        }
        Ok(ExternalSort {
            chunk_size,
            scratch,
        })
    }

    fn spill(&self, run: &mut Vec<Record>) -> Result<fs::File> {
        run.sort_by(record_key_compare);

        let f = match self.scratch {
            Some(ref dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let mut w = WriteLogWriter::new(io::BufWriter::new(f));
        for r in run.drain(..) {
            w.write_record(&r)?;
        }
        w.finish()?;

        let mut f = w.into_inner().into_inner().map_err(|e| e.into_error())?;
        f.seek(SeekFrom::Start(0))?;
        Ok(f)
    }
}

impl SortStrategy for ExternalSort {
    fn sort<'a>(&self, input: RecordStream<'a>) -> Result<RecordStream<'static>> {
        let mut runs = Vec::new();
        let mut chunk = Vec::with_capacity(self.chunk_size);

        for r in input {
            chunk.push(r?);
            if chunk.len() >= self.chunk_size {
                runs.push(self.spill(&mut chunk)?);
            }
        }

        if runs.is_empty() {
            // Everything fit into one chunk.
            chunk.sort_by(record_key_compare);
            return Ok(Box::new(chunk.into_iter().map(Ok)));
        }
        if !chunk.is_empty() {
            runs.push(self.spill(&mut chunk)?);
        }
        debug!(runs = runs.len(), "merging spilled sort runs");

        let path = self
            .scratch
            .clone()
            .unwrap_or_else(|| PathBuf::from("<sort run>"));
        let readers: Vec<_> = runs
            .into_iter()
            .map(|f| RecordReadIterator::new(WriteLogReader::new(io::BufReader::new(f)), &path))
            .collect();
        Ok(Box::new(ShardMergeIterator::build(readers, result_key_compare)))
    }
}
