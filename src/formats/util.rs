//! Various iterators/adapters used for input/output formats.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{MRError, Result};
use crate::record_types::Record;

/// Transforms an iterator<string> into an iterator<Record>. It yields
/// records with the key being the position of the current record, starting with
/// 1. Used for sources that only yield values (no keys), i.e. text input.
pub struct PosRecordIterator<I: Iterator<Item = io::Result<String>>> {
    i: I,
    path: PathBuf,
    counter: u64,
}

impl<I: Iterator<Item = io::Result<String>>> PosRecordIterator<I> {
    pub fn new(it: I, path: &Path) -> PosRecordIterator<I> {
        PosRecordIterator {
            i: it,
            path: path.to_path_buf(),
            counter: 0,
        }
    }
}

impl<I: Iterator<Item = io::Result<String>>> Iterator for PosRecordIterator<I> {
    type Item = Result<Record>;
    fn next(&mut self) -> Option<Result<Record>> {
        match self.i.next()? {
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                Some(Err(MRError::corrupt(&self.path, e.to_string())))
            }
            Err(e) => Some(Err(e.into())),
            Ok(val) => {
                self.counter += 1;
                Some(Ok(Record {
                    key: self.counter.to_string(),
                    value: val,
                }))
            }
        }
    }
}

/// Another transformation of [bytes] -> [(string,string)]; this one always
/// reads one entry, treats it as key, and another one, treated as value.
/// Stops after the first error.
pub struct RecordReadIterator<I: Iterator<Item = io::Result<Vec<u8>>>> {
    i: I,
    path: PathBuf,
    failed: bool,
}

impl<I: Iterator<Item = io::Result<Vec<u8>>>> RecordReadIterator<I> {
    pub fn new(it: I, path: &Path) -> RecordReadIterator<I> {
        RecordReadIterator {
            i: it,
            path: path.to_path_buf(),
            failed: false,
        }
    }
}

fn decode(path: &Path, entry: Option<io::Result<Vec<u8>>>) -> Result<String> {
    match entry {
        None => Err(MRError::corrupt(path, "key without value")),
        Some(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(MRError::corrupt(path, "truncated entry"))
        }
        Some(Err(e)) => Err(e.into()),
        Some(Ok(buf)) => String::from_utf8(buf).map_err(|e| MRError::corrupt(path, e.to_string())),
    }
}

impl<I: Iterator<Item = io::Result<Vec<u8>>>> Iterator for RecordReadIterator<I> {
    type Item = Result<Record>;
    fn next(&mut self) -> Option<Result<Record>> {
        if self.failed {
            return None;
        }
        let k = match self.i.next() {
            None => return None,
            k => decode(&self.path, k),
        };
        let kv = match k {
            Ok(k) => decode(&self.path, self.i.next()).map(|v| (k, v)),
            Err(e) => Err(e),
        };

        match kv {
            Ok((key, value)) => Some(Ok(Record { key, value })),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(v: &[&str]) -> Vec<io::Result<Vec<u8>>> {
        v.iter().map(|s| Ok(s.as_bytes().to_vec())).collect()
    }

    #[test]
    fn test_pairs() {
        let it = RecordReadIterator::new(entries(&["a", "1", "b", "2"]).into_iter(), Path::new("x"));
        let records: Vec<Record> = it.collect::<Result<_>>().unwrap();
        assert_eq!(records, vec![Record::new("a", "1"), Record::new("b", "2")]);
    }

    #[test]
    fn test_dangling_key_is_corrupt() {
        let mut it = RecordReadIterator::new(entries(&["a", "1", "b"]).into_iter(), Path::new("x"));
        assert!(it.next().unwrap().is_ok());
        assert!(matches!(it.next(), Some(Err(MRError::Corrupt { .. }))));
        assert!(it.next().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let input: Vec<io::Result<Vec<u8>>> = vec![Ok(vec![0xff, 0xfe]), Ok(b"v".to_vec())];
        let mut it = RecordReadIterator::new(input.into_iter(), Path::new("x"));
        assert!(matches!(it.next(), Some(Err(MRError::Corrupt { .. }))));
    }
}
