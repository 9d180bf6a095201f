use std::cmp::Ordering;
use std::fmt;

use crate::error::Result;

/// A (key,value) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Record {
        Record {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Record) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Record) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.value.cmp(&other.value),
            o => o,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.value)
    }
}

/// A fallible stream of records, as read back from a dataset split or file.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<Record>> + Send + 'a>;

/// A (key,[value]) pair; the input to a reducer function.
/// The values are pulled lazily from the sorted input, so they can be iterated exactly once.
pub struct MultiRecord<'a> {
    key: String,
    values: &'a mut dyn Iterator<Item = String>,
}

impl<'a> MultiRecord<'a> {
    pub fn new(key: String, values: &'a mut dyn Iterator<Item = String>) -> MultiRecord<'a> {
        MultiRecord { key, values }
    }

    /// Retrieves the key of the record.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<'a> Iterator for MultiRecord<'a> {
    type Item = String;
    fn next(&mut self) -> Option<String> {
        self.values.next()
    }
}

/// Emitter type used in the mapper phase; used to emit (key,value) pairs.
#[derive(Default)]
pub struct MEmitter {
    r: Vec<Record>,
}

impl MEmitter {
    pub fn new() -> MEmitter {
        MEmitter { r: Vec::new() }
    }
    pub fn emit<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        self.r.push(Record::new(key, val))
    }
    pub fn len(&self) -> usize {
        self.r.len()
    }
    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }
    pub fn into_records(self) -> Vec<Record> {
        self.r
    }
}

/// Emitter used in the reducer phase; used to emit values.
#[derive(Default)]
pub struct REmitter {
    r: Vec<String>,
}

impl REmitter {
    pub fn new() -> REmitter {
        REmitter { r: Vec::new() }
    }
    pub fn emit<V: Into<String>>(&mut self, val: V) {
        self.r.push(val.into())
    }
    pub fn len(&self) -> usize {
        self.r.len()
    }
    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }
    pub fn into_values(self) -> Vec<String> {
        self.r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_order() {
        let a = Record::new("a", "2");
        let b = Record::new("a", "10");
        let c = Record::new("b", "0");
        assert!(b < a);
        assert!(a < c);
        assert_eq!(a.to_string(), "a 2");
    }

    #[test]
    fn test_multirecord_iterates_values() {
        let mut vals = vec![String::from("x"), String::from("y")].into_iter();
        let mr = MultiRecord::new(String::from("k"), &mut vals);
        assert_eq!(mr.key(), "k");
        assert_eq!(mr.collect::<Vec<_>>(), vec!["x", "y"]);
    }
}
