//! Implements the Map phase.
//!

use std::vec;

use crate::mapreducer::MapperF;
use crate::record_types::{MEmitter, Record};

/// Lazily applies a mapper to every input record and flattens the emitted records,
/// preserving the order in which the mapper emitted them.
pub struct MapOutput<I: Iterator<Item = Record>> {
    mapper: MapperF,
    input: I,
    pending: vec::IntoIter<Record>,
    records_in: usize,
}

impl<I: Iterator<Item = Record>> MapOutput<I> {
    pub fn new(mapper: MapperF, input: I) -> MapOutput<I> {
        MapOutput {
            mapper,
            input,
            pending: Vec::new().into_iter(),
            records_in: 0,
        }
    }

    /// How many input records have been consumed so far.
    pub fn records_in(&self) -> usize {
        self.records_in
    }
}

impl<I: Iterator<Item = Record>> Iterator for MapOutput<I> {
    type Item = Record;
    fn next(&mut self) -> Option<Record> {
        loop {
            if let Some(r) = self.pending.next() {
                return Some(r);
            }
            let record = self.input.next()?;
            self.records_in += 1;

            let mut e = MEmitter::new();
            (self.mapper)(&mut e, record);
            self.pending = e.into_records().into_iter();
        }
    }
}
