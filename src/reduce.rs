//! Implements the Reduce phase.
//!
//! The reduce input is a record stream sorted by key. `GroupedRead` walks it with a single
//! forward cursor and hands out one `Group` at a time; a `Group` mutably borrows the cursor,
//! so the borrow checker guarantees that a group is finished (or dropped) before the next one
//! is requested. Values a reducer leaves unconsumed are skipped when the next group is opened;
//! they never leak into the following key.

use std::vec;

use crate::mapreducer::ReducerF;
use crate::record_types::{MultiRecord, REmitter, Record};

/// Single-pass cursor over a sorted record stream: position plus the peeked next pair.
struct Cursor<I: Iterator<Item = Record>> {
    input: I,
    peeked: Option<Record>,
}

impl<I: Iterator<Item = Record>> Cursor<I> {
    fn advance(&mut self) {
        self.peeked = self.input.next();
    }

    /// Takes the peeked value if it still belongs to `key`.
    fn take_if_key(&mut self, key: &str) -> Option<String> {
        match self.peeked {
            Some(ref r) if r.key == key => (),
            _ => return None,
        }
        let r = self.peeked.take()?;
        self.advance();
        Some(r.value)
    }
}

/// Converts a sorted stream of records into a sequence of groups of records sharing a key.
/// The input must be sorted (or at least in an order where identical keys are adjacent).
pub struct GroupedRead<I: Iterator<Item = Record>> {
    cursor: Cursor<I>,
    last_key: Option<String>,
}

impl<I: Iterator<Item = Record>> GroupedRead<I> {
    pub fn new(input: I) -> GroupedRead<I> {
        let mut cursor = Cursor {
            input,
            peeked: None,
        };
        cursor.advance();
        GroupedRead {
            cursor,
            last_key: None,
        }
    }

    /// Opens the next group. Any values of the previous group that weren't consumed are
    /// skipped first.
    pub fn next_group(&mut self) -> Option<Group<'_, I>> {
        if let Some(last) = self.last_key.take() {
            while self.cursor.take_if_key(&last).is_some() {}
        }

        let first = self.cursor.peeked.take()?;
        self.cursor.advance();
        self.last_key = Some(first.key.clone());

        Some(Group {
            key: first.key,
            first: Some(first.value),
            cursor: &mut self.cursor,
        })
    }
}

/// The values of one key. Borrowed from the `GroupedRead` that produced it.
pub struct Group<'a, I: Iterator<Item = Record>> {
    key: String,
    first: Option<String>,
    cursor: &'a mut Cursor<I>,
}

impl<'a, I: Iterator<Item = Record>> Group<'a, I> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<'a, I: Iterator<Item = Record>> Iterator for Group<'a, I> {
    type Item = String;
    fn next(&mut self) -> Option<String> {
        if let Some(v) = self.first.take() {
            return Some(v);
        }
        self.cursor.take_if_key(&self.key)
    }
}

/// Lazily runs a reducer over each group of a sorted stream and emits (key, value) for every
/// value the reducer yields.
pub struct ReduceOutput<I: Iterator<Item = Record>> {
    reducer: ReducerF,
    groups: GroupedRead<I>,
    key: String,
    pending: vec::IntoIter<String>,
}

impl<I: Iterator<Item = Record>> ReduceOutput<I> {
    pub fn new(reducer: ReducerF, sorted_input: I) -> ReduceOutput<I> {
        ReduceOutput {
            reducer,
            groups: GroupedRead::new(sorted_input),
            key: String::new(),
            pending: Vec::new().into_iter(),
        }
    }
}

impl<I: Iterator<Item = Record>> Iterator for ReduceOutput<I> {
    type Item = Record;
    fn next(&mut self) -> Option<Record> {
        loop {
            if let Some(v) = self.pending.next() {
                return Some(Record {
                    key: self.key.clone(),
                    value: v,
                });
            }

            let mut group = self.groups.next_group()?;
            let key = String::from(group.key());
            let mut e = REmitter::new();
            (self.reducer)(&mut e, MultiRecord::new(key.clone(), &mut group));

            self.key = key;
            self.pending = e.into_values().into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn collect_groups(input: Vec<Record>) -> Vec<(String, Vec<String>)> {
        let mut gr = GroupedRead::new(input.into_iter());
        let mut out = Vec::new();
        while let Some(g) = gr.next_group() {
            let k = String::from(g.key());
            out.push((k, g.collect()));
        }
        out
    }

    #[test]
    fn test_grouped_read() {
        let input = vec![
            Record::new("a", "1"),
            Record::new("a", "2"),
            Record::new("b", "3"),
            Record::new("c", "4"),
            Record::new("c", "5"),
            Record::new("c", "6"),
        ];
        let groups = collect_groups(input.clone());
        assert_eq!(
            groups,
            vec![
                (String::from("a"), vec![String::from("1"), String::from("2")]),
                (String::from("b"), vec![String::from("3")]),
                (
                    String::from("c"),
                    vec![String::from("4"), String::from("5"), String::from("6")]
                ),
            ]
        );

        // Outer keys strictly increase, and the concatenated groups are the input values.
        for w in groups.windows(2) {
            assert!(w[0].0 < w[1].0);
        }
        let concat: Vec<String> = groups.into_iter().flat_map(|(_, vs)| vs).collect();
        let orig: Vec<String> = input.into_iter().map(|r| r.value).collect();
        assert_eq!(concat, orig);
    }

    #[test]
    fn test_grouped_read_empty() {
        let mut gr = GroupedRead::new(Vec::<Record>::new().into_iter());
        assert!(gr.next_group().is_none());
        assert!(gr.next_group().is_none());
    }

    #[test]
    fn test_undrained_group_is_skipped() {
        let input = vec![
            Record::new("a", "1"),
            Record::new("a", "2"),
            Record::new("a", "3"),
            Record::new("b", "4"),
        ];
        let mut gr = GroupedRead::new(input.into_iter());
        {
            let mut g = gr.next_group().unwrap();
            assert_eq!(g.next(), Some(String::from("1")));
        }
        let g = gr.next_group().unwrap();
        assert_eq!(g.key(), "b");
        assert_eq!(g.collect::<Vec<_>>(), vec![String::from("4")]);
        assert!(gr.next_group().is_none());
    }

    #[test]
    fn test_reduce_join() {
        let reducer: ReducerF = Arc::new(|e: &mut REmitter, vs: MultiRecord<'_>| {
            e.emit(vs.collect::<Vec<_>>().join(","))
        });
        let input = vec![
            Record::new("1", "a"),
            Record::new("1", "b"),
            Record::new("2", "c"),
        ];
        let out: Vec<Record> = ReduceOutput::new(reducer, input.into_iter()).collect();
        assert_eq!(out, vec![Record::new("1", "a,b"), Record::new("2", "c")]);
    }

    #[test]
    fn test_reduce_multiple_and_no_values() {
        // Emits each value twice for "x", nothing for "y".
        let reducer: ReducerF = Arc::new(|e: &mut REmitter, vs: MultiRecord<'_>| {
            if vs.key() == "x" {
                for v in vs {
                    e.emit(v.clone());
                    e.emit(v);
                }
            }
        });
        let input = vec![Record::new("x", "1"), Record::new("y", "2")];
        let out: Vec<Record> = ReduceOutput::new(reducer, input.into_iter()).collect();
        assert_eq!(out, vec![Record::new("x", "1"), Record::new("x", "1")]);
    }
}
