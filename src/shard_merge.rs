//! Implements a merge tree to merge an arbitrary number of sorted runs.
//! Genericized in order to build arbitrary merge trees; used by the external sort to merge
//! the runs it spilled to disk.

use std::cmp::Ordering;
use std::iter;

use crate::sort::Comparer;

/// See module description.
/// This type uses dynamic instead of static dispatch because it realizes an arbitrary structure
/// and can therefore not work with a single type signature.
///
/// On ties the left side wins, and left subtrees hold earlier sources, so elements that compare
/// equal come out in source order.
pub struct ShardMergeIterator<'a, T> {
    left: Box<dyn Iterator<Item = T> + Send + 'a>,
    right: Box<dyn Iterator<Item = T> + Send + 'a>,
    cmp: Comparer<T>,

    left_peeked: Option<T>,
    right_peeked: Option<T>,
}

impl<'a, T: Send + 'a> Iterator for ShardMergeIterator<'a, T> {
    type Item = T;
    fn next(&mut self) -> Option<Self::Item> {
        // fill up
        if self.left_peeked.is_none() {
            self.left_peeked = self.left.next();
        }
        if self.right_peeked.is_none() {
            self.right_peeked = self.right.next();
        }

        // Consume peeked values
        let take_left = match (&self.left_peeked, &self.right_peeked) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(l), Some(r)) => (self.cmp)(l, r) != Ordering::Greater,
        };
        if take_left {
            self.left_peeked.take()
        } else {
            self.right_peeked.take()
        }
    }
}

impl<'a, T: Send + 'a> ShardMergeIterator<'a, T> {
    fn leaf(
        left: Box<dyn Iterator<Item = T> + Send + 'a>,
        right: Box<dyn Iterator<Item = T> + Send + 'a>,
        cmp: Comparer<T>,
    ) -> ShardMergeIterator<'a, T> {
        ShardMergeIterator {
            left,
            right,
            cmp,
            left_peeked: None,
            right_peeked: None,
        }
    }

    /// Takes multiple sorted iterators of type It and generates one ShardMergeIterator
    /// (yes, iterator over a collection of iterators).
    pub fn build<It, ItIt>(sources: ItIt, cmp: Comparer<T>) -> ShardMergeIterator<'a, T>
    where
        It: Iterator<Item = T> + Send + 'a,
        ItIt: IntoIterator<Item = It>,
    {
        let mut merged: Vec<ShardMergeIterator<'a, T>> = Vec::new();
        let mut sources = sources.into_iter();

        // Initial merging: Merge pairs of input iterators together.
        while let Some(src1) = sources.next() {
            match sources.next() {
                None => merged.push(ShardMergeIterator::leaf(
                    Box::new(src1),
                    Box::new(iter::empty()),
                    cmp,
                )),
                Some(src2) => {
                    merged.push(ShardMergeIterator::leaf(Box::new(src1), Box::new(src2), cmp))
                }
            }
        }

        // Recursively build the merge tree from the leaves.
        ShardMergeIterator::merge(merged, cmp)
    }

    /// Merge multiple ShardMergeIterators, recursively (meaning it will result in a more or less
    /// balanced merge sort tree).
    fn merge(
        mut its: Vec<ShardMergeIterator<'a, T>>,
        cmp: Comparer<T>,
    ) -> ShardMergeIterator<'a, T> {
        match its.len() {
            0 => ShardMergeIterator::leaf(Box::new(iter::empty()), Box::new(iter::empty()), cmp),
            1 => its.remove(0),
            2 => {
                let it2 = its.remove(1);
                let it1 = its.remove(0);
                ShardMergeIterator::leaf(Box::new(it1), Box::new(it2), cmp)
            }
            _ => {
                // its is left part, right is right part
                let split_at = its.len() / 2;
                let right = its.split_off(split_at);
                ShardMergeIterator::leaf(
                    Box::new(ShardMergeIterator::merge(its, cmp)),
                    Box::new(ShardMergeIterator::merge(right, cmp)),
                    cmp,
                )
            }
        }
    }
}
