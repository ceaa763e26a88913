// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonically increasing counter handing out globally unique column ids.
///
/// Within one driver call the sequence is used by a single thread, but the
/// wider system may share it across analyses, so the increment is atomic.
/// Every id drawn after [`advance_past`](Self::advance_past) returns is
/// strictly greater than the watermark passed in.
#[derive(Debug)]
pub struct ColumnIdSequence {
    next: AtomicI64,
}

impl Default for ColumnIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnIdSequence {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Draws the next id.
    pub fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`next`](Self::next) will return.
    pub fn current(&self) -> i64 {
        self.next.load(Ordering::Relaxed)
    }

    /// The most recently drawn id, or 0 if nothing was drawn yet.
    pub fn last_value(&self) -> i64 {
        self.current() - 1
    }

    /// Draws and discards ids until the drawn id reaches `column_id`, so
    /// that all ids drawn afterwards are strictly greater than it.
    pub fn advance_past(&self, column_id: i64) {
        while self.next() < column_id {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_strictly_increasing() {
        let seq = ColumnIdSequence::new();
        let a = seq.next();
        let b = seq.next();
        assert!(b > a, "ids must increase");
        assert_eq!(seq.last_value(), b);
    }

    #[test]
    fn advance_past_guarantees_disjoint_ids() {
        let seq = ColumnIdSequence::new();
        seq.advance_past(100);
        assert!(seq.next() > 100, "ids after advance must clear the watermark");
    }

    #[test]
    fn advance_past_zero_is_harmless() {
        let seq = ColumnIdSequence::new();
        seq.advance_past(0);
        assert!(seq.next() >= 1);
    }
}
