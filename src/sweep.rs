//! # Message-Size Sweep
//!
//! Drives a single-point timing method over a series of message sizes. Two
//! modes share one cursor:
//!
//! - **Fixed stride** (`stride > 0`): sizes `min_size, min_size + stride, …`
//!   strictly below `max_size`.
//! - **Adaptive** (`stride == 0`): after each result the cursor compares it
//!   with a linear extrapolation through its two predecessors in size order.
//!   A good fit doubles the working stride and jumps ahead; a poor fit
//!   halves the stride (down to `min_stride`) and steps *backward*, inserting
//!   a finer point between two already-measured ones. The visit count is
//!   capped by `max_num`.
//!
//! The cursor only decides sizes and list positions; actually timing a size
//! and distributing the next size to the other participants is the business
//! of the sweep drivers in `crate::measure`.

use crate::measure::{linear_model_diff, Measurement, MsgSet};

/// Cursor over the message sizes of one sweep.
///
/// Results are kept in message-size order; [`SizeCursor::advance`] inserts
/// the newest record at the cursor position (shifting later entries) and
/// computes the next size.
pub struct SizeCursor {
    msgset: MsgSet,
    m: usize,
    stride: usize,
    pos: usize,
    count: usize,
}

impl SizeCursor {
    pub fn new(msgset: &MsgSet) -> Self {
        Self {
            msgset: *msgset,
            m: msgset.min_size,
            stride: msgset.min_stride.max(1),
            pos: 0,
            count: 0,
        }
    }

    /// The size to measure next, or `None` when the sweep is finished.
    pub fn current(&self) -> Option<usize> {
        let within = if self.msgset.stride > 0 {
            self.m < self.msgset.max_size
        } else {
            self.m <= self.msgset.max_size && self.count <= self.msgset.max_num
        };
        within.then_some(self.m)
    }

    /// Number of results recorded so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Records the result for the current size and moves the cursor.
    ///
    /// `results` must be the list this cursor has been building; the record
    /// is inserted at the cursor position to keep the list size-ordered.
    pub fn advance(&mut self, results: &mut Vec<Measurement>, result: Measurement) {
        results.insert(self.pos, result);
        self.count += 1;

        if self.msgset.stride > 0 {
            self.m += self.msgset.stride;
            self.pos += 1;
            return;
        }

        // Adaptive selection; loops only to skip over sizes already measured.
        loop {
            let fits = self.pos > 1
                && linear_model_diff(&result, [&results[self.pos - 2], &results[self.pos - 1]])
                    < self.msgset.max_diff;
            if fits {
                self.stride *= 2;
                self.m += self.stride;
                self.catch_up(results);
            } else if self.stride / 2 > self.msgset.min_stride {
                self.stride /= 2;
                self.m = self.m.saturating_sub(self.stride);
            } else {
                self.m += self.stride;
                self.catch_up(results);
            }
            if !(self.pos < self.count && results[self.pos].m == self.m) {
                break;
            }
        }
    }

    fn catch_up(&mut self, results: &[Measurement]) {
        while self.pos < self.count && results[self.pos].m < self.m {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_sweep<F: Fn(usize) -> f64>(msgset: MsgSet, timer: F) -> Vec<Measurement> {
        let mut cursor = SizeCursor::new(&msgset);
        let mut results = Vec::new();
        while let Some(m) = cursor.current() {
            let record = Measurement {
                m,
                t: timer(m),
                wtick: 1e-9,
                reps: 1,
                ci: 0.0,
            };
            cursor.advance(&mut results, record);
        }
        results
    }

    #[test]
    fn fixed_stride_stops_strictly_before_max_size() {
        let msgset = MsgSet {
            min_size: 0,
            max_size: 4,
            stride: 2,
            ..MsgSet::default()
        };
        let sizes: Vec<usize> = run_sweep(msgset, |_| 1.0).iter().map(|r| r.m).collect();
        assert_eq!(sizes, vec![0, 2]);
    }

    #[test]
    fn adaptive_doubles_stride_on_a_linear_timer() {
        let msgset = MsgSet {
            min_size: 0,
            max_size: 10000,
            stride: 0,
            max_diff: 0.1,
            min_stride: 64,
            max_num: 5,
        };
        // T(M) = a + b M fits the two-point model exactly, so each step after
        // the first two doubles the working stride.
        let results = run_sweep(msgset, |m| 1e-5 + 2e-8 * m as f64);
        let sizes: Vec<usize> = results.iter().map(|r| r.m).collect();
        assert_eq!(sizes, vec![0, 64, 128, 256, 512, 1024]);
        assert!(sizes.len() <= msgset.max_num + 1);
    }

    #[test]
    fn adaptive_refines_backward_where_the_model_breaks() {
        let msgset = MsgSet {
            min_size: 0,
            max_size: 2000,
            stride: 0,
            max_diff: 0.1,
            min_stride: 64,
            max_num: 20,
        };
        // A step in the cost function around 300 bytes breaks the linear
        // model and must trigger stride halving and backward insertion.
        let results = run_sweep(msgset, |m| if m < 300 { 1.0 } else { 10.0 });
        let sizes: Vec<usize> = results.iter().map(|r| r.m).collect();

        // The list stays sorted despite out-of-order insertion.
        let mut sorted = sizes.clone();
        sorted.sort_unstable();
        assert_eq!(sizes, sorted);

        // A refined point was inserted between 256 and 512.
        assert!(sizes.iter().any(|&m| m > 256 && m < 512));
        // No size measured twice.
        let mut dedup = sizes.clone();
        dedup.dedup();
        assert_eq!(dedup, sizes);
    }

    #[test]
    fn adaptive_respects_max_size() {
        let msgset = MsgSet {
            min_size: 0,
            max_size: 500,
            stride: 0,
            max_diff: 0.1,
            min_stride: 64,
            max_num: 1000,
        };
        let results = run_sweep(msgset, |m| 1.0 + m as f64);
        assert!(results.iter().all(|r| r.m <= 500));
        assert!(!results.is_empty());
    }
}
