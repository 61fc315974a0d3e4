//! # Measurement Core
//!
//! Base data structures shared by every benchmark: the precision policy that
//! controls how often an observation is repeated, the message-size grid, the
//! result record (including its packed wire form, used whenever results
//! travel between ranks), and the repetition controller that turns a stream
//! of raw observations into a statistically qualified mean.
//!
//! ## Repetition protocol
//!
//! Each timing method owns an observation loop; the [`Series`] type supplies
//! the shared policy. One rank — the coordinator, which rank that is depends
//! on the timing method — accumulates the sample and, once at least
//! `max(min_reps, 3)` observations exist, tests whether the relative
//! confidence half-width has dropped below the target. The resulting stop
//! decision is always propagated to every co-participant of the next
//! observation before that observation starts, so no rank runs an iteration
//! its partners have abandoned.
//!
//! When `min_reps == max_reps` the policy is fixed-count: the per-iteration
//! statistics and the stop exchange are skipped entirely, and the confidence
//! interval is computed once from the finished sample.

use crate::stats;
use crate::transport::{Communicator, TransportError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bcast;
pub mod collective;
pub mod p2p;

pub use bcast::{measure_bcast, measure_bcast_msgset, BcastOp};
pub use collective::{
    measure_coll, measure_global, measure_global_msgset, measure_max, measure_max_msgset,
    measure_root, measure_root_msgset, TimingMethod,
};
pub use p2p::{
    measure_allp2p, measure_overhead_eager, measure_overhead_rdvz, measure_p2p,
    measure_p2p_msgset, measure_transfer,
};

/// Errors surfaced by the timing methods.
#[derive(Debug, Error)]
pub enum MeasureError {
    /// The operation container reported a failure at one or more ranks.
    #[error("operation '{operation}' failed at one or more ranks")]
    Operation { operation: String },

    /// A point-to-point benchmark was requested on a group of fewer than
    /// two ranks.
    #[error("cannot run point-to-point benchmarks on a group of {size} ranks (need >= 2)")]
    DegenerateGroup { size: usize },

    /// The transport failed; propagated as-is.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Statistical precision of a measurement.
///
/// With `min_reps < max_reps` the observation loop runs until the relative
/// confidence half-width `ci * reps / sum(T) < eps` at confidence level `cl`,
/// or until `max_reps`. With `min_reps == max_reps` the loop runs exactly
/// that many times and `cl`/`eps` are ignored. An `eps` of zero therefore
/// means "never stop early".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Precision {
    /// Minimum number of repetitions.
    pub min_reps: usize,
    /// Maximum number of repetitions.
    pub max_reps: usize,
    /// Confidence level in (0, 1).
    pub cl: f64,
    /// Relative-error target in (0, 1).
    pub eps: f64,
}

impl Precision {
    /// Fixed-count policy: exactly `reps` observations, no early exit.
    pub fn fixed(reps: usize) -> Self {
        Self {
            min_reps: reps,
            max_reps: reps,
            cl: 0.0,
            eps: 0.0,
        }
    }

    /// Whether the adaptive machinery is disabled.
    pub fn is_fixed(&self) -> bool {
        self.min_reps == self.max_reps
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            min_reps: crate::defaults::MIN_REPS,
            max_reps: crate::defaults::MAX_REPS,
            cl: crate::defaults::CONFIDENCE_LEVEL,
            eps: crate::defaults::RELATIVE_ERROR,
        }
    }
}

/// The message sizes a sweep visits.
///
/// With `stride > 0` sizes are selected regularly from `min_size` up to (but
/// excluding) `max_size`. With `stride == 0` they are selected adaptively at
/// runtime based on `max_diff`, `min_stride` and `max_num`; see
/// [`crate::sweep`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MsgSet {
    /// Minimum message size in bytes.
    pub min_size: usize,
    /// Maximum message size in bytes.
    pub max_size: usize,
    /// Fixed stride in bytes; zero selects the adaptive mode.
    pub stride: usize,
    /// Maximum relative deviation from the two-point linear model that the
    /// adaptive mode tolerates before refining. In (0, 1].
    pub max_diff: f64,
    /// Floor on the adaptive stride, in bytes. Positive.
    pub min_stride: usize,
    /// Ceiling on the number of sizes the adaptive mode visits.
    pub max_num: usize,
}

impl Default for MsgSet {
    fn default() -> Self {
        Self {
            min_size: crate::defaults::MIN_SIZE,
            max_size: crate::defaults::MAX_SIZE,
            stride: crate::defaults::STRIDE,
            max_diff: crate::defaults::MAX_DIFF,
            min_stride: crate::defaults::MIN_STRIDE,
            max_num: crate::defaults::MAX_NUM,
        }
    }
}

/// Result of one measurement and its reliability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Message size in bytes.
    pub m: usize,
    /// Mean observed time in seconds.
    pub t: f64,
    /// Worst-case clock resolution attached to this result; a reported time
    /// below this floor is not meaningful.
    pub wtick: f64,
    /// Number of repetitions the benchmark actually took.
    pub reps: usize,
    /// Confidence half-width for the mean, `|mean - mu| < ci` at the
    /// configured confidence level.
    pub ci: f64,
}

/// Byte length of the packed wire form of a [`Measurement`].
pub const WIRE_SIZE: usize = 32;

impl Measurement {
    /// Packs the record as the native-endian tuple
    /// `(M: i32, T: f64, wtick: f64, reps: i32, ci: f64)`.
    ///
    /// Cross-rank exchanges treat this as an opaque byte array; it is only
    /// ever decoded on the platform that produced it.
    pub fn to_wire(&self) -> [u8; WIRE_SIZE] {
        let mut out = [0u8; WIRE_SIZE];
        out[0..4].copy_from_slice(&(self.m as i32).to_ne_bytes());
        out[4..12].copy_from_slice(&self.t.to_ne_bytes());
        out[12..20].copy_from_slice(&self.wtick.to_ne_bytes());
        out[20..24].copy_from_slice(&(self.reps as i32).to_ne_bytes());
        out[24..32].copy_from_slice(&self.ci.to_ne_bytes());
        out
    }

    /// Unpacks a record previously produced by [`Measurement::to_wire`].
    pub fn from_wire(buf: &[u8]) -> Self {
        let mut i32buf = [0u8; 4];
        let mut f64buf = [0u8; 8];
        i32buf.copy_from_slice(&buf[0..4]);
        let m = i32::from_ne_bytes(i32buf) as usize;
        f64buf.copy_from_slice(&buf[4..12]);
        let t = f64::from_ne_bytes(f64buf);
        f64buf.copy_from_slice(&buf[12..20]);
        let wtick = f64::from_ne_bytes(f64buf);
        i32buf.copy_from_slice(&buf[20..24]);
        let reps = i32::from_ne_bytes(i32buf) as usize;
        f64buf.copy_from_slice(&buf[24..32]);
        let ci = f64::from_ne_bytes(f64buf);
        Self {
            m,
            t,
            wtick,
            reps,
            ci,
        }
    }
}

/// Worst-case clock resolution across the group.
pub fn max_tick(comm: &dyn Communicator) -> Result<f64, TransportError> {
    comm.allreduce_max_f64(comm.tick())
}

/// Relative deviation of `result` from the linear model through the two
/// preceding results `prev[0] = (M1, T1)` and `prev[1] = (M2, T2)`:
///
/// ```text
/// | 1 - T * (M2 - M1) / (T2 * (M - M1) - T1 * (M - M2)) |
/// ```
pub fn linear_model_diff(result: &Measurement, prev: [&Measurement; 2]) -> f64 {
    let m = result.m as f64;
    let m1 = prev[0].m as f64;
    let m2 = prev[1].m as f64;
    (1.0 - result.t * (m2 - m1) / (prev[1].t * (m - m1) - prev[0].t * (m - m2))).abs()
}

/// The coordinator-side sample of one observation series.
///
/// Timing methods push each observation in and ask [`Series::converged`]
/// after every candidate point; the caller is responsible for propagating
/// the decision to its co-participants.
pub struct Series {
    samples: Vec<f64>,
    sum: f64,
    ci: f64,
}

impl Series {
    pub fn new(precision: &Precision) -> Self {
        Self {
            samples: Vec::with_capacity(precision.max_reps),
            sum: 0.0,
            ci: 0.0,
        }
    }

    /// Records one observation.
    pub fn record(&mut self, t: f64) {
        self.samples.push(t);
        self.sum += t;
    }

    /// Number of observations recorded so far.
    pub fn reps(&self) -> usize {
        self.samples.len()
    }

    /// Whether the sample is large enough for statistical analysis.
    pub fn analyzable(&self, precision: &Precision) -> bool {
        self.reps() >= precision.min_reps.max(3)
    }

    /// Recomputes the confidence half-width and tests the relative-error
    /// target. Callers must gate on [`Series::analyzable`].
    pub fn converged(&mut self, precision: &Precision) -> bool {
        let reps = self.reps();
        self.ci = stats::ci(precision.cl, reps, &self.samples);
        self.ci * reps as f64 / self.sum < precision.eps
    }

    /// Computes the half-width once, for fixed-count runs that skipped the
    /// per-iteration analysis. A no-op on samples too small to analyze and
    /// on degenerate confidence levels (a fixed-count policy may carry
    /// `cl == 0` to mean "no statistics at all").
    pub fn finalize_ci(&mut self, precision: &Precision) {
        if self.reps() >= 3 && precision.cl > 0.0 && precision.cl < 1.0 {
            self.ci = stats::ci(precision.cl, self.reps(), &self.samples);
        }
    }

    /// Turns the finished series into a result record.
    pub fn into_measurement(self, m: usize, wtick: f64) -> Measurement {
        let reps = self.samples.len();
        Measurement {
            m,
            t: if reps > 0 { self.sum / reps as f64 } else { 0.0 },
            wtick,
            reps,
            ci: self.ci,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_round_trips() {
        let record = Measurement {
            m: 4096,
            t: 1.25e-4,
            wtick: 1e-9,
            reps: 42,
            ci: 3.5e-6,
        };
        let wire = record.to_wire();
        assert_eq!(wire.len(), WIRE_SIZE);
        assert_eq!(Measurement::from_wire(&wire), record);
    }

    #[test]
    fn constant_sample_converges_at_third_observation() {
        // A perfectly repeatable observation must satisfy any positive
        // relative-error target as soon as analysis is permitted.
        let precision = Precision {
            min_reps: 3,
            max_reps: 100,
            cl: 0.95,
            eps: 0.01,
        };
        let mut series = Series::new(&precision);
        series.record(1.0);
        series.record(1.0);
        assert!(!series.analyzable(&precision));
        series.record(1.0);
        assert!(series.analyzable(&precision));
        assert!(series.converged(&precision));
        let result = series.into_measurement(64, 1e-9);
        assert_eq!(result.reps, 3);
        assert_eq!(result.t, 1.0);
        assert_eq!(result.ci, 0.0);
    }

    #[test]
    fn zero_eps_never_converges() {
        let precision = Precision {
            min_reps: 3,
            max_reps: 10,
            cl: 0.95,
            eps: 0.0,
        };
        let mut series = Series::new(&precision);
        for _ in 0..10 {
            series.record(2.0);
        }
        assert!(!series.converged(&precision));
    }

    #[test]
    fn linear_model_diff_is_zero_on_the_line() {
        // T(M) = 1 + 2 M: a third point on the line deviates by nothing.
        let a = Measurement { m: 10, t: 21.0, wtick: 0.0, reps: 1, ci: 0.0 };
        let b = Measurement { m: 20, t: 41.0, wtick: 0.0, reps: 1, ci: 0.0 };
        let c = Measurement { m: 40, t: 81.0, wtick: 0.0, reps: 1, ci: 0.0 };
        assert!(linear_model_diff(&c, [&a, &b]) < 1e-12);

        // A point far off the line deviates materially.
        let d = Measurement { m: 40, t: 160.0, wtick: 0.0, reps: 1, ci: 0.0 };
        assert!(linear_model_diff(&d, [&a, &b]) > 0.5);
    }
}
