//! # Calibration Registry
//!
//! The root, global and bcast timers each subtract a known bias from their
//! raw observations; measuring that bias is expensive, so the results are
//! cached here per process. Each slot records the identity of the group it
//! was measured against and is reused only while subsequent measurements
//! target the same group; a different group releases the slot and re-runs
//! the calibration.
//!
//! The registry is an explicit value threaded through the timing methods —
//! one per benchmarking context, accessed from a single rank thread.

use crate::containers::p2p::RoundtripContainer;
use crate::measure::{measure_allp2p, MeasureError, Measurement, Precision};
use crate::pairs::build_pairs;
use crate::transport::{recv_f64, send_f64, CommId, Communicator, Tag, TransportError};
use tracing::debug;

const TAG: Tag = 0;

struct RootSlot {
    comm: CommId,
    barrier_mean: f64,
}

struct GlobalSlot {
    comm: CommId,
    delta: Vec<f64>,
}

struct BcastSlot {
    comm: CommId,
    roundtrips: Vec<Measurement>,
}

/// Cached calibration state, keyed by group identity.
#[derive(Default)]
pub struct CalibrationRegistry {
    root: Option<RootSlot>,
    global: Option<GlobalSlot>,
    bcast: Option<BcastSlot>,
}

impl CalibrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mean barrier latency as observed by the local rank, for the root
    /// timer. Measured on first use against a group and reused until a
    /// different group is targeted. Collective.
    pub fn barrier_mean(
        &mut self,
        comm: &dyn Communicator,
        reps: usize,
    ) -> Result<f64, MeasureError> {
        if let Some(slot) = &self.root {
            if slot.comm == comm.id() {
                return Ok(slot.barrier_mean);
            }
        }
        debug!("calibrating barrier latency over {} repetitions", reps);
        let barrier_mean = calibrate_barrier(comm, reps)?;
        self.root = Some(RootSlot {
            comm: comm.id(),
            barrier_mean,
        });
        Ok(barrier_mean)
    }

    /// Per-rank clock offsets relative to the local clock, for the global
    /// timer. `delta[j]` estimates the offset of rank `j`'s wall clock;
    /// `delta[self] == 0`. Collective.
    pub fn clock_offsets(
        &mut self,
        comm: &dyn Communicator,
        parallel: bool,
        reps: usize,
    ) -> Result<&[f64], MeasureError> {
        let id = comm.id();
        let slot = match self.global.take() {
            Some(slot) if slot.comm == id => slot,
            _ => {
                debug!("calibrating clock offsets over {} round trips per pair", reps);
                GlobalSlot {
                    comm: id,
                    delta: calibrate_clock_offsets(comm, parallel, reps)?,
                }
            }
        };
        Ok(self.global.insert(slot).delta.as_slice())
    }

    /// Empty-message round-trip times for every rank pair, for the bcast
    /// timer, in the flat upper-triangular order of
    /// [`crate::pairs::pair_index`]. Collective.
    pub fn roundtrips(
        &mut self,
        comm: &dyn Communicator,
        parallel: bool,
        reps: usize,
    ) -> Result<&[Measurement], MeasureError> {
        let id = comm.id();
        let slot = match self.bcast.take() {
            Some(slot) if slot.comm == id => slot,
            _ => {
                debug!("calibrating empty round-trip matrix, {} repetitions", reps);
                let mut container = RoundtripContainer::new();
                // A fixed repetition count: a series of uninterrupted
                // ping-pongs cannot carry a mid-series stop exchange without
                // perturbing the very thing being calibrated.
                let precision = Precision::fixed(reps);
                BcastSlot {
                    comm: id,
                    roundtrips: measure_allp2p(comm, &mut container, parallel, 0, &precision)?,
                }
            }
        };
        Ok(self.bcast.insert(slot).roundtrips.as_slice())
    }

    /// Drops all cached calibrations.
    pub fn invalidate(&mut self) {
        self.root = None;
        self.global = None;
        self.bcast = None;
    }
}

/// Times `reps` consecutive barriers after a double-barrier warm-up.
fn calibrate_barrier(comm: &dyn Communicator, reps: usize) -> Result<f64, TransportError> {
    comm.barrier()?;
    comm.barrier()?;
    let start = comm.now();
    for _ in 0..reps {
        comm.barrier()?;
    }
    Ok((comm.now() - start) / reps.max(1) as f64)
}

/// Estimates the offset of every peer clock by interval bisection over a
/// series of round trips, walking the non-overlapping pair schedule.
///
/// If the transport declares the wall clock globally synchronous the whole
/// vector is zero and no traffic is exchanged.
fn calibrate_clock_offsets(
    comm: &dyn Communicator,
    parallel: bool,
    reps: usize,
) -> Result<Vec<f64>, TransportError> {
    let size = comm.size();
    let rank = comm.rank();
    let mut delta = vec![0.0; size];
    if comm.clock_is_global() {
        return Ok(delta);
    }
    for round in build_pairs(size) {
        comm.barrier()?;
        for (i, j) in round {
            if !parallel {
                comm.barrier()?;
            }
            if rank != i && rank != j {
                continue;
            }
            let peer = if rank == i { j } else { i };
            let mut lower = f64::NEG_INFINITY;
            let mut upper = f64::INFINITY;
            let mut past = comm.now();
            for _ in 0..reps {
                let (remote, local) = if rank == i {
                    send_f64(comm, past, j, TAG)?;
                    let remote = recv_f64(comm, j, TAG)?;
                    (remote, comm.now())
                } else {
                    let remote = recv_f64(comm, i, TAG)?;
                    let local = comm.now();
                    send_f64(comm, local, i, TAG)?;
                    (remote, local)
                };
                lower = lower.max(remote - local);
                upper = upper.min(remote - past);
                past = local;
            }
            delta[peer] = (lower + upper) / 2.0;
        }
    }
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalClusterBuilder;

    #[test]
    fn clock_offsets_recover_injected_skew() {
        let skew = vec![0.0, 0.25, -0.125];
        let results = LocalClusterBuilder::new(3)
            .clock_offsets(skew.clone())
            .run(|comm| {
                let mut registry = CalibrationRegistry::new();
                registry.clock_offsets(comm, true, 8).unwrap().to_vec()
            });
        for (rank, delta) in results.iter().enumerate() {
            assert_eq!(delta[rank], 0.0);
            for (peer, &d) in delta.iter().enumerate() {
                if peer == rank {
                    continue;
                }
                // delta[j] estimates (peer clock - local clock); the round
                // trips are fast compared to the quarter-second skews.
                let expected = skew[peer] - skew[rank];
                assert!(
                    (d - expected).abs() < 0.05,
                    "rank {rank} peer {peer}: got {d}, expected {expected}"
                );
            }
        }
    }

    #[test]
    fn global_clock_skips_the_exchange() {
        let results = LocalClusterBuilder::new(4).run(|comm| {
            let mut registry = CalibrationRegistry::new();
            registry.clock_offsets(comm, true, 4).unwrap().to_vec()
        });
        for delta in results {
            assert!(delta.iter().all(|&d| d == 0.0));
        }
    }

    #[test]
    fn slots_are_keyed_by_group_identity() {
        LocalClusterBuilder::new(2).run(|comm| {
            let mut registry = CalibrationRegistry::new();
            let first = registry.barrier_mean(comm, 4).unwrap();
            // Same group: the cached value comes back bit-identical without
            // re-measuring (a re-measurement would almost surely differ).
            let second = registry.barrier_mean(comm, 4).unwrap();
            assert_eq!(first, second);

            // A different group forces recalibration; both ranks must take
            // this path together since calibration is collective.
            let dup = comm.duplicate().unwrap();
            let _ = registry.barrier_mean(dup.as_ref(), 4).unwrap();
        });
    }
}
