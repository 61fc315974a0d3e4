//! # Point-to-Point Benchmarks
//!
//! Timers for a single rank pair, for every pair of the group, for the
//! eager/rendezvous overhead hooks, and for a ring transfer.
//!
//! ## Protocol
//!
//! One observation of the pair protocol is handshake-bracketed: the mirror
//! sends a zero-byte token, the measuring rank receives it (aligning the two
//! so the timer starts at a known point), starts the clock, runs its half of
//! the exchange while the mirror runs the responding half, and stops the
//! clock. The measuring rank owns the statistics; after each candidate stop
//! point it sends the decision to the mirror so both leave the loop on the
//! same iteration.
//!
//! ## Sweeps
//!
//! The per-size drivers walk a [`SizeCursor`]. Only the measuring rank sees
//! the results, so it also decides the next message size and sends it to the
//! mirror after every size (a `u64::MAX` sentinel ends the sweep).
//!
//! ## Failure semantics
//!
//! Unlike the collective timers, which combine execute statuses with an
//! all-reduce so every rank aborts on the same iteration, the pair protocol
//! has no slot for a status exchange that would not sit inside the timed
//! window. A failing hook therefore surfaces at the failing rank only:
//! transport errors propagate unchanged, anything else becomes an operation
//! failure, and in either case the rank leaves the protocol immediately. The
//! peer learns of the breakdown through the transport itself — on a
//! transport that detects peer departure (the bundled in-process cluster
//! does) its next blocking call fails; on one that cannot, it blocks. See
//! the [`P2pContainer`] contract.

use crate::containers::{OperationError, P2pContainer};
use crate::measure::{MeasureError, Measurement, MsgSet, Precision, Series, WIRE_SIZE};
use crate::pairs::build_pairs;
use crate::sweep::SizeCursor;
use crate::transport::{bcast_flag, bcast_u64, recv_u64, send_u64, Communicator, Tag};
use tracing::{debug, warn};

/// Tag used for the engine's handshake, stop-flag and next-size traffic,
/// shared with the containers by convention.
const TAG: Tag = 0;

/// Sentinel announcing the end of a sweep to the non-coordinating side.
const SWEEP_END: u64 = u64::MAX;

/// Which of the container's measure-side hooks a sweep exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum P2pMode {
    /// The full exchange: `execute_measure` against `execute_mirror`.
    Roundtrip,
    /// Eager-send overhead: the measure side returns as soon as the message
    /// has left, without waiting for the transfer to be acknowledged.
    EagerOverhead,
    /// Rendezvous overhead: the measure side returns only once the mirror
    /// has accepted the transfer.
    RendezvousOverhead,
}

fn check_group_size(comm: &dyn Communicator) -> Result<(), MeasureError> {
    let size = comm.size();
    if size < 2 {
        if comm.rank() == 0 {
            warn!(
                "cannot run point-to-point benchmarks on {} ranks (need >= 2)",
                size
            );
        }
        return Err(MeasureError::DegenerateGroup { size });
    }
    Ok(())
}

/// Maps a hook failure for surfacing at the failing rank. There is no joint
/// abort on the pair protocols; the peer observes the breakdown through the
/// transport (see the module docs).
fn p2p_failure(container: &dyn P2pContainer, error: OperationError) -> MeasureError {
    match error {
        OperationError::Transport(e) => MeasureError::Transport(e),
        _ => MeasureError::Operation {
            operation: container.operation().to_string(),
        },
    }
}

/// Runs one observation series for the pair `(measure, mirror)` at message
/// size `m`. Returns the sample at the measuring rank, `None` at the mirror.
fn p2p_series(
    comm: &dyn Communicator,
    container: &mut dyn P2pContainer,
    measure: usize,
    mirror: usize,
    m: usize,
    precision: &Precision,
    mode: P2pMode,
) -> Result<Option<Series>, MeasureError> {
    let rank = comm.rank();
    let fixed = precision.is_fixed();
    let mut series = Series::new(precision);
    let mut reps = 0usize;
    let mut stop = false;

    container
        .initialize(comm, m)
        .map_err(|e| p2p_failure(container, e))?;
    while !stop && reps < precision.max_reps {
        if rank == measure {
            // Handshake: wait for the mirror before starting the clock.
            comm.recv(&mut [], mirror, TAG)?;
            let start = comm.now();
            let outcome = match mode {
                P2pMode::Roundtrip => container.execute_measure(comm, m, mirror),
                P2pMode::EagerOverhead => container.execute_measure_eager(comm, m, mirror),
                P2pMode::RendezvousOverhead => {
                    container.execute_measure_rendezvous(comm, m, mirror)
                }
            };
            outcome.map_err(|e| p2p_failure(container, e))?;
            series.record(comm.now() - start);
        } else {
            comm.send(&[], measure, TAG)?;
            match mode {
                P2pMode::Roundtrip => container.execute_mirror(comm, m, measure),
                P2pMode::EagerOverhead => {
                    container.execute_mirror_overhead(comm, m, measure, false)
                }
                P2pMode::RendezvousOverhead => {
                    container.execute_mirror_overhead(comm, m, measure, true)
                }
            }
            .map_err(|e| p2p_failure(container, e))?;
        }
        reps += 1;
        if !fixed && reps >= precision.min_reps.max(3) {
            if rank == measure {
                stop = series.converged(precision);
                comm.send(&[stop as u8], mirror, TAG)?;
            } else {
                let mut flag = [0u8];
                comm.recv(&mut flag, measure, TAG)?;
                stop = flag[0] != 0;
            }
        }
    }
    container
        .finalize(comm)
        .map_err(|e| p2p_failure(container, e))?;

    if rank == measure {
        if fixed {
            series.finalize_ci(precision);
        }
        Ok(Some(series))
    } else {
        Ok(None)
    }
}

/// Point-to-point benchmark for one message size.
///
/// Estimates the execution time of the container's exchange between the
/// `measure` and `mirror` ranks. Ranks outside the pair return immediately;
/// the result is significant only at the measuring rank.
pub fn measure_p2p(
    comm: &dyn Communicator,
    container: &mut dyn P2pContainer,
    measure: usize,
    mirror: usize,
    m: usize,
    precision: &Precision,
) -> Result<Option<Measurement>, MeasureError> {
    check_group_size(comm)?;
    let rank = comm.rank();
    if rank != measure && rank != mirror {
        return Ok(None);
    }
    let series = p2p_series(comm, container, measure, mirror, m, precision, P2pMode::Roundtrip)?;
    Ok(series.map(|s| s.into_measurement(m, comm.tick())))
}

/// Shared sweep driver for the pair protocols.
fn p2p_sweep(
    comm: &dyn Communicator,
    container: &mut dyn P2pContainer,
    measure: usize,
    mirror: usize,
    msgset: &MsgSet,
    precision: &Precision,
    mode: P2pMode,
) -> Result<Option<Vec<Measurement>>, MeasureError> {
    check_group_size(comm)?;
    let rank = comm.rank();
    if rank != measure && rank != mirror {
        return Ok(None);
    }

    if rank == measure {
        let wtick = comm.tick();
        let mut cursor = SizeCursor::new(msgset);
        let mut results = Vec::new();
        while let Some(m) = cursor.current() {
            debug!("p2p sweep {}-{}: size {}", measure, mirror, m);
            let series = p2p_series(comm, container, measure, mirror, m, precision, mode)?;
            let series = series.unwrap_or_else(|| Series::new(precision));
            cursor.advance(&mut results, series.into_measurement(m, wtick));
            let next = cursor.current().map(|m| m as u64).unwrap_or(SWEEP_END);
            send_u64(comm, next, mirror, TAG)?;
        }
        Ok(Some(results))
    } else {
        // The mirror can compute the first size from the message set alone;
        // every subsequent size is decided at the measuring rank.
        let mut current = SizeCursor::new(msgset).current();
        while let Some(m) = current {
            p2p_series(comm, container, measure, mirror, m, precision, mode)?;
            let next = recv_u64(comm, measure, TAG)?;
            current = (next != SWEEP_END).then_some(next as usize);
        }
        Ok(None)
    }
}

/// Point-to-point benchmark over a set of message sizes.
///
/// Results are significant only at the measuring rank.
pub fn measure_p2p_msgset(
    comm: &dyn Communicator,
    container: &mut dyn P2pContainer,
    measure: usize,
    mirror: usize,
    msgset: &MsgSet,
    precision: &Precision,
) -> Result<Option<Vec<Measurement>>, MeasureError> {
    p2p_sweep(comm, container, measure, mirror, msgset, precision, P2pMode::Roundtrip)
}

/// Sweep of the eager-send overhead between a rank pair.
pub fn measure_overhead_eager(
    comm: &dyn Communicator,
    container: &mut dyn P2pContainer,
    measure: usize,
    mirror: usize,
    msgset: &MsgSet,
    precision: &Precision,
) -> Result<Option<Vec<Measurement>>, MeasureError> {
    p2p_sweep(comm, container, measure, mirror, msgset, precision, P2pMode::EagerOverhead)
}

/// Sweep of the rendezvous-send overhead between a rank pair.
pub fn measure_overhead_rdvz(
    comm: &dyn Communicator,
    container: &mut dyn P2pContainer,
    measure: usize,
    mirror: usize,
    msgset: &MsgSet,
    precision: &Precision,
) -> Result<Option<Vec<Measurement>>, MeasureError> {
    p2p_sweep(comm, container, measure, mirror, msgset, precision, P2pMode::RendezvousOverhead)
}

/// Point-to-point benchmark between all pairs of the group.
///
/// Runs the pair protocol over the round schedule of
/// [`crate::pairs::build_pairs`]: a barrier separates consecutive rounds, and
/// with `parallel == false` an additional barrier serializes the pairs within
/// a round. The lower rank of each pair coordinates its statistics. The
/// `C(n, 2)` results are gathered to every rank, ordered by
/// `(min(i, j), max(i, j))` as in [`crate::pairs::pair_index`].
pub fn measure_allp2p(
    comm: &dyn Communicator,
    container: &mut dyn P2pContainer,
    parallel: bool,
    m: usize,
    precision: &Precision,
) -> Result<Vec<Measurement>, MeasureError> {
    check_group_size(comm)?;
    let rank = comm.rank();
    let size = comm.size();
    let wtick = comm.tick();

    // Results for pairs in which this rank is the measuring (lower) side,
    // slotted by the higher rank so the final gather is ordered correctly.
    let empty = Measurement {
        m,
        t: 0.0,
        wtick,
        reps: 0,
        ci: 0.0,
    };
    let mut local: Vec<Measurement> = vec![empty; size - rank - 1];

    for round in build_pairs(size) {
        comm.barrier()?;
        for (i, j) in round {
            if !parallel {
                comm.barrier()?;
            }
            if rank == i || rank == j {
                let series =
                    p2p_series(comm, container, i, j, m, precision, P2pMode::Roundtrip)?;
                if let Some(series) = series {
                    local[j - i - 1] = series.into_measurement(m, wtick);
                }
            }
        }
    }

    // Gather the upper-triangular result matrix to every rank as an opaque
    // byte array of packed records.
    let counts: Vec<usize> = (0..size).map(|r| WIRE_SIZE * (size - r - 1)).collect();
    let mut sendbuf = Vec::with_capacity(WIRE_SIZE * local.len());
    for record in &local {
        sendbuf.extend_from_slice(&record.to_wire());
    }
    let gathered = comm.allgatherv(&sendbuf, &counts)?;
    Ok(gathered
        .chunks_exact(WIRE_SIZE)
        .map(Measurement::from_wire)
        .collect())
}

/// Ring-transfer benchmark over the first `num_procs` ranks.
///
/// Each participant exchanges a message with both ring neighbours through the
/// container's transfer hook; rank 0 times the whole step, coordinates the
/// statistics and distributes the next message size. Ranks outside the ring
/// (and non-coordinating participants) return `None`.
pub fn measure_transfer(
    comm: &dyn Communicator,
    container: &mut dyn P2pContainer,
    msgset: &MsgSet,
    precision: &Precision,
    num_procs: usize,
) -> Result<Option<Vec<Measurement>>, MeasureError> {
    check_group_size(comm)?;
    let num_procs = num_procs.min(comm.size());
    if num_procs < 2 {
        return Err(MeasureError::DegenerateGroup { size: num_procs });
    }

    // The ring's barriers and broadcasts must involve the participants only.
    let member = comm.rank() < num_procs;
    let color = member.then_some(0);
    let Some(ring) = comm.split(color, comm.rank() as u32)? else {
        return Ok(None);
    };
    let ring = ring.as_ref();

    let rank = ring.rank();
    let dest = (rank + 1) % num_procs;
    let source = (rank + num_procs - 1) % num_procs;
    let fixed = precision.is_fixed();
    let wtick = ring.tick();

    let mut cursor = SizeCursor::new(msgset);
    let mut results: Vec<Measurement> = Vec::new();
    let mut current = cursor.current();
    while let Some(m) = current {
        if rank == 0 {
            debug!("ring transfer sweep: size {} over {} ranks", m, num_procs);
        }
        container
            .initialize(ring, m)
            .map_err(|e| p2p_failure(container, e))?;
        let mut series = Series::new(precision);
        let mut reps = 0usize;
        let mut stop = false;
        while !stop && reps < precision.max_reps {
            ring.barrier()?;
            if rank == 0 {
                let start = ring.now();
                container
                    .execute_transfer(ring, m, dest, source)
                    .map_err(|e| p2p_failure(container, e))?;
                series.record(ring.now() - start);
            } else {
                container
                    .execute_transfer(ring, m, dest, source)
                    .map_err(|e| p2p_failure(container, e))?;
            }
            reps += 1;
            if !fixed && reps >= precision.min_reps.max(3) {
                let decision = if rank == 0 {
                    series.converged(precision)
                } else {
                    false
                };
                stop = bcast_flag(ring, decision, 0)?;
            }
        }
        container
            .finalize(ring)
            .map_err(|e| p2p_failure(container, e))?;

        if rank == 0 {
            if fixed {
                series.finalize_ci(precision);
            }
            cursor.advance(&mut results, series.into_measurement(m, wtick));
            let next = cursor.current().map(|m| m as u64).unwrap_or(SWEEP_END);
            let next = bcast_u64(ring, next, 0)?;
            current = (next != SWEEP_END).then_some(next as usize);
        } else {
            let next = bcast_u64(ring, 0, 0)?;
            current = (next != SWEEP_END).then_some(next as usize);
        }
    }

    if rank == 0 {
        Ok(Some(results))
    } else {
        Ok(None)
    }
}
