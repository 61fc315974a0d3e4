//! # Specialized Broadcast Timer
//!
//! The max and root timings of a broadcast include the cost of an extra
//! confirming collective that itself travels a broadcast-like tree, biasing
//! the result. This timer avoids the bias: for each receiving rank it times a
//! block of broadcasts at the root, with the receiver confirming each
//! invocation by a zero-byte ping back to the root, and then subtracts half
//! of the calibrated empty round-trip time between root and receiver. The
//! reported time is the worst receiver's estimate.
//!
//! The block always runs exactly `max_reps` iterations: statistical early
//! termination would require mid-series synchronization, and that traffic
//! would perturb the broadcast being measured. The result therefore carries
//! no confidence interval.

use crate::calibration::CalibrationRegistry;
use crate::containers::OperationError;
use crate::measure::{max_tick, MeasureError, Measurement, MsgSet};
use crate::pairs::pair_index;
use crate::sweep::SizeCursor;
use crate::transport::{Communicator, Tag};
use tracing::debug;

const TAG: Tag = 0;

/// A broadcast implementation under test: fills (or reads) `buf` rooted at
/// the given rank, collectively over `comm`.
pub type BcastOp<'a> =
    &'a mut dyn FnMut(&dyn Communicator, &mut [u8], usize) -> Result<(), OperationError>;

/// Measures one broadcast invocation of `m` bytes via per-receiver
/// ping-confirmed blocks.
///
/// Requires the empty round-trip matrix; it is calibrated through `registry`
/// on first use per group. Every rank returns the same result record with
/// `reps == max_reps` and `ci == 0`.
pub fn measure_bcast(
    comm: &dyn Communicator,
    registry: &mut CalibrationRegistry,
    bcast: BcastOp<'_>,
    root: usize,
    m: usize,
    max_reps: usize,
) -> Result<Measurement, MeasureError> {
    let roundtrips = registry.roundtrips(comm, true, max_reps)?;
    let rank = comm.rank();
    let size = comm.size();

    // Half the round trip between root and receiver is the ping cost to be
    // subtracted from each block; copy what is needed before the loop.
    let ping: Vec<f64> = (0..size)
        .map(|i| {
            if i == root {
                0.0
            } else {
                roundtrips[pair_index(size, root, i)].t / 2.0
            }
        })
        .collect();

    let mut per_receiver = vec![0.0; size];
    let mut buffer = vec![0u8; m];
    let failure = |_| MeasureError::Operation {
        operation: "bcast".to_string(),
    };

    comm.barrier()?;
    for i in 0..size {
        if i == root {
            continue;
        }
        let start = comm.now();
        for _ in 0..max_reps {
            if rank == root {
                bcast(comm, &mut buffer, root).map_err(failure)?;
                comm.recv(&mut [], i, TAG)?;
            } else if rank == i {
                bcast(comm, &mut buffer, root).map_err(failure)?;
                comm.send(&[], root, TAG)?;
            } else {
                bcast(comm, &mut buffer, root).map_err(failure)?;
            }
        }
        if rank == root {
            per_receiver[i] = (comm.now() - start) / max_reps.max(1) as f64 - ping[i];
        }
    }

    let mut t = per_receiver.iter().cloned().fold(f64::MIN, f64::max).to_ne_bytes();
    comm.bcast(&mut t, root)?;
    Ok(Measurement {
        m,
        t: f64::from_ne_bytes(t),
        wtick: max_tick(comm)?,
        reps: max_reps,
        ci: 0.0,
    })
}

/// Broadcast timer over a set of message sizes.
///
/// Every rank receives each size's result record, so every rank advances an
/// identical size cursor and the sweep needs no extra coordination.
pub fn measure_bcast_msgset(
    comm: &dyn Communicator,
    registry: &mut CalibrationRegistry,
    bcast: BcastOp<'_>,
    root: usize,
    msgset: &MsgSet,
    max_reps: usize,
) -> Result<Vec<Measurement>, MeasureError> {
    let mut cursor = SizeCursor::new(msgset);
    let mut results = Vec::new();
    while let Some(m) = cursor.current() {
        if comm.rank() == root {
            debug!("bcast timer sweep: size {}", m);
        }
        let record = measure_bcast(comm, registry, &mut *bcast, root, m, max_reps)?;
        cursor.advance(&mut results, record);
    }
    Ok(results)
}
