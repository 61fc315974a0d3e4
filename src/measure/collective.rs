//! # Collective Benchmarks
//!
//! The three collective timing methods. All share the repetition policy of
//! [`crate::measure::Series`] and differ in how a single scalar time is
//! extracted from one invocation of the collective:
//!
//! - **max**: every rank times the invocation locally; the maximum over the
//!   group is the observation.
//! - **root**: the root times invocation plus one confirming barrier and
//!   subtracts the calibrated mean barrier latency.
//! - **global**: the root takes the start stamp, every rank takes a finish
//!   stamp adjusted onto the root's clock via the calibrated offsets, and the
//!   observation is the latest adjusted finish minus the start.
//!
//! Between observations the ranks synchronize with a double barrier, and the
//! stop decision taken at the root is broadcast before the next observation
//! so all ranks leave the loop together. Execute statuses are combined with
//! an all-reduce (outside the timed window) so a failure aborts the series
//! at every rank at the same iteration.
//!
//! The finished result record is broadcast from the root as a packed wire
//! record, so every rank returns the identical measurement.

use crate::calibration::CalibrationRegistry;
use crate::containers::CollContainer;
use crate::measure::{
    max_tick, MeasureError, Measurement, MsgSet, Precision, Series, WIRE_SIZE,
};
use crate::sweep::SizeCursor;
use crate::transport::{bcast_flag, Communicator};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which synchronization discipline a collective benchmark uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingMethod {
    /// Group-wide maximum of locally timed invocations.
    Max,
    /// Root-side timing with barrier confirmation and calibration.
    Root,
    /// Start at root, clock-adjusted finish everywhere.
    Global,
}

impl TimingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            TimingMethod::Max => "max",
            TimingMethod::Root => "root",
            TimingMethod::Global => "global",
        }
    }
}

fn operation_failure(container: &dyn CollContainer) -> MeasureError {
    MeasureError::Operation {
        operation: container.operation().to_string(),
    }
}

/// Runs a container hook at every rank and combines the statuses, so either
/// all ranks proceed or all fail together.
fn checked_step(
    comm: &dyn Communicator,
    container: &dyn CollContainer,
    outcome: Result<(), crate::containers::OperationError>,
) -> Result<(), MeasureError> {
    let status = i32::from(outcome.is_err());
    if comm.allreduce_max_i32(status)? > 0 {
        return Err(operation_failure(container));
    }
    Ok(())
}

/// Broadcasts the root's finished record so every rank returns the value
/// (not, as in some older benchmarks, the coordinator's local address).
fn bcast_result(
    comm: &dyn Communicator,
    record: Measurement,
    root: usize,
) -> Result<Measurement, MeasureError> {
    let mut wire = [0u8; WIRE_SIZE];
    if comm.rank() == root {
        wire = record.to_wire();
    }
    comm.bcast(&mut wire, root)?;
    Ok(Measurement::from_wire(&wire))
}

/// Measures the execution time of a collective at all ranks and keeps the
/// group-wide maximum of each observation.
pub fn measure_max(
    comm: &dyn Communicator,
    container: &mut dyn CollContainer,
    root: usize,
    m: usize,
    precision: &Precision,
) -> Result<Measurement, MeasureError> {
    let rank = comm.rank();
    let fixed = precision.is_fixed();

    let init = container.initialize(comm, root, m);
    checked_step(comm, container, init)?;

    let mut series = Series::new(precision);
    let mut reps = 0usize;
    let mut stop = false;
    while !stop && reps < precision.max_reps {
        comm.barrier()?;
        comm.barrier()?;
        let start = comm.now();
        let outcome = container.execute(comm, root, m);
        let elapsed = comm.now() - start;
        let observed = comm.reduce_max_f64(elapsed, root)?;
        if let Err(e) = checked_step(comm, container, outcome) {
            let _ = container.finalize(comm, root);
            return Err(e);
        }
        if rank == root {
            series.record(observed);
        }
        reps += 1;
        if !fixed && reps >= precision.min_reps.max(3) {
            let decision = rank == root && series.converged(precision);
            stop = bcast_flag(comm, decision, root)?;
        }
    }

    let fin = container.finalize(comm, root);
    checked_step(comm, container, fin)?;

    let wtick = max_tick(comm)?;
    if fixed && rank == root {
        series.finalize_ci(precision);
    }
    bcast_result(comm, series.into_measurement(m, wtick), root)
}

/// Measures the execution time of a collective as seen by the root,
/// confirming each invocation with a barrier and subtracting the calibrated
/// mean barrier latency.
pub fn measure_root(
    comm: &dyn Communicator,
    registry: &mut CalibrationRegistry,
    container: &mut dyn CollContainer,
    root: usize,
    m: usize,
    precision: &Precision,
) -> Result<Measurement, MeasureError> {
    let barrier_mean = registry.barrier_mean(comm, precision.max_reps)?;
    let rank = comm.rank();
    let fixed = precision.is_fixed();

    let init = container.initialize(comm, root, m);
    checked_step(comm, container, init)?;

    let mut series = Series::new(precision);
    let mut reps = 0usize;
    let mut stop = false;
    while !stop && reps < precision.max_reps {
        comm.barrier()?;
        comm.barrier()?;
        let start = comm.now();
        let outcome = container.execute(comm, root, m);
        comm.barrier()?;
        let elapsed = comm.now() - start - barrier_mean;
        if let Err(e) = checked_step(comm, container, outcome) {
            let _ = container.finalize(comm, root);
            return Err(e);
        }
        if rank == root {
            series.record(elapsed);
        }
        reps += 1;
        if !fixed && reps >= precision.min_reps.max(3) {
            let decision = rank == root && series.converged(precision);
            stop = bcast_flag(comm, decision, root)?;
        }
    }

    let fin = container.finalize(comm, root);
    checked_step(comm, container, fin)?;

    let wtick = max_tick(comm)?;
    if fixed && rank == root {
        series.finalize_ci(precision);
    }
    bcast_result(comm, series.into_measurement(m, wtick), root)
}

/// Measures the execution time of a collective between the root's start and
/// the last rank's finish, mapped onto the root's clock with the calibrated
/// per-rank offsets.
pub fn measure_global(
    comm: &dyn Communicator,
    registry: &mut CalibrationRegistry,
    container: &mut dyn CollContainer,
    root: usize,
    m: usize,
    precision: &Precision,
) -> Result<Measurement, MeasureError> {
    let delta_root = registry.clock_offsets(comm, true, precision.max_reps)?[root];
    let rank = comm.rank();
    let fixed = precision.is_fixed();

    let init = container.initialize(comm, root, m);
    checked_step(comm, container, init)?;

    let mut series = Series::new(precision);
    let mut reps = 0usize;
    let mut stop = false;
    while !stop && reps < precision.max_reps {
        comm.barrier()?;
        comm.barrier()?;
        let start = comm.now();
        let outcome = container.execute(comm, root, m);
        let finish = comm.now() - delta_root;
        let finish = comm.reduce_max_f64(finish, root)?;
        if let Err(e) = checked_step(comm, container, outcome) {
            let _ = container.finalize(comm, root);
            return Err(e);
        }
        if rank == root {
            series.record(finish - start);
        }
        reps += 1;
        if !fixed && reps >= precision.min_reps.max(3) {
            let decision = rank == root && series.converged(precision);
            stop = bcast_flag(comm, decision, root)?;
        }
    }

    let fin = container.finalize(comm, root);
    checked_step(comm, container, fin)?;

    let wtick = max_tick(comm)?;
    if fixed && rank == root {
        series.finalize_ci(precision);
    }
    bcast_result(comm, series.into_measurement(m, wtick), root)
}

/// Single-point dispatch over the timing method.
pub fn measure_coll(
    method: TimingMethod,
    comm: &dyn Communicator,
    registry: &mut CalibrationRegistry,
    container: &mut dyn CollContainer,
    root: usize,
    m: usize,
    precision: &Precision,
) -> Result<Measurement, MeasureError> {
    match method {
        TimingMethod::Max => measure_max(comm, container, root, m, precision),
        TimingMethod::Root => measure_root(comm, registry, container, root, m, precision),
        TimingMethod::Global => measure_global(comm, registry, container, root, m, precision),
    }
}

/// Sweep driver shared by the collective timers.
///
/// Every rank receives the full result record of each size (the timers
/// broadcast it), so every rank advances an identical size cursor and no
/// extra coordination traffic is needed.
fn coll_sweep<F>(
    comm: &dyn Communicator,
    msgset: &MsgSet,
    mut measure_one: F,
) -> Result<Vec<Measurement>, MeasureError>
where
    F: FnMut(usize) -> Result<Measurement, MeasureError>,
{
    let mut cursor = SizeCursor::new(msgset);
    let mut results = Vec::new();
    while let Some(m) = cursor.current() {
        if comm.rank() == 0 {
            debug!("collective sweep: size {}", m);
        }
        let record = measure_one(m)?;
        cursor.advance(&mut results, record);
    }
    Ok(results)
}

/// Max-timing benchmark over a set of message sizes.
pub fn measure_max_msgset(
    comm: &dyn Communicator,
    container: &mut dyn CollContainer,
    root: usize,
    msgset: &MsgSet,
    precision: &Precision,
) -> Result<Vec<Measurement>, MeasureError> {
    coll_sweep(comm, msgset, |m| {
        measure_max(comm, container, root, m, precision)
    })
}

/// Root-timing benchmark over a set of message sizes.
pub fn measure_root_msgset(
    comm: &dyn Communicator,
    registry: &mut CalibrationRegistry,
    container: &mut dyn CollContainer,
    root: usize,
    msgset: &MsgSet,
    precision: &Precision,
) -> Result<Vec<Measurement>, MeasureError> {
    coll_sweep(comm, msgset, |m| {
        measure_root(comm, registry, container, root, m, precision)
    })
}

/// Global-timing benchmark over a set of message sizes.
pub fn measure_global_msgset(
    comm: &dyn Communicator,
    registry: &mut CalibrationRegistry,
    container: &mut dyn CollContainer,
    root: usize,
    msgset: &MsgSet,
    precision: &Precision,
) -> Result<Vec<Measurement>, MeasureError> {
    coll_sweep(comm, msgset, |m| {
        measure_global(comm, registry, container, root, m, precision)
    })
}
