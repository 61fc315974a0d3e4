use cluster_bench::calibration::CalibrationRegistry;
use cluster_bench::containers::OperationError;
use cluster_bench::measure::{measure_bcast, measure_bcast_msgset};
use cluster_bench::transport::{Communicator, LocalCluster};
use cluster_bench::MsgSet;

fn transport_bcast(
    comm: &dyn Communicator,
    buf: &mut [u8],
    root: usize,
) -> Result<(), OperationError> {
    comm.bcast(buf, root)?;
    Ok(())
}

/// The specialized broadcast timer always runs the full repetition count,
/// reports no confidence interval, and distributes one result to all ranks.
#[test]
fn bcast_timer_runs_fixed_blocks() {
    let max_reps = 8;
    let results = LocalCluster::run(3, |comm| {
        let mut registry = CalibrationRegistry::new();
        let mut op = transport_bcast;
        let record = measure_bcast(comm, &mut registry, &mut op, 0, 512, max_reps).unwrap();
        // A second call on the same group reuses the round-trip matrix.
        let again = measure_bcast(comm, &mut registry, &mut op, 0, 512, max_reps).unwrap();
        (record, again)
    });

    let (reference, _) = results[0];
    for (record, again) in &results {
        assert_eq!(record, &reference);
        assert_eq!(record.m, 512);
        assert_eq!(record.reps, max_reps);
        assert_eq!(record.ci, 0.0);
        assert_eq!(again.reps, max_reps);
    }
}

/// The broadcast sweep walks the grid with the same cursor as every other
/// sweep driver.
#[test]
fn bcast_timer_sweep_covers_the_grid() {
    let msgset = MsgSet {
        min_size: 0,
        max_size: 1024,
        stride: 512,
        ..MsgSet::default()
    };
    let results = LocalCluster::run(2, |comm| {
        let mut registry = CalibrationRegistry::new();
        let mut op = transport_bcast;
        measure_bcast_msgset(comm, &mut registry, &mut op, 0, &msgset, 4).unwrap()
    });

    for series in &results {
        let sizes: Vec<usize> = series.iter().map(|r| r.m).collect();
        assert_eq!(sizes, vec![0, 512]);
        assert!(series.iter().all(|r| r.reps == 4 && r.ci == 0.0));
    }
    assert_eq!(results[0], results[1]);
}
