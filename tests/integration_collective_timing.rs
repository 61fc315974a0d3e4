use cluster_bench::calibration::CalibrationRegistry;
use cluster_bench::containers::{CollContainer, OperationError};
use cluster_bench::measure::{
    measure_coll, measure_global, measure_max, measure_max_msgset, MeasureError, TimingMethod,
};
use cluster_bench::transport::{Communicator, LocalCluster};
use cluster_bench::{MsgSet, Precision};
use std::thread;
use std::time::Duration;

/// A deterministic stand-in for a collective: sleeps for a fixed time and
/// counts its invocations, optionally failing at one rank.
struct SleepContainer {
    delay: Duration,
    executions: usize,
    fail: bool,
}

impl SleepContainer {
    fn new(micros: u64) -> Self {
        Self {
            delay: Duration::from_micros(micros),
            executions: 0,
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            delay: Duration::ZERO,
            executions: 0,
            fail: true,
        }
    }
}

impl CollContainer for SleepContainer {
    fn operation(&self) -> &str {
        "sleep"
    }

    fn initialize(
        &mut self,
        _comm: &dyn Communicator,
        _root: usize,
        _m: usize,
    ) -> Result<(), OperationError> {
        Ok(())
    }

    fn execute(
        &mut self,
        _comm: &dyn Communicator,
        _root: usize,
        _m: usize,
    ) -> Result<(), OperationError> {
        if self.fail {
            return Err(OperationError::Failed("induced failure".into()));
        }
        thread::sleep(self.delay);
        self.executions += 1;
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        Ok(())
    }
}

/// Early termination is a joint decision: every rank leaves the observation
/// loop at the same iteration, and no rank observes beyond it.
#[test]
fn max_timing_stops_early_and_jointly() {
    let precision = Precision {
        min_reps: 5,
        max_reps: 100,
        cl: 0.95,
        eps: 0.25,
    };
    let results = LocalCluster::run(4, |comm| {
        let mut container = SleepContainer::new(200);
        let record = measure_max(comm, &mut container, 0, 1024, &precision).unwrap();
        (record, container.executions)
    });

    let (reference, reps) = (results[0].0, results[0].0.reps);
    assert!(reps >= 5 && reps <= 100);
    assert!(reps < 100, "a 200us constant sleep must converge early");
    assert!(reference.t > 0.0);
    for (record, executions) in &results {
        // The broadcast result record is identical everywhere, and each
        // rank ran exactly as many observations as the sample holds.
        assert_eq!(record, &reference);
        assert_eq!(*executions, reps);
    }
}

/// With min_reps == max_reps the loop is fixed-count.
#[test]
fn max_timing_fixed_count_is_exact() {
    let precision = Precision::fixed(6);
    let results = LocalCluster::run(3, |comm| {
        let mut container = SleepContainer::new(50);
        let record = measure_max(comm, &mut container, 1, 64, &precision).unwrap();
        (record, container.executions)
    });
    for (record, executions) in &results {
        assert_eq!(record.reps, 6);
        assert_eq!(*executions, 6);
        assert!(record.ci >= 0.0);
    }
}

/// Running the same benchmark twice on a no-op collective stays within the
/// repetition bounds both times.
#[test]
fn max_timing_is_repeatable() {
    let precision = Precision {
        min_reps: 3,
        max_reps: 20,
        cl: 0.95,
        eps: 0.5,
    };
    let results = LocalCluster::run(2, |comm| {
        let mut container = SleepContainer::new(0);
        let first = measure_max(comm, &mut container, 0, 16, &precision).unwrap();
        let second = measure_max(comm, &mut container, 0, 16, &precision).unwrap();
        (first, second)
    });
    for (first, second) in &results {
        for record in [first, second] {
            assert!(record.t >= 0.0);
            assert!(record.reps >= 3 && record.reps <= 20);
        }
    }
}

/// A failing container aborts the measurement at every rank with an
/// operation error, even though only one rank failed.
#[test]
fn operation_failure_aborts_all_ranks() {
    let precision = Precision::fixed(10);
    let results = LocalCluster::run(3, |comm| {
        let mut container = if comm.rank() == 2 {
            SleepContainer::failing()
        } else {
            SleepContainer::new(10)
        };
        measure_max(comm, &mut container, 0, 64, &precision)
    });
    for outcome in &results {
        assert!(matches!(outcome, Err(MeasureError::Operation { .. })));
    }
}

/// Root timing subtracts the calibrated barrier latency; a collective that
/// sleeps well above barrier cost still reports a positive time.
#[test]
fn root_timing_reports_positive_time() {
    let precision = Precision::fixed(5);
    let results = LocalCluster::run(3, |comm| {
        let mut registry = CalibrationRegistry::new();
        let mut container = SleepContainer::new(500);
        measure_coll(
            TimingMethod::Root,
            comm,
            &mut registry,
            &mut container,
            0,
            256,
            &precision,
        )
        .unwrap()
    });
    let reference = results[0];
    for record in &results {
        assert_eq!(record, &reference);
        assert!(record.t > 0.0);
        assert_eq!(record.reps, 5);
    }
}

/// With a globally synchronous clock the offset vector is zero and global
/// timing agrees with max timing up to synchronization noise.
#[test]
fn global_timing_tracks_the_sleep() {
    let precision = Precision {
        min_reps: 3,
        max_reps: 30,
        cl: 0.95,
        eps: 0.5,
    };
    let results = LocalCluster::run(3, |comm| {
        let mut registry = CalibrationRegistry::new();
        let mut container = SleepContainer::new(300);
        measure_global(comm, &mut registry, &mut container, 0, 128, &precision).unwrap()
    });
    for record in &results {
        assert_eq!(record, &results[0]);
        assert!(record.t > 0.0);
        assert!(record.t < 0.1, "a 300us sleep cannot take {}s", record.t);
    }
}

/// The fixed-stride collective sweep visits the grid and reports every
/// record to every rank.
#[test]
fn collective_sweep_covers_the_grid() {
    let precision = Precision::fixed(3);
    let msgset = MsgSet {
        min_size: 0,
        max_size: 300,
        stride: 100,
        ..MsgSet::default()
    };
    let results = LocalCluster::run(2, |comm| {
        let mut container = SleepContainer::new(20);
        measure_max_msgset(comm, &mut container, 0, &msgset, &precision).unwrap()
    });
    for series in &results {
        let sizes: Vec<usize> = series.iter().map(|r| r.m).collect();
        assert_eq!(sizes, vec![0, 100, 200]);
    }
    assert_eq!(results[0], results[1]);
}
