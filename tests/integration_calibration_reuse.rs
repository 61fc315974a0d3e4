use cluster_bench::calibration::CalibrationRegistry;
use cluster_bench::containers::{CollContainer, OperationError};
use cluster_bench::measure::measure_root;
use cluster_bench::transport::{CommId, Communicator, LocalCluster, Tag, TransportError};
use cluster_bench::Precision;
use std::cell::Cell;
use std::rc::Rc;

/// Transparent wrapper that counts barrier submissions, to make calibration
/// activity observable.
struct CountingComm<'a> {
    inner: &'a dyn Communicator,
    barriers: Rc<Cell<usize>>,
}

impl<'a> CountingComm<'a> {
    fn new(inner: &'a dyn Communicator, barriers: Rc<Cell<usize>>) -> Self {
        Self { inner, barriers }
    }
}

impl Communicator for CountingComm<'_> {
    fn id(&self) -> CommId {
        self.inner.id()
    }
    fn rank(&self) -> usize {
        self.inner.rank()
    }
    fn size(&self) -> usize {
        self.inner.size()
    }
    fn send(&self, buf: &[u8], dest: usize, tag: Tag) -> Result<(), TransportError> {
        self.inner.send(buf, dest, tag)
    }
    fn recv(&self, buf: &mut [u8], source: usize, tag: Tag) -> Result<usize, TransportError> {
        self.inner.recv(buf, source, tag)
    }
    fn barrier(&self) -> Result<(), TransportError> {
        self.barriers.set(self.barriers.get() + 1);
        self.inner.barrier()
    }
    fn bcast(&self, buf: &mut [u8], root: usize) -> Result<(), TransportError> {
        self.inner.bcast(buf, root)
    }
    fn reduce_max_f64(&self, value: f64, root: usize) -> Result<f64, TransportError> {
        self.inner.reduce_max_f64(value, root)
    }
    fn allreduce_max_f64(&self, value: f64) -> Result<f64, TransportError> {
        self.inner.allreduce_max_f64(value)
    }
    fn allreduce_max_i32(&self, value: i32) -> Result<i32, TransportError> {
        self.inner.allreduce_max_i32(value)
    }
    fn allgather(&self, send: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.inner.allgather(send)
    }
    fn allgatherv(&self, send: &[u8], counts: &[usize]) -> Result<Vec<u8>, TransportError> {
        self.inner.allgatherv(send, counts)
    }
    fn split(
        &self,
        color: Option<u32>,
        key: u32,
    ) -> Result<Option<Box<dyn Communicator>>, TransportError> {
        self.inner.split(color, key)
    }
    fn duplicate(&self) -> Result<Box<dyn Communicator>, TransportError> {
        self.inner.duplicate()
    }
    fn processor_name(&self) -> String {
        self.inner.processor_name()
    }
    fn now(&self) -> f64 {
        self.inner.now()
    }
    fn tick(&self) -> f64 {
        self.inner.tick()
    }
    fn clock_is_global(&self) -> bool {
        self.inner.clock_is_global()
    }
}

struct NoopContainer;

impl CollContainer for NoopContainer {
    fn operation(&self) -> &str {
        "noop"
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
        Ok(())
    }
    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        Ok(())
    }
}

/// Barrier calibration runs once per group: a second root-timed run on the
/// same group reuses the cached value, and a run on a different group
/// re-calibrates.
#[test]
fn barrier_calibration_is_reused_per_group() {
    // Fixed-count runs make the barrier traffic deterministic:
    // - calibration: double-barrier warm-up + max_reps timed barriers,
    // - measurement: three barriers per observation (double + confirming).
    let precision = Precision::fixed(4);
    let calibration_barriers = precision.max_reps + 2;
    let measurement_barriers = 3 * precision.max_reps;

    LocalCluster::run(3, |comm| {
        let barriers = Rc::new(Cell::new(0));
        let counted = CountingComm::new(comm, Rc::clone(&barriers));
        let mut registry = CalibrationRegistry::new();
        let mut container = NoopContainer;

        measure_root(&counted, &mut registry, &mut container, 0, 64, &precision).unwrap();
        let first = barriers.get();
        assert_eq!(first, calibration_barriers + measurement_barriers);

        // Same group: no re-calibration.
        measure_root(&counted, &mut registry, &mut container, 0, 64, &precision).unwrap();
        let second = barriers.get() - first;
        assert_eq!(second, measurement_barriers);

        // A duplicated group has a new identity and must be re-calibrated.
        let dup = comm.duplicate().unwrap();
        let counted_dup = CountingComm::new(dup.as_ref(), Rc::clone(&barriers));
        measure_root(&counted_dup, &mut registry, &mut container, 0, 64, &precision).unwrap();
        let third = barriers.get() - first - second;
        assert_eq!(third, calibration_barriers + measurement_barriers);
    });
}

/// Explicit invalidation forces the next use to re-calibrate even on the
/// same group.
#[test]
fn invalidation_discards_cached_state() {
    let precision = Precision::fixed(2);
    let calibration_barriers = precision.max_reps + 2;
    let measurement_barriers = 3 * precision.max_reps;

    LocalCluster::run(2, |comm| {
        let barriers = Rc::new(Cell::new(0));
        let counted = CountingComm::new(comm, Rc::clone(&barriers));
        let mut registry = CalibrationRegistry::new();
        let mut container = NoopContainer;

        measure_root(&counted, &mut registry, &mut container, 0, 0, &precision).unwrap();
        let first = barriers.get();

        registry.invalidate();
        measure_root(&counted, &mut registry, &mut container, 0, 0, &precision).unwrap();
        let second = barriers.get() - first;
        assert_eq!(second, calibration_barriers + measurement_barriers);
    });
}
