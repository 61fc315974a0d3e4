//! Containers for point-to-point operations.

use super::{OperationError, P2pContainer};
use crate::transport::{Communicator, Tag};

const TAG: Tag = 0;

/// The canonical ping-pong: the measuring side sends `m` bytes and waits for
/// them to come back, the mirror echoes. Also implements the overhead and
/// ring-transfer hooks, so one container serves every p2p driver.
pub struct RoundtripContainer {
    buffer: Vec<u8>,
}

impl RoundtripContainer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Default for RoundtripContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl P2pContainer for RoundtripContainer {
    fn operation(&self) -> &str {
        "roundtrip"
    }

    fn initialize(&mut self, _comm: &dyn Communicator, m: usize) -> Result<(), OperationError> {
        self.buffer = vec![0u8; m];
        Ok(())
    }

    fn execute_measure(
        &mut self,
        comm: &dyn Communicator,
        _m: usize,
        mirror: usize,
    ) -> Result<(), OperationError> {
        comm.send(&self.buffer, mirror, TAG)?;
        comm.recv(&mut self.buffer, mirror, TAG)?;
        Ok(())
    }

    fn execute_mirror(
        &mut self,
        comm: &dyn Communicator,
        _m: usize,
        measure: usize,
    ) -> Result<(), OperationError> {
        comm.recv(&mut self.buffer, measure, TAG)?;
        comm.send(&self.buffer, measure, TAG)?;
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator) -> Result<(), OperationError> {
        self.buffer = Vec::new();
        Ok(())
    }

    fn execute_measure_eager(
        &mut self,
        comm: &dyn Communicator,
        _m: usize,
        mirror: usize,
    ) -> Result<(), OperationError> {
        comm.send(&self.buffer, mirror, TAG)?;
        Ok(())
    }

    fn execute_measure_rendezvous(
        &mut self,
        comm: &dyn Communicator,
        _m: usize,
        mirror: usize,
    ) -> Result<(), OperationError> {
        comm.send(&self.buffer, mirror, TAG)?;
        // Completion is the mirror's acceptance of the transfer.
        comm.recv(&mut [], mirror, TAG)?;
        Ok(())
    }

    fn execute_mirror_overhead(
        &mut self,
        comm: &dyn Communicator,
        _m: usize,
        measure: usize,
        rendezvous: bool,
    ) -> Result<(), OperationError> {
        comm.recv(&mut self.buffer, measure, TAG)?;
        if rendezvous {
            comm.send(&[], measure, TAG)?;
        }
        Ok(())
    }

    fn execute_transfer(
        &mut self,
        comm: &dyn Communicator,
        _m: usize,
        dest: usize,
        source: usize,
    ) -> Result<(), OperationError> {
        comm.send(&self.buffer, dest, TAG)?;
        comm.recv(&mut self.buffer, source, TAG)?;
        Ok(())
    }
}
