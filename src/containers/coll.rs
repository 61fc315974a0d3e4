//! Containers for collective operations.
//!
//! The regular containers move `m` bytes per rank with flat (root-to-leaf)
//! data movement; the irregular scatterv/gatherv variants scale each rank's
//! share by a caller-supplied factor. All buffers are owned by the container
//! and never inspected by the engine.

use super::{CollContainer, OperationError};
use crate::transport::{Communicator, Tag};

const TAG: Tag = 0;

/// Broadcast of `m` bytes from the root, via the transport's broadcast.
pub struct BcastContainer {
    buffer: Vec<u8>,
}

impl BcastContainer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Default for BcastContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl CollContainer for BcastContainer {
    fn operation(&self) -> &str {
        "bcast"
    }

    fn initialize(
        &mut self,
        _comm: &dyn Communicator,
        _root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        self.buffer = vec![0u8; m];
        Ok(())
    }

    fn execute(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        _m: usize,
    ) -> Result<(), OperationError> {
        comm.bcast(&mut self.buffer, root)?;
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        self.buffer = Vec::new();
        Ok(())
    }
}

/// Flat scatter: the root sends an `m`-byte slice to every other rank.
pub struct ScatterContainer {
    buffer: Vec<u8>,
}

impl ScatterContainer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Default for ScatterContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl CollContainer for ScatterContainer {
    fn operation(&self) -> &str {
        "scatter"
    }

    fn initialize(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        let len = if comm.rank() == root {
            m * comm.size()
        } else {
            m
        };
        self.buffer = vec![0u8; len];
        Ok(())
    }

    fn execute(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        if comm.rank() == root {
            for r in 0..comm.size() {
                if r != root {
                    comm.send(&self.buffer[r * m..(r + 1) * m], r, TAG)?;
                }
            }
        } else {
            comm.recv(&mut self.buffer[..m], root, TAG)?;
        }
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        self.buffer = Vec::new();
        Ok(())
    }
}

/// Flat gather: every rank sends its `m`-byte share to the root.
pub struct GatherContainer {
    buffer: Vec<u8>,
}

impl GatherContainer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Default for GatherContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl CollContainer for GatherContainer {
    fn operation(&self) -> &str {
        "gather"
    }

    fn initialize(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        let len = if comm.rank() == root {
            m * comm.size()
        } else {
            m
        };
        self.buffer = vec![0u8; len];
        Ok(())
    }

    fn execute(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        if comm.rank() == root {
            for r in 0..comm.size() {
                if r != root {
                    comm.recv(&mut self.buffer[r * m..(r + 1) * m], r, TAG)?;
                }
            }
        } else {
            comm.send(&self.buffer[..m], root, TAG)?;
        }
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        self.buffer = Vec::new();
        Ok(())
    }
}

/// Per-rank share sizes of an irregular collective: `m` scaled by the rank's
/// factor, or plain `m` where no factors are given.
fn irregular_counts(factors: Option<&[f64]>, size: usize, m: usize) -> Vec<usize> {
    (0..size)
        .map(|r| match factors {
            Some(f) => (f[r % f.len()] * m as f64) as usize,
            None => m,
        })
        .collect()
}

/// Flat scatterv with per-rank shares.
pub struct ScattervContainer {
    factors: Option<Vec<f64>>,
    counts: Vec<usize>,
    buffer: Vec<u8>,
}

impl ScattervContainer {
    /// `factors[r]` scales rank `r`'s share of the message size; `None`
    /// degenerates to the regular scatter distribution.
    pub fn new(factors: Option<Vec<f64>>) -> Self {
        Self {
            factors,
            counts: Vec::new(),
            buffer: Vec::new(),
        }
    }
}

impl CollContainer for ScattervContainer {
    fn operation(&self) -> &str {
        "scatterv"
    }

    fn initialize(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        self.counts = irregular_counts(self.factors.as_deref(), comm.size(), m);
        let len = if comm.rank() == root {
            self.counts.iter().sum()
        } else {
            self.counts[comm.rank()]
        };
        self.buffer = vec![0u8; len];
        Ok(())
    }

    fn execute(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        _m: usize,
    ) -> Result<(), OperationError> {
        if comm.rank() == root {
            let mut offset = 0;
            for (r, &count) in self.counts.iter().enumerate() {
                if r != root {
                    comm.send(&self.buffer[offset..offset + count], r, TAG)?;
                }
                offset += count;
            }
        } else {
            let count = self.counts[comm.rank()];
            comm.recv(&mut self.buffer[..count], root, TAG)?;
        }
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        self.buffer = Vec::new();
        self.counts = Vec::new();
        Ok(())
    }
}

/// Flat gatherv with per-rank shares.
pub struct GathervContainer {
    factors: Option<Vec<f64>>,
    counts: Vec<usize>,
    buffer: Vec<u8>,
}

impl GathervContainer {
    pub fn new(factors: Option<Vec<f64>>) -> Self {
        Self {
            factors,
            counts: Vec::new(),
            buffer: Vec::new(),
        }
    }
}

impl CollContainer for GathervContainer {
    fn operation(&self) -> &str {
        "gatherv"
    }

    fn initialize(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        self.counts = irregular_counts(self.factors.as_deref(), comm.size(), m);
        let len = if comm.rank() == root {
            self.counts.iter().sum()
        } else {
            self.counts[comm.rank()]
        };
        self.buffer = vec![0u8; len];
        Ok(())
    }

    fn execute(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        _m: usize,
    ) -> Result<(), OperationError> {
        if comm.rank() == root {
            let mut offset = 0;
            for (r, &count) in self.counts.iter().enumerate() {
                if r != root {
                    comm.recv(&mut self.buffer[offset..offset + count], r, TAG)?;
                }
                offset += count;
            }
        } else {
            let count = self.counts[comm.rank()];
            comm.send(&self.buffer[..count], root, TAG)?;
        }
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        self.buffer = Vec::new();
        self.counts = Vec::new();
        Ok(())
    }
}

/// Flat reduction with the byte-wise `max` operator.
pub struct ReduceContainer {
    sendbuf: Vec<u8>,
    recvbuf: Vec<u8>,
}

impl ReduceContainer {
    pub fn new() -> Self {
        Self {
            sendbuf: Vec::new(),
            recvbuf: Vec::new(),
        }
    }
}

impl Default for ReduceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl CollContainer for ReduceContainer {
    fn operation(&self) -> &str {
        "reduce"
    }

    fn initialize(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        self.sendbuf = vec![0u8; m];
        self.recvbuf = if comm.rank() == root {
            vec![0u8; m]
        } else {
            Vec::new()
        };
        Ok(())
    }

    fn execute(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError> {
        if comm.rank() == root {
            self.recvbuf.copy_from_slice(&self.sendbuf);
            let mut incoming = vec![0u8; m];
            for r in 0..comm.size() {
                if r != root {
                    comm.recv(&mut incoming, r, TAG)?;
                    for (acc, &byte) in self.recvbuf.iter_mut().zip(&incoming) {
                        *acc = (*acc).max(byte);
                    }
                }
            }
        } else {
            comm.send(&self.sendbuf, root, TAG)?;
        }
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        self.sendbuf = Vec::new();
        self.recvbuf = Vec::new();
        Ok(())
    }
}

/// Group duplicate-and-free, a payload-less collective that exercises the
/// transport's group management path.
pub struct CommDupFreeContainer;

impl CommDupFreeContainer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CommDupFreeContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl CollContainer for CommDupFreeContainer {
    fn operation(&self) -> &str {
        "comm_dup_free"
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
        comm: &dyn Communicator,
        _root: usize,
        _m: usize,
    ) -> Result<(), OperationError> {
        let duplicate = comm.duplicate()?;
        drop(duplicate);
        Ok(())
    }

    fn finalize(&mut self, _comm: &dyn Communicator, _root: usize) -> Result<(), OperationError> {
        Ok(())
    }
}
