//! # Operation Containers
//!
//! The engine measures communication operations it knows nothing about. A
//! container encapsulates one operation — its label, its buffers and its
//! execution — behind a small `initialize / execute / finalize` surface, so
//! the timing methods can drive any point-to-point exchange or collective
//! without inspecting payloads or semantics.
//!
//! Containers fully own the buffers they allocate. `initialize` is called
//! before a series of observations at one message size, `finalize` after it;
//! the execute hooks perform exactly one invocation each.

use crate::transport::{Communicator, TransportError};
use thiserror::Error;

pub mod coll;
pub mod p2p;

pub use coll::{
    BcastContainer, CommDupFreeContainer, GatherContainer, GathervContainer, ReduceContainer,
    ScatterContainer, ScattervContainer,
};
pub use p2p::RoundtripContainer;

/// Failure of a container hook.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The operation itself reported a failure.
    #[error("operation reported failure: {0}")]
    Failed(String),

    /// The container does not implement an optional hook.
    #[error("container does not implement the {hook} hook")]
    Unsupported { hook: &'static str },
}

/// A point-to-point operation under measurement.
///
/// The measuring side and the mirroring side of the exchange are separate
/// hooks; both must return only once their half of the exchange has
/// completed. The overhead and transfer hooks are optional extensions used
/// by the specialized drivers in `crate::measure::p2p`.
///
/// Hook failures are **not** coordinated across the pair: the pair protocol
/// carries no status exchange (unlike the collective timers), so an error
/// returns at the failing rank only and the peer observes the breakdown
/// through the transport — or blocks, on a transport that cannot detect
/// peer departure. Implementations should reserve errors for transport-level
/// failures; an operation that can fail for its own reasons belongs in a
/// [`CollContainer`], whose statuses are combined group-wide.
pub trait P2pContainer {
    /// Label of the operation, for reporting.
    fn operation(&self) -> &str;

    /// Allocates whatever buffers a message of `m` bytes needs.
    fn initialize(&mut self, comm: &dyn Communicator, m: usize) -> Result<(), OperationError>;

    /// The timed half of the exchange, run at the measuring rank.
    fn execute_measure(
        &mut self,
        comm: &dyn Communicator,
        m: usize,
        mirror: usize,
    ) -> Result<(), OperationError>;

    /// The responding half of the exchange, run at the mirror rank.
    fn execute_mirror(
        &mut self,
        comm: &dyn Communicator,
        m: usize,
        measure: usize,
    ) -> Result<(), OperationError>;

    /// Releases the buffers.
    fn finalize(&mut self, comm: &dyn Communicator) -> Result<(), OperationError>;

    /// Eager-send overhead: return as soon as the message has left the
    /// sender, without waiting for delivery.
    fn execute_measure_eager(
        &mut self,
        _comm: &dyn Communicator,
        _m: usize,
        _mirror: usize,
    ) -> Result<(), OperationError> {
        Err(OperationError::Unsupported {
            hook: "eager overhead",
        })
    }

    /// Rendezvous-send overhead: return once the mirror has accepted the
    /// transfer.
    fn execute_measure_rendezvous(
        &mut self,
        _comm: &dyn Communicator,
        _m: usize,
        _mirror: usize,
    ) -> Result<(), OperationError> {
        Err(OperationError::Unsupported {
            hook: "rendezvous overhead",
        })
    }

    /// Mirror side of the overhead hooks. In rendezvous mode the mirror
    /// additionally acknowledges acceptance of the transfer.
    fn execute_mirror_overhead(
        &mut self,
        _comm: &dyn Communicator,
        _m: usize,
        _measure: usize,
        _rendezvous: bool,
    ) -> Result<(), OperationError> {
        Err(OperationError::Unsupported {
            hook: "mirror overhead",
        })
    }

    /// Ring transfer: exchange one message with both ring neighbours.
    fn execute_transfer(
        &mut self,
        _comm: &dyn Communicator,
        _m: usize,
        _dest: usize,
        _source: usize,
    ) -> Result<(), OperationError> {
        Err(OperationError::Unsupported {
            hook: "ring transfer",
        })
    }
}

/// A collective operation under measurement.
///
/// `m` is the per-participant share of the payload; in irregular collectives
/// the effective count may differ between ranks. A hook returning an error
/// aborts the measurement at every rank.
pub trait CollContainer {
    /// Label of the operation, for reporting.
    fn operation(&self) -> &str;

    /// Allocates the buffers for payload share `m` rooted at `root`.
    fn initialize(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError>;

    /// Performs exactly one invocation of the collective.
    fn execute(
        &mut self,
        comm: &dyn Communicator,
        root: usize,
        m: usize,
    ) -> Result<(), OperationError>;

    /// Releases the buffers.
    fn finalize(&mut self, comm: &dyn Communicator, root: usize) -> Result<(), OperationError>;
}
