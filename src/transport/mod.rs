//! # Transport Abstraction Module
//!
//! This module defines the message-passing surface the measurement engine is
//! written against. Every timing method, calibration routine and sweep driver
//! talks to the cluster exclusively through the [`Communicator`] trait, which
//! mirrors the small slice of an MPI-like transport the engine actually needs:
//! ranked identity, blocking tagged send/receive, a handful of collectives,
//! group management, and the wall clock.
//!
//! ## Design Principles
//!
//! - **Object safety**: the engine takes `&dyn Communicator` everywhere, so a
//!   transport can be wrapped (e.g. by the counting decorators the tests use)
//!   without touching engine code.
//! - **Synchronous semantics**: every operation is a suspension point and may
//!   block until the matching party arrives. The engine never assumes
//!   progress happens in the background.
//! - **Byte orientation**: payloads are opaque byte slices. Typed helpers for
//!   the engine's own scalar exchanges live next to the trait.
//!
//! ## Group identity
//!
//! [`Communicator::id`] returns a [`CommId`] that is stable for the lifetime
//! of a group handle and differs between handles produced by `split` or
//! `duplicate`. The calibration registry keys its cached state on this value;
//! see `crate::calibration`.

use thiserror::Error;

pub mod local;

pub use local::{LocalCluster, LocalClusterBuilder};

/// Message tag. The engine itself uses tag `0` for all of its control
/// traffic, matching the convention of the operation containers.
pub type Tag = u32;

/// Opaque identity of a communication group.
///
/// Two handles compare equal iff they refer to the same group instance at the
/// local rank. The value has no meaning across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommId(pub u64);

/// Errors surfaced by transport implementations.
///
/// The engine treats any of these as fatal for the measurement in progress
/// and propagates them unchanged (there are no retries).
#[derive(Debug, Error)]
pub enum TransportError {
    /// A peer endpoint is gone; a blocking operation can never complete.
    #[error("rank {rank} is disconnected")]
    Disconnected { rank: usize },

    /// A rank argument is outside `0..size`.
    #[error("rank {rank} out of range for group of {size}")]
    RankOutOfRange { rank: usize, size: usize },

    /// An incoming message does not fit the receive buffer.
    #[error("message of {got} bytes truncated to a {expected}-byte buffer")]
    Truncated { expected: usize, got: usize },
}

/// The message-passing surface consumed by the measurement engine.
///
/// All collective operations must be entered by every rank of the group, in
/// the same order. Point-to-point operations match on `(source, tag)` with
/// pairwise FIFO ordering.
pub trait Communicator {
    /// Identity of this group handle (see [`CommId`]).
    fn id(&self) -> CommId;

    /// Rank of the calling process within this group.
    fn rank(&self) -> usize;

    /// Number of ranks in this group.
    fn size(&self) -> usize;

    /// Blocking tagged send of `buf` to `dest`.
    fn send(&self, buf: &[u8], dest: usize, tag: Tag) -> Result<(), TransportError>;

    /// Blocking tagged receive from `source` into `buf`.
    ///
    /// Returns the number of bytes received, which may be smaller than the
    /// buffer. A message larger than `buf` is an error.
    fn recv(&self, buf: &mut [u8], source: usize, tag: Tag) -> Result<usize, TransportError>;

    /// Group barrier.
    fn barrier(&self) -> Result<(), TransportError>;

    /// Broadcast `buf` from `root` to every rank. On non-root ranks the
    /// buffer is overwritten with the root's contents.
    fn bcast(&self, buf: &mut [u8], root: usize) -> Result<(), TransportError>;

    /// Reduce `value` with the `max` operator to `root`. The returned value
    /// is meaningful only at the root; other ranks get their own input back.
    fn reduce_max_f64(&self, value: f64, root: usize) -> Result<f64, TransportError>;

    /// All-reduce `value` with the `max` operator.
    fn allreduce_max_f64(&self, value: f64) -> Result<f64, TransportError>;

    /// All-reduce `value` with the `max` operator (integer statuses).
    fn allreduce_max_i32(&self, value: i32) -> Result<i32, TransportError>;

    /// Gather equal-sized contributions from every rank to every rank,
    /// concatenated in rank order.
    fn allgather(&self, send: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Gather per-rank contributions of `counts[r]` bytes to every rank,
    /// concatenated in rank order. `send.len()` must equal
    /// `counts[self.rank()]`.
    fn allgatherv(&self, send: &[u8], counts: &[usize]) -> Result<Vec<u8>, TransportError>;

    /// Partition the group. Ranks passing the same `Some(color)` form a new
    /// group ordered by `(key, old rank)`; ranks passing `None` are excluded
    /// and get `None` back. Collective over the whole group.
    fn split(
        &self,
        color: Option<u32>,
        key: u32,
    ) -> Result<Option<Box<dyn Communicator>>, TransportError>;

    /// Duplicate the group into a fresh handle with a new identity.
    /// Collective over the whole group.
    fn duplicate(&self) -> Result<Box<dyn Communicator>, TransportError>;

    /// Name of the physical host the calling rank runs on.
    fn processor_name(&self) -> String;

    /// Wall-clock reading in seconds. Monotone within a rank; no cross-rank
    /// guarantee unless [`Communicator::clock_is_global`] says so.
    fn now(&self) -> f64;

    /// Claimed resolution of [`Communicator::now`] in seconds.
    fn tick(&self) -> f64;

    /// Whether `now()` is synchronized across all ranks of the group.
    fn clock_is_global(&self) -> bool;
}

/// Sends a single `f64` to `dest`.
pub fn send_f64(
    comm: &dyn Communicator,
    value: f64,
    dest: usize,
    tag: Tag,
) -> Result<(), TransportError> {
    comm.send(&value.to_ne_bytes(), dest, tag)
}

/// Receives a single `f64` from `source`.
pub fn recv_f64(comm: &dyn Communicator, source: usize, tag: Tag) -> Result<f64, TransportError> {
    let mut buf = [0u8; 8];
    comm.recv(&mut buf, source, tag)?;
    Ok(f64::from_ne_bytes(buf))
}

/// Sends a single `u64` to `dest`.
pub fn send_u64(
    comm: &dyn Communicator,
    value: u64,
    dest: usize,
    tag: Tag,
) -> Result<(), TransportError> {
    comm.send(&value.to_ne_bytes(), dest, tag)
}

/// Receives a single `u64` from `source`.
pub fn recv_u64(comm: &dyn Communicator, source: usize, tag: Tag) -> Result<u64, TransportError> {
    let mut buf = [0u8; 8];
    comm.recv(&mut buf, source, tag)?;
    Ok(u64::from_ne_bytes(buf))
}

/// Broadcasts a single `u64` from `root`, returning the root's value at
/// every rank.
pub fn bcast_u64(
    comm: &dyn Communicator,
    value: u64,
    root: usize,
) -> Result<u64, TransportError> {
    let mut buf = value.to_ne_bytes();
    comm.bcast(&mut buf, root)?;
    Ok(u64::from_ne_bytes(buf))
}

/// Broadcasts a boolean flag from `root` as a single byte.
pub fn bcast_flag(
    comm: &dyn Communicator,
    value: bool,
    root: usize,
) -> Result<bool, TransportError> {
    let mut buf = [value as u8];
    comm.bcast(&mut buf, root)?;
    Ok(buf[0] != 0)
}
