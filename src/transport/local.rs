//! # In-Process Cluster Transport
//!
//! A reference [`Communicator`] that runs a whole communication group as
//! threads of the current process, connected by a full mesh of `crossbeam`
//! channels. It exists so the measurement engine can be exercised end to end
//! (and unit tested deterministically) without an external launcher.
//!
//! ## Fabric layout
//!
//! Every ordered rank pair owns an unbounded channel. Packets carry a group
//! context, a tag and the payload; the receiving side keeps a stash of
//! packets that arrived for a different `(context, tag)` than the one
//! currently being waited on, so sub-groups created by `split` share the
//! mesh without stealing each other's traffic.
//!
//! ## Group management
//!
//! `split` and `duplicate` derive the child context deterministically from
//! the parent context and a per-handle call counter. Since group management
//! is collective and every rank issues the same calls in the same order, all
//! members arrive at the same context value without extra traffic.
//!
//! ## Clock
//!
//! All ranks share one monotonic epoch, so by default the wall clock is
//! globally synchronous and the transport says so. The builder can inject
//! per-rank clock offsets (the transport then reports a non-global clock,
//! which forces offset calibration) and per-rank host names (to exercise the
//! one-process-per-host group utility).

use super::{CommId, Communicator, Tag, TransportError};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Claimed resolution of the shared monotonic clock.
const TICK: f64 = 1e-9;

/// Control-plane tags live above the high bit so they can never collide with
/// container traffic on tag 0.
const CTRL: Tag = 1 << 31;
const TAG_BARRIER: Tag = CTRL | 1;
const TAG_BCAST: Tag = CTRL | 2;
const TAG_REDUCE: Tag = CTRL | 3;
const TAG_GATHER: Tag = CTRL | 4;

/// Context of the world group every cluster starts from.
const WORLD_CTX: u64 = 0x636c7573746572; // arbitrary non-zero seed

struct Packet {
    ctx: u64,
    tag: Tag,
    payload: Vec<u8>,
}

/// State shared by all ranks of one cluster.
struct Fabric {
    size: usize,
    epoch: Instant,
    offsets: Vec<f64>,
    hosts: Vec<String>,
    global_clock: bool,
}

/// Per-rank endpoint: one sender per destination, one receiver per source,
/// plus the stash of packets received out of match order.
struct Endpoint {
    senders: Vec<Sender<Packet>>,
    receivers: Vec<Receiver<Packet>>,
    stash: RefCell<HashMap<(u64, usize, Tag), VecDeque<Vec<u8>>>>,
}

/// splitmix64 finalizer; good enough to keep derived contexts distinct.
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn child_ctx(parent: u64, seq: u64, salt: u64) -> u64 {
    mix(parent.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ mix(seq) ^ salt)
}

/// One rank's handle onto a group of the in-process cluster.
pub struct LocalComm {
    fabric: Arc<Fabric>,
    endpoint: Rc<Endpoint>,
    ctx: u64,
    /// Translation from group rank to world rank.
    ranks: Rc<Vec<usize>>,
    /// This process's rank within the group.
    rank: usize,
    /// World rank of this process (cached `ranks[rank]`).
    world: usize,
    /// Counts split/duplicate calls on this handle; all members advance it in
    /// lockstep, which is what makes derived contexts agree.
    group_seq: Cell<u64>,
}

impl LocalComm {
    fn world_of(&self, rank: usize) -> Result<usize, TransportError> {
        self.ranks
            .get(rank)
            .copied()
            .ok_or(TransportError::RankOutOfRange {
                rank,
                size: self.ranks.len(),
            })
    }

    /// Receives the next payload matching `(ctx, source, tag)`, consulting
    /// the stash first and stashing mismatches.
    fn recv_payload(&self, source_world: usize, tag: Tag) -> Result<Vec<u8>, TransportError> {
        let key = (self.ctx, source_world, tag);
        if let Some(queue) = self.endpoint.stash.borrow_mut().get_mut(&key) {
            if let Some(payload) = queue.pop_front() {
                return Ok(payload);
            }
        }
        loop {
            let packet = self.endpoint.receivers[source_world]
                .recv()
                .map_err(|_| TransportError::Disconnected { rank: source_world })?;
            if packet.ctx == self.ctx && packet.tag == tag {
                return Ok(packet.payload);
            }
            self.endpoint
                .stash
                .borrow_mut()
                .entry((packet.ctx, source_world, packet.tag))
                .or_default()
                .push_back(packet.payload);
        }
    }

    fn send_payload(
        &self,
        payload: Vec<u8>,
        dest_world: usize,
        tag: Tag,
    ) -> Result<(), TransportError> {
        self.endpoint.senders[dest_world]
            .send(Packet {
                ctx: self.ctx,
                tag,
                payload,
            })
            .map_err(|_| TransportError::Disconnected { rank: dest_world })
    }

    fn next_seq(&self) -> u64 {
        let seq = self.group_seq.get() + 1;
        self.group_seq.set(seq);
        seq
    }

    fn make_child(&self, ctx: u64, ranks: Vec<usize>, rank: usize) -> LocalComm {
        LocalComm {
            fabric: Arc::clone(&self.fabric),
            endpoint: Rc::clone(&self.endpoint),
            ctx,
            world: ranks[rank],
            ranks: Rc::new(ranks),
            rank,
            group_seq: Cell::new(0),
        }
    }
}

impl Communicator for LocalComm {
    fn id(&self) -> CommId {
        CommId(self.ctx)
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.ranks.len()
    }

    fn send(&self, buf: &[u8], dest: usize, tag: Tag) -> Result<(), TransportError> {
        let dest_world = self.world_of(dest)?;
        self.send_payload(buf.to_vec(), dest_world, tag)
    }

    fn recv(&self, buf: &mut [u8], source: usize, tag: Tag) -> Result<usize, TransportError> {
        let source_world = self.world_of(source)?;
        let payload = self.recv_payload(source_world, tag)?;
        if payload.len() > buf.len() {
            return Err(TransportError::Truncated {
                expected: buf.len(),
                got: payload.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    fn barrier(&self) -> Result<(), TransportError> {
        let size = self.size();
        if size == 1 {
            return Ok(());
        }
        if self.rank == 0 {
            for r in 1..size {
                self.recv_payload(self.world_of(r)?, TAG_BARRIER)?;
            }
            for r in 1..size {
                self.send_payload(Vec::new(), self.world_of(r)?, TAG_BARRIER)?;
            }
        } else {
            self.send_payload(Vec::new(), self.world_of(0)?, TAG_BARRIER)?;
            self.recv_payload(self.world_of(0)?, TAG_BARRIER)?;
        }
        Ok(())
    }

    fn bcast(&self, buf: &mut [u8], root: usize) -> Result<(), TransportError> {
        let root_world = self.world_of(root)?;
        if self.rank == root {
            for r in 0..self.size() {
                if r != root {
                    self.send_payload(buf.to_vec(), self.world_of(r)?, TAG_BCAST)?;
                }
            }
        } else {
            let payload = self.recv_payload(root_world, TAG_BCAST)?;
            if payload.len() != buf.len() {
                return Err(TransportError::Truncated {
                    expected: buf.len(),
                    got: payload.len(),
                });
            }
            buf.copy_from_slice(&payload);
        }
        Ok(())
    }

    fn reduce_max_f64(&self, value: f64, root: usize) -> Result<f64, TransportError> {
        if self.rank == root {
            let mut acc = value;
            for r in 0..self.size() {
                if r != root {
                    let mut b = [0u8; 8];
                    let payload = self.recv_payload(self.world_of(r)?, TAG_REDUCE)?;
                    b.copy_from_slice(&payload);
                    acc = acc.max(f64::from_ne_bytes(b));
                }
            }
            Ok(acc)
        } else {
            self.send_payload(value.to_ne_bytes().to_vec(), self.world_of(root)?, TAG_REDUCE)?;
            Ok(value)
        }
    }

    fn allreduce_max_f64(&self, value: f64) -> Result<f64, TransportError> {
        let reduced = self.reduce_max_f64(value, 0)?;
        let mut buf = reduced.to_ne_bytes();
        self.bcast(&mut buf, 0)?;
        Ok(f64::from_ne_bytes(buf))
    }

    fn allreduce_max_i32(&self, value: i32) -> Result<i32, TransportError> {
        let as_f64 = self.allreduce_max_f64(value as f64)?;
        Ok(as_f64 as i32)
    }

    fn allgather(&self, send: &[u8]) -> Result<Vec<u8>, TransportError> {
        let counts = vec![send.len(); self.size()];
        self.allgatherv(send, &counts)
    }

    fn allgatherv(&self, send: &[u8], counts: &[usize]) -> Result<Vec<u8>, TransportError> {
        let size = self.size();
        if counts.len() != size || send.len() != counts[self.rank] {
            return Err(TransportError::Truncated {
                expected: counts.get(self.rank).copied().unwrap_or(0),
                got: send.len(),
            });
        }
        let total: usize = counts.iter().sum();
        let mut gathered = vec![0u8; total];
        if self.rank == 0 {
            let mut offset = 0;
            for (r, &count) in counts.iter().enumerate() {
                if r == 0 {
                    gathered[offset..offset + count].copy_from_slice(send);
                } else {
                    let payload = self.recv_payload(self.world_of(r)?, TAG_GATHER)?;
                    if payload.len() != count {
                        return Err(TransportError::Truncated {
                            expected: count,
                            got: payload.len(),
                        });
                    }
                    gathered[offset..offset + count].copy_from_slice(&payload);
                }
                offset += count;
            }
        } else {
            self.send_payload(send.to_vec(), self.world_of(0)?, TAG_GATHER)?;
        }
        self.bcast(&mut gathered, 0)?;
        Ok(gathered)
    }

    fn split(
        &self,
        color: Option<u32>,
        key: u32,
    ) -> Result<Option<Box<dyn Communicator>>, TransportError> {
        // Exchange (color, key) so every rank sees the full membership.
        let mut record = [0u8; 12];
        let color_wire: i64 = color.map(|c| c as i64).unwrap_or(-1);
        record[..8].copy_from_slice(&color_wire.to_ne_bytes());
        record[8..].copy_from_slice(&key.to_ne_bytes());
        let all = self.allgather(&record)?;
        let seq = self.next_seq();

        let my_color = match color {
            Some(c) => c,
            None => return Ok(None),
        };

        let mut members: Vec<(u32, usize)> = Vec::new();
        for r in 0..self.size() {
            let rec = &all[r * 12..(r + 1) * 12];
            let mut c8 = [0u8; 8];
            c8.copy_from_slice(&rec[..8]);
            let c = i64::from_ne_bytes(c8);
            let mut k4 = [0u8; 4];
            k4.copy_from_slice(&rec[8..]);
            let k = u32::from_ne_bytes(k4);
            if c == my_color as i64 {
                members.push((k, r));
            }
        }
        members.sort_unstable();

        let ranks: Vec<usize> = members
            .iter()
            .map(|&(_, old)| self.ranks[old])
            .collect();
        let my_rank = members
            .iter()
            .position(|&(_, old)| old == self.rank)
            .ok_or(TransportError::RankOutOfRange {
                rank: self.rank,
                size: members.len(),
            })?;
        let ctx = child_ctx(self.ctx, seq, 1 + my_color as u64);
        Ok(Some(Box::new(self.make_child(ctx, ranks, my_rank))))
    }

    fn duplicate(&self) -> Result<Box<dyn Communicator>, TransportError> {
        let seq = self.next_seq();
        let ctx = child_ctx(self.ctx, seq, 0);
        Ok(Box::new(self.make_child(
            ctx,
            self.ranks.as_ref().clone(),
            self.rank,
        )))
    }

    fn processor_name(&self) -> String {
        self.fabric.hosts[self.world].clone()
    }

    fn now(&self) -> f64 {
        self.fabric.epoch.elapsed().as_secs_f64() + self.fabric.offsets[self.world]
    }

    fn tick(&self) -> f64 {
        TICK
    }

    fn clock_is_global(&self) -> bool {
        self.fabric.global_clock
    }
}

/// Builder for an in-process cluster.
///
/// ```no_run
/// use cluster_bench::transport::LocalClusterBuilder;
///
/// let sums = LocalClusterBuilder::new(4).run(|comm| {
///     comm.allreduce_max_f64(comm.rank() as f64).unwrap()
/// });
/// assert!(sums.iter().all(|&s| s == 3.0));
/// ```
pub struct LocalClusterBuilder {
    size: usize,
    pin_cores: bool,
    clock_offsets: Option<Vec<f64>>,
    host_names: Option<Vec<String>>,
}

impl LocalClusterBuilder {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            pin_cores: false,
            clock_offsets: None,
            host_names: None,
        }
    }

    /// Pin each rank thread to a CPU core (round-robin over the cores the
    /// platform reports).
    pub fn pin_cores(mut self, pin: bool) -> Self {
        self.pin_cores = pin;
        self
    }

    /// Skew each rank's wall clock by a fixed offset in seconds. Injecting
    /// offsets also makes the transport report a non-global clock, which
    /// forces the offset calibration path.
    pub fn clock_offsets(mut self, offsets: Vec<f64>) -> Self {
        self.clock_offsets = Some(offsets);
        self
    }

    /// Pretend the ranks run on the given hosts (one name per rank).
    pub fn host_names(mut self, hosts: Vec<String>) -> Self {
        self.host_names = Some(hosts);
        self
    }

    /// Spawns one thread per rank, runs `f` on each with that rank's world
    /// communicator, and returns the per-rank results in rank order.
    ///
    /// Panics in a rank body propagate to the caller.
    pub fn run<F, R>(self, f: F) -> Vec<R>
    where
        F: Fn(&dyn Communicator) -> R + Sync,
        R: Send,
    {
        let size = self.size;
        let offsets = self.clock_offsets.clone().unwrap_or_else(|| vec![0.0; size]);
        assert_eq!(offsets.len(), size, "one clock offset per rank");
        let hosts = self
            .host_names
            .clone()
            .unwrap_or_else(|| vec!["localhost".to_string(); size]);
        assert_eq!(hosts.len(), size, "one host name per rank");
        let global_clock = self.clock_offsets.is_none();

        let fabric = Arc::new(Fabric {
            size,
            epoch: Instant::now(),
            offsets,
            hosts,
            global_clock,
        });

        // Full mesh: channel (src, dst) for every ordered pair.
        let mut senders: Vec<Vec<Option<Sender<Packet>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Packet>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = unbounded();
                senders[src][dst] = Some(tx);
                receivers[dst][src] = Some(rx);
            }
        }
        let mut parts: Vec<(Vec<Sender<Packet>>, Vec<Receiver<Packet>>)> = senders
            .into_iter()
            .zip(receivers)
            .map(|(srow, rrow)| {
                (
                    srow.into_iter().flatten().collect(),
                    rrow.into_iter().flatten().collect(),
                )
            })
            .collect();

        let core_ids = if self.pin_cores {
            core_affinity::get_core_ids()
        } else {
            None
        };

        let f = &f;
        let fabric_ref = &fabric;
        let core_ids_ref = &core_ids;
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(size);
            for rank in (0..size).rev() {
                let (senders, receivers) = parts.pop().unwrap_or_default();
                let handle = std::thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, move || {
                        if let Some(ids) = core_ids_ref {
                            if !ids.is_empty() {
                                let target = ids[rank % ids.len()];
                                if !core_affinity::set_for_current(target) {
                                    warn!("failed to pin rank {} to core {:?}", rank, target.id);
                                }
                            }
                        }
                        let comm = LocalComm {
                            fabric: Arc::clone(fabric_ref),
                            endpoint: Rc::new(Endpoint {
                                senders,
                                receivers,
                                stash: RefCell::new(HashMap::new()),
                            }),
                            ctx: WORLD_CTX,
                            ranks: Rc::new((0..fabric_ref.size).collect()),
                            rank,
                            world: rank,
                            group_seq: Cell::new(0),
                        };
                        f(&comm)
                    });
                match handle {
                    Ok(h) => handles.push(h),
                    Err(e) => panic!("failed to spawn rank thread: {e}"),
                }
            }
            handles.reverse();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

/// Convenience front for [`LocalClusterBuilder`] with default options.
pub struct LocalCluster;

impl LocalCluster {
    /// Runs `f` on a cluster of `size` ranks with a shared (global) clock.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(&dyn Communicator) -> R + Sync,
        R: Send,
    {
        LocalClusterBuilder::new(size).run(f)
    }
}
