//! Thin façade over single-rank, intra-process (threads) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). Messages between
//! the same `(source, destination, tag)` triple are delivered in send order; this is
//! the only ordering the collectives in [`crate::algs::collective`] rely on.
//!
//! Receive handles report what arrived through [`Wait::wait`]; the `buf` passed to
//! `irecv` only fixes the maximum length (longer messages are truncated).

use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn base(self) -> u16 {
        self.0
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Derived tag `k` steps above this one (wrapping).
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }
}

/// Point-to-point communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// This process's rank.
    fn rank(&self) -> usize;
    /// Number of participating ranks; fixed for the communicator's lifetime.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// `true` when no peer exists to talk to.
    fn is_serial(&self) -> bool {
        self.size() == 1
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-rank communicator: rank 0 of a world of size 1.
#[derive(Clone, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

// --- LocalComm: intra-process / one thread per rank ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Shared FIFO mailbox for a group of [`LocalComm`] ranks.
#[derive(Debug, Default)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
    arrived: Condvar,
}

#[derive(Debug, Default)]
struct MailboxState {
    queues: HashMap<Key, VecDeque<Bytes>>,
    departed: HashSet<usize>,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        let mut state = self.state.lock();
        state.queues.entry(key).or_default().push_back(data);
        self.arrived.notify_all();
    }

    fn take(&self, key: &Key) -> Option<Bytes> {
        let mut state = self.state.lock();
        loop {
            if let Some(data) = state.queues.get_mut(key).and_then(VecDeque::pop_front) {
                return Some(data);
            }
            if state.departed.contains(&key.0) {
                return None;
            }
            self.arrived.wait(&mut state);
        }
    }

    fn hang_up(&self, rank: usize) {
        self.state.lock().departed.insert(rank);
        self.arrived.notify_all();
    }
}

static DEFAULT_MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(Mailbox::default()));

/// Pending receive on a [`LocalComm`].
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    max_len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let bytes = self.mailbox.take(&self.key)?;
        let n = bytes.len().min(self.max_len);
        Some(bytes[..n].to_vec())
    }
}

/// Ranks simulated as threads of one process.
///
/// Ranks created by the same [`LocalComm::world`] call share a private mailbox;
/// [`LocalComm::new`] attaches to one process-global mailbox instead.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Rank `rank` of a world of `size` ranks on the process-global mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: DEFAULT_MAILBOX.clone(),
        }
    }

    /// All ranks of a fresh, isolated world, ordered by rank.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: mailbox.clone(),
            })
            .collect()
    }

    /// Mark this rank as gone: once its queued messages are drained, every pending
    /// and future receive from it completes with "no data".
    pub fn hang_up(&self) {
        self.mailbox.hang_up(self.rank);
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: self.mailbox.clone(),
            key: (peer, self.rank, tag),
            max_len: buf.len(),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use crate::dispatch_error::DispatchError;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// `MPI_COMM_WORLD` of an initialized MPI environment.
    ///
    /// Sends are standard blocking sends and receives complete inside `irecv`; the
    /// returned handles are already finished. The collectives order their sends and
    /// receives so that this is deadlock free.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, DispatchError> {
            let universe = mpi::initialize().ok_or_else(|| {
                DispatchError::Unsupported("MPI was already initialized in this process".into())
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// A receive that has already completed.
    pub struct MpiHandle(Option<Vec<u8>>);

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, i32::from(tag));
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let (mut data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag));
            data.truncate(buf.len());
            MpiHandle(Some(data))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
