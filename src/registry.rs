//! Peer registry: the only cross-task mutable state.
//!
//! One [`PeerStatus`] per known peer, all behind a single mutex. Both the
//! trysync driver and every binlog sender read and write peer fields
//! exclusively through this registry, and every critical section is short:
//! no connect, send, or sleep ever happens while the lock is held.
//!
//! # Link state
//!
//! ```text
//! Disconnected ──connect ok──▶ Connected(fd)
//!      ▲                            │
//!      └────────send failed─────────┘
//!
//! (any state) ──sender exits──▶ Terminated
//! ```
//!
//! `Terminated` means the sender task has exited and its handle is safe
//! to drop; the entry is then eligible for reaping or respawn.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

/// Stable integer identifier for a peer, unique across the registry.
pub type PeerId = i32;

/// Connection state of a peer's replication link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendLink {
    /// No connection; the sender will (re)connect on its next iteration.
    Disconnected,
    /// Active connection, carrying its descriptor for observability.
    Connected(i32),
    /// The sender task has exited.
    Terminated,
}

impl SendLink {
    /// Label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SendLink::Disconnected => "disconnected",
            SendLink::Connected(_) => "connected",
            SendLink::Terminated => "terminated",
        }
    }
}

/// Everything the core tracks about one peer.
#[derive(Debug)]
pub struct PeerStatus {
    pub peer_id: PeerId,
    pub ip: String,
    pub port: u16,

    /// Last binlog position received from this peer as a primary.
    /// Declared upstream in the trysync handshake.
    pub rcv_number: u64,
    pub rcv_offset: u64,

    /// Last binlog position the sender has read for this peer.
    pub send_number: u64,
    pub send_offset: u64,

    /// Replication link state.
    pub link: SendLink,

    /// Handle to the running sender task, if any. Ownership is exclusive:
    /// the driver drops it only when `should_delete` is set or the link
    /// is `Terminated`; the task clears it itself on exit.
    pub sender: Option<JoinHandle<()>>,

    /// The peer needs a handshake before replication can proceed.
    pub should_trysync: bool,

    /// The peer was removed from configuration; reaped on the next sweep.
    pub should_delete: bool,
}

impl PeerStatus {
    /// A freshly configured peer: no progress, no link, handshake pending.
    pub fn new(peer_id: PeerId, ip: &str, port: u16) -> Self {
        Self {
            peer_id,
            ip: ip.to_string(),
            port,
            rcv_number: 0,
            rcv_offset: 0,
            send_number: 0,
            send_offset: 0,
            link: SendLink::Disconnected,
            sender: None,
            should_trysync: true,
            should_delete: false,
        }
    }
}

/// Mutex-guarded map of peer id → [`PeerStatus`].
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, PeerStatus>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a peer entry.
    pub fn insert(&self, status: PeerStatus) {
        self.lock().insert(status.peer_id, status);
    }

    /// Lock the whole map. Used by the driver's sweep; critical sections
    /// must stay short and free of blocking I/O.
    pub fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, PeerStatus>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against one peer's entry under the lock.
    ///
    /// Returns `None` if the peer is not in the registry — callers must
    /// treat that as "the peer was removed", never dereference blindly.
    pub fn with_peer<R>(&self, id: PeerId, f: impl FnOnce(&mut PeerStatus) -> R) -> Option<R> {
        self.lock().get_mut(&id).map(f)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot one peer's link state.
    pub fn link(&self, id: PeerId) -> Option<SendLink> {
        self.with_peer(id, |p| p.link)
    }

    /// Snapshot one peer's send progress as `(number, offset)`.
    pub fn send_progress(&self, id: PeerId) -> Option<(u64, u64)> {
        self.with_peer(id, |p| (p.send_number, p.send_offset))
    }

    /// Whether a sender task handle is currently registered for the peer.
    pub fn sender_present(&self, id: PeerId) -> bool {
        self.with_peer(id, |p| p.sender.is_some()).unwrap_or(false)
    }

    /// Whether the peer still needs a handshake.
    pub fn needs_trysync(&self, id: PeerId) -> Option<bool> {
        self.with_peer(id, |p| p.should_trysync)
    }

    /// Mark a peer for removal on the next sweep.
    pub fn mark_for_delete(&self, id: PeerId) {
        self.with_peer(id, |p| p.should_delete = true);
    }
}
