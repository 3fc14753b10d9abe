//! Recovery offset matrix.
//!
//! For every `(origin, observer)` pair of known peers, records the highest
//! binlog file number the observer's sender has seen originating from that
//! origin. The matrix shape is fixed at startup; each cell is an atomic
//! counter updated with a relaxed monotone max, so senders write without
//! touching the registry mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::registry::PeerId;

/// Fixed `(origin, observer)` matrix of atomic file numbers.
#[derive(Debug)]
pub struct RecoverOffsets {
    cells: HashMap<PeerId, HashMap<PeerId, AtomicU64>>,
}

impl RecoverOffsets {
    /// Build the full matrix over the given peer ids. The key set never
    /// changes afterwards.
    pub fn new(peer_ids: &[PeerId]) -> Self {
        let mut cells = HashMap::with_capacity(peer_ids.len());
        for &origin in peer_ids {
            let row = peer_ids
                .iter()
                .map(|&observer| (observer, AtomicU64::new(0)))
                .collect();
            cells.insert(origin, row);
        }
        Self { cells }
    }

    /// Record that `observer` has seen file `filenum` from `origin`.
    /// Monotone: a lower observation never rewinds the cell. Pairs outside
    /// the startup key set are ignored.
    pub fn observe(&self, origin: PeerId, observer: PeerId, filenum: u64) {
        if let Some(cell) = self.cells.get(&origin).and_then(|row| row.get(&observer)) {
            cell.fetch_max(filenum, Ordering::Relaxed);
        }
    }

    /// Highest file number `observer` has seen from `origin`, or `None`
    /// for pairs outside the matrix.
    pub fn get(&self, origin: PeerId, observer: PeerId) -> Option<u64> {
        self.cells
            .get(&origin)
            .and_then(|row| row.get(&observer))
            .map(|cell| cell.load(Ordering::Relaxed))
    }
}
