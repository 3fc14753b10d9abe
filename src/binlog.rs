// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Binlog manager integration traits.
//!
//! The binlog itself — an append-only log of committed writes, partitioned
//! into numbered files — is written and owned by an external manager. The
//! core consumes exactly three of its capabilities:
//!
//! 1. Construct a tail cursor at a file boundary ([`BinlogManager::add_reader`])
//! 2. Read record batches in order ([`BinlogReader::read_records`])
//! 3. Arbitrate last-write-wins against the key-state cache
//!    ([`KeyStateCache::lookup`])
//!
//! The traits allow testing with scripted mocks and decouple the core from
//! the manager's storage format.
//!
//! # Cache handles
//!
//! [`KeyStateCache::lookup`] returns a reference-counted handle
//! (`Arc<CacheEntity>`); dropping the handle releases the entry. Every
//! control path through the sender — miss, stale skip, emit — releases
//! exactly once because the handle's scope ends there.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::registry::PeerId;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A committed write operation, as decoded from the binlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinlogOp {
    Set,
    Del,
    ExpireAt,
}

impl BinlogOp {
    /// Decode a raw binlog op code. Codes outside the replication
    /// vocabulary yield `None`; callers log and drop the record.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(BinlogOp::Set),
            2 => Some(BinlogOp::Del),
            3 => Some(BinlogOp::ExpireAt),
            _ => None,
        }
    }

    /// The verb sent on the replication channel.
    pub fn verb(&self) -> &'static str {
        match self {
            BinlogOp::Set => "set",
            BinlogOp::Del => "del",
            BinlogOp::ExpireAt => "expireat",
        }
    }

    /// Whether the framed command carries the record's value argument.
    pub fn takes_value(&self) -> bool {
        matches!(self, BinlogOp::Set | BinlogOp::ExpireAt)
    }
}

/// One decoded binlog record.
#[derive(Debug, Clone)]
pub struct BinlogRecord {
    /// Server that originated the write.
    pub server_id: PeerId,
    /// Binlog file the record came from.
    pub filenum: u64,
    /// Byte offset within that file.
    pub offset: u64,
    /// Operation type.
    pub op: BinlogOp,
    pub key: String,
    /// Value for `set`; unix timestamp string for `expireat`; empty for `del`.
    pub value: String,
    /// Logical timestamp for last-write-wins arbitration.
    pub exec_time: i64,
}

/// Outcome of one blocking read against the binlog tail.
#[derive(Debug)]
pub enum ReadResult {
    /// A batch of records, in binlog order. May be empty.
    Records(Vec<BinlogRecord>),

    /// The reader was asked to stop. Benign; the sender keeps looping
    /// and does not count this against its retry budget.
    Paused,

    /// The read failed. Retried with a reader reset, up to the sender's
    /// retry budget.
    Failed(String),
}

/// Tail cursor over the binlog, owned exclusively by one sender task.
pub trait BinlogReader: Send {
    /// Blocking read of the next record batch.
    fn read_records(&mut self) -> BoxFuture<'_, ReadResult>;

    /// Current cursor position as `(file number, byte offset)`.
    fn position(&self) -> (u64, u64);
}

/// The slice of the external binlog manager the core depends on.
pub trait BinlogManager: Send + Sync + 'static {
    /// Construct a tail cursor starting at `(filenum, offset)`.
    ///
    /// `None` means the requested position cannot be served; the caller
    /// treats this as fatal for the sender that asked.
    fn add_reader(&self, filenum: u64, offset: u64) -> Option<Box<dyn BinlogReader>>;

    /// The shared key-state cache used for last-write-wins arbitration.
    fn key_cache(&self) -> Arc<dyn KeyStateCache>;
}

/// Latest committed state known to the hub for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntity {
    /// Logical timestamp of the last committed write.
    pub exec_time: i64,
}

/// The LRU key-state cache, internally synchronized.
///
/// A present entry records the latest committed state; a miss means the
/// key's state is unknown to the hub and records for it must be skipped.
pub trait KeyStateCache: Send + Sync + 'static {
    /// Look up a key. The returned handle is reference-counted; dropping
    /// it releases the entry.
    fn lookup(&self, key: &str) -> Option<Arc<CacheEntity>>;
}
