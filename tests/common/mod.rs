//! Shared test utilities for integration tests.
//!
//! Provides a scripted binlog manager, a recording key-state cache, and
//! record constructors.

pub mod mock_binlog;

pub use mock_binlog::*;

use fanout_engine::binlog::{BinlogOp, BinlogRecord};
use fanout_engine::registry::PeerId;

/// Build a `set` record.
pub fn set_record(
    server_id: PeerId,
    key: &str,
    value: &str,
    exec_time: i64,
    filenum: u64,
    offset: u64,
) -> BinlogRecord {
    BinlogRecord {
        server_id,
        filenum,
        offset,
        op: BinlogOp::Set,
        key: key.to_string(),
        value: value.to_string(),
        exec_time,
    }
}

/// Build a `del` record.
pub fn del_record(
    server_id: PeerId,
    key: &str,
    exec_time: i64,
    filenum: u64,
    offset: u64,
) -> BinlogRecord {
    BinlogRecord {
        server_id,
        filenum,
        offset,
        op: BinlogOp::Del,
        key: key.to_string(),
        value: String::new(),
        exec_time,
    }
}
