// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-peer binlog sender.
//!
//! One task per peer drives that peer's replication stream:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ loop:                                                      │
//! │   reader reset?  ──▶ reseat cursor at (rollback, 0)        │
//! │   no connection? ──▶ connect to ip:port+interval, pace 2s  │
//! │   pending frames?──▶ flush (failure ⇒ reset + reconnect)   │
//! │   otherwise      ──▶ read batch, filter, frame, advance    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each iteration performs at most one phase action. The registry mutex is
//! only ever held for field updates, never across connect, send, read, or
//! sleep.
//!
//! # Reader resets
//!
//! After a send failure or a read failure the cursor is rebuilt at file
//! `rollback`, offset 0. Mid-file resume is forbidden: the persisted
//! `send_offset` is not guaranteed to be the tail of the last fully
//! decoded record, so the whole file is replayed and the receiver
//! deduplicates by `(key, exec_time)`. `rollback` trails the send cursor
//! by at least one file so a reset never re-opens the file the reader is
//! still producing from.
//!
//! # Termination
//!
//! The task exits on the external stop signal, on reader factory failure,
//! when its peer vanishes from the registry, or when consecutive read
//! failures exceed the retry budget. In every case the registry shows
//! `link = Terminated` and `sender = None` before the task returns.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use crate::binlog::{BinlogManager, BinlogReader, BinlogRecord, KeyStateCache, ReadResult};
use crate::client::PeerClient;
use crate::codec;
use crate::config::FanoutTunables;
use crate::error::{FanoutError, Result};
use crate::metrics;
use crate::recover::RecoverOffsets;
use crate::registry::{PeerId, PeerRegistry, SendLink};

/// Outcome of filtering one record against the dedup state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Translate {
    /// Framed and appended to the pending buffer.
    Emitted,
    /// The record originated from the target peer itself.
    SelfEcho,
    /// The key's state is unknown to the hub.
    CacheMiss,
    /// The record is older than the hub's committed state for the key.
    Stale,
}

/// Filter one record and append its frame to `pending` if it survives.
///
/// Order matters: the self-echo check runs before the recovery-offset
/// update, so a peer's own writes leave no trace in the matrix.
pub(crate) fn translate_record(
    peer_id: PeerId,
    record: &BinlogRecord,
    cache: &dyn KeyStateCache,
    recover: &RecoverOffsets,
    pending: &mut Vec<u8>,
) -> Translate {
    if record.server_id == peer_id {
        return Translate::SelfEcho;
    }

    recover.observe(record.server_id, peer_id, record.filenum);

    let entity = match cache.lookup(&record.key) {
        Some(entity) => entity,
        None => {
            warn!(key = %record.key, "key absent from state cache, dropping record");
            return Translate::CacheMiss;
        }
    };
    if record.exec_time < entity.exec_time {
        return Translate::Stale;
    }
    drop(entity);

    let frame = if record.op.takes_value() {
        codec::serialize_command(&[record.op.verb(), record.key.as_str(), record.value.as_str()])
    } else {
        codec::serialize_command(&[record.op.verb(), record.key.as_str()])
    };
    pending.extend_from_slice(&frame);
    Translate::Emitted
}

/// Rollback advancement law: advance to `send_number - 1` only once the
/// reader has crossed two or more file boundaries past the current
/// rollback, so a reset never re-opens the file still being produced.
pub fn advance_rollback(send_number: u64, rollback: u64) -> u64 {
    if send_number > rollback + 1 {
        send_number - 1
    } else {
        rollback
    }
}

/// The per-peer sender task. Constructed and spawned by the trysync
/// driver; owns its reader and connection exclusively.
pub struct BinlogSender<M: BinlogManager> {
    peer_id: PeerId,
    ip: String,
    port: u16,
    registry: Arc<PeerRegistry>,
    manager: Arc<M>,
    recover: Arc<RecoverOffsets>,
    tunables: FanoutTunables,
    shutdown_rx: watch::Receiver<bool>,
}

impl<M: BinlogManager> BinlogSender<M> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer_id: PeerId,
        ip: String,
        port: u16,
        registry: Arc<PeerRegistry>,
        manager: Arc<M>,
        recover: Arc<RecoverOffsets>,
        tunables: FanoutTunables,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            peer_id,
            ip,
            port,
            registry,
            manager,
            recover,
            tunables,
            shutdown_rx,
        }
    }

    /// Run the sender until it terminates. `reader` is the initial cursor,
    /// seated by the driver at the peer's persisted file boundary.
    pub async fn run(self, reader: Box<dyn BinlogReader>) {
        let span = tracing::info_span!("binlog_sender", peer_id = self.peer_id);
        self.run_inner(reader).instrument(span).await
    }

    async fn run_inner(self, reader: Box<dyn BinlogReader>) {
        let cache = self.manager.key_cache();
        let repl_port = self.port.saturating_add(self.tunables.port_interval);
        let timeouts = self.tunables.link_timeouts();

        let mut reader = Some(reader);
        let mut cli: Option<PeerClient> = None;
        let mut pending: Vec<u8> = Vec::new();
        let mut reset_reader = false;
        let mut rollback: u64 = 0;
        let mut error_times: u32 = 0;
        let mut exit_reason: &'static str = "stopped";

        info!("binlog sender started");

        while !self.should_stop() {
            if reset_reader {
                // The old cursor must be gone before the manager will
                // hand out a new one.
                reader = None;
                match self.reseat_reader(rollback) {
                    Ok(fresh) => {
                        info!(rollback, "reader reset to file boundary");
                        metrics::record_reader_reset(self.peer_id, rollback);
                        reader = Some(fresh);
                        reset_reader = false;
                    }
                    Err(e) => {
                        error!(error = %e, "reader reset failed, sender exiting");
                        exit_reason = match e {
                            FanoutError::ReaderLost { .. } => "reader_lost",
                            _ => "peer_gone",
                        };
                        break;
                    }
                }
                continue;
            }

            if cli.is_none() {
                match PeerClient::connect(&self.ip, repl_port, timeouts).await {
                    Ok(client) => {
                        info!(addr = %client.addr(), "connected to peer");
                        metrics::record_peer_connection(self.peer_id, true);
                        metrics::record_link_state(self.peer_id, "connected");
                        let fd = client.descriptor();
                        self.registry
                            .with_peer(self.peer_id, |p| p.link = SendLink::Connected(fd));
                        cli = Some(client);
                    }
                    Err(e) => {
                        warn!(error = %e, "connect to peer failed");
                        metrics::record_peer_connection(self.peer_id, false);
                    }
                }
                tokio::time::sleep(self.tunables.connect_pause()).await;
                continue;
            }

            if !pending.is_empty() {
                let Some(link) = cli.as_mut() else {
                    continue;
                };
                match link.send(&pending).await {
                    Ok(()) => {
                        metrics::record_frames_sent(self.peer_id, pending.len());
                        pending.clear();
                    }
                    Err(e) => {
                        warn!(error = %e, "send to peer failed, scheduling reader reset");
                        self.registry
                            .with_peer(self.peer_id, |p| p.link = SendLink::Disconnected);
                        metrics::record_link_state(self.peer_id, "disconnected");
                        cli = None;
                        pending.clear();
                        tokio::time::sleep(self.tunables.send_failure_pause()).await;
                        reset_reader = true;
                    }
                }
                continue;
            }

            let Some(cursor) = reader.as_mut() else {
                reset_reader = true;
                continue;
            };

            match cursor.read_records().await {
                ReadResult::Records(records) => {
                    error_times = 0;
                    metrics::record_records_read(self.peer_id, records.len());
                    for record in &records {
                        match translate_record(
                            self.peer_id,
                            record,
                            cache.as_ref(),
                            &self.recover,
                            &mut pending,
                        ) {
                            Translate::Emitted => {}
                            Translate::SelfEcho => {
                                metrics::record_record_skipped(self.peer_id, "self_echo")
                            }
                            Translate::CacheMiss => {
                                metrics::record_record_skipped(self.peer_id, "cache_miss")
                            }
                            Translate::Stale => {
                                metrics::record_record_skipped(self.peer_id, "stale")
                            }
                        }
                    }
                    self.update_send_offset(&**cursor, &mut rollback);
                }
                ReadResult::Paused => {
                    info!("reader paused");
                }
                ReadResult::Failed(message) => {
                    error_times += 1;
                    if error_times > self.tunables.max_retry_times {
                        error!(
                            error = %message,
                            attempts = error_times,
                            "read retries exhausted, sender exiting"
                        );
                        exit_reason = "retries_exhausted";
                        break;
                    }
                    warn!(
                        error = %message,
                        attempt = error_times,
                        "read failed, scheduling reader reset"
                    );
                    tokio::time::sleep(self.tunables.read_retry_pause()).await;
                    reset_reader = true;
                }
            }
        }

        drop(cli);
        self.mark_terminated();
        metrics::record_sender_terminated(self.peer_id, exit_reason);
        info!(reason = exit_reason, "binlog sender stopped");
    }

    fn should_stop(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Rebuild the cursor at `(rollback, 0)`. Registry membership is
    /// re-checked under the lock; terminal outcomes are reflected into
    /// the entry before returning.
    fn reseat_reader(&self, rollback: u64) -> Result<Box<dyn BinlogReader>> {
        let mut peers = self.registry.lock();
        let Some(entry) = peers.get_mut(&self.peer_id) else {
            return Err(FanoutError::UnknownPeer(self.peer_id));
        };
        match self.manager.add_reader(rollback, 0) {
            Some(fresh) => Ok(fresh),
            None => {
                entry.link = SendLink::Terminated;
                entry.sender = None;
                Err(FanoutError::ReaderLost { filenum: rollback })
            }
        }
    }

    /// Publish the reader position into the registry and apply the
    /// rollback advancement law. The position is read under the registry
    /// mutex; the rollback advances from the reader's own cursor, so a
    /// vanished peer cannot fault it.
    fn update_send_offset(&self, reader: &dyn BinlogReader, rollback: &mut u64) {
        let mut peers = self.registry.lock();
        let (number, offset) = reader.position();
        if let Some(entry) = peers.get_mut(&self.peer_id) {
            entry.send_number = number;
            entry.send_offset = offset;
        }
        *rollback = advance_rollback(number, *rollback);
    }

    fn mark_terminated(&self) {
        self.registry.with_peer(self.peer_id, |p| {
            p.link = SendLink::Terminated;
            p.sender = None;
        });
        metrics::record_link_state(self.peer_id, "terminated");
    }
}
