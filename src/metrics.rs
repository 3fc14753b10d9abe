//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for peer connections, record
//! translation, reader recovery, and the trysync handshake.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `fanout_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state.

use metrics::{counter, gauge};

use crate::registry::PeerId;

/// Record a replication-channel connect attempt.
pub fn record_peer_connection(peer_id: PeerId, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("fanout_peer_connections_total", "peer_id" => peer_id.to_string(), "status" => status)
        .increment(1);
}

/// Record the current link state for a peer.
pub fn record_link_state(peer_id: PeerId, state: &'static str) {
    gauge!("fanout_link_state", "peer_id" => peer_id.to_string(), "state" => state).set(1.0);
}

/// Record binlog records read by a sender.
pub fn record_records_read(peer_id: PeerId, count: usize) {
    if count > 0 {
        counter!("fanout_records_read_total", "peer_id" => peer_id.to_string())
            .increment(count as u64);
    }
}

/// Record a skipped record, labelled by reason
/// (`self_echo`, `cache_miss`, `stale`).
pub fn record_record_skipped(peer_id: PeerId, reason: &'static str) {
    counter!("fanout_records_skipped_total", "peer_id" => peer_id.to_string(), "reason" => reason)
        .increment(1);
}

/// Record a successful flush of pending frames.
pub fn record_frames_sent(peer_id: PeerId, bytes: usize) {
    counter!("fanout_flushes_total", "peer_id" => peer_id.to_string()).increment(1);
    counter!("fanout_bytes_sent_total", "peer_id" => peer_id.to_string()).increment(bytes as u64);
}

/// Record a reader reset.
pub fn record_reader_reset(peer_id: PeerId, rollback: u64) {
    counter!("fanout_reader_resets_total", "peer_id" => peer_id.to_string()).increment(1);
    gauge!("fanout_reader_rollback_file", "peer_id" => peer_id.to_string()).set(rollback as f64);
}

/// Record a sender termination, labelled by reason
/// (`stopped`, `reader_lost`, `peer_gone`, `retries_exhausted`).
pub fn record_sender_terminated(peer_id: PeerId, reason: &'static str) {
    counter!("fanout_sender_terminations_total", "peer_id" => peer_id.to_string(), "reason" => reason)
        .increment(1);
}

/// Record a trysync attempt, labelled by outcome
/// (`ok`, `refused`, `connect_failed`, `send_failed`, `recv_failed`).
pub fn record_trysync(peer_id: PeerId, outcome: &'static str) {
    counter!("fanout_trysync_total", "peer_id" => peer_id.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record a peer entry reaped from the registry.
pub fn record_peer_reaped(peer_id: PeerId) {
    counter!("fanout_peers_reaped_total", "peer_id" => peer_id.to_string()).increment(1);
}

/// Gauge for the number of registered peers.
pub fn set_known_peers(count: usize) {
    gauge!("fanout_known_peers").set(count as f64);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        _ => -1.0,
    };
    gauge!("fanout_engine_state").set(value);
}
