// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the fan-out core.
//!
//! Errors are categorized by the operation that produced them and carry
//! enough context (peer address, reply text) to be actionable in logs.
//!
//! # Retry Behavior
//!
//! Use [`FanoutError::is_retryable()`] to decide whether an operation
//! should be retried. Retryable errors are transient network conditions;
//! non-retryable errors indicate configuration problems, terminal sender
//! states, or bugs in the caller.
//!
//! | Error | Retryable |
//! |-------|-----------|
//! | `Connect` / `Send` / `Recv` | Yes |
//! | `HandshakeRefused` | Yes (next sweep) |
//! | `Protocol` | No |
//! | `ReaderLost` | No |
//! | `UnknownPeer` | No |
//! | `InvalidState` | No |
//! | `Shutdown` | No |

use thiserror::Error;

use crate::registry::PeerId;

/// Result type alias for fan-out operations.
pub type Result<T> = std::result::Result<T, FanoutError>;

/// Errors that can occur while replicating to peers.
#[derive(Error, Debug)]
pub enum FanoutError {
    /// TCP connect to a peer failed or timed out.
    #[error("connect to {addr} failed: {message}")]
    Connect { addr: String, message: String },

    /// Writing framed commands to a peer failed or timed out.
    #[error("send to {addr} failed: {message}")]
    Send { addr: String, message: String },

    /// Reading a reply from a peer failed or timed out.
    #[error("recv from {addr} failed: {message}")]
    Recv { addr: String, message: String },

    /// The peer answered the trysync handshake with something other
    /// than `ok`. Retried on the next driver sweep.
    #[error("trysync refused by {addr}: {reply}")]
    HandshakeRefused { addr: String, reply: String },

    /// A reply could not be parsed as a Redis frame.
    #[error("malformed reply: {0}")]
    Protocol(String),

    /// The binlog manager could not construct a reader at the requested
    /// position. Fatal to the sender that asked.
    #[error("binlog reader unavailable at file {filenum}")]
    ReaderLost { filenum: u64 },

    /// The peer vanished from the registry mid-operation.
    #[error("peer {0} missing from registry")]
    UnknownPeer(PeerId),

    /// An operation was attempted in the wrong engine state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("shutdown in progress")]
    Shutdown,
}

impl FanoutError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::Send { .. } => true,
            Self::Recv { .. } => true,
            Self::HandshakeRefused { .. } => true,
            Self::Protocol(_) => false,
            Self::ReaderLost { .. } => false,
            Self::UnknownPeer(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
        }
    }
}
