//! # Fan-out Engine
//!
//! The replication fan-out core of a cache-fronted key-value hub. The hub
//! sits between upstream primaries (Redis-dialect servers with a private
//! `internaltrysync` handshake) and downstream replica peers; this crate
//! tails the hub's binlog and forwards committed writes to every peer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            fanout-engine                             │
//! │                                                                      │
//! │  ┌──────────────┐ sweeps  ┌──────────────┐  spawns  ┌─────────────┐  │
//! │  │ TrysyncDriver│────────▶│ PeerRegistry │◀─────────│ BinlogSender│  │
//! │  │ (handshake)  │         │ (one mutex)  │ progress │ (per peer)  │  │
//! │  └──────┬───────┘         └──────────────┘          └──────┬──────┘  │
//! │         │ internaltrysync                   set/del/expireat frames  │
//! │         ▼                                                 ▼          │
//! │    peer base port                            peer port + interval    │
//! └──────────────────────────────────────────────────────────────────────┘
//!            ▲                                                ▲
//!            └──────── BinlogManager (external): readers, LRU ┘
//! ```
//!
//! Each [`BinlogSender`] owns one peer's stream: it reads record batches
//! from a binlog cursor, drops the peer's own writes, arbitrates
//! last-write-wins against the hub's key-state cache, frames survivors as
//! Redis commands, and pipelines them downstream. The [`TrysyncDriver`]
//! reaps removed peers, performs the `internaltrysync` handshake for peers
//! that need (re)synchronization, and spawns senders once a peer is
//! synced.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanout_engine::{FanoutConfig, FanoutEngine, PeerEndpoint};
//! # use fanout_engine::binlog::{BinlogManager, BinlogReader, CacheEntity, KeyStateCache};
//! # struct Manager;
//! # struct Cache;
//! # impl KeyStateCache for Cache {
//! #     fn lookup(&self, _: &str) -> Option<Arc<CacheEntity>> { None }
//! # }
//! # impl BinlogManager for Manager {
//! #     fn add_reader(&self, _: u64, _: u64) -> Option<Box<dyn BinlogReader>> { None }
//! #     fn key_cache(&self) -> Arc<dyn KeyStateCache> { Arc::new(Cache) }
//! # }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = FanoutConfig {
//!         local_ip: "192.168.0.10".into(),
//!         local_port: 9221,
//!         peers: vec![PeerEndpoint::new(2, "192.168.0.11", 9221)],
//!         ..Default::default()
//!     };
//!
//!     let manager = Arc::new(Manager);
//!     let mut engine = FanoutEngine::new(config, manager);
//!     engine.start().expect("failed to start");
//!
//!     // Engine runs until shutdown signal
//!     engine.shutdown().await;
//! }
//! ```

pub mod binlog;
pub mod client;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod recover;
pub mod registry;
pub mod sender;
pub mod trysync;

// Re-exports for convenience
pub use binlog::{BinlogManager, BinlogOp, BinlogReader, BinlogRecord, CacheEntity, KeyStateCache, ReadResult};
pub use client::PeerClient;
pub use config::{FanoutConfig, FanoutTunables, PeerEndpoint};
pub use engine::{EngineState, FanoutEngine};
pub use error::{FanoutError, Result};
pub use recover::RecoverOffsets;
pub use registry::{PeerId, PeerRegistry, PeerStatus, SendLink};
pub use sender::BinlogSender;
pub use trysync::TrysyncDriver;
