//! Configuration for the fan-out core.
//!
//! Configuration is passed to [`FanoutEngine::new()`](crate::FanoutEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use fanout_engine::config::{FanoutConfig, PeerEndpoint};
//!
//! let config = FanoutConfig {
//!     local_ip: "192.168.0.10".into(),
//!     local_port: 9221,
//!     peers: vec![PeerEndpoint::new(2, "192.168.0.11", 9221)],
//!     ..Default::default()
//! };
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! local_ip: "192.168.0.10"
//! local_port: 9221
//!
//! tunables:
//!   port_interval: 100
//!   max_retry_times: 5
//!   sweep_interval: "2s"
//!
//! peers:
//!   - peer_id: 2
//!     ip: "192.168.0.11"
//!     port: 9221
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::registry::PeerId;

/// The top-level config object passed to `FanoutEngine::new()`.
///
/// `local_ip`/`local_port` identify this hub in the trysync handshake;
/// `peers` lists every server the core replicates to and from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Address this hub advertises in `internaltrysync` requests.
    pub local_ip: String,

    /// Port this hub advertises in `internaltrysync` requests.
    pub local_port: u16,

    /// Tunable timings and retry budgets.
    #[serde(default)]
    pub tunables: FanoutTunables,

    /// Known peers. Every entry starts life needing a handshake.
    pub peers: Vec<PeerEndpoint>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            local_ip: "127.0.0.1".to_string(),
            local_port: 9221,
            tunables: FanoutTunables::default(),
            peers: Vec::new(),
        }
    }
}

impl FanoutConfig {
    /// Create a minimal config for testing, with every pause shrunk.
    pub fn for_testing(local_ip: &str, local_port: u16) -> Self {
        Self {
            local_ip: local_ip.to_string(),
            local_port,
            tunables: FanoutTunables::testing(),
            peers: Vec::new(),
        }
    }
}

/// One remote server: both an upstream primary (trysync target) and a
/// downstream replica (binlog sender target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEndpoint {
    /// Stable integer identifier, unique across the registry.
    pub peer_id: PeerId,

    /// Peer address. The handshake uses `port` directly; the replication
    /// channel uses `port + port_interval`.
    pub ip: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(peer_id: PeerId, ip: &str, port: u16) -> Self {
        Self {
            peer_id,
            ip: ip.to_string(),
            port,
        }
    }
}

/// Tunable timings and retry budgets.
///
/// The defaults reproduce the wire behavior of the original hub: 1500 ms
/// connect, 3000 ms send/recv, 2 s connect pacing, 1 s send-failure pause,
/// 500 ms read-retry pause, 2 s driver sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutTunables {
    /// Fixed offset between a peer's base port and its replication port.
    #[serde(default = "default_port_interval")]
    pub port_interval: u16,

    /// Consecutive read failures tolerated before a sender gives up.
    #[serde(default = "default_max_retry_times")]
    pub max_retry_times: u32,

    /// Driver sweep cadence as a duration string (e.g. "2s").
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,

    /// TCP connect timeout (ms).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Send timeout (ms).
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Recv timeout (ms).
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    /// Pacing sleep after each connect attempt, success or failure (ms).
    #[serde(default = "default_connect_pause_ms")]
    pub connect_pause_ms: u64,

    /// Pause after a send failure, before the reader reset (ms).
    #[serde(default = "default_send_failure_pause_ms")]
    pub send_failure_pause_ms: u64,

    /// Pause between read retries (ms).
    #[serde(default = "default_read_retry_pause_ms")]
    pub read_retry_pause_ms: u64,
}

fn default_port_interval() -> u16 {
    100
}

fn default_max_retry_times() -> u32 {
    5
}

fn default_sweep_interval() -> String {
    "2s".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    1500
}

fn default_send_timeout_ms() -> u64 {
    3000
}

fn default_recv_timeout_ms() -> u64 {
    3000
}

fn default_connect_pause_ms() -> u64 {
    2000
}

fn default_send_failure_pause_ms() -> u64 {
    1000
}

fn default_read_retry_pause_ms() -> u64 {
    500
}

impl Default for FanoutTunables {
    fn default() -> Self {
        Self {
            port_interval: 100,
            max_retry_times: 5,
            sweep_interval: "2s".to_string(),
            connect_timeout_ms: 1500,
            send_timeout_ms: 3000,
            recv_timeout_ms: 3000,
            connect_pause_ms: 2000,
            send_failure_pause_ms: 1000,
            read_retry_pause_ms: 500,
        }
    }
}

impl FanoutTunables {
    /// Fast timings for tests: millisecond pauses, tight sweeps, a small
    /// retry budget, and no port offset so one listener can serve both
    /// channels.
    pub fn testing() -> Self {
        Self {
            port_interval: 0,
            max_retry_times: 2,
            sweep_interval: "50ms".to_string(),
            connect_timeout_ms: 500,
            send_timeout_ms: 500,
            recv_timeout_ms: 500,
            connect_pause_ms: 10,
            send_failure_pause_ms: 10,
            read_retry_pause_ms: 10,
        }
    }

    /// Parse the sweep interval string to a Duration.
    pub fn sweep_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.sweep_interval).unwrap_or(Duration::from_secs(2))
    }

    /// Resolve the per-connection timeouts.
    pub fn link_timeouts(&self) -> LinkTimeouts {
        LinkTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            send: Duration::from_millis(self.send_timeout_ms),
            recv: Duration::from_millis(self.recv_timeout_ms),
        }
    }

    pub fn connect_pause(&self) -> Duration {
        Duration::from_millis(self.connect_pause_ms)
    }

    pub fn send_failure_pause(&self) -> Duration {
        Duration::from_millis(self.send_failure_pause_ms)
    }

    pub fn read_retry_pause(&self) -> Duration {
        Duration::from_millis(self.read_retry_pause_ms)
    }
}

/// Resolved connection timeouts for one peer link.
#[derive(Debug, Clone, Copy)]
pub struct LinkTimeouts {
    pub connect: Duration,
    pub send: Duration,
    pub recv: Duration,
}
