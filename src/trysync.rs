// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Trysync driver: the control loop over the peer registry.
//!
//! A single long-lived task sweeps the registry on a fixed cadence:
//!
//! 1. **Reap.** Entries marked `should_delete` are removed; a still-running
//!    sender is aborted (its cooperative stop already fired if the engine
//!    is shutting down).
//! 2. **Handshake.** Every peer with `should_trysync` set and no sender
//!    gets an `internaltrysync <ip> <port> <rcv_number> <rcv_offset>`
//!    request declaring our receive cursor. An `ok` first token clears the
//!    flag; anything else leaves it set for the next sweep.
//! 3. **Spawn.** Every peer with the flag clear and no sender gets a fresh
//!    [`BinlogSender`], seated at its persisted file boundary. This also
//!    restarts senders that previously terminated: their receive cursor is
//!    still declared upstream, so no new handshake is needed.
//!
//! The registry lock is held only to snapshot candidates and write flags —
//! never across the handshake network I/O.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use crate::binlog::BinlogManager;
use crate::client::PeerClient;
use crate::codec;
use crate::config::FanoutTunables;
use crate::error::{FanoutError, Result};
use crate::metrics;
use crate::recover::RecoverOffsets;
use crate::registry::{PeerId, PeerRegistry, SendLink};
use crate::sender::BinlogSender;

/// Snapshot of one handshake candidate, taken under the registry lock.
struct HandshakeTarget {
    peer_id: PeerId,
    ip: String,
    port: u16,
    rcv_number: u64,
    rcv_offset: u64,
}

/// The periodic sweep task. One per engine.
pub struct TrysyncDriver<M: BinlogManager> {
    local_ip: String,
    local_port: u16,
    registry: Arc<PeerRegistry>,
    manager: Arc<M>,
    recover: Arc<RecoverOffsets>,
    tunables: FanoutTunables,
    shutdown_rx: watch::Receiver<bool>,
}

impl<M: BinlogManager> TrysyncDriver<M> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_ip: String,
        local_port: u16,
        registry: Arc<PeerRegistry>,
        manager: Arc<M>,
        recover: Arc<RecoverOffsets>,
        tunables: FanoutTunables,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            local_ip,
            local_port,
            registry,
            manager,
            recover,
            tunables,
            shutdown_rx,
        }
    }

    /// Run sweeps until shutdown is signaled.
    pub async fn run(self) {
        let span = tracing::info_span!("trysync_driver");
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut timer = tokio::time::interval(self.tunables.sweep_interval_duration());

        info!("trysync driver started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.sweep().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("trysync driver stopped");
    }

    /// One sweep: reap, handshake, spawn.
    async fn sweep(&self) {
        let mut handshakes: Vec<HandshakeTarget> = Vec::new();
        {
            let mut peers = self.registry.lock();
            peers.retain(|id, status| {
                if status.should_delete {
                    if let Some(handle) = status.sender.take() {
                        handle.abort();
                    }
                    info!(peer_id = *id, "reaped deleted peer");
                    metrics::record_peer_reaped(*id);
                    return false;
                }
                true
            });
            metrics::set_known_peers(peers.len());

            for status in peers.values() {
                if status.should_trysync && status.sender.is_none() {
                    handshakes.push(HandshakeTarget {
                        peer_id: status.peer_id,
                        ip: status.ip.clone(),
                        port: status.port,
                        rcv_number: status.rcv_number,
                        rcv_offset: status.rcv_offset,
                    });
                }
            }
        }

        for target in handshakes {
            match self.handshake(&target).await {
                Ok(()) => {
                    info!(peer_id = target.peer_id, "trysync accepted");
                    metrics::record_trysync(target.peer_id, "ok");
                    self.registry
                        .with_peer(target.peer_id, |p| p.should_trysync = false);
                }
                Err(e) => {
                    warn!(
                        peer_id = target.peer_id,
                        error = %e,
                        "trysync failed, will retry next sweep"
                    );
                    metrics::record_trysync(target.peer_id, trysync_outcome(&e));
                }
            }
        }

        self.spawn_ready_senders();
    }

    /// Declare our receive cursor to the upstream and check its answer.
    async fn handshake(&self, target: &HandshakeTarget) -> Result<()> {
        let timeouts = self.tunables.link_timeouts();
        let mut cli = PeerClient::connect(&target.ip, target.port, timeouts).await?;

        let local_port = self.local_port.to_string();
        let rcv_number = target.rcv_number.to_string();
        let rcv_offset = target.rcv_offset.to_string();
        let request = codec::serialize_command(&[
            "internaltrysync",
            self.local_ip.as_str(),
            local_port.as_str(),
            rcv_number.as_str(),
            rcv_offset.as_str(),
        ]);

        cli.send(&request).await?;
        let reply = cli.recv_reply().await?;

        match codec::first_reply_token(&reply) {
            Some(token) if token == "ok" => Ok(()),
            Some(token) => Err(FanoutError::HandshakeRefused {
                addr: cli.addr().to_string(),
                reply: token,
            }),
            None => Err(FanoutError::Protocol(format!(
                "unparseable trysync reply: {reply:?}"
            ))),
        }
    }

    /// Start a sender for every synced, idle peer.
    fn spawn_ready_senders(&self) {
        let ready: Vec<(PeerId, String, u16, u64)> = {
            let peers = self.registry.lock();
            peers
                .values()
                .filter(|s| !s.should_trysync && s.sender.is_none() && !s.should_delete)
                .map(|s| (s.peer_id, s.ip.clone(), s.port, s.send_number))
                .collect()
        };

        for (peer_id, ip, port, send_number) in ready {
            // Same mid-file-resume rule as a reset: seat the cursor at the
            // file boundary and let the receiver deduplicate.
            let Some(reader) = self.manager.add_reader(send_number, 0) else {
                error!(
                    peer_id,
                    filenum = send_number,
                    "binlog reader unavailable, sender not started"
                );
                continue;
            };

            let sender = BinlogSender::new(
                peer_id,
                ip,
                port,
                Arc::clone(&self.registry),
                Arc::clone(&self.manager),
                Arc::clone(&self.recover),
                self.tunables.clone(),
                self.shutdown_rx.clone(),
            );

            // Hold the lock across the spawn so the task cannot post its
            // own termination before the handle is registered.
            {
                let mut peers = self.registry.lock();
                let Some(entry) = peers.get_mut(&peer_id) else {
                    continue;
                };
                let handle = tokio::spawn(sender.run(reader));
                entry.sender = Some(handle);
                entry.link = SendLink::Disconnected;
            }
            info!(peer_id, "spawned binlog sender");
        }
    }
}

fn trysync_outcome(e: &FanoutError) -> &'static str {
    match e {
        FanoutError::Connect { .. } => "connect_failed",
        FanoutError::Send { .. } => "send_failed",
        FanoutError::Recv { .. } => "recv_failed",
        FanoutError::HandshakeRefused { .. } => "refused",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::{BinlogReader, CacheEntity, KeyStateCache};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Manager that serves no readers and an empty cache; the handshake
    /// path never touches it.
    struct NullManager;

    struct EmptyCache;

    impl KeyStateCache for EmptyCache {
        fn lookup(&self, _key: &str) -> Option<Arc<CacheEntity>> {
            None
        }
    }

    impl BinlogManager for NullManager {
        fn add_reader(&self, _filenum: u64, _offset: u64) -> Option<Box<dyn BinlogReader>> {
            None
        }

        fn key_cache(&self) -> Arc<dyn KeyStateCache> {
            Arc::new(EmptyCache)
        }
    }

    fn driver(local_port: u16) -> TrysyncDriver<NullManager> {
        let (_tx, rx) = watch::channel(false);
        TrysyncDriver::new(
            "127.0.0.1".to_string(),
            local_port,
            Arc::new(PeerRegistry::new()),
            Arc::new(NullManager),
            Arc::new(RecoverOffsets::new(&[])),
            FanoutTunables::testing(),
            rx,
        )
    }

    fn target(port: u16) -> HandshakeTarget {
        HandshakeTarget {
            peer_id: 2,
            ip: "127.0.0.1".to_string(),
            port,
            rcv_number: 3,
            rcv_offset: 120,
        }
    }

    #[tokio::test]
    async fn test_handshake_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"+OK\r\n").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let driver = driver(9400);
        driver.handshake(&target(port)).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.contains("internaltrysync"));
        assert!(request.contains("127.0.0.1"));
        assert!(request.contains("9400"));
        assert!(request.contains("$1\r\n3\r\n"));
        assert!(request.contains("$3\r\n120\r\n"));
    }

    #[tokio::test]
    async fn test_handshake_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"-ERR not ready\r\n").await.unwrap();
        });

        let driver = driver(9400);
        let result = driver.handshake(&target(port)).await;
        match result {
            Err(FanoutError::HandshakeRefused { reply, .. }) => assert_eq!(reply, "err"),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let driver = driver(9400);
        let result = driver.handshake(&target(port)).await;
        assert!(matches!(result, Err(FanoutError::Connect { .. })));
    }

    #[test]
    fn test_trysync_outcome_labels() {
        let connect = FanoutError::Connect {
            addr: "a".into(),
            message: "m".into(),
        };
        assert_eq!(trysync_outcome(&connect), "connect_failed");

        let refused = FanoutError::HandshakeRefused {
            addr: "a".into(),
            reply: "wait".into(),
        };
        assert_eq!(trysync_outcome(&refused), "refused");

        assert_eq!(trysync_outcome(&FanoutError::Shutdown), "error");
    }
}
