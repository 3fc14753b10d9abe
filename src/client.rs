//! Peer connection management.
//!
//! A [`PeerClient`] is one Redis-protocol TCP connection to a peer, with
//! the uniform timeout discipline the core applies everywhere: 1500 ms to
//! connect, 3000 ms per send, 3000 ms per receive (all tunable).
//!
//! Connections are deliberately dumb: no reconnection, no pooling. The
//! sender loop and the trysync driver own retry policy; when anything
//! fails here they drop the client and decide what to do next.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::codec;
use crate::config::LinkTimeouts;
use crate::error::{FanoutError, Result};

/// One live connection to a peer.
pub struct PeerClient {
    stream: TcpStream,
    addr: String,
    timeouts: LinkTimeouts,
}

impl PeerClient {
    /// Open a connection to `ip:port` within the configured connect
    /// timeout.
    pub async fn connect(ip: &str, port: u16, timeouts: LinkTimeouts) -> Result<Self> {
        let addr = format!("{ip}:{port}");
        let stream = match timeout(timeouts.connect, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(FanoutError::Connect {
                    addr,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(FanoutError::Connect {
                    addr,
                    message: format!("timed out after {}ms", timeouts.connect.as_millis()),
                })
            }
        };
        let _ = stream.set_nodelay(true);
        Ok(Self {
            stream,
            addr,
            timeouts,
        })
    }

    /// The peer address this client is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The connection's file descriptor, published into the registry for
    /// observability.
    #[cfg(unix)]
    pub fn descriptor(&self) -> i32 {
        use std::os::unix::io::AsRawFd;
        self.stream.as_raw_fd()
    }

    #[cfg(not(unix))]
    pub fn descriptor(&self) -> i32 {
        0
    }

    /// Write a pre-framed buffer to the peer. Replies are not awaited;
    /// the replication channel is a one-way pipeline.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        match timeout(self.timeouts.send, self.stream.write_all(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FanoutError::Send {
                addr: self.addr.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(FanoutError::Send {
                addr: self.addr.clone(),
                message: format!("timed out after {}ms", self.timeouts.send.as_millis()),
            }),
        }
    }

    /// Read one complete reply frame from the peer.
    pub async fn recv_reply(&mut self) -> Result<String> {
        let recv_timeout = self.timeouts.recv;
        let mut buf: Vec<u8> = Vec::with_capacity(128);

        let outcome = timeout(recv_timeout, async {
            let mut chunk = [0u8; 512];
            loop {
                let n = self
                    .stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| e.to_string())?;
                if n == 0 {
                    return Err("connection closed".to_string());
                }
                buf.extend_from_slice(&chunk[..n]);
                if codec::reply_complete(&buf) {
                    return Ok(());
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => String::from_utf8(buf)
                .map_err(|e| FanoutError::Protocol(format!("reply is not UTF-8: {e}"))),
            Ok(Err(message)) => Err(FanoutError::Recv {
                addr: self.addr.clone(),
                message,
            }),
            Err(_) => Err(FanoutError::Recv {
                addr: self.addr.clone(),
                message: format!("timed out after {}ms", recv_timeout.as_millis()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanoutTunables;
    use tokio::net::TcpListener;

    fn timeouts() -> LinkTimeouts {
        FanoutTunables::testing().link_timeouts()
    }

    #[tokio::test]
    async fn test_connect_and_descriptor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = PeerClient::connect("127.0.0.1", port, timeouts())
            .await
            .unwrap();
        assert_eq!(client.addr(), format!("127.0.0.1:{port}"));
        assert!(client.descriptor() >= 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind-then-drop to find a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = PeerClient::connect("127.0.0.1", port, timeouts()).await;
        assert!(matches!(result, Err(FanoutError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_send_then_recv_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"+OK\r\n").await.unwrap();
            buf[..n].to_vec()
        });

        let mut client = PeerClient::connect("127.0.0.1", port, timeouts())
            .await
            .unwrap();
        client
            .send(&codec::serialize_command(&["ping"]))
            .await
            .unwrap();
        let reply = client.recv_reply().await.unwrap();
        assert_eq!(codec::first_reply_token(&reply), Some("ok".to_string()));

        let seen = server.await.unwrap();
        assert_eq!(seen, b"*1\r\n$4\r\nping\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_recv_on_closed_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut client = PeerClient::connect("127.0.0.1", port, timeouts())
            .await
            .unwrap();
        server.await.unwrap();

        let result = client.recv_reply().await;
        assert!(matches!(result, Err(FanoutError::Recv { .. })));
    }

    #[tokio::test]
    async fn test_recv_timeout_on_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept but never reply.
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut client = PeerClient::connect("127.0.0.1", port, timeouts())
            .await
            .unwrap();
        let result = client.recv_reply().await;
        match result {
            Err(FanoutError::Recv { message, .. }) => assert!(message.contains("timed out")),
            other => panic!("expected recv timeout, got {other:?}"),
        }
    }
}
