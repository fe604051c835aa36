//! `Client`/`Server` wrap a [`Connection`] with the recv/timer loop an
//! application would otherwise write itself, the same split quinn-proto
//! draws between its endpoint-level driving code and the connection state
//! machine it drives. This demo endpoint serves exactly one peer per bound
//! socket: `Server::accept` waits for a single client's first Initial
//! datagram and hands the listening socket straight to that connection
//! (UDP's "connect" just fixes the socket's default peer, so no rebind is
//! needed). A production listener would instead keep the socket itself,
//! demultiplex inbound datagrams by destination connection ID across a table
//! of live connections, and push parsed datagrams into each one.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::config::EndpointConfig;
use crate::connection::{Connection, StreamData};
use crate::crypto::Session;
use crate::error::{LocalError, QuicError, QuicheError, QuicheResult};
use crate::packet::header::Header;

const MAX_DATAGRAM_SIZE: usize = 65535;

fn remaining(start: Instant, budget: Duration) -> QuicheResult<Duration> {
    budget
        .checked_sub(start.elapsed())
        .ok_or(QuicheError::Local(LocalError::Timeout))
}

/// A client-initiated connection, plus the recv loop to drive it.
pub struct Client {
    conn: Connection,
}

impl Client {
    pub async fn connect(
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        config: EndpointConfig,
        session: Box<dyn Session>,
    ) -> QuicheResult<Self> {
        let conn = Connection::connect(local_addr, peer_addr, config, session).await?;
        Ok(Self { conn })
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Flush pending stream writes and any owed ACKs.
    pub async fn flush(&mut self) -> QuicheResult<()> {
        self.conn.flush_streams().await?;
        self.conn.flush_acks().await
    }

    async fn recv_one(&mut self, wait: Duration) -> QuicheResult<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let n = timeout(wait, self.conn.recv_datagram(&mut buf))
            .await
            .map_err(|_| QuicheError::Local(LocalError::Timeout))??;
        buf.truncate(n);
        self.conn.on_datagram(buf).await
    }

    /// Pump inbound datagrams until the handshake completes, or fail once
    /// `budget` has elapsed without that happening.
    pub async fn drive_until_established(&mut self, budget: Duration) -> QuicheResult<()> {
        let start = Instant::now();
        while !self.conn.is_established() {
            self.recv_one(remaining(start, budget)?).await?;
        }
        Ok(())
    }

    /// Pump inbound datagrams until `stream_id` has delivered any bytes, or
    /// fail once `budget` has elapsed without that happening.
    pub async fn drive_and_read(&mut self, stream_id: u64, budget: Duration) -> QuicheResult<Vec<u8>> {
        let start = Instant::now();
        loop {
            let data = self.conn.read_stream(stream_id);
            if !data.is_empty() {
                return Ok(data);
            }
            self.recv_one(remaining(start, budget)?).await?;
        }
    }
}

/// A bound-but-not-yet-connected socket, waiting for its one peer.
pub struct Server {
    socket: UdpSocket,
    config: EndpointConfig,
}

impl Server {
    pub async fn listen(local_addr: SocketAddr, config: EndpointConfig) -> QuicheResult<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        Ok(Self { socket, config })
    }

    /// The address this server actually bound to, e.g. to read back an
    /// ephemeral port chosen with `local_addr: 0`.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Block until a client's first Initial datagram arrives, then build the
    /// connection it kicks off. `make_session` is called once the peer is
    /// known, so a real implementation could pick a session per client.
    pub async fn accept(self, make_session: impl FnOnce() -> Box<dyn Session>) -> QuicheResult<ServerConnection> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (n, peer_addr) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);

        let mut peek = buf.clone();
        let header = Header::decode(&mut peek, self.config.local_cid_len as usize)?;
        let (client_dst_cid, client_src_cid) = match header {
            Header::Initial(h) => (h.dst_cid.cid, h.src_cid),
            _ => return Err(QuicheError::Quic(QuicError::ProtocolViolation)),
        };

        self.socket.connect(peer_addr).await?;
        let conn = Connection::accept(
            self.socket,
            peer_addr,
            self.config,
            make_session(),
            &client_dst_cid,
            client_src_cid,
            buf,
        )
        .await?;
        Ok(ServerConnection { conn })
    }
}

/// An accepted connection, plus the recv loop to drive it.
pub struct ServerConnection {
    conn: Connection,
}

impl ServerConnection {
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub async fn flush(&mut self) -> QuicheResult<()> {
        self.conn.flush_streams().await?;
        self.conn.flush_acks().await
    }

    /// Wait up to `wait` for one inbound datagram and report any stream data
    /// it newly made readable. Returns an empty list (with no error) on a
    /// timeout, after checking the idle timer and closing if it has expired.
    pub async fn drive_once(&mut self, wait: Duration) -> QuicheResult<Vec<StreamData>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let n = match timeout(wait, self.conn.recv_datagram(&mut buf)).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                if self.conn.idle_timeout_expired() {
                    self.conn.close(QuicError::NoError, b"idle timeout").await?;
                }
                return Ok(Vec::new());
            }
        };
        buf.truncate(n);
        self.conn.on_datagram(buf).await?;
        self.conn.flush_acks().await?;
        Ok(self.conn.drain_readable())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::NullSession;

    #[tokio::test]
    async fn server_accept_establishes_from_a_clients_connect() {
        let server = Server::listen("127.0.0.1:0".parse().unwrap(), EndpointConfig::default())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();

        // Client::connect sends its first flight immediately; the datagram
        // sits in the server socket's receive buffer until accept() reads it.
        let client = Client::connect(
            "127.0.0.1:0".parse().unwrap(),
            server_addr,
            EndpointConfig::default(),
            Box::new(NullSession::default()),
        )
        .await
        .unwrap();

        let mut server_conn = server.accept(|| Box::new(NullSession::default())).await.unwrap();
        assert!(server_conn.connection_mut().is_established());

        drop(client);
    }
}
