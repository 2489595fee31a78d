//! Datagram transport abstraction.
//!
//! The endpoint never touches an OS socket directly; it talks to a
//! [`Transport`].  [`Socket`] is the production implementation, a thin
//! wrapper around `tokio::net::UdpSocket`, and
//! [`crate::simulator::SimSocket`] is the in-memory one used by tests.
//!
//! All protocol logic lives elsewhere; this module owns only byte I/O.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Outcome of one bounded wait for inbound data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv {
    /// A datagram arrived; `bytes` holds at most `max_size` bytes of it.
    Datagram { bytes: Vec<u8>, from: SocketAddr },
    /// Nothing arrived within the poll timeout.
    TimedOut,
}

/// Unreliable, unordered datagram delivery.
///
/// Timeouts are reported as [`Recv::TimedOut`], never as errors; an `Err`
/// always means the transport itself failed.
#[async_trait]
pub trait Transport: Send {
    async fn send_to(&mut self, bytes: &[u8], dest: SocketAddr) -> io::Result<()>;

    async fn recv_from(&mut self, max_size: usize, poll_timeout: Duration) -> io::Result<Recv>;
}

/// An async UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

#[async_trait]
impl Transport for Socket {
    async fn send_to(&mut self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    async fn recv_from(&mut self, max_size: usize, poll_timeout: Duration) -> io::Result<Recv> {
        let mut buf = vec![0u8; max_size];
        match tokio::time::timeout(poll_timeout, self.inner.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => {
                buf.truncate(n);
                Ok(Recv::Datagram { bytes: buf, from })
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(Recv::TimedOut),
        }
    }
}
