//! Unreliable datagram channels.
//!
//! A [`Channel`] moves opaque datagrams and promises nothing about ordering,
//! delivery or uniqueness.  All protocol logic lives in the state machines;
//! this module owns only byte I/O.
//!
//! - [`UdpChannel`] wraps `tokio::net::UdpSocket`.  Its logical connection
//!   either goes straight to the peer or through the relay emulator, which
//!   learns who to pair us with from a `HELLO <peer_port>` datagram.
//! - [`MemoryChannel`] is an in-process pair for tests.
//!
//! Faults are injected by [`crate::simulator::FaultyChannel`], which wraps
//! either of these.

use std::env;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::packet::{PacketBuf, MAX_PACKET_LEN};

/// Relay host when `RELIABLE_EMU_IP` is unset.
pub const DEFAULT_RELAY_IP: Ipv4Addr = Ipv4Addr::LOCALHOST;
/// Relay port when `RELIABLE_EMU_PORT` is unset.
pub const DEFAULT_RELAY_PORT: u16 = 11_000;

/// Larger than any valid packet so oversized datagrams are detected rather
/// than silently truncated.
const RECV_BUF_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("channel closed by peer")]
    Closed,
    #[error("channel not connected")]
    NotConnected,
    #[error("datagram of {0} bytes exceeds the packet limit")]
    Oversized(usize),
    #[error("bad address: {0}")]
    BadAddress(String),
}

/// How long [`Channel::recv`] may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeout {
    /// Return immediately if nothing is queued.
    Poll,
    /// Wait until a datagram arrives.
    Block,
    /// Wait at most this long.
    Bounded(Duration),
}

impl RecvTimeout {
    /// Millisecond convention used on the command line: 0 polls, a negative
    /// value blocks, a positive value bounds the wait.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => Self::Poll,
            ms if ms < 0 => Self::Block,
            ms => Self::Bounded(Duration::from_millis(ms as u64)),
        }
    }

    /// `Bounded`, collapsing a zero wait to `Poll`.
    pub fn bounded(wait: Duration) -> Self {
        if wait.is_zero() {
            Self::Poll
        } else {
            Self::Bounded(wait)
        }
    }
}

/// An unreliable datagram transport.
///
/// `recv` returns `Ok(None)` when the wait ends without a datagram.
#[allow(async_fn_in_trait)]
pub trait Channel {
    async fn send(&mut self, datagram: &[u8]) -> Result<(), ChannelError>;

    async fn recv(&mut self, timeout: RecvTimeout) -> Result<Option<PacketBuf>, ChannelError>;
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

/// Where a [`UdpChannel`]'s datagrams go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Straight to the peer.
    Direct,
    /// Through the relay emulator at this address.
    Relay(SocketAddr),
}

impl Route {
    /// Relay route from `RELIABLE_EMU_IP` / `RELIABLE_EMU_PORT`.
    pub fn relay_from_env() -> Result<Self, ChannelError> {
        let ip = match env::var("RELIABLE_EMU_IP") {
            Ok(s) => s
                .parse::<IpAddr>()
                .map_err(|_| ChannelError::BadAddress(format!("RELIABLE_EMU_IP={s}")))?,
            Err(_) => IpAddr::V4(DEFAULT_RELAY_IP),
        };
        let port = match env::var("RELIABLE_EMU_PORT") {
            Ok(s) => s
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ChannelError::BadAddress(format!("RELIABLE_EMU_PORT={s}")))?,
            Err(_) => DEFAULT_RELAY_PORT,
        };
        Ok(Self::Relay(SocketAddr::new(ip, port)))
    }
}

/// A UDP socket logically connected to one peer.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
    connected: bool,
}

impl UdpChannel {
    /// Bind to `0.0.0.0:port`; port 0 picks an ephemeral port.
    pub async fn bind(port: u16) -> Result<Self, ChannelError> {
        Self::bind_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await
    }

    pub async fn bind_addr(addr: SocketAddr) -> Result<Self, ChannelError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            connected: false,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.socket.local_addr()?)
    }

    /// Fix the peer.  Through a relay, this registers `HELLO <peer_port>`
    /// and then talks only to the relay.
    pub async fn logical_connect(
        &mut self,
        peer: SocketAddr,
        route: Route,
    ) -> Result<(), ChannelError> {
        match route {
            Route::Direct => {
                self.socket.connect(peer).await?;
                log::debug!("[chan] connected directly to {peer}");
            }
            Route::Relay(relay) => {
                let hello = format!("HELLO {}", peer.port());
                self.socket.send_to(hello.as_bytes(), relay).await?;
                self.socket.connect(relay).await?;
                log::debug!("[chan] registered with relay {relay} for peer port {}", peer.port());
            }
        }
        self.connected = true;
        Ok(())
    }
}

impl Channel for UdpChannel {
    async fn send(&mut self, datagram: &[u8]) -> Result<(), ChannelError> {
        if !self.connected {
            return Err(ChannelError::NotConnected);
        }
        if datagram.len() > MAX_PACKET_LEN {
            return Err(ChannelError::Oversized(datagram.len()));
        }
        match self.socket.send(datagram).await {
            Ok(_) => Ok(()),
            // ICMP unreachable from an earlier send; the peer may not be up yet.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                log::debug!("[chan] send: peer unreachable, datagram lost");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn recv(&mut self, timeout: RecvTimeout) -> Result<Option<PacketBuf>, ChannelError> {
        if !self.connected {
            return Err(ChannelError::NotConnected);
        }
        let mut buf = [0u8; RECV_BUF_LEN];
        let result = match timeout {
            RecvTimeout::Poll => match self.socket.try_recv(&mut buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                r => r,
            },
            RecvTimeout::Block => self.socket.recv(&mut buf).await,
            RecvTimeout::Bounded(wait) => {
                match tokio::time::timeout(wait, self.socket.recv(&mut buf)).await {
                    Ok(r) => r,
                    Err(_) => return Ok(None),
                }
            }
        };
        match result {
            Ok(n) => {
                let datagram = PacketBuf::from_slice(&buf[..n]);
                if datagram.is_none() {
                    log::debug!("[chan] dropping oversized datagram ({n} bytes)");
                }
                Ok(datagram)
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                log::debug!("[chan] recv: peer unreachable");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// One end of an in-process datagram link.  Lossless and ordered until
/// wrapped in a [`crate::simulator::FaultyChannel`].
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<PacketBuf>,
    rx: mpsc::UnboundedReceiver<PacketBuf>,
}

impl MemoryChannel {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self { tx: a_tx, rx: a_rx }, Self { tx: b_tx, rx: b_rx })
    }
}

impl Channel for MemoryChannel {
    async fn send(&mut self, datagram: &[u8]) -> Result<(), ChannelError> {
        let buf =
            PacketBuf::from_slice(datagram).ok_or(ChannelError::Oversized(datagram.len()))?;
        self.tx.send(buf).map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self, timeout: RecvTimeout) -> Result<Option<PacketBuf>, ChannelError> {
        match timeout {
            RecvTimeout::Poll => match self.rx.try_recv() {
                Ok(buf) => Ok(Some(buf)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => Err(ChannelError::Closed),
            },
            RecvTimeout::Block => self.rx.recv().await.map(Some).ok_or(ChannelError::Closed),
            RecvTimeout::Bounded(wait) => match tokio::time::timeout(wait, self.rx.recv()).await {
                Ok(Some(buf)) => Ok(Some(buf)),
                Ok(None) => Err(ChannelError::Closed),
                Err(_) => Ok(None),
            },
        }
    }
}
