//! UDP relay that emulates an unreliable link between two endpoints.
//!
//! ```text
//!  sender ──HELLO <recv_port>──▶ ┌───────┐ ◀──HELLO <send_port>── receiver
//!  sender ◀─────── datagrams ───▶│ relay │◀───── datagrams ─────▶ receiver
//!                                └───────┘
//!                      loss · delay · reorder · rate cap
//! ```
//!
//! Each endpoint registers with `HELLO <peer_port>`.  Two registrations pair
//! up when each names the other's source port; from then on everything one
//! sends is scheduled for delivery to the other.  Scheduling per datagram:
//!
//! - dropped with probability `loss`;
//! - delivered after `delay`, or `3 × delay` with probability `reorder`;
//! - with `rate_kbps > 0`, serialised behind earlier datagrams on the same
//!   (src, dst) link first.
//!
//! Unpaired traffic is ignored.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;

use crate::channel::{ChannelError, DEFAULT_RELAY_PORT};
use crate::config::{check_rate, ConfigError};

const HELLO_PREFIX: &[u8] = b"HELLO ";
const RELAY_BUF_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub port: u16,
    pub loss: f64,
    pub delay: Duration,
    pub reorder: f64,
    /// Link rate cap in kbit/s; 0 means unlimited.
    pub rate_kbps: f64,
    pub seed: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_RELAY_PORT,
            loss: 0.0,
            delay: Duration::ZERO,
            reorder: 0.0,
            rate_kbps: 0.0,
            seed: 1,
        }
    }
}

impl RelayConfig {
    /// Convert a `--delay_ms` value, rejecting NaN, infinities, negatives
    /// and anything too large for a [`Duration`].
    pub fn delay_from_millis(ms: f64) -> Result<Duration, ConfigError> {
        if !ms.is_finite() || ms < 0.0 {
            return Err(ConfigError::NotFinite("delay_ms"));
        }
        Duration::try_from_secs_f64(ms / 1000.0).map_err(|_| ConfigError::NotFinite("delay_ms"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rate("loss", self.loss)?;
        check_rate("reorder", self.reorder)?;
        if !self.rate_kbps.is_finite() || self.rate_kbps < 0.0 {
            return Err(ConfigError::NotFinite("rate_kbps"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub unpaired: u64,
    pub dropped: u64,
    pub delivered: u64,
}

/// A datagram waiting for its delivery time.
#[derive(Debug)]
struct Scheduled {
    deliver_at: Instant,
    order: u64,
    dst: SocketAddr,
    data: Vec<u8>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest delivery first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deliver_at, other.order).cmp(&(self.deliver_at, self.order))
    }
}

pub struct Relay {
    socket: UdpSocket,
    config: RelayConfig,
    rng: StdRng,
    /// Source address → the peer port it asked for.
    endpoints: HashMap<SocketAddr, u16>,
    forward: HashMap<SocketAddr, SocketAddr>,
    queue: BinaryHeap<Scheduled>,
    next_order: u64,
    link_free_at: HashMap<(SocketAddr, SocketAddr), Instant>,
    stats: RelayStats,
}

impl Relay {
    /// Bind `0.0.0.0:config.port`.
    pub async fn bind(config: RelayConfig) -> Result<Self, ChannelError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
        Self::bind_addr(addr, config).await
    }

    pub async fn bind_addr(addr: SocketAddr, config: RelayConfig) -> Result<Self, ChannelError> {
        let socket = UdpSocket::bind(addr).await?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            socket,
            config,
            rng,
            endpoints: HashMap::new(),
            forward: HashMap::new(),
            queue: BinaryHeap::new(),
            next_order: 0,
            link_free_at: HashMap::new(),
            stats: RelayStats::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Relay forever, or until the socket fails.
    pub async fn run(&mut self) -> Result<(), ChannelError> {
        log::info!("[relay] listening on {}", self.local_addr()?);
        let mut buf = [0u8; RELAY_BUF_LEN];
        loop {
            let wait = self
                .queue
                .peek()
                .map(|next| next.deliver_at.saturating_duration_since(Instant::now()));
            let received = match wait {
                Some(wait) => tokio::time::timeout(wait, self.socket.recv_from(&mut buf))
                    .await
                    .ok(),
                None => Some(self.socket.recv_from(&mut buf).await),
            };
            match received {
                Some(Ok((n, src))) => self.on_datagram(&buf[..n], src, Instant::now()),
                Some(Err(e)) if is_transient(&e) => {
                    log::debug!("[relay] recv: {e}");
                }
                Some(Err(e)) => return Err(e.into()),
                None => {}
            }
            self.deliver_due(Instant::now()).await?;
        }
    }

    fn on_datagram(&mut self, data: &[u8], src: SocketAddr, now: Instant) {
        if let Some(rest) = data.strip_prefix(HELLO_PREFIX) {
            let peer_port = std::str::from_utf8(rest)
                .ok()
                .and_then(|s| s.trim().parse::<u16>().ok());
            match peer_port {
                Some(port) => {
                    log::info!("[relay] HELLO from {src} for peer port {port}");
                    self.endpoints.insert(src, port);
                    self.pair();
                }
                None => log::debug!("[relay] malformed HELLO from {src}"),
            }
            return;
        }

        self.stats.received += 1;
        match self.forward.get(&src).copied() {
            Some(dst) => self.schedule(src, dst, data, now),
            None => {
                self.stats.unpaired += 1;
                log::debug!("[relay] {src} is not paired; dropping {} bytes", data.len());
            }
        }
    }

    /// Rebuild the forwarding table from the current registrations.
    fn pair(&mut self) {
        self.forward.clear();
        for (&a, &a_wants) in &self.endpoints {
            for (&b, &b_wants) in &self.endpoints {
                if a != b && a_wants == b.port() && b_wants == a.port() {
                    self.forward.insert(a, b);
                }
            }
        }
        for (a, b) in &self.forward {
            log::debug!("[relay] forwarding {a} → {b}");
        }
    }

    fn schedule(&mut self, src: SocketAddr, dst: SocketAddr, data: &[u8], now: Instant) {
        if self.rng.random::<f64>() < self.config.loss {
            self.stats.dropped += 1;
            return;
        }
        let mut delay = self.config.delay;
        if self.rng.random::<f64>() < self.config.reorder {
            delay = delay.saturating_mul(3);
        }
        let Some(deliver_at) = self.delivery_time((src, dst), data.len(), delay, now) else {
            log::warn!("[relay] {src} → {dst}: delivery time out of range, dropping");
            self.stats.dropped += 1;
            return;
        };
        self.queue.push(Scheduled {
            deliver_at,
            order: self.next_order,
            dst,
            data: data.to_vec(),
        });
        self.next_order += 1;
    }

    /// When a datagram of `len` bytes entering `link` at `now` arrives, or
    /// `None` if that lies beyond what an [`Instant`] can represent.
    fn delivery_time(
        &mut self,
        link: (SocketAddr, SocketAddr),
        len: usize,
        delay: Duration,
        now: Instant,
    ) -> Option<Instant> {
        if self.config.rate_kbps <= 0.0 {
            return now.checked_add(delay);
        }
        let free_at = self.link_free_at.entry(link).or_insert(now);
        let start = (*free_at).max(now);
        let bits = len as f64 * 8.0;
        let on_wire = Duration::try_from_secs_f64(bits / (self.config.rate_kbps * 1000.0)).ok()?;
        let finish = start.checked_add(on_wire)?;
        *free_at = finish;
        finish.checked_add(delay)
    }

    async fn deliver_due(&mut self, now: Instant) -> Result<(), ChannelError> {
        while self.queue.peek().is_some_and(|next| next.deliver_at <= now) {
            let Some(next) = self.queue.pop() else { break };
            match self.socket.send_to(&next.data, next.dst).await {
                Ok(_) => self.stats.delivered += 1,
                Err(e) if is_transient(&e) => log::debug!("[relay] send to {}: {e}", next.dst),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// ICMP errors from an endpoint that went away.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn relay(config: RelayConfig) -> Relay {
        Relay::bind_addr(addr(0), config).await.unwrap()
    }

    #[tokio::test]
    async fn pairs_on_mutual_hello() {
        let mut r = relay(RelayConfig::default()).await;
        let now = Instant::now();
        r.on_datagram(b"HELLO 6000", addr(5000), now);
        assert!(r.forward.is_empty());

        r.on_datagram(b"HELLO 5000", addr(6000), now);
        assert_eq!(r.forward.get(&addr(5000)), Some(&addr(6000)));
        assert_eq!(r.forward.get(&addr(6000)), Some(&addr(5000)));

        r.on_datagram(b"payload", addr(5000), now);
        assert_eq!(r.queue.len(), 1);
    }

    #[tokio::test]
    async fn unpaired_and_malformed_hello_ignored() {
        let mut r = relay(RelayConfig::default()).await;
        let now = Instant::now();
        r.on_datagram(b"HELLO port", addr(5000), now);
        assert!(r.endpoints.is_empty());
        r.on_datagram(b"data", addr(5000), now);
        assert!(r.queue.is_empty());
        assert_eq!(r.stats().unpaired, 1);
    }

    #[tokio::test]
    async fn full_loss_schedules_nothing() {
        let mut r = relay(RelayConfig {
            loss: 1.0,
            ..RelayConfig::default()
        })
        .await;
        let now = Instant::now();
        r.on_datagram(b"HELLO 6000", addr(5000), now);
        r.on_datagram(b"HELLO 5000", addr(6000), now);
        for _ in 0..5 {
            r.on_datagram(b"x", addr(5000), now);
        }
        assert!(r.queue.is_empty());
        assert_eq!(r.stats().dropped, 5);
    }

    #[tokio::test]
    async fn queue_orders_by_delivery_time() {
        let mut r = relay(RelayConfig {
            delay: Duration::from_millis(10),
            reorder: 1.0,
            ..RelayConfig::default()
        })
        .await;
        let now = Instant::now();
        r.schedule(addr(1), addr(2), b"late", now);
        r.config.reorder = 0.0;
        r.schedule(addr(1), addr(2), b"early", now);

        let first = r.queue.pop().unwrap();
        assert_eq!(first.data, b"early");
        assert_eq!(first.deliver_at, now + Duration::from_millis(10));
        assert_eq!(r.queue.pop().unwrap().deliver_at, now + Duration::from_millis(30));
    }

    #[tokio::test]
    async fn rate_cap_serialises_link() {
        let mut r = relay(RelayConfig {
            rate_kbps: 8.0,
            ..RelayConfig::default()
        })
        .await;
        let now = Instant::now();
        // 8 kbit/s: 10 bytes take 10 ms on the wire.
        r.schedule(addr(1), addr(2), &[0; 10], now);
        r.schedule(addr(1), addr(2), &[0; 10], now);
        r.schedule(addr(2), addr(1), &[0; 10], now);

        let mut times: Vec<_> = std::iter::from_fn(|| r.queue.pop())
            .map(|s| s.deliver_at.duration_since(now).as_micros())
            .collect();
        times.sort();
        let near = |t: u128, want: u128| t.abs_diff(want) <= 1;
        assert!(near(times[0], 10_000) && near(times[1], 10_000), "{times:?}");
        assert!(near(times[2], 20_000), "{times:?}");
    }

    #[tokio::test]
    async fn tiny_rate_drops_instead_of_overflowing() {
        let mut r = relay(RelayConfig {
            rate_kbps: 1e-300,
            ..RelayConfig::default()
        })
        .await;
        let now = Instant::now();
        r.schedule(addr(1), addr(2), &[0; 100], now);
        assert!(r.queue.is_empty());
        assert_eq!(r.stats().dropped, 1);
    }

    #[test]
    fn config_validation() {
        assert!(RelayConfig::default().validate().is_ok());
        let bad = RelayConfig {
            reorder: -0.1,
            ..RelayConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::RateOutOfRange("reorder")));

        for rate_kbps in [f64::NAN, f64::INFINITY, -1.0] {
            let bad = RelayConfig {
                rate_kbps,
                ..RelayConfig::default()
            };
            assert_eq!(bad.validate(), Err(ConfigError::NotFinite("rate_kbps")));
        }
    }

    #[test]
    fn delay_from_millis_rejects_non_finite() {
        assert_eq!(RelayConfig::delay_from_millis(0.0), Ok(Duration::ZERO));
        assert_eq!(RelayConfig::delay_from_millis(250.0), Ok(Duration::from_millis(250)));
        for ms in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, -5.0, 1e300] {
            assert_eq!(
                RelayConfig::delay_from_millis(ms),
                Err(ConfigError::NotFinite("delay_ms")),
                "{ms}"
            );
        }
    }
}
