//! Fault-injecting channel wrapper for tests.
//!
//! Real networks drop, reorder, duplicate and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network conditions,
//! [`FaultyChannel`] wraps any [`Channel`] and applies a fault model to every
//! outgoing datagram:
//!
//! | Fault        | Description                                              |
//! |--------------|----------------------------------------------------------|
//! | Loss         | Drop with probability `loss_rate`.                       |
//! | Duplication  | Send twice with probability `duplicate_rate`.            |
//! | Corruption   | Flip one random bit with probability `corrupt_rate`.     |
//! | Reordering   | Hold for `reorder_delay` with probability `reorder_rate`,|
//! |              | letting later datagrams overtake it.                     |
//!
//! Random faults come from a `StdRng` seeded by `FaultConfig::seed`, so a
//! failing run can be replayed.  [`ScriptedFault`]s hit one specific packet
//! exactly once, for tests that need an exact loss pattern.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::channel::{Channel, ChannelError, RecvTimeout};
use crate::config::{check_rate, ConfigError};
use crate::packet::{Packet, PacketBuf, PacketType};

/// A one-shot fault aimed at a specific packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFault {
    /// Drop the first transmission of DATA `seq`.
    DropData { seq: u32 },
    /// Send the first transmission of DATA `seq` twice.
    DuplicateData { seq: u32 },
    /// Flip a bit in the first transmission of DATA `seq`.
    CorruptData { seq: u32 },
    /// Drop the first ACK carrying `ack`.
    DropAck { ack: u32 },
}

impl ScriptedFault {
    fn matches(&self, packet: &Packet) -> bool {
        match (*self, packet.kind) {
            (Self::DropData { seq }, PacketType::Data)
            | (Self::DuplicateData { seq }, PacketType::Data)
            | (Self::CorruptData { seq }, PacketType::Data) => packet.seq == seq,
            (Self::DropAck { ack }, PacketType::Ack) => packet.ack == ack,
            _ => false,
        }
    }
}

/// Fault model parameters.  All probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub corrupt_rate: f64,
    pub reorder_rate: f64,
    /// How long a reordered datagram is held back.
    pub reorder_delay: Duration,
    pub seed: u64,
    pub script: Vec<ScriptedFault>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        // Transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(20),
            seed: 1,
            script: Vec::new(),
        }
    }
}

impl FaultConfig {
    /// Only the given scripted faults, no random ones.
    pub fn scripted(script: impl IntoIterator<Item = ScriptedFault>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rate("loss_rate", self.loss_rate)?;
        check_rate("duplicate_rate", self.duplicate_rate)?;
        check_rate("corrupt_rate", self.corrupt_rate)?;
        check_rate("reorder_rate", self.reorder_rate)
    }
}

/// What the wrapper did to the traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
    pub reordered: u64,
}

/// A [`Channel`] that injects faults into everything it sends.
#[derive(Debug)]
pub struct FaultyChannel<C> {
    inner: C,
    config: FaultConfig,
    rng: StdRng,
    /// Held datagrams in release order (the delay is constant).
    held: VecDeque<(Instant, PacketBuf)>,
    stats: FaultStats,
}

impl<C: Channel> FaultyChannel<C> {
    pub fn new(inner: C, config: FaultConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner,
            config,
            rng,
            held: VecDeque::new(),
            stats: FaultStats::default(),
        }
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }

    /// Remaining scripted faults.
    pub fn pending_script(&self) -> &[ScriptedFault] {
        &self.config.script
    }

    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random::<f64>() < p
    }

    /// Flip one random bit.  An empty datagram has none to flip.
    fn corrupt(&mut self, datagram: &PacketBuf) -> Result<PacketBuf, ChannelError> {
        if datagram.is_empty() {
            return Ok(datagram.clone());
        }
        let mut bytes = datagram.to_vec();
        let bit = self.rng.random_range(0..bytes.len() * 8);
        bytes[bit / 8] ^= 1 << (bit % 8);
        self.stats.corrupted += 1;
        PacketBuf::from_slice(&bytes).ok_or(ChannelError::Oversized(bytes.len()))
    }

    async fn forward(&mut self, datagram: &[u8]) -> Result<(), ChannelError> {
        self.stats.forwarded += 1;
        self.inner.send(datagram).await
    }

    async fn release_due(&mut self, now: Instant) -> Result<(), ChannelError> {
        while self.held.front().is_some_and(|(due, _)| *due <= now) {
            if let Some((_, datagram)) = self.held.pop_front() {
                self.forward(&datagram).await?;
            }
        }
        Ok(())
    }

    fn take_scripted(&mut self, datagram: &[u8]) -> Option<ScriptedFault> {
        if self.config.script.is_empty() {
            return None;
        }
        let packet = Packet::decode(datagram).ok()?;
        let idx = self.config.script.iter().position(|f| f.matches(&packet))?;
        Some(self.config.script.remove(idx))
    }
}

impl<C: Channel> Channel for FaultyChannel<C> {
    async fn send(&mut self, datagram: &[u8]) -> Result<(), ChannelError> {
        self.release_due(Instant::now()).await?;
        let datagram =
            PacketBuf::from_slice(datagram).ok_or(ChannelError::Oversized(datagram.len()))?;

        match self.take_scripted(&datagram) {
            Some(ScriptedFault::DropData { seq }) => {
                log::debug!("[fault] scripted drop of DATA seq={seq}");
                self.stats.dropped += 1;
                return Ok(());
            }
            Some(ScriptedFault::DropAck { ack }) => {
                log::debug!("[fault] scripted drop of ACK ack={ack}");
                self.stats.dropped += 1;
                return Ok(());
            }
            Some(ScriptedFault::DuplicateData { seq }) => {
                log::debug!("[fault] scripted duplicate of DATA seq={seq}");
                self.stats.duplicated += 1;
                self.forward(&datagram).await?;
                return self.forward(&datagram).await;
            }
            Some(ScriptedFault::CorruptData { seq }) => {
                log::debug!("[fault] scripted corruption of DATA seq={seq}");
                let bad = self.corrupt(&datagram)?;
                return self.forward(&bad).await;
            }
            None => {}
        }

        if self.chance(self.config.loss_rate) {
            self.stats.dropped += 1;
            return Ok(());
        }
        let datagram = if self.chance(self.config.corrupt_rate) {
            self.corrupt(&datagram)?
        } else {
            datagram
        };
        if self.chance(self.config.reorder_rate) {
            self.stats.reordered += 1;
            self.held
                .push_back((Instant::now() + self.config.reorder_delay, datagram));
            return Ok(());
        }
        self.forward(&datagram).await?;
        if self.chance(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.forward(&datagram).await?;
        }
        Ok(())
    }

    async fn recv(&mut self, timeout: RecvTimeout) -> Result<Option<PacketBuf>, ChannelError> {
        let now = Instant::now();
        self.release_due(now).await?;

        // Wake up in time to release the next held datagram.
        let timeout = match (timeout, self.held.front()) {
            (RecvTimeout::Poll, _) | (_, None) => timeout,
            (RecvTimeout::Block, Some((due, _))) => {
                RecvTimeout::bounded(due.saturating_duration_since(now))
            }
            (RecvTimeout::Bounded(wait), Some((due, _))) => {
                RecvTimeout::bounded(wait.min(due.saturating_duration_since(now)))
            }
        };
        let got = self.inner.recv(timeout).await?;
        self.release_due(Instant::now()).await?;
        Ok(got)
    }
}
