//! Receive-side contract and the FIN/linger lifecycle shared by GBN and SR.
//!
//! The window policies ([`crate::gbn_receiver::GbnReceiver`],
//! [`crate::sr_receiver::SrReceiver`]) implement [`ArqReceiver`]: they decide
//! what DATA to accept, what to ACK and what to deliver.  [`ReceiverSession`]
//! wraps either one with everything that does not depend on the policy:
//! datagram validation, FIN handling and the FIN_WAIT linger period.
//!
//! Neither type sends anything; [`crate::transfer::receive_stream`] writes
//! delivered bytes and transmits the returned replies.

use std::time::{Duration, Instant};

use crate::config::ReceiverConfig;
use crate::packet::{Packet, PacketType};
use crate::state::ReceiverState;

/// Counters reported when a transfer ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Bytes delivered to the output, in order.
    pub bytes_delivered: u64,
    /// Checksum-valid DATA packets received.
    pub data_received: u64,
    /// DATA already delivered or already buffered.
    pub duplicates: u64,
    /// DATA discarded because it fell outside what the policy accepts.
    pub discarded: u64,
    /// Datagrams that failed to decode.
    pub corrupt_dropped: u64,
}

/// A receive-window policy.
pub trait ArqReceiver {
    /// Handle one checksum-valid DATA packet; returns the ACK to send, if any.
    fn on_data(&mut self, seq: u32, payload: &[u8]) -> Option<Packet>;

    /// Sequence number a FIN must carry to end the transfer (everything
    /// before it has been delivered).
    fn fin_seq(&self) -> u32;

    /// Reply to a FIN that arrived while data is still missing.
    fn on_early_fin(&self, _seq: u32) -> Option<Packet> {
        None
    }

    /// Bytes delivered in order since the last call.
    fn take_delivered(&mut self) -> Vec<u8>;

    fn stats(&self) -> ReceiverStats;
}

/// FIN handling and linger timing around an [`ArqReceiver`].
#[derive(Debug)]
pub struct ReceiverSession<R> {
    inner: R,
    state: ReceiverState,
    linger: Duration,
    idle_timeout: Option<Duration>,
    corrupt_dropped: u64,
}

impl<R: ArqReceiver> ReceiverSession<R> {
    pub fn new(inner: R, config: &ReceiverConfig) -> Self {
        Self {
            inner,
            state: ReceiverState::Receiving,
            linger: config.linger,
            idle_timeout: config.idle_timeout,
            corrupt_dropped: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Decode and handle one raw datagram.  Malformed input is counted and
    /// dropped without a reply.
    pub fn on_datagram(&mut self, datagram: &[u8], now: Instant) -> Option<Packet> {
        match Packet::decode(datagram) {
            Ok(packet) => self.on_packet(&packet, now),
            Err(e) => {
                self.corrupt_dropped += 1;
                log::debug!("[recv] dropping malformed datagram: {e}");
                None
            }
        }
    }

    /// Handle one decoded packet and return the reply to send, if any.
    pub fn on_packet(&mut self, packet: &Packet, now: Instant) -> Option<Packet> {
        if self.state == ReceiverState::Done {
            return None;
        }
        match packet.kind {
            PacketType::Data => self.inner.on_data(packet.seq, &packet.payload),
            PacketType::Fin if packet.seq == self.inner.fin_seq() => {
                if self.state == ReceiverState::Receiving {
                    log::debug!("[recv] ← FIN seq={}; → FINACK, lingering", packet.seq);
                }
                self.state = ReceiverState::FinWait {
                    linger_until: now + self.linger,
                };
                Some(Packet::fin_ack(packet.seq))
            }
            PacketType::Fin => {
                log::debug!(
                    "[recv] ← FIN seq={} ahead of missing data (expecting {})",
                    packet.seq,
                    self.inner.fin_seq()
                );
                self.inner.on_early_fin(packet.seq)
            }
            PacketType::Ack | PacketType::FinAck => {
                log::debug!("[recv] ignoring {} from sender", packet.kind);
                None
            }
        }
    }

    /// Advance FIN_WAIT to DONE once the linger deadline passes.
    pub fn poll(&mut self, now: Instant) {
        if let ReceiverState::FinWait { linger_until } = self.state {
            if now >= linger_until {
                log::debug!("[recv] linger over — done");
                self.state = ReceiverState::Done;
            }
        }
    }

    pub fn linger_deadline(&self) -> Option<Instant> {
        match self.state {
            ReceiverState::FinWait { linger_until } => Some(linger_until),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ReceiverState::Done
    }

    pub fn take_delivered(&mut self) -> Vec<u8> {
        self.inner.take_delivered()
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            corrupt_dropped: self.corrupt_dropped,
            ..self.inner.stats()
        }
    }
}
