//! Go-Back-N send-side state machine.
//!
//! [`GbnSender`] maintains a sliding window of up to `N` in-flight packets.
//!
//! # Protocol contract
//!
//! - At most `window_size` packets may be in flight at once
//!   (`next_seq − send_base < N`).
//! - ACKs are **cumulative**: `ack = K` means the receiver has delivered every
//!   packet with sequence number below `K`.
//! - A single timer covers the oldest unacked packet.  On expiry the sender
//!   retransmits **all** packets from `send_base` to `next_seq − 1` (go back
//!   N) and restarts the timer.
//! - Sequence numbers are u32 (one per packet) and wrap modulo 2^32.
//!
//! This module only manages state; all channel I/O is the caller's
//! responsibility.

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::SenderConfig;
use crate::error::TransferError;
use crate::packet::{Packet, PacketError, PacketType, MAX_PAYLOAD};
use crate::sender::{ArqSender, FinHandshake, SenderStats};
use crate::seq::{distance, seq_le, seq_lt};
use crate::state::SenderState;
use crate::timer::{FixedRto, RetransmitTimer, RtoPolicy};

/// Duplicate ACKs that trigger a fast retransmit.
const DUP_ACK_THRESHOLD: u32 = 3;

// ---------------------------------------------------------------------------
// GbnEntry
// ---------------------------------------------------------------------------

/// A single in-flight packet occupying one slot in the window.
#[derive(Debug, Clone)]
pub struct GbnEntry {
    pub packet: Packet,
    /// Total number of times this packet has been transmitted.
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

// ---------------------------------------------------------------------------
// GbnSender
// ---------------------------------------------------------------------------

/// Go-Back-N send-side state for one transfer.
///
/// # Sequence-number layout
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct GbnSender<P = FixedRto> {
    /// Sequence number of the **oldest** unacked packet (left window edge).
    pub send_base: u32,

    /// Sequence number to use for the **next** new packet.
    pub next_seq: u32,

    /// Maximum number of packets that may be in flight simultaneously (N).
    window_size: usize,

    /// In-flight packets ordered by sequence number (front = oldest).
    window: VecDeque<GbnEntry>,

    /// The single retransmission timer, tied to `window.front()`.
    timer: RetransmitTimer,
    rto: P,

    state: SenderState,
    fin: Option<FinHandshake>,

    /// Consecutive timer expiries without the window advancing.
    retries: u32,
    max_retransmits: u32,
    max_fin_retries: u32,

    fast_retransmit: bool,
    dup_acks: u32,

    stats: SenderStats,
}

impl GbnSender<FixedRto> {
    /// Sender with the fixed RTO from `config`.
    pub fn new(config: &SenderConfig) -> Self {
        Self::with_policy(config, FixedRto(config.rto))
    }
}

impl<P: RtoPolicy> GbnSender<P> {
    /// Sender whose timeout comes from `policy`.
    pub fn with_policy(config: &SenderConfig, policy: P) -> Self {
        assert!(config.window >= 1, "window_size must be at least 1");
        Self {
            send_base: 0,
            next_seq: 0,
            window_size: config.window,
            window: VecDeque::with_capacity(config.window),
            timer: RetransmitTimer::new(),
            rto: policy,
            state: SenderState::Idle,
            fin: None,
            retries: 0,
            max_retransmits: config.max_retransmits,
            max_fin_retries: config.max_fin_retries,
            fast_retransmit: config.fast_retransmit,
            dup_acks: 0,
            stats: SenderStats::default(),
        }
    }

    /// Start numbering at `seq` instead of 0.  Only meaningful before the
    /// first packet is sent.
    pub fn with_initial_seq(mut self, seq: u32) -> Self {
        debug_assert!(self.window.is_empty());
        self.send_base = seq;
        self.next_seq = seq;
        self
    }

    /// `true` when at least one packet is awaiting acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.window.is_empty()
    }

    /// Iterate over all in-flight packets from oldest to newest.
    pub fn window_entries(&self) -> impl Iterator<Item = &GbnEntry> {
        self.window.iter()
    }

    /// Resend the whole window and restart the timer.
    fn go_back(&mut self, now: Instant) -> Vec<Packet> {
        let mut pkts = Vec::with_capacity(self.window.len());
        for entry in self.window.iter_mut() {
            entry.tx_count += 1;
            entry.sent_at = now;
            pkts.push(entry.packet.clone());
        }
        let n = pkts.len() as u64;
        self.stats.packets_sent += n;
        self.stats.retransmissions += n;
        self.timer.arm(now, self.rto.rto());
        pkts
    }

    fn check_invariants(&self) {
        debug_assert_eq!(self.window.len(), distance(self.send_base, self.next_seq));
        debug_assert!(self.window.len() <= self.window_size);
        debug_assert_eq!(self.timer.is_armed(), !self.window.is_empty());
    }
}

impl<P: RtoPolicy> ArqSender for GbnSender<P> {
    fn state(&self) -> SenderState {
        self.state
    }

    fn window_size(&self) -> usize {
        self.window_size
    }

    fn in_flight(&self) -> usize {
        self.window.len()
    }

    fn stats(&self) -> SenderStats {
        self.stats
    }

    fn send_data(&mut self, payload: Vec<u8>, now: Instant) -> Result<Packet, TransferError> {
        if !matches!(self.state, SenderState::Idle | SenderState::Sending) {
            return Err(TransferError::BadState {
                op: "send data",
                state: self.state,
            });
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload.len()).into());
        }
        if self.window.len() >= self.window_size {
            return Err(TransferError::WindowFull {
                in_flight: self.window.len(),
                window: self.window_size,
            });
        }

        let packet = Packet::data(self.next_seq, payload);
        self.stats.bytes_sent += packet.payload.len() as u64;
        self.stats.packets_sent += 1;
        self.window.push_back(GbnEntry {
            packet: packet.clone(),
            tx_count: 1,
            sent_at: now,
        });
        self.next_seq = self.next_seq.wrapping_add(1);
        self.timer.arm_if_idle(now, self.rto.rto());
        self.state = SenderState::Sending;

        log::debug!(
            "[gbn] → DATA seq={} len={} in_flight={}",
            packet.seq,
            packet.payload.len(),
            self.window.len()
        );
        self.check_invariants();
        Ok(packet)
    }

    fn on_ack(&mut self, ack: u32, now: Instant) -> Vec<Packet> {
        self.stats.acks_received += 1;

        // Stale (≤ base) or bogus (beyond anything sent).
        if !seq_lt(self.send_base, ack) || !seq_le(ack, self.next_seq) {
            if ack == self.send_base && self.fast_retransmit && self.has_unacked() {
                self.dup_acks += 1;
                if self.dup_acks == DUP_ACK_THRESHOLD {
                    log::debug!("[gbn] {DUP_ACK_THRESHOLD} duplicate ACKs for {ack} — fast retransmit");
                    return self.go_back(now);
                }
            }
            return Vec::new();
        }

        let newly_acked = distance(self.send_base, ack);
        for _ in 0..newly_acked {
            if let Some(entry) = self.window.pop_front() {
                if entry.tx_count == 1 {
                    self.rto.on_rtt_sample(now.saturating_duration_since(entry.sent_at));
                }
            }
        }
        self.send_base = ack;
        self.retries = 0;
        self.dup_acks = 0;

        if self.window.is_empty() {
            self.timer.cancel();
        } else {
            // Restart the timer for the new oldest packet.
            self.timer.arm(now, self.rto.rto());
        }
        log::debug!("[gbn] ← ACK ack={} slid={}", ack, newly_acked);
        self.check_invariants();
        Vec::new()
    }

    fn finish(&mut self, now: Instant) -> Result<Packet, TransferError> {
        if !matches!(self.state, SenderState::Idle | SenderState::Sending) || self.has_unacked() {
            return Err(TransferError::BadState {
                op: "send FIN",
                state: self.state,
            });
        }
        let (fin, packet) =
            FinHandshake::start(self.next_seq, now, self.rto.rto(), self.max_fin_retries);
        self.fin = Some(fin);
        self.state = SenderState::WaitFinAck;
        log::debug!("[gbn] → FIN seq={}", packet.seq);
        Ok(packet)
    }

    fn on_fin_ack(&mut self, ack: u32) -> bool {
        match &self.fin {
            Some(fin) if self.state == SenderState::WaitFinAck && fin.matches(ack) => {
                log::debug!("[gbn] ← FINACK — closed");
                self.state = SenderState::Done;
                self.fin = None;
                true
            }
            _ => false,
        }
    }

    fn poll_timers(&mut self, now: Instant) -> Result<Vec<Packet>, TransferError> {
        match self.state {
            SenderState::WaitFinAck => {
                let rto = self.rto.rto();
                match self.fin.as_mut() {
                    Some(fin) => Ok(fin.poll(now, rto)?.into_iter().collect()),
                    None => Ok(Vec::new()),
                }
            }
            SenderState::Sending if self.timer.is_expired(now) => {
                if self.retries >= self.max_retransmits {
                    return Err(TransferError::RetransmitBudgetExceeded {
                        kind: PacketType::Data,
                        seq: self.send_base,
                        attempts: self.window.front().map_or(0, |e| e.tx_count),
                    });
                }
                self.retries += 1;
                self.rto.on_timeout();
                log::debug!(
                    "[gbn] timeout — retransmitting {} packet(s) from seq={}",
                    self.window.len(),
                    self.send_base
                );
                Ok(self.go_back(now))
            }
            _ => Ok(Vec::new()),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SenderState::Sending => self.timer.deadline(),
            SenderState::WaitFinAck => self.fin.as_ref().and_then(FinHandshake::deadline),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
