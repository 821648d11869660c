//! Selective Repeat send-side state machine.
//!
//! Admission is the same as Go-Back-N (`next_seq − send_base < N`), but each
//! in-flight record carries its own acked flag and its own timer:
//!
//! - An ACK names exactly one packet.  That record is marked acked and its
//!   timer cancelled; if it was `send_base`, the window slides past every
//!   contiguously acked record.
//! - A record whose timer expires is retransmitted alone, and its timer
//!   restarted.  A record that exhausts the retransmit cap aborts the
//!   transfer.
//!
//! With fast retransmit enabled, every ACK for a record above an unacked
//! `send_base` counts as a skip of the base; the third skip resends the base
//! once without waiting for its timer.

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::SenderConfig;
use crate::error::TransferError;
use crate::packet::{Packet, PacketError, PacketType, MAX_PAYLOAD};
use crate::sender::{ArqSender, FinHandshake, SenderStats};
use crate::seq::in_window;
use crate::state::SenderState;
use crate::timer::{earliest, FixedRto, RetransmitTimer, RtoPolicy};

/// Skips of the base that trigger a fast retransmit.
const SKIP_THRESHOLD: u32 = 3;

/// One in-flight record.
#[derive(Debug, Clone)]
pub struct SrEntry {
    pub packet: Packet,
    pub tx_count: u32,
    pub sent_at: Instant,
    pub acked: bool,
    timer: RetransmitTimer,
    skips: u32,
}

impl SrEntry {
    /// Retransmissions so far (first send excluded).
    pub fn retransmit_count(&self) -> u32 {
        self.tx_count - 1
    }
}

/// Selective Repeat send-side state for one transfer.
#[derive(Debug)]
pub struct SrSender<P = FixedRto> {
    pub send_base: u32,
    pub next_seq: u32,
    window_size: usize,
    /// Records for `[send_base, next_seq)`; index `i` holds `send_base + i`.
    window: VecDeque<SrEntry>,
    rto: P,
    state: SenderState,
    fin: Option<FinHandshake>,
    max_retransmits: u32,
    max_fin_retries: u32,
    fast_retransmit: bool,
    stats: SenderStats,
}

impl SrSender<FixedRto> {
    pub fn new(config: &SenderConfig) -> Self {
        Self::with_policy(config, FixedRto(config.rto))
    }
}

impl<P: RtoPolicy> SrSender<P> {
    pub fn with_policy(config: &SenderConfig, policy: P) -> Self {
        assert!(config.window >= 1, "window_size must be at least 1");
        Self {
            send_base: 0,
            next_seq: 0,
            window_size: config.window,
            window: VecDeque::with_capacity(config.window),
            rto: policy,
            state: SenderState::Idle,
            fin: None,
            max_retransmits: config.max_retransmits,
            max_fin_retries: config.max_fin_retries,
            fast_retransmit: config.fast_retransmit,
            stats: SenderStats::default(),
        }
    }

    /// Start numbering at `seq` instead of 0.
    pub fn with_initial_seq(mut self, seq: u32) -> Self {
        debug_assert!(self.window.is_empty());
        self.send_base = seq;
        self.next_seq = seq;
        self
    }

    /// Records still waiting for their ACK.
    pub fn unacked(&self) -> usize {
        self.window.iter().filter(|e| !e.acked).count()
    }

    pub fn entry(&self, seq: u32) -> Option<&SrEntry> {
        if in_window(seq, self.send_base, self.window.len()) {
            self.window.get(seq.wrapping_sub(self.send_base) as usize)
        } else {
            None
        }
    }

    fn resend(entry: &mut SrEntry, now: Instant, rto: std::time::Duration) -> Packet {
        entry.tx_count += 1;
        entry.sent_at = now;
        entry.timer.arm(now, rto);
        entry.packet.clone()
    }

    /// Pop every acked record at the front of the window.
    fn slide(&mut self, now: Instant) -> usize {
        let mut slid = 0;
        while self.window.front().is_some_and(|e| e.acked) {
            self.window.pop_front();
            self.send_base = self.send_base.wrapping_add(1);
            slid += 1;
        }
        let rto = self.rto.rto();
        if let Some(front) = self.window.front_mut() {
            front.timer.arm_if_idle(now, rto);
        }
        slid
    }
}

impl<P: RtoPolicy> ArqSender for SrSender<P> {
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
        let mut timer = RetransmitTimer::new();
        timer.arm(now, self.rto.rto());
        self.window.push_back(SrEntry {
            packet: packet.clone(),
            tx_count: 1,
            sent_at: now,
            acked: false,
            timer,
            skips: 0,
        });
        self.next_seq = self.next_seq.wrapping_add(1);
        self.stats.bytes_sent += packet.payload.len() as u64;
        self.stats.packets_sent += 1;
        self.state = SenderState::Sending;

        log::debug!(
            "[sr] → DATA seq={} len={} in_flight={}",
            packet.seq,
            packet.payload.len(),
            self.window.len()
        );
        Ok(packet)
    }

    fn on_ack(&mut self, ack: u32, now: Instant) -> Vec<Packet> {
        self.stats.acks_received += 1;

        if !in_window(ack, self.send_base, self.window.len()) {
            log::debug!("[sr] ← ACK ack={ack} outside window (base={})", self.send_base);
            return Vec::new();
        }
        let idx = ack.wrapping_sub(self.send_base) as usize;
        let entry = &mut self.window[idx];
        if entry.acked {
            return Vec::new();
        }
        entry.acked = true;
        entry.timer.cancel();
        if entry.tx_count == 1 {
            let sample = now.saturating_duration_since(entry.sent_at);
            self.rto.on_rtt_sample(sample);
        }

        if idx == 0 {
            let slid = self.slide(now);
            log::debug!("[sr] ← ACK ack={ack} slid={slid} base={}", self.send_base);
            return Vec::new();
        }

        log::debug!("[sr] ← ACK ack={ack} (base={} still pending)", self.send_base);
        if !self.fast_retransmit {
            return Vec::new();
        }
        let rto = self.rto.rto();
        let front = &mut self.window[0];
        front.skips += 1;
        if front.skips != SKIP_THRESHOLD {
            return Vec::new();
        }
        log::debug!("[sr] base seq={} skipped {SKIP_THRESHOLD} times — fast retransmit", front.packet.seq);
        let packet = Self::resend(front, now, rto);
        self.stats.packets_sent += 1;
        self.stats.retransmissions += 1;
        vec![packet]
    }

    fn finish(&mut self, now: Instant) -> Result<Packet, TransferError> {
        if !matches!(self.state, SenderState::Idle | SenderState::Sending) || !self.window.is_empty()
        {
            return Err(TransferError::BadState {
                op: "send FIN",
                state: self.state,
            });
        }
        let (fin, packet) =
            FinHandshake::start(self.next_seq, now, self.rto.rto(), self.max_fin_retries);
        self.fin = Some(fin);
        self.state = SenderState::WaitFinAck;
        log::debug!("[sr] → FIN seq={}", packet.seq);
        Ok(packet)
    }

    fn on_fin_ack(&mut self, ack: u32) -> bool {
        match &self.fin {
            Some(fin) if self.state == SenderState::WaitFinAck && fin.matches(ack) => {
                log::debug!("[sr] ← FINACK — closed");
                self.state = SenderState::Done;
                self.fin = None;
                true
            }
            _ => false,
        }
    }

    fn poll_timers(&mut self, now: Instant) -> Result<Vec<Packet>, TransferError> {
        let rto = self.rto.rto();
        match self.state {
            SenderState::WaitFinAck => match self.fin.as_mut() {
                Some(fin) => Ok(fin.poll(now, rto)?.into_iter().collect()),
                None => Ok(Vec::new()),
            },
            SenderState::Sending => {
                let mut resent = Vec::new();
                for entry in self.window.iter_mut() {
                    if entry.acked || !entry.timer.is_expired(now) {
                        continue;
                    }
                    if entry.retransmit_count() >= self.max_retransmits {
                        return Err(TransferError::RetransmitBudgetExceeded {
                            kind: PacketType::Data,
                            seq: entry.packet.seq,
                            attempts: entry.tx_count,
                        });
                    }
                    entry.skips = 0;
                    resent.push(Self::resend(entry, now, rto));
                }
                if !resent.is_empty() {
                    self.rto.on_timeout();
                    let n = resent.len() as u64;
                    self.stats.packets_sent += n;
                    self.stats.retransmissions += n;
                    log::debug!("[sr] timeout — retransmitting {n} packet(s)");
                }
                Ok(resent)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SenderState::Sending => self
                .window
                .iter()
                .filter(|e| !e.acked)
                .map(|e| e.timer.deadline())
                .fold(None, earliest),
            SenderState::WaitFinAck => self.fin.as_ref().and_then(FinHandshake::deadline),
            _ => None,
        }
    }
}
