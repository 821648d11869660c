//! Send-side contract shared by the Go-Back-N and Selective Repeat senders.
//!
//! An [`ArqSender`] is a pure state machine: it never touches the channel.
//! [`crate::transfer::send_stream`] feeds it chunks, decoded packets and the
//! current time, and transmits whatever packets it hands back.
//!
//! # Lifecycle
//! - `send_data` admits one chunk while `next_seq − base < N`.
//! - `on_packet` consumes ACK / FINACK from the receiver.
//! - `poll_timers` returns retransmissions whose timers have expired.
//! - `finish` emits the FIN once every DATA packet is acknowledged; the FIN is
//!   then retransmitted by `poll_timers` until FINACK or the retry budget runs
//!   out.

use std::time::{Duration, Instant};

use crate::error::TransferError;
use crate::packet::{Packet, PacketType};
use crate::state::SenderState;
use crate::timer::RetransmitTimer;

/// Counters reported when a transfer ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Payload bytes admitted (each byte counted once).
    pub bytes_sent: u64,
    /// DATA transmissions, including retransmissions.
    pub packets_sent: u64,
    /// DATA retransmissions only.
    pub retransmissions: u64,
    /// Valid ACK packets received.
    pub acks_received: u64,
}

/// Behaviour common to both sliding-window senders.
pub trait ArqSender {
    fn state(&self) -> SenderState;

    /// Window size N.
    fn window_size(&self) -> usize;

    /// Sequence numbers in `[base, next_seq)`.
    fn in_flight(&self) -> usize;

    fn stats(&self) -> SenderStats;

    /// Admit one chunk and return the DATA packet to transmit.
    ///
    /// Fails with [`TransferError::WindowFull`] when `in_flight() == N`.
    fn send_data(&mut self, payload: Vec<u8>, now: Instant) -> Result<Packet, TransferError>;

    /// Process an ACK; may return packets to retransmit immediately.
    fn on_ack(&mut self, ack: u32, now: Instant) -> Vec<Packet>;

    /// Send the FIN.  Only valid once nothing is in flight.
    fn finish(&mut self, now: Instant) -> Result<Packet, TransferError>;

    /// Process a FINACK; returns `true` when it completes the transfer.
    fn on_fin_ack(&mut self, ack: u32) -> bool;

    /// Packets whose timers expired at `now`.
    fn poll_timers(&mut self, now: Instant) -> Result<Vec<Packet>, TransferError>;

    /// Earliest running timer, if any.
    fn next_deadline(&self) -> Option<Instant>;

    /// `true` while another chunk may be admitted.
    fn can_send(&self) -> bool {
        matches!(self.state(), SenderState::Idle | SenderState::Sending)
            && self.in_flight() < self.window_size()
    }

    fn is_done(&self) -> bool {
        self.state() == SenderState::Done
    }

    /// Dispatch one decoded packet from the receiver.
    fn on_packet(&mut self, packet: &Packet, now: Instant) -> Vec<Packet> {
        match packet.kind {
            PacketType::Ack => self.on_ack(packet.ack, now),
            PacketType::FinAck => {
                self.on_fin_ack(packet.ack);
                Vec::new()
            }
            kind => {
                log::debug!("[send] ignoring unexpected {kind} from receiver");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FinHandshake
// ---------------------------------------------------------------------------

/// FIN retransmission state while waiting for FINACK.
#[derive(Debug)]
pub struct FinHandshake {
    seq: u32,
    timer: RetransmitTimer,
    attempts: u32,
    max_attempts: u32,
}

impl FinHandshake {
    /// Start the handshake; the returned packet is the first FIN transmission.
    pub fn start(seq: u32, now: Instant, rto: Duration, max_attempts: u32) -> (Self, Packet) {
        let mut timer = RetransmitTimer::new();
        timer.arm(now, rto);
        let handshake = Self {
            seq,
            timer,
            attempts: 1,
            max_attempts,
        };
        (handshake, Packet::fin(seq))
    }

    /// A FINACK completes the handshake only if it echoes the FIN's seq.
    pub fn matches(&self, ack: u32) -> bool {
        ack == self.seq
    }

    /// Retransmit the FIN if its timer expired.
    pub fn poll(&mut self, now: Instant, rto: Duration) -> Result<Option<Packet>, TransferError> {
        if !self.timer.is_expired(now) {
            return Ok(None);
        }
        if self.attempts >= self.max_attempts {
            return Err(TransferError::RetransmitBudgetExceeded {
                kind: PacketType::Fin,
                seq: self.seq,
                attempts: self.attempts,
            });
        }
        self.attempts += 1;
        self.timer.arm(now, rto);
        log::debug!("[send] → FIN seq={} (attempt {})", self.seq, self.attempts);
        Ok(Some(Packet::fin(self.seq)))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RTO: Duration = Duration::from_millis(100);

    #[test]
    fn fin_retransmits_until_budget() {
        let t0 = Instant::now();
        let (mut fin, first) = FinHandshake::start(7, t0, RTO, 3);
        assert_eq!(first, Packet::fin(7));

        assert!(fin.poll(t0 + RTO / 2, RTO).unwrap().is_none());
        assert_eq!(fin.poll(t0 + RTO, RTO).unwrap(), Some(Packet::fin(7)));
        assert_eq!(fin.poll(t0 + RTO * 2, RTO).unwrap(), Some(Packet::fin(7)));
        assert_eq!(fin.attempts(), 3);

        let err = fin.poll(t0 + RTO * 3, RTO).unwrap_err();
        assert!(matches!(
            err,
            TransferError::RetransmitBudgetExceeded {
                kind: PacketType::Fin,
                seq: 7,
                attempts: 3
            }
        ));
    }

    #[test]
    fn fin_ack_must_echo_seq() {
        let (fin, _) = FinHandshake::start(12, Instant::now(), RTO, 3);
        assert!(fin.matches(12));
        assert!(!fin.matches(11));
    }
}
