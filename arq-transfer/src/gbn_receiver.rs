//! Go-Back-N receive-side state machine.
//!
//! [`GbnReceiver`] implements the receiver side of Go-Back-N:
//!
//! - Only the **in-order** packet is accepted (seq == `expected_seq`).
//! - Out-of-order and duplicate packets are discarded without buffering.
//! - Every DATA packet, accepted or not, is answered with a **cumulative
//!   ACK** carrying `expected_seq`.  A repeated ACK value tells the sender
//!   about the gap.
//!
//! This module only manages state; all channel I/O is the caller's
//! responsibility.

use crate::packet::Packet;
use crate::receiver::{ArqReceiver, ReceiverStats};
use crate::seq::seq_lt;

// ---------------------------------------------------------------------------
// GbnReceiver
// ---------------------------------------------------------------------------

/// Go-Back-N receive-side state for one transfer.
#[derive(Debug, Default)]
pub struct GbnReceiver {
    /// Next expected sequence number.
    pub expected_seq: u32,

    /// In-order payload bytes not yet handed to the output.
    app_buffer: Vec<u8>,

    stats: ReceiverStats,
}

impl GbnReceiver {
    /// Receiver expecting sequence number 0 first.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Receiver expecting `expected_seq` first.
    pub fn starting_at(expected_seq: u32) -> Self {
        Self {
            expected_seq,
            app_buffer: Vec::new(),
            stats: ReceiverStats::default(),
        }
    }

    /// Cumulative ACK number to place in the next ACK.
    pub fn ack_number(&self) -> u32 {
        self.expected_seq
    }
}

impl ArqReceiver for GbnReceiver {
    fn on_data(&mut self, seq: u32, payload: &[u8]) -> Option<Packet> {
        self.stats.data_received += 1;
        if seq == self.expected_seq {
            self.app_buffer.extend_from_slice(payload);
            self.expected_seq = self.expected_seq.wrapping_add(1);
            self.stats.bytes_delivered += payload.len() as u64;
            log::debug!("[gbn] ← DATA seq={seq} accepted; → ACK ack={}", self.expected_seq);
        } else {
            if seq_lt(seq, self.expected_seq) {
                self.stats.duplicates += 1;
            } else {
                self.stats.discarded += 1;
            }
            log::debug!(
                "[gbn] ← DATA seq={seq} discarded; → dup ACK ack={}",
                self.expected_seq
            );
        }
        Some(Packet::ack(self.expected_seq))
    }

    fn fin_seq(&self) -> u32 {
        self.expected_seq
    }

    fn on_early_fin(&self, _seq: u32) -> Option<Packet> {
        Some(Packet::ack(self.expected_seq))
    }

    fn take_delivered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.app_buffer)
    }

    fn stats(&self) -> ReceiverStats {
        self.stats
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
