//! Selective Repeat receive-side state machine.
//!
//! Packets inside `[base, base + N)` are buffered until the gap below them
//! fills, then handed to the output as one contiguous run.  Each buffered or
//! already-delivered packet is acknowledged individually with its own seq, so
//! a lost ACK for a packet below `base` is repaired when the sender retries.
//! Packets beyond the window are dropped without an ACK.

use std::collections::HashMap;

use crate::packet::Packet;
use crate::receiver::{ArqReceiver, ReceiverStats};
use crate::seq::{in_window, seq_lt};

#[derive(Debug)]
pub struct SrReceiver {
    /// Lowest sequence number not yet delivered.
    pub base: u32,
    window_size: usize,
    buffer: HashMap<u32, Vec<u8>>,
    app_buffer: Vec<u8>,
    stats: ReceiverStats,
}

impl SrReceiver {
    pub fn new(window_size: usize) -> Self {
        Self::starting_at(0, window_size)
    }

    pub fn starting_at(base: u32, window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            base,
            window_size,
            buffer: HashMap::with_capacity(window_size),
            app_buffer: Vec::new(),
            stats: ReceiverStats::default(),
        }
    }

    /// Out-of-order packets waiting for the gap below them.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn deliver_contiguous(&mut self) -> usize {
        let mut n = 0;
        while let Some(payload) = self.buffer.remove(&self.base) {
            self.stats.bytes_delivered += payload.len() as u64;
            self.app_buffer.extend_from_slice(&payload);
            self.base = self.base.wrapping_add(1);
            n += 1;
        }
        n
    }
}

impl ArqReceiver for SrReceiver {
    fn on_data(&mut self, seq: u32, payload: &[u8]) -> Option<Packet> {
        self.stats.data_received += 1;

        if in_window(seq, self.base, self.window_size) {
            if self.buffer.contains_key(&seq) {
                self.stats.duplicates += 1;
            } else {
                self.buffer.insert(seq, payload.to_vec());
            }
            let delivered = self.deliver_contiguous();
            log::debug!(
                "[sr] ← DATA seq={seq} delivered={delivered} base={}; → ACK ack={seq}",
                self.base
            );
            return Some(Packet::ack(seq));
        }

        if seq_lt(seq, self.base) {
            // Already delivered; the earlier ACK was probably lost.
            self.stats.duplicates += 1;
            log::debug!("[sr] ← DATA seq={seq} below base={}; → ACK ack={seq}", self.base);
            return Some(Packet::ack(seq));
        }

        self.stats.discarded += 1;
        log::debug!("[sr] ← DATA seq={seq} beyond window (base={})", self.base);
        None
    }

    fn fin_seq(&self) -> u32 {
        self.base
    }

    fn take_delivered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.app_buffer)
    }

    fn stats(&self) -> ReceiverStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_delivery() {
        let mut r = SrReceiver::new(4);
        assert_eq!(r.on_data(0, b"ab"), Some(Packet::ack(0)));
        assert_eq!(r.on_data(1, b"cd"), Some(Packet::ack(1)));
        assert_eq!(r.base, 2);
        assert_eq!(r.take_delivered(), b"abcd");
    }

    #[test]
    fn reordered_arrivals_delivered_once_gap_fills() {
        let mut r = SrReceiver::new(4);
        assert_eq!(r.on_data(2, b"C"), Some(Packet::ack(2)));
        assert_eq!(r.on_data(1, b"B"), Some(Packet::ack(1)));
        assert!(r.take_delivered().is_empty());
        assert_eq!(r.buffered(), 2);

        assert_eq!(r.on_data(0, b"A"), Some(Packet::ack(0)));
        assert_eq!(r.base, 3);
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.take_delivered(), b"ABC");
    }

    #[test]
    fn duplicate_in_window_is_reacked_not_rebuffered() {
        let mut r = SrReceiver::new(4);
        r.on_data(1, b"first");
        assert_eq!(r.on_data(1, b"other"), Some(Packet::ack(1)));
        r.on_data(0, b"x");
        assert_eq!(r.take_delivered(), b"xfirst");
        assert_eq!(r.stats().duplicates, 1);
    }

    #[test]
    fn below_base_is_reacked() {
        let mut r = SrReceiver::new(4);
        r.on_data(0, b"a");
        r.take_delivered();
        assert_eq!(r.on_data(0, b"a"), Some(Packet::ack(0)));
        assert!(r.take_delivered().is_empty());
        assert_eq!(r.stats().duplicates, 1);
    }

    #[test]
    fn beyond_window_is_dropped_without_ack() {
        let mut r = SrReceiver::new(4);
        assert_eq!(r.on_data(4, b"far"), None);
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.stats().discarded, 1);
    }

    #[test]
    fn fin_seq_tracks_base_and_early_fin_is_ignored() {
        let mut r = SrReceiver::new(4);
        r.on_data(1, b"b");
        assert_eq!(r.fin_seq(), 0);
        assert_eq!(r.on_early_fin(2), None);
        r.on_data(0, b"a");
        assert_eq!(r.fin_seq(), 2);
    }

    #[test]
    fn seq_wrap_around() {
        let mut r = SrReceiver::starting_at(u32::MAX, 4);
        r.on_data(0, b"cd");
        r.on_data(u32::MAX, b"ab");
        assert_eq!(r.base, 1);
        assert_eq!(r.take_delivered(), b"abcd");
    }
}
