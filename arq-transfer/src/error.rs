//! Transfer-level error type.
//!
//! Packet-level malformation never shows up here: corrupt, truncated or
//! foreign datagrams are dropped by the state machines and logged.  What does
//! surface is terminal: an exhausted retry budget, a failed channel, or local
//! I/O on the input/output stream.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::packet::{PacketError, PacketType};
use crate::state::SenderState;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Back-pressure: the producer must wait for ACKs before admitting more.
    #[error("send window full ({in_flight}/{window} in flight)")]
    WindowFull { in_flight: usize, window: usize },

    /// A packet could not be built (payload over the limit).
    #[error("cannot build packet: {0}")]
    Packet(#[from] PacketError),

    /// A packet went unacknowledged through its whole retry budget.
    #[error("{kind} seq={seq} unacknowledged after {attempts} transmissions")]
    RetransmitBudgetExceeded {
        kind: PacketType,
        seq: u32,
        attempts: u32,
    },

    /// Operation not valid in the sender's current state.
    #[error("cannot {op} in state {state}")]
    BadState {
        op: &'static str,
        state: SenderState,
    },

    /// Nothing arrived from the peer for too long.
    #[error("no packet from peer for {0:?}")]
    IdleTimeout(Duration),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Reading the input or writing the output failed.
    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),
}
