//! Finite-state-machine types for both transfer endpoints.
//!
//! ```text
//!  sender:    IDLE ──first DATA──▶ SENDING ──FIN sent──▶ WAIT_FINACK ──FINACK──▶ DONE
//!  receiver:  RECEIVING ──FIN──▶ FIN_WAIT ──linger expired──▶ DONE
//! ```
//!
//! Transitions live in the state machines themselves ([`crate::gbn_sender`],
//! [`crate::sr_sender`], [`crate::receiver`]); this module only names them.

use std::fmt;
use std::time::Instant;

/// Lifecycle of a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// DATA packets are being admitted and acknowledged.
    Sending,
    /// FIN sent; waiting for the matching FINACK.
    WaitFinAck,
    /// FINACK received.
    Done,
}

/// Lifecycle of a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// Accepting DATA.
    #[default]
    Receiving,
    /// FIN answered; late retransmissions are still answered until `linger_until`.
    FinWait { linger_until: Instant },
    /// Transfer complete.
    Done,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SenderState::Idle => "IDLE",
            SenderState::Sending => "SENDING",
            SenderState::WaitFinAck => "WAIT_FINACK",
            SenderState::Done => "DONE",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiverState::Receiving => "RECEIVING",
            ReceiverState::FinWait { .. } => "FIN_WAIT",
            ReceiverState::Done => "DONE",
        };
        f.write_str(name)
    }
}
