//! `arq-transfer` — reliable file transfer over UDP with Go-Back-N or
//! Selective Repeat.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   DATA / FIN    ┌────────────────┐
//!  │  ArqSender   │────────────────▶│ ReceiverSession│
//!  │  (GBN | SR)  │                 │ └ ArqReceiver  │
//!  └──────┬───────┘                 └───────┬────────┘
//!         │        ACK / FINACK             │
//!         │◀────────────────────────────────┘
//!         │
//!  ┌──────▼───────────────────────────────────┐
//!  │  transfer::send_stream / receive_stream  │
//!  │  (one cooperative loop per endpoint)     │
//!  └──────┬───────────────────────────────────┘
//!         │ raw datagrams
//!  ┌──────▼──────┐     ┌───────────────┐
//!  │   Channel   │────▶│ Relay (opt.)  │  loss · delay · reorder · rate
//!  └─────────────┘     └───────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]        — wire format and CRC-32
//! - [`seq`]           — wraparound-aware sequence arithmetic
//! - [`timer`]         — retransmission timers and the RTO policy seam
//! - [`state`]         — sender / receiver lifecycle states
//! - [`config`]        — validated endpoint parameters
//! - [`sender`]        — send-side contract and FIN handshake
//! - [`gbn_sender`]    — GBN cumulative-ACK send window
//! - [`sr_sender`]     — SR per-packet-ACK send window
//! - [`receiver`]      — receive-side contract, FIN and linger handling
//! - [`gbn_receiver`]  — GBN in-order receiver
//! - [`sr_receiver`]   — SR buffering receiver
//! - [`channel`]       — UDP and in-memory datagram channels
//! - [`simulator`]     — fault-injecting channel wrapper
//! - [`emulator`]      — UDP relay emulating an unreliable link
//! - [`transfer`]      — the endpoint loops and statistics
//! - [`error`]         — transfer-level errors

pub mod channel;
pub mod config;
pub mod emulator;
pub mod error;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod sr_receiver;
pub mod sr_sender;
pub mod state;
pub mod timer;
pub mod transfer;
