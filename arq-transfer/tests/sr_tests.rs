//! Integration tests for Selective Repeat file transfer.
//!
//! Same harness as the Go-Back-N tests: both ends run in-process over a
//! [`MemoryChannel`] pair and are driven together with `tokio::join!`.

use std::time::Duration;

use arq_transfer::channel::MemoryChannel;
use arq_transfer::config::{ReceiverConfig, SenderConfig};
use arq_transfer::error::TransferError;
use arq_transfer::receiver::ReceiverSession;
use arq_transfer::simulator::{FaultConfig, FaultyChannel, ScriptedFault};
use arq_transfer::sr_receiver::SrReceiver;
use arq_transfer::sr_sender::SrSender;
use arq_transfer::transfer::{receive_stream, send_stream, TransferReport};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 17 % 253) as u8).collect()
}

/// Run one SR transfer of `data`; faults apply to DATA/FIN (`forward`) and
/// ACK/FINACK (`reverse`) traffic.
async fn transfer(
    data: &[u8],
    sender_config: SenderConfig,
    forward: FaultConfig,
    reverse: FaultConfig,
) -> (Result<TransferReport, TransferError>, Vec<u8>) {
    let (a, b) = MemoryChannel::pair();
    let mut a = FaultyChannel::new(a, forward);
    let mut b = FaultyChannel::new(b, reverse);

    let receiver_config = ReceiverConfig {
        window: sender_config.window,
        linger: Duration::from_millis(500),
        idle_timeout: Some(Duration::from_secs(10)),
    };
    let mut sender = SrSender::new(&sender_config);
    let mut session = ReceiverSession::new(SrReceiver::new(receiver_config.window), &receiver_config);
    let mut output = Vec::new();

    let (sent, received) = tokio::join!(
        send_stream(&mut a, &mut sender, data),
        receive_stream(&mut b, &mut session, &mut output),
    );
    received.expect("recv");
    (sent, output)
}

fn window(n: usize) -> SenderConfig {
    SenderConfig {
        window: n,
        rto: Duration::from_millis(200),
        ..SenderConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Test 1: clean channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sr_clean_transfer() {
    let data = payload(7_001);
    let (sent, output) =
        transfer(&data, window(4), FaultConfig::default(), FaultConfig::default()).await;
    let report = sent.expect("send");

    assert_eq!(output, data);
    assert_eq!(report.stats.packets_sent, 8);
    assert_eq!(report.stats.retransmissions, 0);
    assert_eq!(report.stats.acks_received, 8);
}

// ---------------------------------------------------------------------------
// Test 2: second DATA packet dropped once; only that packet is resent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sr_single_loss_resends_one_packet() {
    let data = payload(2500);
    let (sent, output) = transfer(
        &data,
        window(4),
        FaultConfig::scripted([ScriptedFault::DropData { seq: 1 }]),
        FaultConfig::default(),
    )
    .await;
    let report = sent.expect("send");

    assert_eq!(output, data);
    assert_eq!(report.stats.retransmissions, 1);
    assert_eq!(report.stats.packets_sent, 4);
    assert_eq!(report.stats.acks_received, 3);
    assert!(
        report.elapsed >= Duration::from_millis(200) && report.elapsed < Duration::from_millis(400),
        "recovery should take exactly one RTO, took {:?}",
        report.elapsed
    );
}

// ---------------------------------------------------------------------------
// Test 3: corrupted and duplicated DATA
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sr_corrupt_and_duplicate() {
    let data = payload(6000);
    let (sent, output) = transfer(
        &data,
        window(8),
        FaultConfig::scripted([
            ScriptedFault::CorruptData { seq: 2 },
            ScriptedFault::DuplicateData { seq: 4 },
        ]),
        FaultConfig::default(),
    )
    .await;
    let report = sent.expect("send");

    assert_eq!(output, data);
    assert_eq!(report.stats.retransmissions, 1);
}

// ---------------------------------------------------------------------------
// Test 4: lost ACK is repaired by the retransmission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sr_lost_ack() {
    let data = payload(3000);
    let (sent, output) = transfer(
        &data,
        window(4),
        FaultConfig::default(),
        FaultConfig::scripted([ScriptedFault::DropAck { ack: 0 }]),
    )
    .await;
    let report = sent.expect("send");

    assert_eq!(output, data);
    // Seq 0 is resent once; the receiver re-ACKs it without delivering twice.
    assert_eq!(report.stats.retransmissions, 1);
}

// ---------------------------------------------------------------------------
// Test 5: heavy reordering plus random faults in both directions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sr_lossy_reordering_channel() {
    let data = payload(40_000);
    let faults = |seed| FaultConfig {
        loss_rate: 0.1,
        duplicate_rate: 0.05,
        corrupt_rate: 0.05,
        reorder_rate: 0.25,
        reorder_delay: Duration::from_millis(10),
        seed,
        script: Vec::new(),
    };
    let config = SenderConfig {
        window: 16,
        rto: Duration::from_millis(60),
        fast_retransmit: true,
        ..SenderConfig::default()
    };
    let (sent, output) = transfer(&data, config, faults(11), faults(12)).await;
    sent.expect("send");

    assert_eq!(output, data);
}

// ---------------------------------------------------------------------------
// Test 6: window of one behaves as stop-and-wait
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sr_window_one() {
    let data = payload(4500);
    let (sent, output) = transfer(
        &data,
        window(1),
        FaultConfig::scripted([ScriptedFault::DropData { seq: 2 }]),
        FaultConfig::default(),
    )
    .await;
    let report = sent.expect("send");

    assert_eq!(output, data);
    assert_eq!(report.stats.packets_sent, 6);
}
