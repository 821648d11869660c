//! Transfer drivers: bind a state machine to a channel and a byte stream.
//!
//! ```text
//!   input ──read_chunk──▶ ArqSender ──DATA/FIN──▶ Channel ──▶ … ──▶ ReceiverSession ──▶ output
//!                             ▲                                           │
//!                             └────────────── ACK / FINACK ◀──────────────┘
//! ```
//!
//! Each loop is a single cooperative task.  It never blocks on the channel
//! for longer than the next timer deadline (capped at
//! [`POLL_INTERVAL`]), so retransmissions and linger expiry fire on time
//! without a separate timer task.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::{Channel, RecvTimeout};
use crate::config::POLL_INTERVAL;
use crate::error::TransferError;
use crate::packet::{Packet, MAX_PAYLOAD};
use crate::receiver::{ArqReceiver, ReceiverSession, ReceiverStats};
use crate::sender::{ArqSender, SenderStats};
use crate::state::ReceiverState;

/// Sender-side summary, printed as `KEY=VALUE` lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferReport {
    pub file_bytes: u64,
    pub chunk_bytes: usize,
    pub window: usize,
    pub stats: SenderStats,
    /// First DATA to FINACK.
    pub elapsed: Duration,
}

impl TransferReport {
    /// File bits per millisecond.
    pub fn goodput_kbps(&self) -> f64 {
        let ms = self.elapsed.as_secs_f64() * 1000.0;
        if ms > 0.0 {
            (self.file_bytes * 8) as f64 / ms
        } else {
            0.0
        }
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FILE_BYTES={}", self.file_bytes)?;
        writeln!(f, "CHUNK_BYTES={}", self.chunk_bytes)?;
        writeln!(f, "WIN={}", self.window)?;
        writeln!(f, "DATA_SENT_PKTS={}", self.stats.packets_sent)?;
        writeln!(f, "DATA_RETX_PKTS={}", self.stats.retransmissions)?;
        writeln!(f, "ACK_RCVD_PKTS={}", self.stats.acks_received)?;
        writeln!(f, "ELAPSED_MS={}", self.elapsed.as_millis())?;
        write!(f, "GOODPUT_KBPS={:.2}", self.goodput_kbps())
    }
}

/// Encode `packet` and put it on the channel.
pub async fn transmit<C: Channel>(channel: &mut C, packet: &Packet) -> Result<(), TransferError> {
    let bytes = packet.encode()?;
    channel.send(&bytes).await?;
    Ok(())
}

/// Read up to [`MAX_PAYLOAD`] bytes, short only at end of input.
async fn read_chunk<R: AsyncRead + Unpin>(input: &mut R) -> io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; MAX_PAYLOAD];
    let mut filled = 0;
    while filled < MAX_PAYLOAD {
        let n = input.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}

/// How long to wait on the channel before the next timer needs attention.
fn poll_wait(deadline: Option<Instant>, now: Instant) -> RecvTimeout {
    let wait = deadline.map_or(POLL_INTERVAL, |d| {
        d.saturating_duration_since(now).min(POLL_INTERVAL)
    });
    RecvTimeout::bounded(wait)
}

/// Send all of `input` through `sender` and complete the FIN/FINACK
/// handshake.
///
/// Chunks are admitted while the window has room; the FIN goes out once the
/// input is exhausted and every DATA packet is acknowledged.  Errors are
/// terminal: an exhausted retry budget, a failed channel, or a read error.
pub async fn send_stream<C, S, R>(
    channel: &mut C,
    sender: &mut S,
    mut input: R,
) -> Result<TransferReport, TransferError>
where
    C: Channel,
    S: ArqSender + ?Sized,
    R: AsyncRead + Unpin,
{
    // Set when the first DATA (or, for empty input, the FIN) goes out.
    let mut started: Option<Instant> = None;
    let mut file_bytes = 0u64;
    let mut input_done = false;
    let mut fin_sent = false;

    loop {
        while !input_done && sender.can_send() {
            let chunk = read_chunk(&mut input).await?;
            if chunk.is_empty() {
                input_done = true;
                break;
            }
            file_bytes += chunk.len() as u64;
            let now = Instant::now();
            let packet = sender.send_data(chunk, now)?;
            started.get_or_insert(now);
            transmit(channel, &packet).await?;
        }

        if input_done && !fin_sent && sender.in_flight() == 0 {
            let now = Instant::now();
            let fin = sender.finish(now)?;
            started.get_or_insert(now);
            transmit(channel, &fin).await?;
            fin_sent = true;
        }

        let wait = poll_wait(sender.next_deadline(), Instant::now());
        if let Some(datagram) = channel.recv(wait).await? {
            match Packet::decode(&datagram) {
                Ok(packet) => {
                    for resend in sender.on_packet(&packet, Instant::now()) {
                        transmit(channel, &resend).await?;
                    }
                }
                Err(e) => log::debug!("[send] dropping malformed datagram: {e}"),
            }
        }
        if sender.is_done() {
            break;
        }

        for resend in sender.poll_timers(Instant::now())? {
            transmit(channel, &resend).await?;
        }
    }

    let report = TransferReport {
        file_bytes,
        chunk_bytes: MAX_PAYLOAD,
        window: sender.window_size(),
        stats: sender.stats(),
        elapsed: started.map_or(Duration::ZERO, |t| t.elapsed()),
    };
    log::info!(
        "[send] done: {} bytes, {} packets ({} retransmitted) in {:?}",
        report.file_bytes,
        report.stats.packets_sent,
        report.stats.retransmissions,
        report.elapsed
    );
    Ok(report)
}

/// Receive into `output` until the FIN/FINACK handshake completes and the
/// linger period ends.
///
/// Delivered bytes are written before the ACK that covers them goes out.
/// Fails with [`TransferError::IdleTimeout`] if the session has an idle
/// timeout and nothing arrives for that long before the FIN.
pub async fn receive_stream<C, R, W>(
    channel: &mut C,
    session: &mut ReceiverSession<R>,
    output: &mut W,
) -> Result<ReceiverStats, TransferError>
where
    C: Channel,
    R: ArqReceiver,
    W: AsyncWrite + Unpin,
{
    let mut last_activity = Instant::now();

    while !session.is_done() {
        let wait = poll_wait(session.linger_deadline(), Instant::now());
        if let Some(datagram) = channel.recv(wait).await? {
            last_activity = Instant::now();
            let reply = session.on_datagram(&datagram, last_activity);
            let delivered = session.take_delivered();
            if !delivered.is_empty() {
                output.write_all(&delivered).await?;
            }
            if let Some(reply) = reply {
                transmit(channel, &reply).await?;
            }
        }

        let now = Instant::now();
        session.poll(now);
        if let Some(idle) = session.idle_timeout() {
            if session.state() == ReceiverState::Receiving
                && now.saturating_duration_since(last_activity) >= idle
            {
                log::warn!("[recv] nothing from sender for {idle:?}; giving up");
                return Err(TransferError::IdleTimeout(idle));
            }
        }
    }
    output.flush().await?;

    let stats = session.stats();
    log::info!(
        "[recv] done: {} bytes delivered, {} duplicates, {} corrupt",
        stats.bytes_delivered,
        stats.duplicates,
        stats.corrupt_dropped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::config::{ReceiverConfig, SenderConfig};
    use crate::gbn_receiver::GbnReceiver;
    use crate::gbn_sender::GbnSender;

    #[tokio::test]
    async fn elapsed_excludes_wait_for_input() {
        let (mut a, mut b) = MemoryChannel::pair();
        let (mut writer, reader) = tokio::io::duplex(4096);
        let slow_input = async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            writer.write_all(&[7u8; 1500]).await.unwrap();
        };
        let mut sender = GbnSender::new(&SenderConfig::default());
        let receiver_config = ReceiverConfig {
            linger: Duration::from_millis(50),
            ..ReceiverConfig::default()
        };
        let mut session = ReceiverSession::new(GbnReceiver::new(), &receiver_config);
        let mut output = Vec::new();

        let (sent, received, ()) = tokio::join!(
            send_stream(&mut a, &mut sender, reader),
            receive_stream(&mut b, &mut session, &mut output),
            slow_input,
        );
        let report = sent.unwrap();
        received.unwrap();

        assert_eq!(output, vec![7u8; 1500]);
        assert_eq!(report.file_bytes, 1500);
        assert!(report.elapsed < Duration::from_millis(250), "took {:?}", report.elapsed);
    }

    #[test]
    fn report_lines() {
        let report = TransferReport {
            file_bytes: 2500,
            chunk_bytes: MAX_PAYLOAD,
            window: 4,
            stats: SenderStats {
                bytes_sent: 2500,
                packets_sent: 4,
                retransmissions: 1,
                acks_received: 4,
            },
            elapsed: Duration::from_millis(250),
        };
        let text = report.to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "FILE_BYTES=2500",
                "CHUNK_BYTES=1000",
                "WIN=4",
                "DATA_SENT_PKTS=4",
                "DATA_RETX_PKTS=1",
                "ACK_RCVD_PKTS=4",
                "ELAPSED_MS=250",
                "GOODPUT_KBPS=80.00",
            ]
        );
    }

    #[test]
    fn goodput_of_instant_transfer_is_zero() {
        let report = TransferReport {
            file_bytes: 10,
            chunk_bytes: MAX_PAYLOAD,
            window: 1,
            stats: SenderStats::default(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.goodput_kbps(), 0.0);
    }

    #[test]
    fn poll_wait_is_capped() {
        let now = Instant::now();
        assert_eq!(poll_wait(None, now), RecvTimeout::Bounded(POLL_INTERVAL));
        assert_eq!(
            poll_wait(Some(now + Duration::from_millis(10)), now),
            RecvTimeout::Bounded(Duration::from_millis(10))
        );
        assert_eq!(poll_wait(Some(now + Duration::from_secs(5)), now), RecvTimeout::Bounded(POLL_INTERVAL));
        assert_eq!(poll_wait(Some(now), now), RecvTimeout::Poll);
    }

    #[tokio::test]
    async fn chunks_fill_to_max_payload() {
        let data = vec![7u8; 2500];
        let mut input = &data[..];
        let sizes = [
            read_chunk(&mut input).await.unwrap().len(),
            read_chunk(&mut input).await.unwrap().len(),
            read_chunk(&mut input).await.unwrap().len(),
            read_chunk(&mut input).await.unwrap().len(),
        ];
        assert_eq!(sizes, [1000, 1000, 500, 0]);
    }
}
