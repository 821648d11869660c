//! Entry point for `arq-transfer`.
//!
//! Parses CLI arguments and dispatches into **send**, **recv** or **relay**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, file handles) and the exit
//! status.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::fs::File;
use tokio::io::{BufReader, BufWriter};

use arq_transfer::channel::{Route, UdpChannel};
use arq_transfer::config::{
    Mode, ReceiverConfig, SenderConfig, DEFAULT_LINGER, DEFAULT_MAX_RETRANSMITS, MAX_WINDOW,
};
use arq_transfer::emulator::{Relay, RelayConfig};
use arq_transfer::gbn_receiver::GbnReceiver;
use arq_transfer::gbn_sender::GbnSender;
use arq_transfer::receiver::{ArqReceiver, ReceiverSession};
use arq_transfer::sender::ArqSender;
use arq_transfer::sr_receiver::SrReceiver;
use arq_transfer::sr_sender::SrSender;
use arq_transfer::transfer::{receive_stream, send_stream};

/// Reliable file transfer over UDP (Go-Back-N or Selective Repeat).
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Flags shared by both endpoints.
#[derive(Args)]
struct Endpoint {
    /// Local UDP port.
    #[arg(long)]
    listen: u16,
    #[arg(long = "peer_ip")]
    peer_ip: IpAddr,
    #[arg(long = "peer_port")]
    peer_port: u16,
    /// ARQ variant: gbn or sr.
    #[arg(long, default_value_t = Mode::Gbn)]
    mode: Mode,
    /// Talk to the peer directly instead of through the relay
    /// (RELIABLE_EMU_IP / RELIABLE_EMU_PORT).
    #[arg(long)]
    direct: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Send a file.
    Send {
        #[command(flatten)]
        endpoint: Endpoint,
        #[arg(long = "in")]
        input: PathBuf,
        /// Window size in packets.
        #[arg(long, default_value_t = 32)]
        win: usize,
        /// Retransmission timeout in milliseconds.
        #[arg(long, default_value_t = 200)]
        timeout: u64,
        /// Retransmit early on duplicate / skipping ACKs.
        #[arg(long = "fast_retx")]
        fast_retx: bool,
        #[arg(long = "max_retx", default_value_t = DEFAULT_MAX_RETRANSMITS)]
        max_retx: u32,
    },
    /// Receive a file.
    Recv {
        #[command(flatten)]
        endpoint: Endpoint,
        #[arg(long = "out")]
        output: PathBuf,
        /// Receive window (SR only).
        #[arg(long, default_value_t = MAX_WINDOW)]
        win: usize,
        /// Milliseconds to keep answering after FINACK.
        #[arg(long, default_value_t = DEFAULT_LINGER.as_millis() as u64)]
        linger: u64,
        /// Give up after this many milliseconds of silence (0 waits forever).
        #[arg(long = "idle_timeout", default_value_t = 0)]
        idle_timeout: u64,
    },
    /// Run the unreliable-link relay emulator.
    Relay {
        #[arg(long, default_value_t = 11_000)]
        port: u16,
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        #[arg(long = "delay_ms", default_value_t = 0.0)]
        delay_ms: f64,
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,
        /// Link rate limit in kbit/s, 0 = unlimited.
        #[arg(long = "rate_kbps", default_value_t = 0.0)]
        rate_kbps: f64,
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
}

async fn open_channel(endpoint: &Endpoint) -> anyhow::Result<UdpChannel> {
    let mut channel = UdpChannel::bind(endpoint.listen)
        .await
        .with_context(|| format!("binding UDP port {}", endpoint.listen))?;
    let route = if endpoint.direct {
        Route::Direct
    } else {
        Route::relay_from_env()?
    };
    let peer = SocketAddr::new(endpoint.peer_ip, endpoint.peer_port);
    channel
        .logical_connect(peer, route)
        .await
        .with_context(|| format!("connecting to {peer}"))?;
    Ok(channel)
}

async fn run_send(
    endpoint: Endpoint,
    input: PathBuf,
    config: SenderConfig,
) -> anyhow::Result<()> {
    config.validate()?;
    let file = File::open(&input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let mut channel = open_channel(&endpoint).await?;

    let mut sender: Box<dyn ArqSender> = match endpoint.mode {
        Mode::Gbn => Box::new(GbnSender::new(&config)),
        Mode::Sr => Box::new(SrSender::new(&config)),
    };
    log::info!(
        "[send] {} → {}:{} mode={} win={}",
        input.display(),
        endpoint.peer_ip,
        endpoint.peer_port,
        endpoint.mode,
        config.window
    );
    let report = send_stream(&mut channel, sender.as_mut(), BufReader::new(file))
        .await
        .context("transfer failed")?;
    println!("{report}");
    Ok(())
}

async fn run_recv(
    endpoint: Endpoint,
    output: PathBuf,
    config: ReceiverConfig,
) -> anyhow::Result<()> {
    config.validate()?;
    let file = File::create(&output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let mut channel = open_channel(&endpoint).await?;
    log::info!(
        "[recv] {} ← {}:{} mode={}",
        output.display(),
        endpoint.peer_ip,
        endpoint.peer_port,
        endpoint.mode
    );

    match endpoint.mode {
        Mode::Gbn => receive_into(&mut channel, GbnReceiver::new(), &config, &mut writer).await,
        Mode::Sr => {
            receive_into(&mut channel, SrReceiver::new(config.window), &config, &mut writer).await
        }
    }
}

async fn receive_into<R: ArqReceiver>(
    channel: &mut UdpChannel,
    receiver: R,
    config: &ReceiverConfig,
    output: &mut BufWriter<File>,
) -> anyhow::Result<()> {
    let mut session = ReceiverSession::new(receiver, config);
    let stats = receive_stream(channel, &mut session, output)
        .await
        .context("transfer failed")?;
    println!("RECV_BYTES={}", stats.bytes_delivered);
    println!("RECV_DATA_PKTS={}", stats.data_received);
    println!("RECV_DUP_PKTS={}", stats.duplicates);
    println!("RECV_CORRUPT_PKTS={}", stats.corrupt_dropped);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Send {
            endpoint,
            input,
            win,
            timeout,
            fast_retx,
            max_retx,
        } => {
            let config = SenderConfig {
                window: win,
                rto: Duration::from_millis(timeout),
                max_retransmits: max_retx,
                fast_retransmit: fast_retx,
                ..SenderConfig::default()
            };
            run_send(endpoint, input, config).await
        }
        Command::Recv {
            endpoint,
            output,
            win,
            linger,
            idle_timeout,
        } => {
            let config = ReceiverConfig {
                window: win,
                linger: Duration::from_millis(linger),
                idle_timeout: (idle_timeout > 0).then(|| Duration::from_millis(idle_timeout)),
            };
            run_recv(endpoint, output, config).await
        }
        Command::Relay {
            port,
            loss,
            delay_ms,
            reorder,
            rate_kbps,
            seed,
        } => {
            let config = RelayConfig {
                port,
                loss,
                delay: RelayConfig::delay_from_millis(delay_ms)?,
                reorder,
                rate_kbps,
                seed,
            };
            config.validate()?;
            let mut relay = Relay::bind(config)
                .await
                .with_context(|| format!("binding relay port {port}"))?;
            relay.run().await?;
            Ok(())
        }
    }
}
