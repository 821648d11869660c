//! Per-transfer configuration.
//!
//! Every knob has a `Default`; the CLI overrides the fields it exposes and
//! calls `validate()` before a transfer starts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Largest send or receive window, in packets.
pub const MAX_WINDOW: usize = 512;

/// Upper bound on a single blocking wait in the transfer loops, so timers are
/// checked at least this often.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const DEFAULT_RTO: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_RETRANSMITS: u32 = 20;
pub const DEFAULT_MAX_FIN_RETRIES: u32 = 10;
pub const DEFAULT_LINGER: Duration = Duration::from_millis(1000);

/// Which ARQ variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Go-Back-N: cumulative ACKs, one timer.
    #[default]
    Gbn,
    /// Selective Repeat: per-packet ACKs and timers.
    Sr,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gbn" => Ok(Mode::Gbn),
            "sr" => Ok(Mode::Sr),
            _ => Err(format!("unknown mode: {s} (expected gbn or sr)")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Gbn => "gbn",
            Mode::Sr => "sr",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window {0} out of range (1..={max})", max = MAX_WINDOW)]
    WindowOutOfRange(usize),
    #[error("retransmission timeout must be non-zero")]
    ZeroTimeout,
    #[error("FIN retry budget must allow at least one transmission")]
    NoFinAttempts,
    #[error("{0} must be a probability in [0, 1]")]
    RateOutOfRange(&'static str),
    #[error("{0} must be finite and non-negative")]
    NotFinite(&'static str),
}

/// Check that a fault probability lies in `[0, 1]`.
pub fn check_rate(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::RateOutOfRange(name))
    }
}

fn check_window(window: usize) -> Result<(), ConfigError> {
    if (1..=MAX_WINDOW).contains(&window) {
        Ok(())
    } else {
        Err(ConfigError::WindowOutOfRange(window))
    }
}

/// Sender-side parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Window size N: maximum unacknowledged DATA packets.
    pub window: usize,
    /// Fixed retransmission timeout.
    pub rto: Duration,
    /// Retransmissions allowed before the transfer is abandoned.  For GBN this
    /// counts consecutive timer expiries without window progress; for SR it
    /// bounds each record's retransmit count.
    pub max_retransmits: u32,
    /// FIN transmissions allowed while waiting for FINACK.
    pub max_fin_retries: u32,
    /// Retransmit early on three duplicate (GBN) or skipping (SR) ACKs.
    pub fast_retransmit: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            window: 32,
            rto: DEFAULT_RTO,
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
            max_fin_retries: DEFAULT_MAX_FIN_RETRIES,
            fast_retransmit: false,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_window(self.window)?;
        if self.rto.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_fin_retries == 0 {
            return Err(ConfigError::NoFinAttempts);
        }
        Ok(())
    }
}

/// Receiver-side parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// SR receive window; ignored by GBN.
    pub window: usize,
    /// How long to keep answering late FIN/DATA after sending FINACK.
    pub linger: Duration,
    /// Abort if nothing arrives for this long before the FIN (`None` waits forever).
    pub idle_timeout: Option<Duration>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            window: MAX_WINDOW,
            linger: DEFAULT_LINGER,
            idle_timeout: None,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_window(self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SenderConfig::default().validate(), Ok(()));
        assert_eq!(ReceiverConfig::default().validate(), Ok(()));
    }

    #[test]
    fn window_bounds() {
        let mut cfg = SenderConfig::default();
        cfg.window = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::WindowOutOfRange(0)));
        cfg.window = MAX_WINDOW + 1;
        assert!(cfg.validate().is_err());
        cfg.window = MAX_WINDOW;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_rto_rejected() {
        let cfg = SenderConfig {
            rto: Duration::ZERO,
            ..SenderConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("GBN".parse::<Mode>(), Ok(Mode::Gbn));
        assert_eq!("sr".parse::<Mode>(), Ok(Mode::Sr));
        assert!("tcp".parse::<Mode>().is_err());
    }
}
