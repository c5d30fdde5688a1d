use std::time::Duration;

use clap::ValueEnum;

use crate::{codec::Framing, error::RelayError};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What happens to live sessions once the listener stops accepting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ShutdownPolicy {
    /// Leave sessions running; they end when their peers disconnect.
    Detach,
    /// Give sessions the drain timeout to finish, then close the rest.
    #[default]
    Drain,
    /// Close every session right away.
    Close,
}

/// Whether a failed `accept` ends the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AcceptPolicy {
    /// Log the failure and keep accepting.
    #[default]
    Continue,
    /// Stop the listener on the first failure.
    Fatal,
}

/// Runtime settings for a relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub framing: Framing,
    /// Largest accepted message; `None` picks the framing's default.
    pub max_message_bytes: Option<usize>,
    /// Idle limit between two inbound messages of one session.
    pub read_timeout: Option<Duration>,
    /// Limit on handing one message to one recipient.
    pub write_timeout: Option<Duration>,
    pub on_shutdown: ShutdownPolicy,
    pub drain_timeout: Duration,
    pub accept_errors: AcceptPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            framing: Framing::default(),
            max_message_bytes: None,
            read_timeout: None,
            write_timeout: None,
            on_shutdown: ShutdownPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            accept_errors: AcceptPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn message_limit(&self) -> usize {
        self.max_message_bytes
            .unwrap_or_else(|| self.framing.default_limit())
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.host.trim().is_empty() {
            return Err(RelayError::Config("host cannot be empty".to_string()));
        }
        if self.max_message_bytes == Some(0) {
            return Err(RelayError::Config(
                "max message size must be at least one byte".to_string(),
            ));
        }
        if self.read_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(RelayError::Config("read timeout must be positive".to_string()));
        }
        if self.write_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(RelayError::Config("write timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_line_protocol() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:5000");
        assert_eq!(config.message_limit(), 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn raw_framing_reads_in_small_chunks() {
        let config = RelayConfig {
            framing: Framing::Raw,
            ..RelayConfig::default()
        };
        assert_eq!(config.message_limit(), 1024);

        let config = RelayConfig {
            max_message_bytes: Some(16),
            ..config
        };
        assert_eq!(config.message_limit(), 16);
    }

    #[test]
    fn rejects_degenerate_limits() {
        let zero_size = RelayConfig {
            max_message_bytes: Some(0),
            ..RelayConfig::default()
        };
        assert!(matches!(zero_size.validate(), Err(RelayError::Config(_))));

        let zero_timeout = RelayConfig {
            write_timeout: Some(Duration::ZERO),
            ..RelayConfig::default()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
