use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::{
    codec::Framing,
    config::{AcceptPolicy, DEFAULT_HOST, DEFAULT_PORT, RelayConfig, ShutdownPolicy},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP participants.
    Serve(ServeArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address the relay binds to.
    #[arg(long, env = "CHAT_RELAY_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port the relay binds to. Use 0 for an ephemeral port.
    #[arg(long, env = "CHAT_RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// How message boundaries are found on each connection.
    #[arg(long, env = "CHAT_RELAY_FRAMING", value_enum, default_value_t = Framing::Lines)]
    pub framing: Framing,

    /// Largest accepted message in bytes (defaults: 65536 for lines, 1024 for raw).
    #[arg(long, env = "CHAT_RELAY_MAX_MESSAGE_BYTES")]
    pub max_message_bytes: Option<usize>,

    /// Disconnect participants that stay silent this long, e.g. "10m".
    #[arg(long, env = "CHAT_RELAY_READ_TIMEOUT", value_parser = humantime::parse_duration)]
    pub read_timeout: Option<Duration>,

    /// Drop recipients that cannot take a message within this long, e.g. "5s".
    #[arg(long, env = "CHAT_RELAY_WRITE_TIMEOUT", value_parser = humantime::parse_duration)]
    pub write_timeout: Option<Duration>,

    /// What to do with live sessions on shutdown.
    #[arg(long, env = "CHAT_RELAY_ON_SHUTDOWN", value_enum, default_value_t = ShutdownPolicy::Drain)]
    pub on_shutdown: ShutdownPolicy,

    /// Grace period for the drain policy.
    #[arg(
        long,
        env = "CHAT_RELAY_DRAIN_TIMEOUT",
        value_parser = humantime::parse_duration,
        default_value = "5s"
    )]
    pub drain_timeout: Duration,

    /// Whether a failed accept stops the relay.
    #[arg(long, env = "CHAT_RELAY_ACCEPT_ERRORS", value_enum, default_value_t = AcceptPolicy::Continue)]
    pub accept_errors: AcceptPolicy,
}

impl From<ServeArgs> for RelayConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            framing: args.framing,
            max_message_bytes: args.max_message_bytes,
            read_timeout: args.read_timeout,
            write_timeout: args.write_timeout,
            on_shutdown: args.on_shutdown,
            drain_timeout: args.drain_timeout,
            accept_errors: args.accept_errors,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Relay host to connect to.
    #[arg(long, env = "CHAT_RELAY_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Relay port to connect to.
    #[arg(long, env = "CHAT_RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Prefix outgoing lines with "NAME: ".
    #[arg(long)]
    pub name: Option<String>,
}

impl ClientArgs {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
