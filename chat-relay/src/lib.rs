//! Line-oriented chat relay: every message a participant sends is fanned
//! out to every other connected participant.
//!
//! - [`cli`] parses the command-line interface for relay and client modes.
//! - [`config`] holds the relay's runtime settings and policies.
//! - [`listener`] accepts TCP connections and spawns one session per peer.
//! - [`session`] runs the per-connection read → deliver loop.
//! - [`broadcast`] fans one message out to everyone but its sender.
//! - [`registry`] tracks which connections may receive broadcasts.
//! - [`connection`] wraps the outbound half of one participant.
//! - [`codec`] splits byte streams into messages and frames them back.
//! - [`shutdown`] carries the cooperative stop signal.
//! - [`client`] is a terminal participant for manual use and tests.
//!
//! Delivery is best-effort: a recipient whose send fails is removed and the
//! broadcast carries on. Messages from one sender reach each recipient in
//! the order they were sent; nothing is promised across senders.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod registry;
pub mod session;
pub mod shutdown;

pub use config::RelayConfig;
pub use listener::Relay;
pub use registry::Registry;
