//! Typed errors for each fallible step of the relay.
//!
//! Every transport failure maps to exactly one of these kinds, and each kind
//! has exactly one recovery: a [`ReadError`] ends the reading session, a
//! [`WriteError`] drops the recipient, an [`AcceptError`] is reported by the
//! listener.

use std::{io, time::Duration};

use thiserror::Error;

use crate::connection::ConnectionId;

/// Failure while waiting for the next inbound message.
///
/// Clean end-of-stream is not an error; readers report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("transport read failed: {0}")]
    Io(#[from] io::Error),

    #[error("no message received within {0:?}")]
    Idle(Duration),

    #[error("message exceeds {limit} bytes")]
    FrameTooLong { limit: usize },
}

/// Failure while handing a message to one recipient.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("transport write failed: {0}")]
    Io(#[from] io::Error),

    #[error("write did not complete within {0:?}")]
    Timeout(Duration),

    #[error("connection already closed")]
    Closed,
}

/// Failure returned by the transport's accept call.
#[derive(Debug, Error)]
#[error("failed to accept connection: {0}")]
pub struct AcceptError(#[from] pub io::Error);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
}

/// Errors that end the listener itself.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Accept(#[from] AcceptError),

    #[error("cannot bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("invalid configuration: {0}")]
    Config(String),
}
