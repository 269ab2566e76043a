//! Errors produced by the relay server and client.

use relay_core::RelayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection attempt to {0} timed out")]
    ConnectTimeout(String),
    #[error("relay server is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, NetError>;
