//! Bus error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Channel name cannot be empty")]
    EmptyChannelName,

    #[error("Unknown change kind: {0}")]
    UnknownKind(String),
}
