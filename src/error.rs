use std::sync::Arc;

use thiserror::Error;

use crate::message::Message;

pub type Result<T> = std::result::Result<T, ContainerError>;

/// Contract violations raised by the containers.
///
/// None of these are retried internally; they signal either a mis-ordered
/// feed or a caller that broke the open/closed protocol.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// An appended message is older than the message stored before it.
    #[error(
        "message at position {} ({}) precedes the last stored message at position {} ({})",
        offending.position,
        offending.time,
        last.position,
        last.time
    )]
    TimeConstraint {
        last: Arc<Message>,
        offending: Arc<Message>,
    },

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("chunk is full")]
    ChunkFull,

    #[error("position {value} is outside of [{begin}, {end})")]
    OutOfRange { value: u64, begin: u64, end: u64 },
}

impl ContainerError {
    pub fn is_time_constraint(&self) -> bool {
        matches!(self, ContainerError::TimeConstraint { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, ContainerError::InvalidState(_))
    }
}
