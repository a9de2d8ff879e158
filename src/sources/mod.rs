//! Log source abstraction.
//!
//! A source streams messages from a given position onwards, which is what a
//! range lease needs to resume loading where it stopped.

pub mod file;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::message::Message;

/// Events emitted by log sources
#[derive(Debug)]
pub enum LogEvent {
    Message(Message),
    Error(String),
    EndOfStream,
}

/// Trait for log sources
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    /// Start streaming messages whose position is at or after `from`.
    ///
    /// `inherited_time` is the time of the last message already held before
    /// `from`; sources use it for messages that carry no time of their own.
    /// The stream ends with `EndOfStream`, possibly preceded by an `Error`.
    /// Dropping the receiver stops the producer.
    async fn stream(&self, from: u64, inherited_time: Option<DateTime<Utc>>) -> mpsc::Receiver<LogEvent>;

    /// Get the display name for this source
    fn name(&self) -> String;
}
