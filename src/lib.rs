//! Message containers for a log viewer.
//!
//! Loaded messages live in prioritised ranges of source positions
//! ([`containers::RangesManagingCollection`]), are traversed as one
//! concatenated sequence and merged across sources by timestamp
//! ([`containers::SimpleMergingCollection`]). [`feed`] wires a
//! [`sources::LogSource`] to the range leases.

pub mod config;
pub mod containers;
pub mod error;
pub mod feed;
pub mod filter;
pub mod message;
pub mod sources;

pub use error::{ContainerError, Result};
pub use message::{IndexedMessage, Message, Timestamped};
