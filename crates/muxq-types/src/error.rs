//! Error types for MuxQ
//!
//! Defines all error types used throughout the workspace.

use thiserror::Error;

/// Main error type for MuxQ operations
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument was empty, caught before any broker I/O
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The broker rejected an operation against an undeclared channel
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// Operation the broker model cannot express
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// The supplied cancellation token was already triggered
    #[error("operation cancelled")]
    Cancelled,

    /// The underlying broker connection has been closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Lower-level broker failure, passed through uninterpreted
    #[error("broker error: {0}")]
    Broker(String),

    /// A processor signalled failure while handling a delivery
    #[error("processor error: {0}")]
    Processor(String),
}

/// Result type alias for MuxQ operations
pub type Result<T> = std::result::Result<T, Error>;
