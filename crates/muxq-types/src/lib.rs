//! MuxQ Types - Core domain types for the consumption multiplexer
//!
//! This crate contains all shared types used across MuxQ components.

pub mod error;
pub mod message;
pub mod processor;

// Re-export commonly used types
pub use error::{Error, Result};
pub use message::{Message, MessageId};
pub use processor::Processor;
