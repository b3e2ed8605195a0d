//! Core types: Pid, NodeId, Ref, ExitReason.
//!
//! These are the identities every other layer builds on. A [`Pid`] carries
//! the [`NodeId`] of the runtime instance that owns the process, so whether a
//! process is local or remote can always be decided from the identity alone.

mod exit;
mod pid;

pub use exit::ExitReason;
pub use pid::{NodeId, Pid, Ref};

use thiserror::Error;

/// Errors produced while decoding messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Postcard rejected the payload.
    #[error("postcard decode error: {0}")]
    Postcard(String),

    /// The bytes are structurally invalid.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The message carries a different tag than the one requested.
    #[error("tag mismatch: expected {expected}, found {found}")]
    TagMismatch {
        /// Tag of the type being decoded.
        expected: String,
        /// Tag found on the wire.
        found: String,
    },
}
