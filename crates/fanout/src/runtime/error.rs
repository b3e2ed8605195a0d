//! Error types for runtime operations.

use super::port::PortId;
use crate::core::Pid;
use crate::distribution::DistError;
use crate::message::EncodeError;
use thiserror::Error;

/// Errors that can occur during runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Nodes must be created from inside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Process not found.
    #[error("process not found: {0}")]
    ProcessNotFound(Pid),

    /// The name is already registered to another process.
    #[error("name already registered: {0}")]
    NameTaken(String),

    /// The process is not on this node.
    #[error("process {0} is not local to this node")]
    NotLocal(Pid),
}

/// Errors that can occur when sending messages.
#[derive(Debug, Error)]
pub enum SendError {
    /// The target process does not exist.
    #[error("process not found: {0}")]
    ProcessNotFound(Pid),

    /// The target port has been closed.
    #[error("port closed: {0:?}")]
    PortClosed(PortId),

    /// The value can only be delivered within one node.
    #[error("process {0} is on another node; value cannot be encoded")]
    NotLocal(Pid),

    /// Message encoding failed.
    #[error(transparent)]
    Encoding(#[from] EncodeError),

    /// Distribution layer error.
    #[error("distribution error: {0}")]
    Distribution(#[from] DistError),
}
