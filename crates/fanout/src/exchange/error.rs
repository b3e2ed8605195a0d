//! Error types for exchange operations.

use crate::distribution::DistError;
use crate::runtime::{RuntimeError, SendError};
use thiserror::Error;

/// Errors returned to a consumer that tried to bind.
#[derive(Debug, Error)]
pub enum BindError {
    /// The client already has a binding on this exchange.
    #[error("client is already bound")]
    DuplicateBinding,

    /// The exchange terminated before answering.
    #[error("exchange went away before the bind completed")]
    PeerDisconnected,

    /// No answer within the requested time.
    #[error("bind timed out")]
    Timeout,

    /// The request could not be sent.
    #[error("failed to send bind request: {0}")]
    Send(#[source] SendError),
}

impl From<SendError> for BindError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::ProcessNotFound(_)
            | SendError::Distribution(DistError::UnknownNode(_)) => BindError::PeerDisconnected,
            other => BindError::Send(other),
        }
    }
}

/// Errors from starting or querying an exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The exchange process could not be started or named.
    #[error("failed to start exchange: {0}")]
    Start(#[from] RuntimeError),

    /// A request could not be sent.
    #[error(transparent)]
    Send(#[from] SendError),

    /// The exchange did not answer in time.
    #[error("exchange did not answer in time")]
    Timeout,

    /// The exchange terminated before answering.
    #[error("exchange went away before answering")]
    PeerDisconnected,
}
