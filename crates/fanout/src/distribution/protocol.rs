//! Wire protocol between nodes.

use crate::core::{ExitReason, NodeId, Pid, Ref};
use crate::runtime::PortId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frames exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DistMessage {
    /// A tagged message for a process.
    Send {
        /// Target process.
        to: Pid,
        /// Tagged message bytes.
        payload: Vec<u8>,
    },
    /// A tagged message for a port.
    PortSend {
        /// Target port.
        port: PortId,
        /// Tagged message bytes.
        payload: Vec<u8>,
    },
    /// Start watching a process on the receiving node.
    Monitor {
        /// Process to notify.
        watcher: Pid,
        /// Process to watch.
        target: Pid,
        /// Reference chosen by the watcher's node.
        reference: Ref,
    },
    /// Stop watching a process.
    Demonitor {
        /// Process being watched.
        target: Pid,
        /// Reference of the monitor.
        reference: Ref,
    },
    /// A watched process terminated.
    ProcessDown {
        /// Process to notify.
        watcher: Pid,
        /// Reference of the monitor.
        reference: Ref,
        /// The process that terminated.
        pid: Pid,
        /// Why it terminated.
        reason: ExitReason,
    },
}

/// Errors from the distribution layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistError {
    /// No live node with this id is part of the cluster.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Frame encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Frame decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame was cut short.
    #[error("incomplete frame")]
    IncompleteFrame,
}

// =============================================================================
// Protocol Trait
// =============================================================================

/// Encoding and framing of [`DistMessage`]s.
pub trait Protocol: Send + Sync + 'static {
    /// Encode a distribution message to bytes.
    fn encode(&self, msg: &DistMessage) -> Result<Vec<u8>, DistError>;

    /// Decode a distribution message from bytes.
    fn decode(&self, bytes: &[u8]) -> Result<DistMessage, DistError>;

    /// Frame an encoded message with length prefix.
    fn frame(&self, payload: Vec<u8>) -> Vec<u8>;

    /// Try to parse a framed message from a buffer.
    ///
    /// Returns `Some((message, bytes_consumed))` if complete, `None` if more data needed.
    fn parse_frame(&self, buf: &[u8]) -> Result<Option<(DistMessage, usize)>, DistError>;
}

// =============================================================================
// Postcard Protocol
// =============================================================================

/// Length-prefixed postcard frames.
#[derive(Debug, Clone, Default)]
pub struct PostcardProtocol;

impl Protocol for PostcardProtocol {
    fn encode(&self, msg: &DistMessage) -> Result<Vec<u8>, DistError> {
        postcard::to_allocvec(msg).map_err(|e| DistError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<DistMessage, DistError> {
        postcard::from_bytes(bytes).map_err(|e| DistError::Decode(e.to_string()))
    }

    fn frame(&self, payload: Vec<u8>) -> Vec<u8> {
        let len = payload.len() as u32;
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    fn parse_frame(&self, buf: &[u8]) -> Result<Option<(DistMessage, usize)>, DistError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if buf.len() < 4 + len {
            return Ok(None);
        }

        let msg = self.decode(&buf[4..4 + len])?;
        Ok(Some((msg, 4 + len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(node: u32, serial: u64) -> Pid {
        Pid::new(NodeId::from_raw(node), serial)
    }

    #[test]
    fn test_postcard_protocol_framing() {
        let protocol = PostcardProtocol;
        let msg = DistMessage::ProcessDown {
            watcher: pid(1, 4),
            reference: Ref::from_raw(77),
            pid: pid(2, 9),
            reason: ExitReason::error("crashed"),
        };

        let framed = protocol.frame(protocol.encode(&msg).unwrap());
        let (decoded, consumed) = protocol.parse_frame(&framed).unwrap().unwrap();

        assert_eq!(consumed, framed.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_partial_frame_needs_more() {
        let protocol = PostcardProtocol;
        let msg = DistMessage::Send {
            to: pid(2, 1),
            payload: vec![1, 2, 3, 4],
        };
        let framed = protocol.frame(protocol.encode(&msg).unwrap());

        assert!(protocol.parse_frame(&framed[..3]).unwrap().is_none());
        assert!(protocol
            .parse_frame(&framed[..framed.len() - 1])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_garbage_frame_is_decode_error() {
        let protocol = PostcardProtocol;
        let framed = protocol.frame(vec![0xff; 3]);
        assert!(matches!(
            protocol.parse_frame(&framed),
            Err(DistError::Decode(_))
        ));
    }
}
