//! Dedicated channels.
//!
//! Two kinds, deliberately kept apart:
//!
//! - [`SendPort`] / [`ReceivePort`]: a typed channel whose send end is
//!   serializable and can be handed to any node. Crossing a node boundary
//!   encodes the value; an encoding failure is returned to the sender.
//! - [`LocalReply`] / [`LocalReplyReceiver`]: a one-shot channel for values
//!   that must never be encoded (cursors, handles). It has no wire form, so
//!   any message that embeds it cannot implement [`Message`] and can only be
//!   sent with [`Node::send_local`](super::Node::send_local).

use super::node::NodeInner;
use crate::core::{DecodeError, NodeId};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Weak;
use tokio::sync::{mpsc, oneshot};

/// Identifies a receive port within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId {
    /// Node that owns the receive end.
    pub node: NodeId,
    /// Node-local serial.
    pub serial: u64,
}

/// The sending half of a port. Serializable, so it can travel to other nodes.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SendPort<M> {
    id: PortId,
    #[serde(skip)]
    _marker: PhantomData<fn(M)>,
}

impl<M> SendPort<M> {
    pub(crate) fn new(id: PortId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The port this sends to.
    pub fn id(&self) -> PortId {
        self.id
    }
}

impl<M> Clone for SendPort<M> {
    fn clone(&self) -> Self {
        Self::new(self.id)
    }
}

impl<M> fmt::Debug for SendPort<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SendPort").field(&self.id).finish()
    }
}

impl<M> PartialEq for SendPort<M> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// The receiving half of a port. Dropping it closes the port.
pub struct ReceivePort<M> {
    id: PortId,
    rx: mpsc::UnboundedReceiver<M>,
    node: Weak<NodeInner>,
}

impl<M> ReceivePort<M> {
    pub(crate) fn new(id: PortId, rx: mpsc::UnboundedReceiver<M>, node: Weak<NodeInner>) -> Self {
        Self { id, rx, node }
    }

    /// The id of this port.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Wait for the next value. Returns `None` once the port is closed.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    /// Take the next value if one is queued.
    pub fn try_recv(&mut self) -> Option<M> {
        self.rx.try_recv().ok()
    }
}

impl<M> Drop for ReceivePort<M> {
    fn drop(&mut self) {
        if let Some(node) = self.node.upgrade() {
            node.close_port(self.id.serial);
        }
    }
}

impl<M> fmt::Debug for ReceivePort<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReceivePort").field(&self.id).finish()
    }
}

/// Type-erased write end of a port, as stored in the node's port table.
pub(crate) trait PortSink: Send + Sync {
    /// Push a same-node value.
    fn push_local(&self, value: Box<dyn Any + Send>) -> Result<(), PushError>;

    /// Push a value that arrived encoded.
    fn push_encoded(&self, bytes: &[u8]) -> Result<(), PushError>;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum PushError {
    #[error("port closed")]
    Closed,
    #[error("value has the wrong type for this port")]
    WrongType,
    #[error("port payload did not decode: {0}")]
    Decode(DecodeError),
}

pub(crate) struct TypedSink<M> {
    pub(crate) tx: mpsc::UnboundedSender<M>,
}

impl<M: Message> PortSink for TypedSink<M> {
    fn push_local(&self, value: Box<dyn Any + Send>) -> Result<(), PushError> {
        let value = value.downcast::<M>().map_err(|_| PushError::WrongType)?;
        self.tx.send(*value).map_err(|_| PushError::Closed)
    }

    fn push_encoded(&self, bytes: &[u8]) -> Result<(), PushError> {
        let value = M::decode(bytes).map_err(PushError::Decode)?;
        self.tx.send(value).map_err(|_| PushError::Closed)
    }
}

/// One-shot, same-node-only reply channel.
///
/// Carries any `Send` value without encoding it.
pub struct LocalReply<M> {
    tx: oneshot::Sender<M>,
}

/// Receiving side of a [`LocalReply`].
pub struct LocalReplyReceiver<M> {
    rx: oneshot::Receiver<M>,
}

/// The replying side went away without answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("reply channel closed without a reply")]
pub struct ReplyDropped;

impl<M> LocalReply<M> {
    /// Create a connected reply pair.
    pub fn channel() -> (LocalReply<M>, LocalReplyReceiver<M>) {
        let (tx, rx) = oneshot::channel();
        (LocalReply { tx }, LocalReplyReceiver { rx })
    }

    /// Send the reply. Hands the value back if nobody is waiting.
    pub fn send(self, value: M) -> Result<(), M> {
        self.tx.send(value)
    }

    /// Returns `true` if the receiver was dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<M> LocalReplyReceiver<M> {
    /// Wait for the reply.
    pub async fn recv(self) -> Result<M, ReplyDropped> {
        self.rx.await.map_err(|_| ReplyDropped)
    }
}

impl<M> fmt::Debug for LocalReply<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalReply(..)")
    }
}
