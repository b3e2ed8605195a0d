//! Messages understood by an exchange.
//!
//! Everything that may come from another node implements the wire
//! [`Message`](crate::message::Message) trait and is told apart by its tag.
//! [`LocalStreamBindRequest`] is the one exception: it carries a
//! [`LocalReply`] with a queue cursor in it, has no wire form, and can only
//! be delivered with [`Node::send_local`](crate::runtime::Node::send_local).

use super::queue::StreamCursor;
use crate::core::Pid;
use crate::message::Message as Wire;
use crate::runtime::{LocalReply, SendPort};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Bound for values an exchange can carry.
pub trait Payload: Wire + Clone + Sync {}

impl<T: Wire + Clone + Sync> Payload for T {}

// =============================================================================
// Message
// =============================================================================

/// A published message.
///
/// The broadcast exchange never looks inside; `key` and `headers` are there
/// for consumers and for exchange types that route on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message<T> {
    /// Routing key.
    pub key: String,
    /// Free-form metadata.
    pub headers: Vec<(String, String)>,
    /// The value.
    pub payload: T,
}

impl<T> Message<T> {
    /// A message with an empty key and no headers.
    pub fn new(payload: T) -> Self {
        Self {
            key: String::new(),
            headers: Vec::new(),
            payload,
        }
    }

    /// Set the routing key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up the first header with this name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl<T> From<T> for Message<T> {
    fn from(payload: T) -> Self {
        Self::new(payload)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Publish a message. Fire and forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publish<T> {
    /// The message to fan out.
    pub message: Message<T>,
}

/// Bind `client` in forward mode: payloads go straight to its mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleBindRequest {
    /// The consumer.
    pub client: Pid,
}

/// Bind a consumer on another node.
///
/// The exchange acknowledges on `reply` and then pushes every message on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBindRequest<T> {
    /// The consumer.
    pub client: Pid,
    /// Where the acknowledgement and subsequent messages go.
    pub reply: SendPort<PortFrame<T>>,
}

/// Bind a consumer on the exchange's own node.
///
/// The exchange answers with a cursor into its queue. A client that already
/// holds a stream binding gets its existing cursor back; one bound some
/// other way is refused.
#[derive(Debug)]
pub struct LocalStreamBindRequest<T> {
    /// The consumer.
    pub client: Pid,
    /// Receives the cursor.
    pub reply: LocalReply<Result<StreamCursor<Message<T>>, BindFailure>>,
}

/// Ask for a snapshot of the routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectRequest {
    /// Where the snapshot goes.
    pub reply: SendPort<Vec<BindingInfo>>,
}

// =============================================================================
// Replies
// =============================================================================

/// Why a bind was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindFailure {
    /// The client already has a binding.
    DuplicateBinding,
}

/// Answer to a [`PortBindRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindAck {
    /// The binding was created.
    Ok,
    /// The binding was refused; state is unchanged.
    Fail(BindFailure),
}

/// Everything that travels on a port-bound consumer's channel.
///
/// The acknowledgement always comes first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortFrame<T> {
    /// The bind acknowledgement.
    Ack(BindAck),
    /// A published message.
    Deliver(Message<T>),
}

/// How a binding is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    /// Payloads are sent to the client's mailbox.
    Forward,
    /// Messages are pushed on a dedicated port.
    Push,
    /// The client reads a cursor into the exchange's queue.
    LocalStream,
}

/// One row of the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingInfo {
    /// The bound client.
    pub client: Pid,
    /// How it is delivered to.
    pub kind: BindingKind,
}

// Tags of generic types carry the payload's tag. A request built for another
// payload type then falls through every shape instead of decoding as garbage.
impl<T: Payload> Wire for Publish<T> {
    fn tag() -> Cow<'static, str> {
        Cow::Owned(format!("fanout:publish<{}>", T::tag()))
    }
}

impl<T: Payload> Wire for PortBindRequest<T> {
    fn tag() -> Cow<'static, str> {
        Cow::Owned(format!("fanout:bind_port<{}>", T::tag()))
    }
}

impl<T: Payload> Wire for PortFrame<T> {
    fn tag() -> Cow<'static, str> {
        Cow::Owned(format!("fanout:frame<{}>", T::tag()))
    }
}

crate::impl_message!(SimpleBindRequest, "fanout:bind");
crate::impl_message!(InspectRequest, "fanout:inspect");
crate::impl_message!(Vec<BindingInfo>, "fanout:bindings");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeId;
    use crate::runtime::Envelope;

    #[test]
    fn test_message_builders() {
        let msg = Message::new(3u64)
            .with_key("orders")
            .with_header("trace", "abc");
        assert_eq!(msg.key, "orders");
        assert_eq!(msg.header("trace"), Some("abc"));
        assert_eq!(msg.header("missing"), None);

        let plain: Message<u64> = 4.into();
        assert!(plain.key.is_empty());
    }

    #[test]
    fn test_request_shapes_are_distinguishable() {
        let client = Pid::new(NodeId::from_raw(1), 3);
        let bind = Envelope::Remote(SimpleBindRequest { client }.encode().unwrap());

        let bind = match bind.decode::<Publish<u64>>() {
            Ok(_) => panic!("a bind request is not a publish"),
            Err(env) => env,
        };
        assert_eq!(bind.decode::<SimpleBindRequest>().unwrap().client, client);
    }

    #[test]
    fn test_generic_tags_follow_payload_type() {
        assert_eq!(Publish::<u64>::tag(), "fanout:publish<u64>");
        assert_ne!(Publish::<u64>::tag(), Publish::<String>::tag());
        assert_ne!(PortBindRequest::<u64>::tag(), PortBindRequest::<String>::tag());
        assert_ne!(PortFrame::<u64>::tag(), PortFrame::<String>::tag());

        let publish = Publish {
            message: Message::new("abc".to_string()),
        };
        let envelope = Envelope::Remote(publish.encode().unwrap());

        let envelope = match envelope.decode::<Publish<u64>>() {
            Ok(p) => panic!("decoded a string publish as {:?}", p.message.payload),
            Err(env) => env,
        };
        let back = envelope.decode::<Publish<String>>().unwrap();
        assert_eq!(back.message.payload, "abc");
    }
}
