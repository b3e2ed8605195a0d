//! Mailbox entries.

use crate::core::{ExitReason, Pid, Ref};
use crate::message::{Message, decode_tag};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Notification that a monitored process terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Down {
    /// The reference returned when the monitor was created.
    pub reference: Ref,
    /// The process that terminated.
    pub pid: Pid,
    /// Why it terminated.
    pub reason: ExitReason,
}

/// One entry in a process mailbox.
///
/// Values sent from the same node arrive as [`Envelope::Local`] and are never
/// encoded. Anything that crossed a node boundary arrives as tagged bytes in
/// [`Envelope::Remote`]. Both decode through [`Envelope::decode`], so a
/// receiver does not care which path a message took.
pub enum Envelope {
    /// A value sent from the same node.
    Local(Box<dyn Any + Send>),
    /// Tagged bytes from another node.
    Remote(Vec<u8>),
    /// A monitor fired.
    Down(Down),
}

impl Envelope {
    /// Decode as `M`, handing the envelope back if it is something else.
    pub fn decode<M: Message>(self) -> Result<M, Envelope> {
        match self {
            Envelope::Local(value) => value
                .downcast::<M>()
                .map(|m| *m)
                .map_err(Envelope::Local),
            Envelope::Remote(bytes) => {
                let expected = M::tag();
                match decode_tag(&bytes) {
                    Ok((tag, _)) if tag == expected => match M::decode(&bytes) {
                        Ok(msg) => Ok(msg),
                        Err(e) => {
                            tracing::trace!(tag = %expected, error = %e, "payload did not decode");
                            Err(Envelope::Remote(bytes))
                        }
                    },
                    _ => Err(Envelope::Remote(bytes)),
                }
            }
            other => Err(other),
        }
    }

    /// Take a same-node value of type `V`.
    ///
    /// Only [`Envelope::Local`] entries can match; values that were never
    /// encodable cannot have arrived any other way.
    pub fn downcast<V: Any>(self) -> Result<V, Envelope> {
        match self {
            Envelope::Local(value) => value.downcast::<V>().map(|v| *v).map_err(Envelope::Local),
            other => Err(other),
        }
    }

    /// Take the monitor notification, if this is one.
    pub fn into_down(self) -> Result<Down, Envelope> {
        match self {
            Envelope::Down(down) => Ok(down),
            other => Err(other),
        }
    }

    /// The wire tag of a remote message.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Envelope::Remote(bytes) => decode_tag(bytes).ok().map(|(tag, _)| tag),
            _ => None,
        }
    }

    /// Returns `true` if this is the `Down` for `reference`.
    pub fn is_down_for(&self, reference: Ref) -> bool {
        matches!(self, Envelope::Down(down) if down.reference == reference)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Local(_) => write!(f, "Envelope::Local(..)"),
            Envelope::Remote(bytes) => f
                .debug_struct("Envelope::Remote")
                .field("tag", &self.tag())
                .field("len", &bytes.len())
                .finish(),
            Envelope::Down(down) => f.debug_tuple("Envelope::Down").field(down).finish(),
        }
    }
}
