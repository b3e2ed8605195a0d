//! Process runtime.
//!
//! Nodes, processes, mailboxes, monitors and ports. This is the host the
//! exchange runs on; it knows nothing about exchanges itself.

mod context;
mod envelope;
mod error;
pub(crate) mod node;
mod port;

pub use context::Context;
pub use envelope::{Down, Envelope};
pub use error::{RuntimeError, SendError};
pub use node::{Node, NodeConfig};
pub use port::{LocalReply, LocalReplyReceiver, PortId, ReceivePort, ReplyDropped, SendPort};
