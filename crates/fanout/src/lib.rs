//! # fanout - broadcast exchanges over a node-aware process runtime
//!
//! A broadcast exchange is a long-lived process that accepts published
//! messages from any number of producers and fans each one out to every
//! consumer currently bound to it. Consumers bind and leave at any time,
//! and may live on the exchange's own node or on another node of the
//! cluster.
//!
//! # Overview
//!
//! - **Runtime**: nodes, processes with mailboxes, monitors, ports
//! - **Distribution**: a cluster fabric carrying encoded frames between nodes
//! - **Exchange**: the broadcast queue, bind protocol and fan-out router
//!
//! Where a consumer lives decides how it is served. A consumer on the
//! exchange's node reads the exchange's queue through its own cursor and
//! nothing is ever encoded. A consumer on another node gets each message
//! encoded once and pushed on a dedicated port.
//!
//! # Quick Start
//!
//! ```ignore
//! use fanout::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cluster = Cluster::new();
//!     let node = cluster.node(NodeConfig::new("main"))?;
//!     let ticks = BroadcastExchange::<u64>::start(&node, ExchangeConfig::new().name("ticks"))?;
//!
//!     node.spawn(move |mut ctx| async move {
//!         let Ok(mut sub) = ticks.bind(&mut ctx).await else { return };
//!         while let Some(msg) = sub.recv().await {
//!             tracing::info!(tick = msg.payload, "tick");
//!         }
//!     });
//!
//!     ticks.publish(&node, 1)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

// =============================================================================
// Modules
// =============================================================================

/// Core types: Pid, NodeId, Ref, ExitReason.
pub mod core;

/// Wire message trait and tagged encoding.
pub mod message;

/// Nodes, processes, mailboxes, monitors and ports.
pub mod runtime;

/// Cluster fabric between nodes.
pub mod distribution;

/// Broadcast exchange.
pub mod exchange;

// =============================================================================
// Re-exports
// =============================================================================

pub use crate::core::{DecodeError, ExitReason, NodeId, Pid, Ref};
pub use distribution::Cluster;
pub use exchange::{
    BindError, BroadcastExchange, ExchangeConfig, ExchangeError, ExchangeRef, Message,
    Subscription,
};
pub use runtime::{Context, Node, NodeConfig};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use fanout::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{ExitReason, NodeId, Pid, Ref};
    pub use crate::distribution::Cluster;
    pub use crate::exchange::{
        BindError, BroadcastExchange, ExchangeConfig, ExchangeRef, Message, Subscription,
    };
    pub use crate::runtime::{Context, Down, Envelope, Node, NodeConfig};
}
