//! Exchanges.
//!
//! An exchange is a process that accepts published messages and fans them
//! out to bound consumers. Consumers bind in one of two forms:
//!
//! - **stream**: [`ExchangeRef::bind`] returns a [`Subscription`]. A
//!   consumer on the exchange's node reads the exchange's
//!   [`BroadcastQueue`] through its own cursor; a consumer on another node
//!   gets every message pushed on a dedicated port.
//! - **forward**: [`ExchangeRef::bind_forward`] makes the exchange send each
//!   payload straight to the consumer's mailbox.
//!
//! Bindings are removed when the consumer terminates. There is no unbind.
//!
//! # Example
//!
//! ```ignore
//! use fanout::prelude::*;
//!
//! let cluster = Cluster::new();
//! let node = cluster.node(NodeConfig::new("a"))?;
//! let prices = BroadcastExchange::<u64>::start(&node, ExchangeConfig::new())?;
//!
//! node.spawn(move |mut ctx| async move {
//!     let mut sub = prices.bind(&mut ctx).await.unwrap();
//!     while let Some(msg) = sub.recv().await {
//!         println!("price: {}", msg.payload);
//!     }
//! });
//!
//! prices.publish(&node, 101)?;
//! ```

mod binding;
mod broadcast;
mod client;
mod config;
mod error;
mod host;
mod protocol;
mod queue;

pub use broadcast::BroadcastExchange;
pub use client::{ExchangeRef, Subscription};
pub use config::ExchangeConfig;
pub use error::{BindError, ExchangeError};
pub use host::{ExchangeType, start};
pub use protocol::{
    BindAck, BindFailure, BindingInfo, BindingKind, InspectRequest, LocalStreamBindRequest,
    Message, Payload, PortBindRequest, PortFrame, Publish, SimpleBindRequest,
};
pub use queue::{BroadcastQueue, StreamCursor};
