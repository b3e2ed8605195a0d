//! Exchange hosting.
//!
//! An exchange runs as an ordinary process. The host loop owns the exchange
//! state and feeds it one mailbox entry at a time, so an [`ExchangeType`]
//! never needs a lock for its own state:
//!
//! - a [`Publish`] for the exchange's payload type goes to
//!   [`ExchangeType::route`],
//! - a monitor notification goes to [`ExchangeType::handle_down`],
//! - anything else goes to [`ExchangeType::configure`].

use super::client::ExchangeRef;
use super::config::ExchangeConfig;
use super::error::ExchangeError;
use super::protocol::{Message, Payload, Publish};
use crate::core::ExitReason;
use crate::runtime::{Context, Down, Envelope, Node};
use async_trait::async_trait;

/// Routing behaviour hosted by the exchange loop.
#[async_trait]
pub trait ExchangeType: Send + 'static {
    /// The payload type carried by published messages.
    type Payload: Payload;

    /// Short name used in logs.
    const KIND: &'static str;

    /// Deliver a published message.
    async fn route(&mut self, ctx: &mut Context, message: Message<Self::Payload>);

    /// Handle any other request. Requests the exchange does not recognise
    /// must leave its state unchanged.
    async fn configure(&mut self, ctx: &mut Context, request: Envelope);

    /// A monitored process terminated.
    async fn handle_down(&mut self, ctx: &mut Context, down: Down);
}

/// Spawn `exchange` on `node`.
pub fn start<E: ExchangeType>(
    node: &Node,
    exchange: E,
    config: ExchangeConfig,
) -> Result<ExchangeRef<E::Payload>, ExchangeError> {
    let pid = node.spawn(move |ctx| run(exchange, ctx));

    if let Some(name) = config.name {
        if let Err(e) = node.register(name, pid) {
            let _ = node.exit(pid, ExitReason::Shutdown);
            return Err(e.into());
        }
    }

    Ok(ExchangeRef::from_pid(pid))
}

async fn run<E: ExchangeType>(mut exchange: E, mut ctx: Context) {
    tracing::debug!(pid = ?ctx.pid(), kind = E::KIND, "exchange started");

    while let Some(envelope) = ctx.recv().await {
        let envelope = match envelope.decode::<Publish<E::Payload>>() {
            Ok(publish) => {
                exchange.route(&mut ctx, publish.message).await;
                continue;
            }
            Err(envelope) => envelope,
        };

        match envelope.into_down() {
            Ok(down) => exchange.handle_down(&mut ctx, down).await,
            Err(request) => exchange.configure(&mut ctx, request).await,
        }
    }
}
