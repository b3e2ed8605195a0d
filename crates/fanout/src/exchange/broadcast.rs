//! Broadcast exchange.
//!
//! Every published message is appended to the exchange's
//! [`BroadcastQueue`] and then pushed to each binding that needs an
//! explicit delivery:
//!
//! | binding                 | delivery                                   |
//! |-------------------------|--------------------------------------------|
//! | forward                 | payload sent to the client's mailbox       |
//! | stream, push            | whole message sent on the client's port    |
//! | stream, local cursor    | none, the client reads the queue           |
//!
//! Appending before pushing means a cursor handed out at any point never
//! misses a message that was being fanned out at the time.

use super::binding::{Binding, Inbound, Outbound, RoutingTable};
use super::client::ExchangeRef;
use super::config::ExchangeConfig;
use super::error::ExchangeError;
use super::host::{self, ExchangeType};
use super::protocol::{
    BindAck, BindFailure, InspectRequest, LocalStreamBindRequest, Message, Payload,
    PortBindRequest, PortFrame, SimpleBindRequest,
};
use super::queue::BroadcastQueue;
use crate::core::Pid;
use crate::message::{EncodeError, Message as Wire};
use crate::runtime::{Context, Down, Envelope, Node};
use async_trait::async_trait;

/// State of one broadcast exchange.
pub struct BroadcastExchange<T: Payload> {
    queue: BroadcastQueue<Message<T>>,
    table: RoutingTable<T>,
}

/// Configuration requests, in the order they are tried.
enum BroadcastRequest<T> {
    SimpleBind(SimpleBindRequest),
    PortBind(PortBindRequest<T>),
    LocalStreamBind(LocalStreamBindRequest<T>),
    Inspect(InspectRequest),
    Unmatched(Envelope),
}

impl<T: Payload> BroadcastRequest<T> {
    fn classify(envelope: Envelope) -> Self {
        let envelope = match envelope.decode::<SimpleBindRequest>() {
            Ok(request) => return Self::SimpleBind(request),
            Err(envelope) => envelope,
        };
        let envelope = match envelope.decode::<PortBindRequest<T>>() {
            Ok(request) => return Self::PortBind(request),
            Err(envelope) => envelope,
        };
        let envelope = match envelope.downcast::<LocalStreamBindRequest<T>>() {
            Ok(request) => return Self::LocalStreamBind(request),
            Err(envelope) => envelope,
        };
        match envelope.decode::<InspectRequest>() {
            Ok(request) => Self::Inspect(request),
            Err(envelope) => Self::Unmatched(envelope),
        }
    }
}

impl<T: Payload> BroadcastExchange<T> {
    /// Empty exchange state.
    pub fn new() -> Self {
        Self {
            queue: BroadcastQueue::new(),
            table: RoutingTable::new(),
        }
    }

    /// Start a broadcast exchange process on `node`.
    ///
    /// ```ignore
    /// let prices = BroadcastExchange::<u64>::start(&node, ExchangeConfig::new().name("prices"))?;
    /// prices.publish(&node, 42)?;
    /// ```
    pub fn start(node: &Node, config: ExchangeConfig) -> Result<ExchangeRef<T>, ExchangeError> {
        host::start(node, Self::new(), config)
    }

    fn simple_bind(&mut self, ctx: &Context, request: SimpleBindRequest) {
        let client = request.client;
        if self.table.contains(&client) {
            tracing::trace!(exchange = ?ctx.pid(), client = ?client, "forward bind for bound client ignored");
            return;
        }

        let monitor = ctx.monitor(client);
        self.table.insert(client, Binding::Forward, monitor);
        tracing::debug!(
            exchange = ?ctx.pid(),
            client = ?client,
            kind = "forward",
            bindings = self.table.len(),
            "binding added"
        );
    }

    fn port_bind(&mut self, ctx: &Context, request: PortBindRequest<T>) {
        let PortBindRequest { client, reply } = request;

        let ack = if self.table.contains(&client) {
            tracing::debug!(exchange = ?ctx.pid(), client = ?client, "duplicate port bind refused");
            BindAck::Fail(BindFailure::DuplicateBinding)
        } else {
            let monitor = ctx.monitor(client);
            let binding = Binding::Stream {
                outbound: Outbound::Push(reply.clone()),
                inbound: Inbound::None,
            };
            self.table.insert(client, binding, monitor);
            tracing::debug!(
                exchange = ?ctx.pid(),
                client = ?client,
                kind = "push",
                bindings = self.table.len(),
                "binding added"
            );
            BindAck::Ok
        };

        if let Err(e) = ctx.node().send_port(&reply, PortFrame::Ack(ack)) {
            tracing::warn!(exchange = ?ctx.pid(), client = ?client, error = %e, "bind acknowledgement not delivered");
        }
    }

    fn local_stream_bind(&mut self, ctx: &Context, request: LocalStreamBindRequest<T>) {
        let LocalStreamBindRequest { client, reply } = request;

        let answer = match self.table.get(&client) {
            Some(existing) => existing
                .cursor()
                .cloned()
                .ok_or(BindFailure::DuplicateBinding),
            None => {
                let monitor = ctx.monitor(client);
                let cursor = self.queue.duplicate();
                let binding = Binding::Stream {
                    outbound: Outbound::None,
                    inbound: Inbound::Cursor(cursor.clone()),
                };
                self.table.insert(client, binding, monitor);
                tracing::debug!(
                    exchange = ?ctx.pid(),
                    client = ?client,
                    kind = "local_stream",
                    bindings = self.table.len(),
                    "binding added"
                );
                Ok(cursor)
            }
        };

        if reply.send(answer).is_err() {
            tracing::warn!(exchange = ?ctx.pid(), client = ?client, "bind reply dropped by client");
        }
    }

    fn inspect(&self, ctx: &Context, request: InspectRequest) {
        if let Err(e) = ctx.node().send_port(&request.reply, self.table.snapshot()) {
            tracing::warn!(exchange = ?ctx.pid(), error = %e, "inspect reply not delivered");
        }
    }

    fn fan_out(&self, ctx: &Context, message: Message<T>) {
        self.queue.publish(message.clone());

        let node = ctx.node();
        let mut payload_bytes: Option<Result<Vec<u8>, EncodeError>> = None;
        let mut frame_bytes: Option<Result<Vec<u8>, EncodeError>> = None;

        for (client, binding) in self.table.iter() {
            let client = *client;
            let result = match binding {
                Binding::Forward if client.is_local_to(node.id()) => {
                    node.send(client, message.payload.clone())
                }
                Binding::Forward => {
                    match payload_bytes.get_or_insert_with(|| message.payload.encode()) {
                        Ok(bytes) => node.send_encoded(client, bytes.clone()),
                        Err(e) => {
                            encode_failed(ctx.pid(), client, e);
                            continue;
                        }
                    }
                }
                Binding::Stream {
                    outbound: Outbound::Push(port),
                    ..
                } if port.id().node == node.id() => {
                    node.send_port(port, PortFrame::Deliver(message.clone()))
                }
                Binding::Stream {
                    outbound: Outbound::Push(port),
                    ..
                } => {
                    let encoded = frame_bytes
                        .get_or_insert_with(|| PortFrame::Deliver(message.clone()).encode());
                    match encoded {
                        Ok(bytes) => node.send_port_encoded(port.id(), bytes.clone()),
                        Err(e) => {
                            encode_failed(ctx.pid(), client, e);
                            continue;
                        }
                    }
                }
                Binding::Stream {
                    outbound: Outbound::None,
                    ..
                } => continue,
            };

            // The client's Down is already on its way.
            if let Err(e) = result {
                tracing::trace!(exchange = ?ctx.pid(), client = ?client, error = %e, "delivery failed");
            }
        }
    }

    fn remove_binding(&mut self, ctx: &Context, down: Down) {
        match self.table.remove(&down.pid) {
            Some((binding, monitor)) => {
                if monitor != down.reference {
                    tracing::trace!(exchange = ?ctx.pid(), client = ?down.pid, "down from an earlier monitor");
                }
                tracing::debug!(
                    exchange = ?ctx.pid(),
                    client = ?down.pid,
                    kind = ?binding.kind(),
                    reason = %down.reason,
                    "binding removed"
                );
            }
            None => {
                tracing::trace!(exchange = ?ctx.pid(), pid = ?down.pid, "down for unbound process");
            }
        }
    }
}

impl<T: Payload> Default for BroadcastExchange<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_failed(exchange: Pid, client: Pid, error: &EncodeError) {
    tracing::error!(exchange = ?exchange, client = ?client, error = %error, "message not encodable; skipped for this client");
}

#[async_trait]
impl<T: Payload> ExchangeType for BroadcastExchange<T> {
    type Payload = T;

    const KIND: &'static str = "broadcast";

    async fn route(&mut self, ctx: &mut Context, message: Message<T>) {
        self.fan_out(ctx, message);
    }

    async fn configure(&mut self, ctx: &mut Context, request: Envelope) {
        match BroadcastRequest::<T>::classify(request) {
            BroadcastRequest::SimpleBind(request) => self.simple_bind(ctx, request),
            BroadcastRequest::PortBind(request) => self.port_bind(ctx, request),
            BroadcastRequest::LocalStreamBind(request) => self.local_stream_bind(ctx, request),
            BroadcastRequest::Inspect(request) => self.inspect(ctx, request),
            BroadcastRequest::Unmatched(envelope) => {
                tracing::trace!(exchange = ?ctx.pid(), message = ?envelope, "unmatched request ignored");
            }
        }
    }

    async fn handle_down(&mut self, ctx: &mut Context, down: Down) {
        self.remove_binding(ctx, down);
    }
}
