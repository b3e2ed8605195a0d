//! Client API for exchanges.
//!
//! [`ExchangeRef::bind`] picks the bind path from the two pids alone:
//!
//! - same node: a [`LocalStreamBindRequest`] answered with a cursor into the
//!   exchange's queue. Nothing is encoded.
//! - other node: a [`PortBindRequest`] carrying a port. The exchange
//!   acknowledges on the port and then pushes every message on it.
//!
//! Either way the caller gets a [`Subscription`] and does not need to know
//! which path was taken.

use super::error::{BindError, ExchangeError};
use super::protocol::{
    BindAck, BindFailure, BindingInfo, InspectRequest, LocalStreamBindRequest, Message, Payload,
    PortBindRequest, PortFrame, Publish, SimpleBindRequest,
};
use super::queue::StreamCursor;
use crate::core::Pid;
use crate::runtime::{Context, LocalReply, Node, ReceivePort, SendError};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// Handle to a running exchange carrying payloads of type `T`.
///
/// Serializable, so it can be passed to processes on other nodes.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ExchangeRef<T> {
    pid: Pid,
    #[serde(skip)]
    _marker: PhantomData<fn(T)>,
}

impl<T> ExchangeRef<T> {
    /// Wrap the pid of an exchange process.
    pub fn from_pid(pid: Pid) -> Self {
        Self {
            pid,
            _marker: PhantomData,
        }
    }

    /// The exchange process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Look up an exchange registered on `node`.
    pub fn whereis(node: &Node, name: &str) -> Option<Self> {
        node.whereis(name).map(Self::from_pid)
    }
}

impl<T: Payload> ExchangeRef<T> {
    /// Publish a message. Fire and forget: no acknowledgement is sent.
    pub fn publish(&self, node: &Node, message: impl Into<Message<T>>) -> Result<(), SendError> {
        node.send(
            self.pid,
            Publish {
                message: message.into(),
            },
        )
    }

    /// Bind the calling process in stream mode.
    ///
    /// Fails with [`BindError::PeerDisconnected`] if the exchange terminates
    /// before answering.
    pub async fn bind(&self, ctx: &mut Context) -> Result<Subscription<T>, BindError> {
        self.bind_within(ctx, None).await
    }

    /// Like [`ExchangeRef::bind`], giving up after `timeout`.
    ///
    /// A remote bind that times out may still complete on the exchange; its
    /// binding is removed when the calling process terminates.
    pub async fn bind_timeout(
        &self,
        ctx: &mut Context,
        timeout: Duration,
    ) -> Result<Subscription<T>, BindError> {
        self.bind_within(ctx, Some(timeout)).await
    }

    /// Bind the calling process in forward mode.
    ///
    /// Payloads then arrive in the caller's mailbox as plain `T` values.
    pub fn bind_forward(&self, ctx: &Context) -> Result<(), SendError> {
        ctx.send(self.pid, SimpleBindRequest { client: ctx.pid() })
    }

    /// Snapshot of the exchange's bindings.
    ///
    /// The exchange answers in mailbox order, so everything sent to it
    /// before this call has been processed when the snapshot arrives.
    pub async fn bindings(
        &self,
        node: &Node,
        timeout: Duration,
    ) -> Result<Vec<BindingInfo>, ExchangeError> {
        let (reply, mut rx) = node.new_port::<Vec<BindingInfo>>();
        node.send(self.pid, InspectRequest { reply })?;

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(rows)) => Ok(rows),
            Ok(None) => Err(ExchangeError::PeerDisconnected),
            Err(_) => Err(ExchangeError::Timeout),
        }
    }

    async fn bind_within(
        &self,
        ctx: &mut Context,
        timeout: Option<Duration>,
    ) -> Result<Subscription<T>, BindError> {
        if self.pid.is_local_to(ctx.node().id()) {
            self.bind_local(ctx, timeout).await
        } else {
            self.bind_remote(ctx, timeout).await
        }
    }

    async fn bind_local(
        &self,
        ctx: &mut Context,
        timeout: Option<Duration>,
    ) -> Result<Subscription<T>, BindError> {
        let (reply, rx) = LocalReply::channel();
        ctx.node().send_local(
            self.pid,
            LocalStreamBindRequest::<T> {
                client: ctx.pid(),
                reply,
            },
        )?;

        // The request, and the reply sender in it, are dropped with the
        // exchange's mailbox if it dies first.
        let answer = tokio::select! {
            answer = rx.recv() => answer.map_err(|_| BindError::PeerDisconnected)?,
            _ = expire(timeout) => return Err(BindError::Timeout),
        };

        match answer {
            Ok(cursor) => Ok(Subscription {
                source: Source::Local(cursor),
            }),
            Err(BindFailure::DuplicateBinding) => Err(BindError::DuplicateBinding),
        }
    }

    async fn bind_remote(
        &self,
        ctx: &mut Context,
        timeout: Option<Duration>,
    ) -> Result<Subscription<T>, BindError> {
        let monitor = ctx.monitor(self.pid);
        let (reply, mut rx) = ctx.node().new_port::<PortFrame<T>>();

        let request = PortBindRequest {
            client: ctx.pid(),
            reply,
        };
        if let Err(e) = ctx.send(self.pid, request) {
            ctx.demonitor(monitor);
            return Err(e.into());
        }

        let first = tokio::select! {
            frame = rx.recv() => frame,
            _ = ctx.wait_down(monitor) => return Err(BindError::PeerDisconnected),
            _ = expire(timeout) => {
                ctx.demonitor(monitor);
                return Err(BindError::Timeout);
            }
        };
        ctx.demonitor(monitor);

        match first {
            Some(PortFrame::Ack(BindAck::Ok)) => Ok(Subscription {
                source: Source::Remote(rx),
            }),
            Some(PortFrame::Ack(BindAck::Fail(BindFailure::DuplicateBinding))) => {
                Err(BindError::DuplicateBinding)
            }
            Some(PortFrame::Deliver(_)) | None => {
                tracing::warn!(exchange = ?self.pid, "bind channel did not start with an acknowledgement");
                Err(BindError::PeerDisconnected)
            }
        }
    }
}

async fn expire(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

impl<T: Payload> crate::message::Message for ExchangeRef<T> {
    fn tag() -> Cow<'static, str> {
        Cow::Owned(format!("fanout:exchange<{}>", T::tag()))
    }
}

impl<T> Clone for ExchangeRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ExchangeRef<T> {}

impl<T> PartialEq for ExchangeRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid
    }
}

impl<T> Eq for ExchangeRef<T> {}

impl<T> fmt::Debug for ExchangeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExchangeRef").field(&self.pid).finish()
    }
}

/// The read side of a stream binding.
pub struct Subscription<T> {
    source: Source<T>,
}

enum Source<T> {
    Local(StreamCursor<Message<T>>),
    Remote(ReceivePort<PortFrame<T>>),
}

impl<T: Payload> Subscription<T> {
    /// Wait for the next message.
    ///
    /// A local subscription ends with `None` once the exchange is gone.
    /// A remote one does not notice; monitor the exchange for that.
    pub async fn recv(&mut self) -> Option<Message<T>> {
        match &mut self.source {
            Source::Local(cursor) => cursor.recv().await,
            Source::Remote(port) => loop {
                match port.recv().await? {
                    PortFrame::Deliver(message) => return Some(message),
                    PortFrame::Ack(_) => continue,
                }
            },
        }
    }

    /// Take the next message if one is available.
    pub fn try_recv(&mut self) -> Option<Message<T>> {
        match &mut self.source {
            Source::Local(cursor) => cursor.try_recv(),
            Source::Remote(port) => loop {
                match port.try_recv()? {
                    PortFrame::Deliver(message) => return Some(message),
                    PortFrame::Ack(_) => continue,
                }
            },
        }
    }

    /// Returns `true` if this reads the exchange's queue directly.
    pub fn is_local(&self) -> bool {
        matches!(self.source, Source::Local(_))
    }

    /// The queue cursor behind a local subscription.
    pub fn cursor(&self) -> Option<&StreamCursor<Message<T>>> {
        match &self.source {
            Source::Local(cursor) => Some(cursor),
            Source::Remote(_) => None,
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            Source::Local(_) => "local",
            Source::Remote(_) => "remote",
        };
        f.debug_struct("Subscription").field("source", &kind).finish()
    }
}
