//! Process context.
//!
//! Each spawned process receives a [`Context`]: its own pid, a handle to the
//! node it runs on and its mailbox. Receiving is selective; entries that do
//! not match what the process asked for are stashed and handed out again,
//! in arrival order, by later receives.

use super::envelope::{Down, Envelope};
use super::error::SendError;
use super::node::Node;
use crate::core::{Pid, Ref};
use crate::message::Message;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

/// Per-process handle to the mailbox and the owning node.
pub struct Context {
    pid: Pid,
    node: Node,
    mailbox: mpsc::UnboundedReceiver<Envelope>,
    stash: VecDeque<Envelope>,
}

impl Context {
    pub(crate) fn new(pid: Pid, node: Node, mailbox: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            pid,
            node,
            mailbox,
            stash: VecDeque::new(),
        }
    }

    /// This process's pid.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The node this process runs on.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Take the next mailbox entry, whatever it is.
    ///
    /// Returns `None` once the process has been terminated.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if let Some(envelope) = self.stash.pop_front() {
            return Some(envelope);
        }
        self.mailbox.recv().await
    }

    /// Take the next entry if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.stash
            .pop_front()
            .or_else(|| self.mailbox.try_recv().ok())
    }

    /// Like [`Context::recv`], giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Wait for the next message of type `M`, stashing everything else.
    pub async fn receive<M: Message>(&mut self) -> Option<M> {
        if let Some(msg) = self.take_stashed(|env| env.decode::<M>()) {
            return Some(msg);
        }
        loop {
            let envelope = self.mailbox.recv().await?;
            match envelope.decode::<M>() {
                Ok(msg) => return Some(msg),
                Err(other) => self.stash.push_back(other),
            }
        }
    }

    /// Like [`Context::receive`], giving up after `timeout`.
    pub async fn receive_timeout<M: Message>(&mut self, timeout: Duration) -> Option<M> {
        tokio::time::timeout(timeout, self.receive::<M>())
            .await
            .ok()
            .flatten()
    }

    /// Send a message from this process.
    pub fn send<M: Message>(&self, to: Pid, msg: M) -> Result<(), SendError> {
        self.node.send(to, msg)
    }

    /// Monitor `target`; the notification arrives in this mailbox.
    pub fn monitor(&self, target: Pid) -> Ref {
        self.node.monitor(self.pid, target)
    }

    /// Remove a monitor and discard its notification if it already arrived.
    pub fn demonitor(&mut self, reference: Ref) {
        self.node.demonitor(reference);
        while let Ok(envelope) = self.mailbox.try_recv() {
            self.stash.push_back(envelope);
        }
        self.stash.retain(|env| !env.is_down_for(reference));
    }

    /// Wait for the `Down` carrying `reference`, stashing everything else.
    ///
    /// Cancel safe: nothing is held across the await.
    pub(crate) async fn wait_down(&mut self, reference: Ref) -> Option<Down> {
        let found = self.take_stashed(|env| {
            if env.is_down_for(reference) {
                env.into_down()
            } else {
                Err(env)
            }
        });
        if found.is_some() {
            return found;
        }
        loop {
            let envelope = self.mailbox.recv().await?;
            if envelope.is_down_for(reference) {
                return envelope.into_down().ok();
            }
            self.stash.push_back(envelope);
        }
    }

    fn take_stashed<T>(&mut self, mut matcher: impl FnMut(Envelope) -> Result<T, Envelope>) -> Option<T> {
        let mut found = None;
        let mut rest = VecDeque::with_capacity(self.stash.len());
        while let Some(envelope) = self.stash.pop_front() {
            if found.is_some() {
                rest.push_back(envelope);
                continue;
            }
            match matcher(envelope) {
                Ok(value) => found = Some(value),
                Err(envelope) => rest.push_back(envelope),
            }
        }
        self.stash = rest;
        found
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("pid", &self.pid)
            .field("stashed", &self.stash.len())
            .finish()
    }
}
