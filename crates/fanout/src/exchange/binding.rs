//! Bindings and the routing table.

use super::protocol::{BindingInfo, BindingKind, Message, PortFrame};
use super::queue::StreamCursor;
use crate::core::{Pid, Ref};
use crate::runtime::SendPort;
use std::collections::HashMap;

/// How the exchange delivers to one consumer.
pub(crate) enum Binding<T> {
    /// Payloads go straight to the client's mailbox.
    Forward,
    /// The client receives a stream of whole messages.
    Stream {
        outbound: Outbound<T>,
        inbound: Inbound<T>,
    },
}

/// Whether the exchange pushes to a stream binding.
pub(crate) enum Outbound<T> {
    /// Push each message on the client's port.
    Push(SendPort<PortFrame<T>>),
    /// The client reads the queue itself.
    None,
}

/// What the client reads a stream binding with.
pub(crate) enum Inbound<T> {
    /// A cursor into the exchange's queue.
    Cursor(StreamCursor<Message<T>>),
    /// The client set up its own channel.
    None,
}

impl<T> Binding<T> {
    pub(crate) fn kind(&self) -> BindingKind {
        match self {
            Binding::Forward => BindingKind::Forward,
            Binding::Stream {
                outbound: Outbound::Push(_),
                ..
            } => BindingKind::Push,
            Binding::Stream {
                outbound: Outbound::None,
                ..
            } => BindingKind::LocalStream,
        }
    }

    /// The cursor handed to a local stream client.
    pub(crate) fn cursor(&self) -> Option<&StreamCursor<Message<T>>> {
        match self {
            Binding::Stream {
                inbound: Inbound::Cursor(cursor),
                ..
            } => Some(cursor),
            _ => None,
        }
    }
}

struct Row<T> {
    binding: Binding<T>,
    monitor: Ref,
}

/// Client identity to binding. Owned by the exchange loop alone.
pub(crate) struct RoutingTable<T> {
    rows: HashMap<Pid, Row<T>>,
}

impl<T> RoutingTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, client: &Pid) -> Option<&Binding<T>> {
        self.rows.get(client).map(|row| &row.binding)
    }

    pub(crate) fn contains(&self, client: &Pid) -> bool {
        self.rows.contains_key(client)
    }

    /// Insert a binding for a client not yet present.
    ///
    /// Callers check [`contains`](Self::contains) first: the monitor must
    /// only be set up for a client that is actually being bound.
    pub(crate) fn insert(&mut self, client: Pid, binding: Binding<T>, monitor: Ref) {
        debug_assert!(!self.rows.contains_key(&client), "client bound twice");
        self.rows.insert(client, Row { binding, monitor });
    }

    /// Remove a client. Returns the monitor reference it was watched with.
    pub(crate) fn remove(&mut self, client: &Pid) -> Option<(Binding<T>, Ref)> {
        self.rows
            .remove(client)
            .map(|row| (row.binding, row.monitor))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Pid, &Binding<T>)> {
        self.rows.iter().map(|(pid, row)| (pid, &row.binding))
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<BindingInfo> {
        let mut rows: Vec<BindingInfo> = self
            .iter()
            .map(|(client, binding)| BindingInfo {
                client: *client,
                kind: binding.kind(),
            })
            .collect();
        rows.sort_by_key(|info| info.client);
        rows
    }
}
