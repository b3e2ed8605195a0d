//! Runtime instances.
//!
//! A [`Node`] owns a table of processes, a table of open ports and a name
//! registry. Processes on the same node exchange values without encoding;
//! anything addressed to another node is encoded and handed to the
//! [`Cluster`] the node joined.

use super::context::Context;
use super::envelope::{Down, Envelope};
use super::error::{RuntimeError, SendError};
use super::port::{PortId, PortSink, PushError, ReceivePort, SendPort, TypedSink};
use crate::core::{ExitReason, NodeId, Pid, Ref};
use crate::distribution::{Cluster, DistMessage};
use crate::message::Message;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError};

/// Configuration for a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Human readable node name, used in logs.
    pub name: String,
}

impl NodeConfig {
    /// Create a configuration with the given node name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new("nonode")
    }
}

struct ProcessEntry {
    tx: mpsc::UnboundedSender<Envelope>,
    /// Processes watching this one, with the reference each was given.
    monitors: Vec<(Ref, Pid)>,
    abort: Option<AbortHandle>,
}

pub(crate) struct NodeInner {
    id: NodeId,
    name: String,
    cluster: Cluster,
    rt: tokio::runtime::Handle,
    next_serial: AtomicU64,
    processes: DashMap<u64, ProcessEntry>,
    ports: DashMap<u64, Box<dyn PortSink>>,
    names: DashMap<String, Pid>,
    /// Monitors local processes hold on remote targets: reference -> (watcher, target).
    remote_watches: DashMap<Ref, (Pid, Pid)>,
}

/// A runtime instance. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Start a node and join it to `cluster`.
    ///
    /// Must be called from within a tokio runtime; processes are spawned on it.
    pub fn new(cluster: &Cluster, config: NodeConfig) -> Result<Node, RuntimeError> {
        let rt = tokio::runtime::Handle::try_current().map_err(|_| RuntimeError::NoRuntime)?;
        let id = cluster.allocate_id();

        let inner = Arc::new(NodeInner {
            id,
            name: config.name,
            cluster: cluster.clone(),
            rt,
            next_serial: AtomicU64::new(1),
            processes: DashMap::new(),
            ports: DashMap::new(),
            names: DashMap::new(),
            remote_watches: DashMap::new(),
        });

        cluster.join(id, Arc::downgrade(&inner));
        tracing::debug!(node = %id, name = %inner.name, "node started");

        Ok(Node { inner })
    }

    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// This node's configured name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The cluster this node belongs to.
    pub fn cluster(&self) -> &Cluster {
        &self.inner.cluster
    }

    /// Spawn a process.
    ///
    /// The process runs until the returned future completes (`Normal`),
    /// panics (`Error`), or it is stopped with [`Node::exit`].
    ///
    /// ```ignore
    /// let pid = node.spawn(|mut ctx| async move {
    ///     while let Some(msg) = ctx.receive::<String>().await {
    ///         println!("{}", msg);
    ///     }
    /// });
    /// ```
    pub fn spawn<F, Fut>(&self, f: F) -> Pid
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let pid = Pid::new(self.inner.id, serial);
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner.processes.insert(
            serial,
            ProcessEntry {
                tx,
                monitors: Vec::new(),
                abort: None,
            },
        );

        let task = self.inner.rt.spawn(f(Context::new(pid, self.clone(), rx)));
        if let Some(mut entry) = self.inner.processes.get_mut(&serial) {
            entry.abort = Some(task.abort_handle());
        }

        let node = Arc::downgrade(&self.inner);
        self.inner.rt.spawn(async move {
            let reason = match task.await {
                Ok(()) => ExitReason::Normal,
                Err(e) if e.is_panic() => ExitReason::error(panic_message(e)),
                Err(_) => ExitReason::Killed,
            };
            if let Some(node) = node.upgrade() {
                node.terminate(pid, reason);
            }
        });

        tracing::trace!(pid = ?pid, "process spawned");
        pid
    }

    /// Stop a local process with the given reason.
    pub fn exit(&self, pid: Pid, reason: ExitReason) -> Result<(), RuntimeError> {
        if !pid.is_local_to(self.inner.id) {
            return Err(RuntimeError::NotLocal(pid));
        }
        if self.inner.terminate(pid, reason) {
            Ok(())
        } else {
            Err(RuntimeError::ProcessNotFound(pid))
        }
    }

    /// Returns `true` if `pid` is a live process on this node.
    pub fn alive(&self, pid: Pid) -> bool {
        pid.is_local_to(self.inner.id) && self.inner.processes.contains_key(&pid.serial())
    }

    /// Send a message.
    ///
    /// Same-node targets receive the value as is. Remote targets receive the
    /// encoded form; encoding errors are returned, never swallowed.
    pub fn send<M: Message>(&self, to: Pid, msg: M) -> Result<(), SendError> {
        if to.is_local_to(self.inner.id) {
            self.inner.deliver(to, Envelope::Local(Box::new(msg)))
        } else {
            let payload = msg.encode()?;
            self.inner.route(to.node(), &DistMessage::Send { to, payload })
        }
    }

    /// Send a value that has no wire form.
    ///
    /// Fails with [`SendError::NotLocal`] if `to` lives on another node.
    pub fn send_local<V: Any + Send>(&self, to: Pid, value: V) -> Result<(), SendError> {
        if !to.is_local_to(self.inner.id) {
            return Err(SendError::NotLocal(to));
        }
        self.inner.deliver(to, Envelope::Local(Box::new(value)))
    }

    /// Send an already encoded message.
    pub(crate) fn send_encoded(&self, to: Pid, payload: Vec<u8>) -> Result<(), SendError> {
        if to.is_local_to(self.inner.id) {
            self.inner.deliver(to, Envelope::Remote(payload))
        } else {
            self.inner.route(to.node(), &DistMessage::Send { to, payload })
        }
    }

    /// Open a port owned by this node.
    pub fn new_port<M: Message>(&self) -> (SendPort<M>, ReceivePort<M>) {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.ports.insert(serial, Box::new(TypedSink { tx }));

        let id = PortId {
            node: self.inner.id,
            serial,
        };
        (
            SendPort::new(id),
            ReceivePort::new(id, rx, Arc::downgrade(&self.inner)),
        )
    }

    /// Send on a port. Encodes only if the port lives on another node.
    pub fn send_port<M: Message>(&self, port: &SendPort<M>, msg: M) -> Result<(), SendError> {
        let id = port.id();
        if id.node == self.inner.id {
            self.inner
                .push_port(id, |sink| sink.push_local(Box::new(msg)))
        } else {
            let payload = msg.encode()?;
            self.inner.route(id.node, &DistMessage::PortSend { port: id, payload })
        }
    }

    /// Send already encoded bytes on a port.
    pub(crate) fn send_port_encoded(&self, port: PortId, payload: Vec<u8>) -> Result<(), SendError> {
        if port.node == self.inner.id {
            self.inner.push_port(port, |sink| sink.push_encoded(&payload))
        } else {
            self.inner.route(port.node, &DistMessage::PortSend { port, payload })
        }
    }

    /// Monitor `target` on behalf of `watcher`.
    ///
    /// When `target` terminates, `watcher` receives [`Envelope::Down`] carrying
    /// the returned reference. A target that is already gone produces the
    /// notification immediately, with [`ExitReason::NoProc`].
    pub fn monitor(&self, watcher: Pid, target: Pid) -> Ref {
        self.inner.monitor(watcher, target)
    }

    /// Remove a monitor. A notification already delivered is not recalled.
    pub fn demonitor(&self, reference: Ref) {
        self.inner.demonitor(reference)
    }

    /// Register a name for a live local process.
    pub fn register(&self, name: impl Into<String>, pid: Pid) -> Result<(), RuntimeError> {
        if !self.alive(pid) {
            return Err(RuntimeError::ProcessNotFound(pid));
        }
        match self.inner.names.entry(name.into()) {
            Entry::Occupied(e) => Err(RuntimeError::NameTaken(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(pid);
                Ok(())
            }
        }
    }

    /// Remove a registered name.
    pub fn unregister(&self, name: &str) -> Option<Pid> {
        self.inner.names.remove(name).map(|(_, pid)| pid)
    }

    /// Look up a registered name.
    pub fn whereis(&self, name: &str) -> Option<Pid> {
        self.inner.names.get(name).map(|pid| *pid)
    }

    /// Stop every process on this node and leave the cluster.
    pub fn shutdown(&self) {
        let pids: Vec<Pid> = self
            .inner
            .processes
            .iter()
            .map(|entry| Pid::new(self.inner.id, *entry.key()))
            .collect();

        for pid in pids {
            self.inner.terminate(pid, ExitReason::Shutdown);
        }

        self.inner.cluster.remove(self.inner.id);
        tracing::debug!(node = %self.inner.id, name = %self.inner.name, "node shut down");
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl NodeInner {
    fn deliver(&self, pid: Pid, envelope: Envelope) -> Result<(), SendError> {
        let tx = self
            .processes
            .get(&pid.serial())
            .map(|entry| entry.tx.clone())
            .ok_or(SendError::ProcessNotFound(pid))?;
        tx.send(envelope).map_err(|_| SendError::ProcessNotFound(pid))
    }

    fn route(&self, to: NodeId, msg: &DistMessage) -> Result<(), SendError> {
        self.cluster.route(self.id, to, msg).map_err(SendError::from)
    }

    fn push_port(
        &self,
        port: PortId,
        push: impl FnOnce(&dyn PortSink) -> Result<(), PushError>,
    ) -> Result<(), SendError> {
        let sink = self
            .ports
            .get(&port.serial)
            .ok_or(SendError::PortClosed(port))?;
        push(&**sink.value()).map_err(|e| {
            tracing::trace!(port = ?port, error = %e, "port push failed");
            SendError::PortClosed(port)
        })
    }

    pub(crate) fn close_port(&self, serial: u64) {
        self.ports.remove(&serial);
    }

    fn add_monitor(&self, target: Pid, reference: Ref, watcher: Pid) -> bool {
        match self.processes.get_mut(&target.serial()) {
            Some(mut entry) => {
                entry.monitors.push((reference, watcher));
                true
            }
            None => false,
        }
    }

    fn monitor(&self, watcher: Pid, target: Pid) -> Ref {
        let reference = Ref::new();

        if target.is_local_to(self.id) {
            if !self.add_monitor(target, reference, watcher) {
                self.deliver_down(watcher, reference, target, ExitReason::NoProc);
            }
            return reference;
        }

        self.remote_watches.insert(reference, (watcher, target));
        let request = DistMessage::Monitor {
            watcher,
            target,
            reference,
        };
        if let Err(e) = self.cluster.route(self.id, target.node(), &request) {
            tracing::debug!(target = ?target, error = %e, "remote monitor failed");
            self.remote_watches.remove(&reference);
            self.deliver_down(watcher, reference, target, ExitReason::NoConnection);
        }
        reference
    }

    fn demonitor(&self, reference: Ref) {
        if let Some((_, (_, target))) = self.remote_watches.remove(&reference) {
            let _ = self.cluster.route(
                self.id,
                target.node(),
                &DistMessage::Demonitor { target, reference },
            );
            return;
        }
        for mut entry in self.processes.iter_mut() {
            entry.monitors.retain(|(r, _)| *r != reference);
        }
    }

    fn deliver_down(&self, watcher: Pid, reference: Ref, pid: Pid, reason: ExitReason) {
        let result = if watcher.is_local_to(self.id) {
            self.deliver(
                watcher,
                Envelope::Down(Down {
                    reference,
                    pid,
                    reason,
                }),
            )
        } else {
            self.route(
                watcher.node(),
                &DistMessage::ProcessDown {
                    watcher,
                    reference,
                    pid,
                    reason,
                },
            )
        };
        if let Err(e) = result {
            tracing::trace!(watcher = ?watcher, pid = ?pid, error = %e, "down notification dropped");
        }
    }

    /// Remove a process and notify its watchers. Returns `false` if it was
    /// already gone.
    pub(crate) fn terminate(&self, pid: Pid, reason: ExitReason) -> bool {
        let Some((_, entry)) = self.processes.remove(&pid.serial()) else {
            return false;
        };
        if let Some(abort) = &entry.abort {
            abort.abort();
        }

        self.names.retain(|_, registered| *registered != pid);

        let held: Vec<(Ref, Pid)> = self
            .remote_watches
            .iter()
            .filter(|e| e.value().0 == pid)
            .map(|e| (*e.key(), e.value().1))
            .collect();
        for (reference, target) in held {
            self.remote_watches.remove(&reference);
            let _ = self.cluster.route(
                self.id,
                target.node(),
                &DistMessage::Demonitor { target, reference },
            );
        }

        tracing::debug!(pid = ?pid, reason = %reason, "process terminated");

        for (reference, watcher) in entry.monitors {
            self.deliver_down(watcher, reference, pid, reason.clone());
        }
        true
    }

    /// Handle a frame from another node.
    pub(crate) fn handle_dist(&self, from: NodeId, msg: DistMessage) {
        match msg {
            DistMessage::Send { to, payload } => {
                if let Err(e) = self.deliver(to, Envelope::Remote(payload)) {
                    tracing::trace!(from = %from, to = ?to, error = %e, "remote send dropped");
                }
            }
            DistMessage::PortSend { port, payload } => {
                if let Err(e) = self.push_port(port, |sink| sink.push_encoded(&payload)) {
                    tracing::trace!(from = %from, port = ?port, error = %e, "remote port send dropped");
                }
            }
            DistMessage::Monitor {
                watcher,
                target,
                reference,
            } => {
                if !self.add_monitor(target, reference, watcher) {
                    self.deliver_down(watcher, reference, target, ExitReason::NoProc);
                }
            }
            DistMessage::Demonitor { target, reference } => {
                if let Some(mut entry) = self.processes.get_mut(&target.serial()) {
                    entry.monitors.retain(|(r, _)| *r != reference);
                }
            }
            DistMessage::ProcessDown {
                watcher,
                reference,
                pid,
                reason,
            } => {
                if self.remote_watches.remove(&reference).is_some() {
                    let _ = self.deliver(
                        watcher,
                        Envelope::Down(Down {
                            reference,
                            pid,
                            reason,
                        }),
                    );
                }
            }
        }
    }

    /// A peer left the cluster.
    pub(crate) fn node_down(&self, node: NodeId) {
        let lost: Vec<(Ref, Pid, Pid)> = self
            .remote_watches
            .iter()
            .filter(|e| e.value().1.node() == node)
            .map(|e| (*e.key(), e.value().0, e.value().1))
            .collect();

        for (reference, watcher, target) in lost {
            if self.remote_watches.remove(&reference).is_some() {
                let _ = self.deliver(
                    watcher,
                    Envelope::Down(Down {
                        reference,
                        pid: target,
                        reason: ExitReason::NoConnection,
                    }),
                );
            }
        }

        for mut entry in self.processes.iter_mut() {
            entry.monitors.retain(|(_, watcher)| watcher.node() != node);
        }
    }
}

fn panic_message(e: JoinError) -> String {
    let payload = e.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "process panicked".to_string()
    }
}
