//! Distribution layer.
//!
//! A [`Cluster`] connects nodes living in the same OS process. Every frame
//! between two nodes goes through the same path a socket transport would:
//! the [`DistMessage`] is encoded with the cluster's [`Protocol`], framed,
//! parsed back and dispatched on the receiving node. Payloads that cross
//! this boundary therefore always exist in their encoded form.
//!
//! # Example
//!
//! ```ignore
//! let cluster = Cluster::new();
//! let a = cluster.node(NodeConfig::new("a"))?;
//! let b = cluster.node(NodeConfig::new("b"))?;
//!
//! // A pid on `b` is reachable from `a`.
//! a.send(pid_on_b, 42u64)?;
//!
//! // Monitors held on `b`'s processes fire with `NoConnection`.
//! cluster.remove(b.id());
//! ```

mod protocol;

pub use protocol::{DistError, DistMessage, PostcardProtocol, Protocol};

use crate::core::NodeId;
use crate::runtime::node::NodeInner;
use crate::runtime::{Node, NodeConfig, RuntimeError};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// A set of connected nodes. Cheap to clone.
#[derive(Clone, Default)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

#[derive(Default)]
struct ClusterInner {
    nodes: DashMap<NodeId, Weak<NodeInner>>,
    next_id: AtomicU32,
    protocol: PostcardProtocol,
}

impl Cluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a node in this cluster.
    pub fn node(&self, config: NodeConfig) -> Result<Node, RuntimeError> {
        Node::new(self, config)
    }

    /// Ids of all member nodes.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.inner.nodes.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Disconnect a node.
    ///
    /// Every remaining member is told the node is gone, so monitors on its
    /// processes fire with `NoConnection`. Frames addressed to it fail with
    /// [`DistError::UnknownNode`] from then on.
    pub fn remove(&self, id: NodeId) {
        if self.inner.nodes.remove(&id).is_none() {
            return;
        }
        tracing::debug!(node = %id, "node left cluster");

        let peers: Vec<Arc<NodeInner>> = self
            .inner
            .nodes
            .iter()
            .filter_map(|e| e.value().upgrade())
            .collect();
        for peer in peers {
            peer.node_down(id);
        }
    }

    pub(crate) fn allocate_id(&self) -> NodeId {
        NodeId::from_raw(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn join(&self, id: NodeId, node: Weak<NodeInner>) {
        self.inner.nodes.insert(id, node);
    }

    /// Carry one frame from `from` to `to`.
    pub(crate) fn route(&self, from: NodeId, to: NodeId, msg: &DistMessage) -> Result<(), DistError> {
        let peer = self
            .inner
            .nodes
            .get(&to)
            .and_then(|node| node.upgrade())
            .ok_or(DistError::UnknownNode(to))?;

        let protocol = &self.inner.protocol;
        let frame = protocol.frame(protocol.encode(msg)?);
        let (decoded, consumed) = protocol
            .parse_frame(&frame)?
            .ok_or(DistError::IncompleteFrame)?;
        if consumed != frame.len() {
            return Err(DistError::IncompleteFrame);
        }

        tracing::trace!(from = %from, to = %to, bytes = frame.len(), "frame routed");
        peer.handle_dist(from, decoded);
        Ok(())
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExitReason, Pid};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_send_across_nodes() {
        let cluster = Cluster::new();
        let a = cluster.node(NodeConfig::new("a")).unwrap();
        let b = cluster.node(NodeConfig::new("b")).unwrap();
        assert_eq!(cluster.nodes(), vec![a.id(), b.id()]);

        let (tx, rx) = oneshot::channel();
        let pid = b.spawn(move |mut ctx| async move {
            let _ = tx.send(ctx.receive::<String>().await);
        });

        a.send(pid, "over the wire".to_string()).unwrap();
        assert_eq!(rx.await.unwrap().as_deref(), Some("over the wire"));
    }

    #[tokio::test]
    async fn test_send_to_unknown_node() {
        let cluster = Cluster::new();
        let a = cluster.node(NodeConfig::new("a")).unwrap();
        let nowhere = Pid::new(NodeId::from_raw(99), 1);

        assert!(a.send(nowhere, 1u64).is_err());
    }

    #[tokio::test]
    async fn test_remote_monitor_fires_on_exit() {
        let cluster = Cluster::new();
        let a = cluster.node(NodeConfig::new("a")).unwrap();
        let b = cluster.node(NodeConfig::new("b")).unwrap();

        let target = b.spawn(|mut ctx| async move {
            let _ = ctx.recv().await;
        });

        let (tx, rx) = oneshot::channel();
        a.spawn(move |mut ctx| async move {
            let reference = ctx.monitor(target);
            let _ = tx.send(ctx.wait_down(reference).await);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        b.exit(target, ExitReason::error("gone")).unwrap();

        let down = rx.await.unwrap().unwrap();
        assert_eq!(down.pid, target);
        assert_eq!(down.reason, ExitReason::error("gone"));
    }

    #[tokio::test]
    async fn test_remove_node_is_noconnection() {
        let cluster = Cluster::new();
        let a = cluster.node(NodeConfig::new("a")).unwrap();
        let b = cluster.node(NodeConfig::new("b")).unwrap();

        let target = b.spawn(|mut ctx| async move {
            let _ = ctx.recv().await;
        });

        let (tx, rx) = oneshot::channel();
        a.spawn(move |mut ctx| async move {
            let reference = ctx.monitor(target);
            let _ = tx.send(ctx.wait_down(reference).await);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cluster.remove(b.id());

        let down = rx.await.unwrap().unwrap();
        assert_eq!(down.reason, ExitReason::NoConnection);
        assert_eq!(cluster.nodes(), vec![a.id()]);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_remote_watchers() {
        let cluster = Cluster::new();
        let a = cluster.node(NodeConfig::new("a")).unwrap();
        let b = cluster.node(NodeConfig::new("b")).unwrap();

        let target = b.spawn(|mut ctx| async move {
            let _ = ctx.recv().await;
        });

        let (tx, rx) = oneshot::channel();
        a.spawn(move |mut ctx| async move {
            let reference = ctx.monitor(target);
            let _ = tx.send(ctx.wait_down(reference).await);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        b.shutdown();

        assert_eq!(rx.await.unwrap().unwrap().reason, ExitReason::Shutdown);
        assert!(!b.alive(target));
        assert_eq!(cluster.nodes(), vec![a.id()]);
    }

    #[tokio::test]
    async fn test_monitor_on_removed_node_is_immediate() {
        let cluster = Cluster::new();
        let a = cluster.node(NodeConfig::new("a")).unwrap();
        let b = cluster.node(NodeConfig::new("b")).unwrap();
        let target = b.spawn(|mut ctx| async move {
            let _ = ctx.recv().await;
        });
        cluster.remove(b.id());

        let (tx, rx) = oneshot::channel();
        a.spawn(move |mut ctx| async move {
            let reference = ctx.monitor(target);
            let _ = tx.send(ctx.wait_down(reference).await);
        });

        assert_eq!(
            rx.await.unwrap().unwrap().reason,
            ExitReason::NoConnection
        );
    }
}
