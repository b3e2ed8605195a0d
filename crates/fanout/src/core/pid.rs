//! Process, node and reference identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for generating unique references.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies one runtime instance within a cluster.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a node id from its raw value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value of this node id.
    #[inline]
    pub const fn as_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// A process identifier.
///
/// Pids are unique across the cluster: the owning node plus a serial that
/// the node never reuses. Two pids compare equal only if they name the same
/// process incarnation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid {
    node: NodeId,
    serial: u64,
}

impl Pid {
    /// Creates a pid from its parts.
    pub const fn new(node: NodeId, serial: u64) -> Self {
        Self { node, serial }
    }

    /// The node that owns this process.
    #[inline]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// The node-local serial number.
    #[inline]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// Returns `true` if this process lives on `node`.
    #[inline]
    pub fn is_local_to(&self, node: NodeId) -> bool {
        self.node == node
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}>", self.node.0, self.serial)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A unique reference, used to correlate monitors with their notifications.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref(u64);

impl Ref {
    /// Creates a new unique reference.
    pub fn new() -> Self {
        Self(REF_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuilds a reference from its raw value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value of this reference.
    #[inline]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl Default for Ref {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#Ref<{}>", self.0)
    }
}
