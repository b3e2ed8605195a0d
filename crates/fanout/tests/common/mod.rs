//! Shared helpers for integration tests.

#![allow(dead_code)]

use fanout::prelude::*;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How long a test waits for anything before giving up.
pub const WAIT: Duration = Duration::from_secs(2);

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a single-node cluster.
pub fn single_node() -> (Cluster, Node) {
    init_tracing();
    let cluster = Cluster::new();
    let node = cluster.node(NodeConfig::new("solo")).expect("node");
    (cluster, node)
}

/// Start a two-node cluster.
pub fn two_nodes() -> (Cluster, Node, Node) {
    init_tracing();
    let cluster = Cluster::new();
    let a = cluster.node(NodeConfig::new("a")).expect("node a");
    let b = cluster.node(NodeConfig::new("b")).expect("node b");
    (cluster, a, b)
}

/// A consumer process and the payloads it has observed.
pub struct Consumer<T> {
    pub pid: Pid,
    pub seen: mpsc::UnboundedReceiver<T>,
}

impl<T> Consumer<T> {
    /// Next observed payload, failing the test after [`WAIT`].
    pub async fn next(&mut self) -> T {
        tokio::time::timeout(WAIT, self.seen.recv())
            .await
            .expect("consumer timed out")
            .expect("consumer stopped")
    }

    /// Collect exactly `n` payloads.
    pub async fn take(&mut self, n: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.next().await);
        }
        out
    }

    /// Returns `true` if nothing further has been observed.
    pub fn is_quiet(&mut self) -> bool {
        self.seen.try_recv().is_err()
    }
}

/// Spawn a process on `node` that stream-binds to `exchange` and reports
/// every payload it reads. Returns once the bind has completed.
pub async fn stream_consumer<T>(node: &Node, exchange: ExchangeRef<T>) -> Consumer<T>
where
    T: fanout::exchange::Payload,
{
    let (bound_tx, bound_rx) = oneshot::channel();
    let (seen_tx, seen) = mpsc::unbounded_channel();

    let pid = node.spawn(move |mut ctx| async move {
        let mut sub = match exchange.bind(&mut ctx).await {
            Ok(sub) => sub,
            Err(e) => panic!("bind failed: {e}"),
        };
        let _ = bound_tx.send(());
        while let Some(msg) = sub.recv().await {
            if seen_tx.send(msg.payload).is_err() {
                break;
            }
        }
    });

    tokio::time::timeout(WAIT, bound_rx)
        .await
        .expect("bind timed out")
        .expect("consumer died while binding");
    Consumer { pid, seen }
}

/// Spawn a process on `node` that forward-binds to `exchange` and reports
/// every payload that reaches its mailbox. Returns once the exchange has
/// processed the bind.
pub async fn forward_consumer<T>(
    node: &Node,
    exchange: ExchangeRef<T>,
    exchange_node: &Node,
) -> Consumer<T>
where
    T: fanout::exchange::Payload,
{
    let (bound_tx, bound_rx) = oneshot::channel();
    let (seen_tx, seen) = mpsc::unbounded_channel();

    let pid = node.spawn(move |mut ctx| async move {
        if exchange.bind_forward(&ctx).is_err() {
            return;
        }
        let _ = bound_tx.send(());
        while let Some(payload) = ctx.receive::<T>().await {
            if seen_tx.send(payload).is_err() {
                break;
            }
        }
    });

    tokio::time::timeout(WAIT, bound_rx)
        .await
        .expect("bind timed out")
        .expect("consumer died while binding");
    settle(exchange_node, &exchange).await;
    Consumer { pid, seen }
}

/// Wait until the exchange has processed everything sent to it so far.
pub async fn settle<T: fanout::exchange::Payload>(node: &Node, exchange: &ExchangeRef<T>) {
    exchange
        .bindings(node, WAIT)
        .await
        .expect("exchange did not answer");
}
