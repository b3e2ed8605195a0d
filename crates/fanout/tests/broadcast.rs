//! Broadcast exchange behaviour on a single node.

mod common;

use common::*;
use fanout::exchange::{BindingInfo, BindingKind, ExchangeError, LocalStreamBindRequest};
use fanout::prelude::*;
use fanout::runtime::LocalReply;
use std::time::Duration;
use tokio::sync::oneshot;

fn start<T: fanout::exchange::Payload>(node: &Node) -> ExchangeRef<T> {
    BroadcastExchange::<T>::start(node, ExchangeConfig::new()).expect("start exchange")
}

/// Publish A, bind X (stream), publish B, bind Y (forward), publish C,
/// terminate X, publish D, then bind from X's old identity again.
#[tokio::test]
async fn test_stream_and_forward_scenario() {
    let (_cluster, node) = single_node();
    let exchange = start::<String>(&node);

    exchange.publish(&node, "A".to_string()).unwrap();
    settle(&node, &exchange).await;

    let mut x = stream_consumer(&node, exchange).await;
    assert!(x.is_quiet());

    exchange.publish(&node, "B".to_string()).unwrap();
    assert_eq!(x.next().await, "B");

    let mut y = forward_consumer(&node, exchange, &node).await;
    exchange.publish(&node, "C".to_string()).unwrap();
    assert_eq!(y.next().await, "C");
    assert_eq!(x.next().await, "C");

    node.exit(x.pid, ExitReason::Killed).unwrap();
    exchange.publish(&node, "D".to_string()).unwrap();
    assert_eq!(y.next().await, "D");

    let rows = exchange.bindings(&node, WAIT).await.unwrap();
    assert_eq!(
        rows,
        vec![BindingInfo {
            client: y.pid,
            kind: BindingKind::Forward
        }]
    );

    // X's old identity binds as new: it gets a cursor, not a refusal, and
    // the cursor starts after D.
    let (reply, rx) = LocalReply::channel();
    node.send_local(
        exchange.pid(),
        LocalStreamBindRequest::<String> {
            client: x.pid,
            reply,
        },
    )
    .unwrap();
    let fresh = rx.recv().await.unwrap().expect("fresh bind");
    assert_eq!(fresh.try_recv(), None);
    exchange.publish(&node, "E".to_string()).unwrap();
    settle(&node, &exchange).await;
    assert_eq!(fresh.try_recv().map(|m| m.payload).as_deref(), Some("E"));
}

#[tokio::test]
async fn test_consumer_sees_messages_in_order_once() {
    let (_cluster, node) = single_node();
    let exchange = start::<u64>(&node);
    let mut consumer = stream_consumer(&node, exchange).await;

    for i in 0..200 {
        exchange.publish(&node, i).unwrap();
    }

    assert_eq!(consumer.take(200).await, (0..200).collect::<Vec<_>>());
    settle(&node, &exchange).await;
    assert!(consumer.is_quiet());
}

#[tokio::test]
async fn test_every_binding_sees_every_message() {
    let (_cluster, node) = single_node();
    let exchange = start::<u64>(&node);

    let mut consumers = Vec::new();
    for _ in 0..3 {
        consumers.push(stream_consumer(&node, exchange).await);
        consumers.push(forward_consumer(&node, exchange, &node).await);
    }

    for i in 0..50 {
        exchange.publish(&node, i).unwrap();
    }

    for consumer in &mut consumers {
        assert_eq!(consumer.take(50).await, (0..50).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_repeated_local_bind_shares_cursor() {
    let (_cluster, node) = single_node();
    let exchange = start::<u64>(&node);
    let (tx, rx) = oneshot::channel();

    node.spawn(move |mut ctx| async move {
        let first = exchange.bind(&mut ctx).await;
        let second = exchange.bind(&mut ctx).await;
        let _ = tx.send((first, second));
        std::future::pending::<()>().await;
    });

    let (first, second) = rx.await.unwrap();
    let (mut first, mut second) = (first.unwrap(), second.unwrap());
    assert!(first.is_local() && second.is_local());
    assert!(first.cursor().unwrap().same_position(second.cursor().unwrap()));

    exchange.publish(&node, 1).unwrap();
    exchange.publish(&node, 2).unwrap();
    assert_eq!(second.recv().await.unwrap().payload, 1);
    assert_eq!(first.recv().await.unwrap().payload, 2);
    assert_eq!(exchange.bindings(&node, WAIT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stream_bind_after_forward_bind_is_refused() {
    let (_cluster, node) = single_node();
    let exchange = start::<u64>(&node);
    let (tx, rx) = oneshot::channel();

    node.spawn(move |mut ctx| async move {
        let _ = exchange.bind_forward(&ctx);
        let _ = tx.send(exchange.bind(&mut ctx).await.map(|_| ()));
    });

    assert!(matches!(rx.await.unwrap(), Err(BindError::DuplicateBinding)));
}

#[tokio::test]
async fn test_late_joiner_sees_no_replay() {
    let (_cluster, node) = single_node();
    let exchange = start::<u64>(&node);

    exchange.publish(&node, 1).unwrap();
    let mut early = stream_consumer(&node, exchange).await;
    exchange.publish(&node, 2).unwrap();
    let mut late = stream_consumer(&node, exchange).await;
    exchange.publish(&node, 3).unwrap();

    assert_eq!(early.take(2).await, vec![2, 3]);
    assert_eq!(late.next().await, 3);
}

#[tokio::test]
async fn test_named_exchange() {
    let (_cluster, node) = single_node();
    let exchange =
        BroadcastExchange::<u64>::start(&node, ExchangeConfig::new().name("ticks")).unwrap();

    assert_eq!(ExchangeRef::<u64>::whereis(&node, "ticks"), Some(exchange));
    assert!(matches!(
        BroadcastExchange::<u64>::start(&node, ExchangeConfig::new().name("ticks")),
        Err(ExchangeError::Start(_))
    ));

    node.exit(exchange.pid(), ExitReason::Shutdown).unwrap();
    assert_eq!(ExchangeRef::<u64>::whereis(&node, "ticks"), None);
}

#[tokio::test]
async fn test_bind_to_dead_exchange() {
    let (_cluster, node) = single_node();
    let exchange = start::<u64>(&node);
    node.exit(exchange.pid(), ExitReason::Killed).unwrap();

    let (tx, rx) = oneshot::channel();
    node.spawn(move |mut ctx| async move {
        let _ = tx.send(exchange.bind(&mut ctx).await.map(|_| ()));
    });

    assert!(matches!(rx.await.unwrap(), Err(BindError::PeerDisconnected)));
}

#[tokio::test]
async fn test_bind_timeout() {
    let (_cluster, node) = single_node();

    // Holds on to every request without answering.
    let silent = node.spawn(|mut ctx| async move {
        let mut held = Vec::new();
        while let Some(envelope) = ctx.recv().await {
            held.push(envelope);
        }
    });
    let exchange = ExchangeRef::<u64>::from_pid(silent);

    let (tx, rx) = oneshot::channel();
    node.spawn(move |mut ctx| async move {
        let result = exchange
            .bind_timeout(&mut ctx, Duration::from_millis(50))
            .await;
        let _ = tx.send(result.map(|_| ()));
    });

    assert!(matches!(rx.await.unwrap(), Err(BindError::Timeout)));
}

#[tokio::test]
async fn test_subscription_ends_with_exchange() {
    let (_cluster, node) = single_node();
    let exchange = start::<u64>(&node);
    let mut consumer = stream_consumer(&node, exchange).await;

    exchange.publish(&node, 7).unwrap();
    assert_eq!(consumer.next().await, 7);
    node.exit(exchange.pid(), ExitReason::Shutdown).unwrap();

    let end = tokio::time::timeout(WAIT, consumer.seen.recv()).await.unwrap();
    assert_eq!(end, None);
}

#[tokio::test]
async fn test_message_metadata_reaches_stream_consumers() {
    let (_cluster, node) = single_node();
    let exchange = start::<u64>(&node);
    let (tx, rx) = oneshot::channel();
    let (bound_tx, bound_rx) = oneshot::channel();

    node.spawn(move |mut ctx| async move {
        let Ok(mut sub) = exchange.bind(&mut ctx).await else {
            return;
        };
        let _ = bound_tx.send(());
        let _ = tx.send(sub.recv().await);
    });
    bound_rx.await.unwrap();

    exchange
        .publish(
            &node,
            Message::new(1).with_key("orders").with_header("origin", "test"),
        )
        .unwrap();

    let msg = rx.await.unwrap().unwrap();
    assert_eq!(msg.key, "orders");
    assert_eq!(msg.header("origin"), Some("test"));
}
