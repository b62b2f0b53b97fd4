mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use herald_core::channels::DeliveryMethod;
use herald_db::models::analytics::AttemptKey;
use herald_events::NotificationExtra;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{eventually, spawn_server, test_config, test_state, test_state_with};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, user_id: i64) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws?user_id={user_id}"))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, message: Value) {
    client.send(Message::Text(message.to_string())).await.unwrap();
}

/// Next JSON text frame, skipping pings.
async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn ping_action_gets_pong() {
    let (state, _workers, _cancel) = test_state();
    let addr = spawn_server(state).await;
    let mut client = connect(addr, 1).await;

    send(&mut client, json!({"action": "ping"})).await;
    assert_eq!(next_json(&mut client).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn connection_is_registered_and_removed() {
    let (state, _workers, _cancel) = test_state();
    let registry = state.registry.clone();
    let addr = spawn_server(state).await;

    let mut client = connect(addr, 7).await;
    assert!(eventually(|| registry.is_user_connected(7)).await);

    client.close(None).await.unwrap();
    assert!(eventually(|| !registry.is_user_connected(7)).await);
    assert_eq!(registry.active_connection_count(), 0);
}

#[tokio::test]
async fn notification_reaches_the_socket_and_ack_advances_the_funnel() {
    let (state, _workers, _cancel) = test_state();
    let registry = state.registry.clone();
    let dispatcher = state.dispatcher.clone();
    let addr = spawn_server(state).await;

    let mut client = connect(addr, 1).await;
    assert!(eventually(|| registry.is_user_connected(1)).await);

    let notification = dispatcher
        .notify(1, "system", "Maintenance", "Tonight at 02:00", NotificationExtra::default())
        .await
        .unwrap();

    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["channel"], "notifications");
    assert_eq!(frame["notification_id"], notification.id);
    assert_eq!(frame["title"], "Maintenance");

    send(
        &mut client,
        json!({"action": "ack", "notification_id": notification.id, "event": "delivered"}),
    )
    .await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "ack");
    assert_eq!(reply["result"], "applied");

    let key = AttemptKey {
        notification_id: notification.id,
        user_id: 1,
        method: DeliveryMethod::InApp,
    };
    let row = dispatcher.tracker().get(&key).await.unwrap().unwrap();
    assert_eq!(row.status, "delivered");
}

#[tokio::test]
async fn subscribed_socket_receives_channel_broadcasts() {
    let (state, _workers, _cancel) = test_state();
    let broadcaster = state.broadcaster.clone();
    let addr = spawn_server(state).await;

    let mut subscriber = connect(addr, 1).await;
    let mut other = connect(addr, 2).await;

    send(&mut subscriber, json!({"action": "subscribe", "channel": "payments"})).await;
    assert_eq!(next_json(&mut subscriber).await["type"], "subscribed");

    let reached = broadcaster.broadcast("payments", "payment", json!({"event": "completed"}));
    assert_eq!(reached, 1);

    let frame = next_json(&mut subscriber).await;
    assert_eq!(frame["type"], "payment");
    assert_eq!(frame["event"], "completed");

    // The unsubscribed client only hears its own pong.
    send(&mut other, json!({"action": "ping"})).await;
    assert_eq!(next_json(&mut other).await["type"], "pong");
}

/// Wait for the server to close the socket: a close frame, an error or the
/// end of the stream.
async fn closed_by_server(client: &mut Client) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(frame) = client.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => return true,
                Ok(_) => continue,
            }
        }
        true
    })
    .await
    .unwrap_or(false)
}

#[tokio::test]
async fn slow_consumer_is_pruned_and_closed() {
    let mut config = test_config();
    config.registry.outbound_buffer = 1;
    let (state, _workers, _cancel) = test_state_with(config);
    let registry = state.registry.clone();
    let addr = spawn_server(state).await;

    let mut client = connect(addr, 5).await;
    assert!(eventually(|| registry.is_user_connected(5)).await);

    // No await in between: the sender task cannot drain the queue, so the
    // second frame finds it full.
    assert!(registry.send_to_user(5, &json!({"seq": 1})));
    assert!(!registry.send_to_user(5, &json!({"seq": 2})));
    assert!(!registry.is_user_connected(5));

    assert!(closed_by_server(&mut client).await);
}

#[tokio::test]
async fn shutdown_closes_every_socket() {
    let (state, _workers, _cancel) = test_state();
    let registry = state.registry.clone();
    let addr = spawn_server(state).await;

    let mut client = connect(addr, 3).await;
    assert!(eventually(|| registry.is_user_connected(3)).await);

    assert_eq!(registry.shutdown_all(), 1);
    assert!(closed_by_server(&mut client).await);
}
