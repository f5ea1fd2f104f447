use super::*;
use std::{sync::Arc, time::Duration};

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::protocol::DEFAULT_SUBPROTOCOL;
use tokio::net::TcpListener;

use crate::channel::CommandChannel;

async fn echo_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.protocols([DEFAULT_SUBPROTOCOL])
        .on_upgrade(echo_socket)
}

async fn echo_socket(mut socket: WebSocket) {
    if socket
        .send(WsMessage::Text("log(ready)".into()))
        .await
        .is_err()
    {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let WsMessage::Text(text) = message {
            if socket.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    }
}

async fn spawn_echo_server() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new().route("/ws", get(echo_handler));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("ws://{addr}/ws"))
}

async fn next_event(link: &mut TransportLink) -> TransportEvent {
    for _ in 0..300 {
        if let Some(event) = link.try_next_event() {
            return event;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no transport event within 3s");
}

#[tokio::test]
async fn websocket_link_opens_and_relays_text() {
    let url = spawn_echo_server().await.expect("server");
    let mut link = WebSocketConnector.open(&url, DEFAULT_SUBPROTOCOL);

    assert_eq!(next_event(&mut link).await, TransportEvent::Opened);
    assert_eq!(
        next_event(&mut link).await,
        TransportEvent::Text("log(ready)".into())
    );

    link.send("cmd(0, halt())".into()).expect("send");
    assert_eq!(
        next_event(&mut link).await,
        TransportEvent::Text("cmd(0, halt())".into())
    );
}

#[tokio::test]
async fn unreachable_rover_closes_with_reason() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let mut link = WebSocketConnector.open(&format!("ws://{addr}/ws"), DEFAULT_SUBPROTOCOL);
    match next_event(&mut link).await {
        TransportEvent::Closed { reason: Some(reason) } => {
            assert!(reason.contains("failed to connect"), "{reason}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(link.try_next_event(), None);
}

#[test]
fn opening_outside_a_runtime_closes_immediately() {
    let mut link = WebSocketConnector.open("ws://127.0.0.1:9/ws", DEFAULT_SUBPROTOCOL);
    match link.try_next_event() {
        Some(TransportEvent::Closed { reason: Some(reason) }) => {
            assert!(reason.contains("runtime"), "{reason}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn command_channel_is_acknowledged_over_websocket() {
    let url = spawn_echo_server().await.expect("server");
    let mut channel = CommandChannel::new(Arc::new(WebSocketConnector), url, DEFAULT_SUBPROTOCOL);
    channel.start();

    for _ in 0..300 {
        channel.poll();
        if channel.is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(channel.is_ready());
    assert!(channel.send_command("cmd(0, resetPose())", false));

    for _ in 0..300 {
        channel.poll();
        if !channel.is_sending() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!channel.is_sending());
    assert!(!channel.has_error());
}
