use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};

mod config;
mod firmware;

use config::{load_settings, Settings};
use firmware::Firmware;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = load_settings()?;
    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(
        %addr,
        subprotocol = %settings.subprotocol,
        telemetry_ms = settings.telemetry_ms,
        corrupt_every = settings.corrupt_every,
        "rover sim listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(Arc::new(settings))).await?;
    Ok(())
}

fn build_router(settings: Arc<Settings>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(settings)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(settings): State<Arc<Settings>>) -> impl IntoResponse {
    ws.protocols([settings.subprotocol.clone()])
        .on_upgrade(move |socket| rover_session(settings, socket))
}

/// One operator connection drives one fresh firmware instance.
async fn rover_session(settings: Arc<Settings>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut firmware = Firmware::new(settings.corrupt_every);
    let streaming = settings.telemetry_ms > 0;
    let mut telemetry = tokio::time::interval(Duration::from_millis(settings.telemetry_ms.max(1)));
    let mut last_step = Instant::now();
    info!("rover sim: operator connected");

    'session: loop {
        let replies = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => firmware.handle_frame(&text),
                Some(Ok(Message::Binary(bytes))) => {
                    warn!(len = bytes.len(), "rover sim: ignoring binary frame");
                    Vec::new()
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => Vec::new(),
                Some(Err(err)) => {
                    warn!(error = %err, "rover sim: receive failed");
                    break;
                }
            },
            _ = telemetry.tick(), if streaming => {
                let now = Instant::now();
                let reached = firmware.step(now.duration_since(last_step).as_secs_f64());
                last_step = now;
                reached.into_iter().chain([firmware.telemetry()]).collect()
            }
        };

        for reply in replies {
            if sender.send(Message::Text(reply)).await.is_err() {
                break 'session;
            }
        }
    }

    let pose = firmware.pose();
    let (left, right) = firmware.wheel_speeds();
    info!(
        x = pose.x,
        y = pose.y,
        left,
        right,
        mode = ?firmware.mode(),
        goal_active = firmware.has_goal(),
        "rover sim: operator disconnected"
    );
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
