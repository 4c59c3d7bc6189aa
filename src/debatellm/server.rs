//! HTTP/WebSocket surface for observers.
//!
//! Available with the `server` feature.
//!
//! * `GET /ws` upgrades to a WebSocket, replays the broadcaster's cached
//!   durable events and then streams every live event as a JSON envelope.
//!   Frames sent by the client are ignored.
//! * `GET /result` returns the latest [`DebateResult`] stored in the
//!   [`ResultStore`], or `404 {"error": "No debate result available"}`.
//!
//! ```rust,no_run
//! use debatellm::broadcaster::Broadcaster;
//! use debatellm::server::{ObserverServer, ResultStore};
//! use std::sync::Arc;
//!
//! # async {
//! let broadcaster = Arc::new(Broadcaster::new());
//! let results = Arc::new(ResultStore::new());
//! let server = ObserverServer::start("127.0.0.1:3002".parse().unwrap(), broadcaster, results)
//!     .await
//!     .unwrap();
//! println!("observers connect to ws://{}/ws", server.addr());
//! server.shutdown().await.unwrap();
//! # };
//! ```

use crate::debatellm::broadcaster::Broadcaster;
use crate::debatellm::debate::DebateResult;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

/// How long [`ObserverServer::shutdown`] waits for open connections.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Holds the most recent finished debate for `GET /result`.
#[derive(Default)]
pub struct ResultStore {
    latest: RwLock<Option<DebateResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, result: DebateResult) {
        *self.latest.write().await = Some(result);
    }

    pub async fn latest(&self) -> Option<DebateResult> {
        self.latest.read().await.clone()
    }
}

#[derive(Clone)]
struct ServerState {
    broadcaster: Arc<Broadcaster>,
    results: Arc<ResultStore>,
}

/// Build the observer router without binding it.
pub fn router(broadcaster: Arc<Broadcaster>, results: Arc<ResultStore>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/result", get(result_handler))
        .with_state(ServerState {
            broadcaster,
            results,
        })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broadcaster))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let mut observer = broadcaster.connect();
    log::info!("WebSocket observer {} connected", observer.id());

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = observer.recv() => {
                let Some(event) = event else { break };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("Failed to serialize {:?} event: {}", event.kind(), e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    log::info!("WebSocket observer {} disconnected", observer.id());
}

async fn result_handler(State(state): State<ServerState>) -> Response {
    match state.results.latest().await {
        Some(result) => Json(result).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No debate result available"})),
        )
            .into_response(),
    }
}

/// A running observer server.
pub struct ObserverServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ObserverServer {
    /// Bind `addr` (port 0 picks a free port) and start serving.
    pub async fn start(
        addr: SocketAddr,
        broadcaster: Arc<Broadcaster>,
        results: Arc<ResultStore>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let app = router(broadcaster, results);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        log::info!("Observer server listening on {}", addr);
        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections. Open WebSockets get a short grace period
    /// before the server task is aborted.
    pub async fn shutdown(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await {
            Ok(joined) => joined??,
            Err(_) => {
                log::warn!("Observer server did not drain in time; aborting");
                self.task.abort();
            }
        }
        log::info!("Observer server on {} stopped", self.addr);
        Ok(())
    }
}
