//! WS session layer: the MkIX and OneBot links share one reconnect-loop
//! shape. Reconnects use a flat 5s delay with no backoff and no retry
//! ceiling — these links stay open for as long as the process runs.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::config::Config;
use crate::http_client::HttpClient;

const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const CAN_SEND_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FRAME_SIZE: usize = 1 << 23;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A live (or reconnecting) websocket link plus its control surface.
#[derive(Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<String>,
    ready: watch::Receiver<bool>,
    ping_tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl SessionHandle {
    pub fn outbound(&self) -> mpsc::Sender<String> {
        self.outbound.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn wait_ready(&mut self) {
        while !*self.ready.borrow() {
            if self.ready.changed().await.is_err() {
                return;
            }
        }
    }

    /// Pings the live connection and waits up to 5s for a pong, the
    /// liveness probe callers use before trusting a send will land.
    pub async fn can_send(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        if self.ping_tx.send(tx).await.is_err() {
            return false;
        }
        tokio::time::timeout(CAN_SEND_TIMEOUT, rx)
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

enum WriterCmd {
    Text(String),
    Ping(oneshot::Sender<()>),
}

/// Opens (and forever reconnects) the MkIX link at
/// `ws[s]://<server>/websocket/connect`, refreshing the bearer token on
/// every attempt.
pub fn spawn_mkix(config: Config, http: Arc<HttpClient>, inbound_tx: mpsc::Sender<Value>) -> SessionHandle {
    let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (ready_tx, ready_rx) = watch::channel(false);
    let (ping_tx, ping_rx) = mpsc::channel(4);

    tokio::spawn(run_reconnect_loop(
        "mkix".to_string(),
        outbound_rx,
        ready_tx,
        ping_rx,
        move || {
            let config = config.clone();
            let http = http.clone();
            Box::pin(async move {
                let token = http.ws_token().await?;
                let scheme = if config.server_url.starts_with("https") {
                    "wss"
                } else {
                    "ws"
                };
                let host = config
                    .server_url
                    .trim_start_matches("https://")
                    .trim_start_matches("http://");
                let url = format!("{scheme}://{host}/websocket/connect");
                let mut request = url
                    .into_client_request()
                    .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;
                request
                    .headers_mut()
                    .insert("Authorization", format!("Bearer {token}").parse().unwrap());
                Ok(request)
            })
        },
        inbound_tx,
    ));

    SessionHandle {
        outbound: outbound_tx,
        ready: ready_rx,
        ping_tx,
    }
}

/// Opens (and forever reconnects) the OneBot link, sending a lifecycle
/// event on connect and a heartbeat every 30s while ready.
pub fn spawn_onebot(config: Config, inbound_tx: mpsc::Sender<Value>) -> SessionHandle {
    let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (ready_tx, ready_rx) = watch::channel(false);
    let (ping_tx, ping_rx) = mpsc::channel(4);

    let self_id = config.account.clone();
    let url = config.onebot_url.clone();
    tokio::spawn(run_reconnect_loop(
        "onebot".to_string(),
        outbound_rx,
        ready_tx,
        ping_rx,
        move || {
            let url = url.clone();
            let self_id = self_id.clone();
            Box::pin(async move {
                let mut request = url
                    .clone()
                    .into_client_request()
                    .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;
                request
                    .headers_mut()
                    .insert("X-Self-ID", self_id.parse().unwrap());
                request
                    .headers_mut()
                    .insert("X-Client-Role", "Universal".parse().unwrap());
                Ok(request)
            })
        },
        inbound_tx,
    ));

    let handle = SessionHandle {
        outbound: outbound_tx,
        ready: ready_rx,
        ping_tx,
    };

    tokio::spawn(onebot_heartbeat(handle.clone(), config.account.clone()));

    handle
}

const QUEUE_CAPACITY: usize = 256;

type ClientRequest = tokio_tungstenite::tungstenite::http::Request<()>;
type BuildRequestFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = crate::error::BridgeResult<ClientRequest>> + Send>>;

async fn run_reconnect_loop(
    name: String,
    mut outbound_rx: mpsc::Receiver<String>,
    ready_tx: watch::Sender<bool>,
    mut ping_rx: mpsc::Receiver<oneshot::Sender<()>>,
    build_request: impl Fn() -> BuildRequestFuture + Send + Sync + 'static,
    inbound_tx: mpsc::Sender<Value>,
) {
    loop {
        let request = match build_request().await {
            Ok(r) => r,
            Err(e) => {
                warn!(link = %name, error = %e, "cannot build connect request, retrying");
                tokio::time::sleep(RETRY_INTERVAL).await;
                continue;
            }
        };

        let ws_config = WebSocketConfig {
            max_message_size: Some(MAX_FRAME_SIZE),
            max_frame_size: Some(MAX_FRAME_SIZE),
            ..Default::default()
        };

        let connect = tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false).await;
        let stream = match connect {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(link = %name, error = %e, "connect failed, retrying in 5s");
                tokio::time::sleep(RETRY_INTERVAL).await;
                continue;
            }
        };

        info!(link = %name, "connected");
        let _ = ready_tx.send(true);
        let (mut write, mut read) = stream.split();
        let mut pending_ping: Option<oneshot::Sender<()>> = None;

        loop {
            tokio::select! {
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Value>(&text) {
                                Ok(value) => { let _ = inbound_tx.send(value).await; }
                                Err(e) => warn!(link = %name, error = %e, "dropping unparsable frame"),
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            if let Some(waiter) = pending_ping.take() {
                                let _ = waiter.send(());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(link = %name, error = %e, "read error");
                            break;
                        }
                        _ => {}
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(text) => {
                            if write.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                ping = ping_rx.recv() => {
                    if let Some(waiter) = ping {
                        if write.send(Message::Ping(Vec::new().into())).await.is_ok() {
                            pending_ping = Some(waiter);
                        }
                    }
                }
            }
        }

        let _ = ready_tx.send(false);
        warn!(link = %name, "disconnected, retrying in 5s");
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

async fn onebot_heartbeat(handle: SessionHandle, self_id: String) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        interval.tick().await;
        if !handle.is_ready() {
            continue;
        }
        let event = crate::model::event::HeartbeatEvent {
            time: unix_time(),
            self_id: self_id.clone(),
            post_type: "meta_event",
            meta_event_type: "heartbeat",
            status: crate::model::event::HeartbeatStatus {
                online: true,
                good: true,
            },
            interval: HEARTBEAT_INTERVAL.as_millis() as i64,
        };
        if let Ok(text) = serde_json::to_string(&event) {
            let _ = handle.outbound().send(text).await;
        }
    }
}

fn unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
