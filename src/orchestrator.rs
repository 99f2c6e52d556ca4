//! Orchestrator: bootstrap and the top-level run loop.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::classifier;
use crate::config::Config;
use crate::dispatcher;
use crate::error::BridgeResult;
use crate::http_client::HttpClient;
use crate::memo::{MessageMemo, RequestMemo};
use crate::model::action::ActionRequest;
use crate::profile::SharedProfile;
use crate::ws_session;

const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Logs in, fetches this bridge's own profile, opens both links, and runs
/// until a shutdown signal arrives.
pub async fn run(config: Config) -> BridgeResult<()> {
    let http = HttpClient::new(config.clone())?;
    http.login().await?;
    let profile = http.my_profile().await?;
    info!(uuid = %profile.uuid, username = %profile.username, "logged in to MkIX");
    let profile: SharedProfile = Arc::new(Mutex::new(profile));

    let launch_time = unix_time();
    let requests = std::sync::Arc::new(RequestMemo::new());

    let (mkix_inbound_tx, mkix_inbound_rx) = mpsc::channel::<Value>(INBOUND_QUEUE_CAPACITY);
    let (onebot_inbound_tx, onebot_inbound_rx) = mpsc::channel::<Value>(INBOUND_QUEUE_CAPACITY);

    let mkix_session = ws_session::spawn_mkix(config.clone(), http.clone(), mkix_inbound_tx);
    let onebot_session = ws_session::spawn_onebot(config.clone(), onebot_inbound_tx);

    let memo = MessageMemo::spawn(config.clone(), http.clone(), mkix_session.outbound());
    let shutdown = CancellationToken::new();

    let mkix_task = tokio::spawn(run_mkix_classifier(
        mkix_inbound_rx,
        launch_time,
        config.clone(),
        profile.clone(),
        memo.clone(),
        requests.clone(),
        onebot_session.outbound(),
        shutdown.clone(),
    ));

    let onebot_task = tokio::spawn(run_onebot_dispatcher(
        onebot_inbound_rx,
        config.clone(),
        http.clone(),
        profile.clone(),
        memo.clone(),
        requests.clone(),
        onebot_session.outbound(),
        shutdown.clone(),
    ));

    tokio::select! {
        _ = mkix_task => {
            error!("MkIX classifier task ended unexpectedly");
        }
        _ = onebot_task => {
            error!("OneBot dispatcher task ended unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    }

    Ok(())
}

async fn run_mkix_classifier(
    mut inbound_rx: mpsc::Receiver<Value>,
    launch_time: i64,
    config: Config,
    profile: SharedProfile,
    memo: std::sync::Arc<MessageMemo>,
    requests: std::sync::Arc<RequestMemo>,
    onebot_out: mpsc::Sender<String>,
    shutdown: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            _ = shutdown.cancelled() => break,
            raw = inbound_rx.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };

        if raw.get("type").and_then(Value::as_str) == Some("echo") {
            // The echo id and ack time live inside the JSON-encoded
            // `payload` string, not on the outer frame.
            if let Some(payload_str) = raw.get("payload").and_then(Value::as_str) {
                match serde_json::from_str::<Value>(payload_str) {
                    Ok(ack) => {
                        if let Some(echo_id) = ack.get("echo").and_then(Value::as_u64) {
                            memo.receive_echo(echo_id, ack);
                        } else {
                            warn!("echo ack payload missing echo id");
                        }
                    }
                    Err(e) => warn!(error = %e, "cannot parse echo ack payload"),
                }
            }
            continue;
        }

        if let Some(event) = classifier::classify(&raw, launch_time, &config, &profile, &memo, &requests) {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if onebot_out.send(text).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "cannot serialize outbound event"),
            }
        }
    }
}

async fn run_onebot_dispatcher(
    mut inbound_rx: mpsc::Receiver<Value>,
    config: Config,
    http: std::sync::Arc<HttpClient>,
    profile: SharedProfile,
    memo: std::sync::Arc<MessageMemo>,
    requests: std::sync::Arc<RequestMemo>,
    onebot_out: mpsc::Sender<String>,
    shutdown: CancellationToken,
) {
    let client = reqwest::Client::new();
    loop {
        let raw = tokio::select! {
            _ = shutdown.cancelled() => break,
            raw = inbound_rx.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };
        let request: ActionRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "dropping unparsable action request");
                continue;
            }
        };

        let config = config.clone();
        let http = http.clone();
        let profile = profile.clone();
        let memo = memo.clone();
        let requests = requests.clone();
        let client = client.clone();
        let onebot_out = onebot_out.clone();
        tokio::spawn(async move {
            let reply = dispatcher::dispatch(
                &request.action,
                request.params,
                request.echo,
                &config,
                &http,
                &profile,
                &memo,
                &requests,
                &client,
            )
            .await;
            if let Ok(text) = serde_json::to_string(&reply) {
                let _ = onebot_out.send(text).await;
            }
        });
    }
}

fn unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
