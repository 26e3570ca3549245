//! Push-channel listener.
//!
//! Keeps a websocket subscription to the account's topics open for as long
//! as the session runs, patching the shared menu from menu-update frames.
//! Connection failures are retried after a backoff; cancellation wakes every
//! wait immediately.

use std::sync::Arc;
use std::time::Duration;

use ccshuffle::candidate::SharedMenu;
use ccshuffle::frame;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Credentials, PushConfig};
use crate::session::SessionFlags;

const PING_FRAME: &str = r#"{"action":"ping"}"#;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("encoding subscribe frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct PushSettings {
    pub url: String,
    pub keepalive: Duration,
    pub backoff: Duration,
    pub connect_delay: Duration,
}

impl PushSettings {
    pub fn new(url: impl Into<String>, cfg: &PushConfig) -> Self {
        Self {
            url: url.into(),
            keepalive: Duration::from_secs(cfg.keepalive_secs.max(1)),
            backoff: Duration::from_secs(cfg.reconnect_backoff_secs),
            connect_delay: Duration::from_secs(cfg.connect_delay_secs),
        }
    }
}

pub fn topics(ccuid: &str) -> Vec<String> {
    vec![
        "ext/*/*".to_string(),
        format!("ext/*/{ccuid}"),
        format!("ext/{ccuid}/*"),
        format!("ext/{ccuid}/{ccuid}"),
        format!("pub/{ccuid}"),
        "whisper/*".to_string(),
        format!("whisper/{ccuid}"),
        format!("whisper/{ccuid}/{ccuid}"),
    ]
}

#[derive(Serialize)]
struct SubscribeData<'a> {
    token: &'a str,
    topics: Vec<String>,
}

#[derive(Serialize)]
struct SubscribeFrame {
    action: &'static str,
    /// The channel expects the subscription as a JSON string, not an object.
    data: String,
}

pub fn subscribe_frame(credentials: &Credentials) -> Result<String, serde_json::Error> {
    let data = serde_json::to_string(&SubscribeData {
        token: credentials.pubsub_token(),
        topics: topics(&credentials.ccuid),
    })?;
    serde_json::to_string(&SubscribeFrame {
        action: "subscribe",
        data,
    })
}

/// Sleep for `period`; `true` when cancelled first.
async fn sleep_or_cancel(period: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = time::sleep(period) => false,
    }
}

/// Reconnect loop. Clears `listener_running` on exit.
pub async fn run_listener(
    settings: PushSettings,
    credentials: Credentials,
    menu: SharedMenu,
    flags: Arc<SessionFlags>,
    cancel: CancellationToken,
) {
    flags.set_listener_running(true);
    while !cancel.is_cancelled() {
        if sleep_or_cancel(settings.connect_delay, &cancel).await {
            break;
        }
        match listen_once(&settings, &credentials, &menu, &cancel).await {
            Ok(()) => info!("Push channel closed"),
            Err(e) => warn!("Push channel error: {}", e),
        }
        if cancel.is_cancelled() {
            break;
        }
        info!("Reconnecting push channel in {:?}", settings.backoff);
        if sleep_or_cancel(settings.backoff, &cancel).await {
            break;
        }
    }
    flags.set_listener_running(false);
    info!("Push listener stopped");
}

async fn listen_once(
    settings: &PushSettings,
    credentials: &Credentials,
    menu: &SharedMenu,
    cancel: &CancellationToken,
) -> Result<(), PushError> {
    let (socket, _response) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        conn = connect_async(settings.url.as_str()) => conn?,
    };
    info!("Connected to push channel {}", settings.url);
    let (mut sink, mut stream) = socket.split();
    sink.send(Message::Text(subscribe_frame(credentials)?)).await?;

    let mut keepalive = time::interval_at(Instant::now() + settings.keepalive, settings.keepalive);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = keepalive.tick() => {
                debug!("Push keepalive");
                sink.send(Message::Text(PING_FRAME.to_string())).await?;
            }
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => handle_message(&text, menu),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => handle_message(&text, menu),
                    Err(_) => warn!("Dropped non-UTF-8 push message"),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

pub fn handle_message(text: &str, menu: &SharedMenu) {
    let report = frame::dispatch_message(text, menu);
    for e in &report.errors {
        warn!("Dropped push frame: {}", e);
    }
    if report.menu_updates > 0 {
        debug!(
            "Menu update: {} frame(s), {} candidate(s) patched",
            report.menu_updates, report.patched
        );
    }
}
