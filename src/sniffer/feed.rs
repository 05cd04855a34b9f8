//! Upstream swap feeds
//!
//! A feed owns its connection and reconnects on its own; it only stops when
//! cancelled or when the ingest side goes away.

use crate::metrics::metrics;
use crate::sniffer::errors::{ExponentialBackoff, SnifferError};
use crate::sniffer::wire::parse_event;
use crate::types::SwapEvent;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[async_trait]
pub trait SwapFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver events into `tx` until `cancel` fires
    async fn run(
        &self,
        tx: mpsc::Sender<SwapEvent>,
        cancel: CancellationToken,
    ) -> Result<(), SnifferError>;
}

/// WebSocket feed carrying one JSON swap event per text frame
pub struct WsJsonFeed {
    name: String,
    url: String,
    subscribe: Option<String>,
    idle_timeout: Duration,
}

impl WsJsonFeed {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: format!("ws:{url}"),
            url,
            subscribe: None,
            idle_timeout: Duration::from_secs(30),
        }
    }

    /// Text frame sent right after every (re)connect
    pub fn with_subscribe(mut self, message: impl Into<String>) -> Self {
        self.subscribe = Some(message.into());
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    async fn session(
        &self,
        tx: &mpsc::Sender<SwapEvent>,
        cancel: &CancellationToken,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), SnifferError> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SnifferError::FeedConnection(format!("{}: {e}", self.url)))?;
        info!(feed = %self.name, "Feed connected");
        backoff.reset();

        if let Some(subscribe) = &self.subscribe {
            ws.send(Message::Text(subscribe.clone()))
                .await
                .map_err(|e| SnifferError::FeedConnection(e.to_string()))?;
        }

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                frame = tokio::time::timeout(self.idle_timeout, ws.next()) => frame,
            };

            let text = match frame {
                Err(_) => {
                    return Err(SnifferError::Timeout(format!(
                        "{} idle for {:?}",
                        self.name, self.idle_timeout
                    )))
                }
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {
                    return Err(SnifferError::FeedDisconnected)
                }
                Ok(Some(Err(e))) => return Err(SnifferError::FeedConnection(e.to_string())),
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    ws.send(Message::Pong(payload))
                        .await
                        .map_err(|e| SnifferError::FeedConnection(e.to_string()))?;
                    continue;
                }
                Ok(Some(Ok(Message::Text(text)))) => text,
                Ok(Some(Ok(Message::Binary(bytes)))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        metrics().events_malformed.inc();
                        continue;
                    }
                },
                Ok(Some(Ok(_))) => continue,
            };

            match parse_event(&text) {
                Ok(event) => {
                    metrics().events_received.inc();
                    tx.send(event)
                        .await
                        .map_err(|_| SnifferError::ChannelClosed("ingest".to_string()))?;
                }
                Err(e) => {
                    metrics().events_malformed.inc();
                    debug!(feed = %self.name, error = %e, "Skipping feed message");
                }
            }
        }
    }
}

#[async_trait]
impl SwapFeed for WsJsonFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        tx: mpsc::Sender<SwapEvent>,
        cancel: CancellationToken,
    ) -> Result<(), SnifferError> {
        let mut backoff = ExponentialBackoff::new(200, 10_000);
        loop {
            match self.session(&tx, &cancel, &mut backoff).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next_backoff();
                    warn!(feed = %self.name, error = %e, delay_ms = delay.as_millis() as u64, "Feed lost, reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
