//! Realtime change feed — Phoenix channel over WebSocket.
//!
//! Protocol:
//! 1. Connect to the backend's realtime WebSocket endpoint
//! 2. Send `phx_join` on topic `realtime:tasks` with a `postgres_changes`
//!    config filtered to `owner_id=eq.{owner}` and the current access token
//! 3. Decode incoming `postgres_changes` frames into [`TaskChange`] events
//!    (inserts and updates; this system does not model deletes)
//! 4. Heartbeat on the `phoenix` topic keeps the socket alive
//! 5. On disconnect: reconnect with exponential backoff (2s → 4s → 8s … max
//!    60s) and re-join the same topic
//!
//! Cancellation is synchronous: [`Subscription::cancel`] aborts the socket
//! task and closes the event channel, and a cancelled subscription never
//! delivers again.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{AuthApi as _, AuthClient, ChangeFeed, Result, Task};
use crate::config::Config;

const TOPIC: &str = "realtime:tasks";
const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(25);
const CHANNEL_CAPACITY: usize = 64;

/// What happened to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
}

/// One push notification: the change kind and the row in its post-change state.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskChange {
    pub kind: ChangeKind,
    pub row: Task,
}

// ─── Subscription handle ─────────────────────────────────────────────────────

/// A cancelable push channel yielding change events to a single consumer.
pub struct Subscription {
    events: mpsc::Receiver<TaskChange>,
    abort: Option<AbortHandle>,
    cancelled: bool,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<TaskChange>, abort: Option<AbortHandle>) -> Self {
        Self {
            events,
            abort,
            cancelled: false,
        }
    }

    /// The next change event; `None` once cancelled or the feed shut down.
    pub async fn recv(&mut self) -> Option<TaskChange> {
        if self.cancelled {
            return None;
        }
        self.events.recv().await
    }

    /// Release the channel. Synchronous: no event is delivered after this
    /// returns, including events already buffered.
    pub fn cancel(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        self.events.close();
        self.cancelled = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct RealtimeClient {
    config: Arc<Config>,
    auth: Arc<AuthClient>,
}

impl RealtimeClient {
    pub fn new(config: Arc<Config>, auth: Arc<AuthClient>) -> Self {
        Self { config, auth }
    }
}

#[async_trait::async_trait]
impl ChangeFeed for RealtimeClient {
    async fn subscribe(&self, owner_id: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(feed_loop(
            Arc::clone(&self.config),
            Arc::clone(&self.auth),
            owner_id.to_string(),
            tx,
        ));
        Ok(Subscription::new(rx, Some(task.abort_handle())))
    }
}

// ─── Background loop ─────────────────────────────────────────────────────────

async fn feed_loop(
    config: Arc<Config>,
    auth: Arc<AuthClient>,
    owner_id: String,
    tx: mpsc::Sender<TaskChange>,
) {
    let url = config.realtime_url();
    let mut backoff_secs: u64 = 2;

    loop {
        if tx.is_closed() {
            return;
        }
        info!(topic = TOPIC, "realtime: connecting");

        match connect_async(&url).await {
            Ok((ws_stream, _)) => {
                info!(topic = TOPIC, "realtime: connected");
                backoff_secs = 2;
                if let Err(e) = run_channel(ws_stream, &auth, &owner_id, &tx).await {
                    warn!("realtime: channel closed: {e:#}");
                }
            }
            Err(e) => {
                warn!("realtime: connection failed: {e:#}");
            }
        }

        if tx.is_closed() {
            return;
        }
        sleep_backoff(&mut backoff_secs).await;
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Join the topic, then pump frames and heartbeats until the socket drops.
/// Returns `Ok(())` only when the consumer is gone.
async fn run_channel(
    ws_stream: WsStream,
    auth: &Arc<AuthClient>,
    owner_id: &str,
    tx: &mpsc::Sender<TaskChange>,
) -> anyhow::Result<()> {
    let (mut sink, mut stream) = ws_stream.split();

    // A fresh token on every (re-)join; the previous one may have expired
    // while we were backing off.
    let join = json!({
        "topic": TOPIC,
        "event": "phx_join",
        "ref": "1",
        "payload": {
            "config": {
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": "tasks",
                    "filter": format!("owner_id=eq.{owner_id}"),
                }],
            },
            "access_token": auth.access_token(),
        },
    });
    sink.send(Message::Text(join.to_string())).await?;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut heartbeat_ref: u64 = 1;

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(msg) = msg else {
                    anyhow::bail!("stream ended");
                };
                let text = match msg? {
                    Message::Text(t) => t,
                    Message::Close(frame) => anyhow::bail!("server closed channel: {frame:?}"),
                    _ => continue,
                };

                let frame: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("realtime: unparseable frame: {e}");
                        continue;
                    }
                };

                match frame["event"].as_str().unwrap_or("") {
                    "postgres_changes" => {
                        if let Some(change) = decode_change(&frame["payload"]) {
                            if tx.send(change).await.is_err() {
                                // Consumer gone — stop for good, no reconnect.
                                return Ok(());
                            }
                        }
                    }
                    "phx_reply" => {
                        let status = frame["payload"]["status"].as_str().unwrap_or("");
                        if status != "ok" {
                            anyhow::bail!("join rejected: {}", frame["payload"]);
                        }
                        debug!("realtime: ← phx_reply ok");
                    }
                    "phx_error" => anyhow::bail!("channel error: {}", frame["payload"]),
                    "system" | "presence_state" => {
                        debug!("realtime: ← {}", frame["event"]);
                    }
                    other => debug!("realtime: ignoring frame '{other}'"),
                }
            }
            _ = heartbeat.tick() => {
                heartbeat_ref += 1;
                let beat = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": heartbeat_ref.to_string(),
                });
                sink.send(Message::Text(beat.to_string())).await?;
            }
            _ = tx.closed() => return Ok(()),
        }
    }
}

/// Decode a `postgres_changes` payload into a change event.
///
/// Deletes and unknown kinds yield `None`; so do rows that don't look like a
/// task (the row is logged and skipped rather than poisoning the channel).
fn decode_change(payload: &Value) -> Option<TaskChange> {
    let data = payload.get("data")?;
    let kind = match data.get("type").and_then(Value::as_str)? {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        other => {
            debug!("realtime: ignoring change kind '{other}'");
            return None;
        }
    };
    let record = data.get("record")?;
    match serde_json::from_value::<Task>(record.clone()) {
        Ok(row) => Some(TaskChange { kind, row }),
        Err(e) => {
            warn!("realtime: undecodable task record: {e}");
            None
        }
    }
}

async fn sleep_backoff(backoff_secs: &mut u64) {
    info!("realtime: reconnecting in {}s", *backoff_secs);
    tokio::time::sleep(std::time::Duration::from_secs(*backoff_secs)).await;
    *backoff_secs = (*backoff_secs * 2).min(60);
}

// ─── Tests ───────────────────────────────────────────────────────────────────
