//! # Live Feed With Polling Fallback
//!
//! A [`WasteLiveHook`] paired with an HTTP poller for networks where the
//! WebSocket upgrade never delivers anything (proxies that accept the upgrade
//! and then sit on it, for instance).
//!
//! ## Core Design Principles:
//! - **Real-time first**: the poller stays idle for `first_event_timeout`
//!   after start. If a real-time event arrives in that window it never runs.
//! - **Self-scheduling**: once in fallback, the task polls
//!   `GET {http_base}/waste-logs`, merges, and schedules its next poll
//!   `poll_interval` later. A failed poll is logged and retried on the same
//!   schedule.
//! - **Instant hand-back**: the first real-time event stops polling for good.
//!   Polls run in their own task, so an in-flight request never holds up live
//!   entries or `close()`; it is aborted and its result discarded.
//! - **One view**: both sources merge into the same [`LiveLogView`], so an
//!   entry seen by both is shown once.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::waste_log::WasteLogEntry;
use crate::ingestors::backoff::BackoffPolicy;
use crate::ingestors::live_view::{FeedState, LiveLogView};
use crate::ingestors::waste_wss::{ConnectionStatus, WasteLiveHook};
use crate::retrieve::ApiClient;

/// Where to listen and when to fall back.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Subscriber channel URL, e.g. `ws://host:4003/ws`.
    pub ws_url: String,
    /// Server base URL for polling. `None` disables the fallback.
    pub http_base: Option<String>,
    /// Quiet period before polling starts.
    pub first_event_timeout: Duration,
    /// Time between polls once polling.
    pub poll_interval: Duration,
    /// Reconnect policy for the real-time channel.
    pub backoff: BackoffPolicy,
}

impl PollingConfig {
    /// Defaults for `ws_url` with polling against `http_base`.
    pub fn new(ws_url: impl Into<String>, http_base: Option<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            http_base,
            first_event_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(15),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Running live feed.
pub struct PollingFeed {
    hook: Option<WasteLiveHook>,
    view: watch::Receiver<LiveLogView>,
    state: watch::Receiver<FeedState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollingFeed {
    /// Starts the hook and the merge task.
    ///
    /// The returned receiver yields every entry the moment it is first
    /// merged into the view, from either source.
    ///
    /// # Errors
    /// Fails if `http_base` is not a usable http(s) URL.
    pub fn start(config: PollingConfig) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<WasteLogEntry>)> {
        let poller = config
            .http_base
            .as_deref()
            .map(|base| ApiClient::new(base, None))
            .transpose()?;

        let (hook, live) = WasteLiveHook::subscribe(config.ws_url.clone(), config.backoff);
        let (view_tx, view) = watch::channel(LiveLogView::new());
        let (state_tx, state) = watch::channel(FeedState::default());
        let (merged_tx, merged) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = FeedWorker {
            live,
            status: hook.status(),
            poller,
            first_event_timeout: config.first_event_timeout,
            poll_interval: config.poll_interval,
            view: LiveLogView::new(),
            view_tx,
            state_tx,
            merged_tx,
        };
        let task = tokio::spawn(worker.run(cancel.clone()));

        Ok((
            Self {
                hook: Some(hook),
                view,
                state,
                cancel,
                task: Some(task),
            },
            merged,
        ))
    }

    /// Snapshot of the merged view, newest first.
    pub fn view(&self) -> LiveLogView {
        self.view.borrow().clone()
    }

    /// Watch handle on connection phase and last update time.
    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// Stops the poller and closes the real-time channel.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(hook) = self.hook.take() {
            hook.close().await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Live feed task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PollingFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct FeedWorker {
    live: mpsc::UnboundedReceiver<WasteLogEntry>,
    status: watch::Receiver<ConnectionStatus>,
    poller: Option<ApiClient>,
    first_event_timeout: Duration,
    poll_interval: Duration,
    view: LiveLogView,
    view_tx: watch::Sender<LiveLogView>,
    state_tx: watch::Sender<FeedState>,
    merged_tx: mpsc::UnboundedSender<WasteLogEntry>,
}

impl FeedWorker {
    async fn run(mut self, cancel: CancellationToken) {
        let fallback_at = Instant::now() + self.first_event_timeout;
        let mut realtime_seen = false;
        let mut next_poll: Option<Instant> = None;
        let mut in_flight: Option<JoinHandle<()>> = None;
        let (polled_tx, mut polled) = mpsc::unbounded_channel::<Option<Vec<WasteLogEntry>>>();

        loop {
            let can_fall_back = !realtime_seen && next_poll.is_none() && self.poller.is_some();
            let poll_at = next_poll.unwrap_or(fallback_at);

            tokio::select! {
                _ = cancel.cancelled() => break,
                entry = self.live.recv() => match entry {
                    Some(entry) => {
                        if !realtime_seen {
                            realtime_seen = true;
                            if next_poll.take().is_some() {
                                log::info!("Real-time event received, polling fallback stopped");
                            }
                            if let Some(task) = in_flight.take() {
                                task.abort();
                            }
                        }
                        self.apply(std::iter::once(entry));
                    }
                    None => break,
                },
                changed = self.status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *self.status.borrow_and_update();
                    self.state_tx.send_modify(|s| s.status = status);
                }
                _ = sleep_until(fallback_at), if can_fall_back => {
                    log::warn!(
                        "No real-time event within {} ms, falling back to polling every {} ms",
                        self.first_event_timeout.as_millis(),
                        self.poll_interval.as_millis()
                    );
                    next_poll = Some(Instant::now());
                }
                _ = sleep_until(poll_at), if next_poll.is_some() => {
                    next_poll = Some(Instant::now() + self.poll_interval);
                    if in_flight.is_some() {
                        log::debug!("Previous poll still running, skipping this one");
                    } else if let Some(poller) = self.poller.clone() {
                        in_flight = Some(tokio::spawn(poll_once(poller, polled_tx.clone())));
                    }
                }
                Some(result) = polled.recv() => {
                    in_flight = None;
                    // A poll that finished just before the hand-back is stale.
                    if realtime_seen {
                        continue;
                    }
                    if let Some(entries) = result {
                        self.apply(entries);
                        self.state_tx.send_modify(|s| s.last_updated = Some(Utc::now()));
                    }
                }
            }
        }

        if let Some(task) = in_flight.take() {
            task.abort();
        }
    }

    fn apply(&mut self, entries: impl IntoIterator<Item = WasteLogEntry>) {
        let mut changed = false;
        for entry in entries {
            if self.view.merge(entry.clone()) {
                changed = true;
                // Receiver gone means nobody prints; the view is still kept.
                let _ = self.merged_tx.send(entry);
            }
        }
        if changed {
            self.view_tx.send_replace(self.view.clone());
            self.state_tx.send_modify(|s| s.last_updated = Some(Utc::now()));
        }
    }
}

/// Fetches `GET waste-logs` and reports the entries, or `None` on failure.
async fn poll_once(poller: ApiClient, done: mpsc::UnboundedSender<Option<Vec<WasteLogEntry>>>) {
    let result = match poller.get_json::<Value>("waste-logs").await {
        Ok(resp) if resp.success => {
            let entries: Vec<WasteLogEntry> = resp
                .data
                .as_ref()
                .and_then(|body| body.get("logs"))
                .and_then(Value::as_array)
                .map(|logs| {
                    logs.iter()
                        .filter_map(|v| serde_json::from_value(v.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();
            log::debug!("Polled {} waste logs", entries.len());
            Some(entries)
        }
        Ok(resp) => {
            log::warn!("Polling waste logs returned HTTP {}", resp.status);
            None
        }
        Err(e) => {
            log::warn!("Polling waste logs failed: {}", e);
            None
        }
    };
    // The worker is gone when the feed was closed mid-poll.
    let _ = done.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = PollingConfig::new("ws://localhost:4003/ws", None);
        assert_eq!(cfg.first_event_timeout, Duration::from_secs(10));
        assert_eq!(cfg.poll_interval, Duration::from_secs(15));
        assert_eq!(cfg.backoff, BackoffPolicy::default());
    }

    #[tokio::test]
    async fn rejects_bad_http_base() {
        let cfg = PollingConfig::new("ws://localhost:4003/ws", Some("ftp://nope".into()));
        assert!(PollingFeed::start(cfg).is_err());
    }
}
