//! # Waste Live WebSocket Client
//!
//! The client side of the subscriber channel.
//!
//! ## Core Design Principles:
//! - **One reconnect loop**: [`ResilientChannel`] owns connecting, reading,
//!   backoff and teardown for any text-frame WebSocket feed. Consumers only
//!   supply a handler for text frames.
//! - **Never gives up**: drops and failed connects are retried forever with
//!   the configured [`BackoffPolicy`]; the current phase is published on a
//!   `watch` channel for status indicators.
//! - **Clean teardown**: [`ResilientChannel::close`] cancels a pending retry
//!   timer and the live connection, then waits for the task. Dropping the
//!   handle cancels as well, so no connection or timer outlives its owner.
//! - **Decode at the edge**: [`WasteLiveHook`] turns `waste` frames into
//!   [`WasteLogEntry`] values and drops everything else. Deduplication is
//!   left to the consumer (see `live_view`).

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::ServerMessage;
use crate::core::waste_log::WasteLogEntry;
use crate::ingestors::backoff::BackoffPolicy;

/// Connection phase of a [`ResilientChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// A connect attempt is in flight.
    Connecting,
    /// The socket is open.
    Connected,
    /// The socket dropped; the next attempt starts after `retry_in`.
    Disconnected {
        /// Delay before the next connect attempt.
        retry_in: Duration,
    },
    /// Torn down by its owner. Terminal.
    Closed,
}

/// Reconnecting WebSocket client for text-frame feeds.
pub struct ResilientChannel {
    status: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ResilientChannel {
    /// Starts the connect loop for `url` on the current runtime.
    ///
    /// `on_text` is called for every text frame, in arrival order.
    pub fn spawn<F>(url: impl Into<String>, policy: BackoffPolicy, on_text: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(url.into(), policy, on_text, status_tx, cancel.clone()));

        Self {
            status,
            cancel,
            task: Some(task),
        }
    }

    /// Watch handle on the connection phase.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Current connection phase.
    pub fn current_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Closes the live connection, cancels any pending retry and waits for
    /// the loop to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Live channel task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ResilientChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<F>(
    url: String,
    policy: BackoffPolicy,
    mut on_text: F,
    status: watch::Sender<ConnectionStatus>,
    cancel: CancellationToken,
) where
    F: FnMut(&str),
{
    let mut backoff = policy.start();

    'reconnect: loop {
        status.send_replace(ConnectionStatus::Connecting);
        log::info!("Connecting to live feed {}", url);

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break 'reconnect,
            attempt = connect_async(url.as_str()) => attempt,
        };

        match attempt {
            Ok((ws_stream, _)) => {
                log::info!("Live feed {} connected", url);
                backoff.reset();
                status.send_replace(ConnectionStatus::Connected);
                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            if let Err(e) = write.send(Message::Close(None)).await {
                                log::debug!("Close frame to {} not sent: {}", url, e);
                            }
                            break 'reconnect;
                        }
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => on_text(text.as_str()),
                            Some(Ok(Message::Close(_))) | None => {
                                log::warn!("Live feed {} closed by remote host", url);
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                log::warn!("Live feed {} read error: {}", url, e);
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => log::warn!("Live feed {} connect failed: {}", url, e),
        }

        let delay = backoff.next_delay();
        status.send_replace(ConnectionStatus::Disconnected { retry_in: delay });
        log::info!("Reconnecting to {} in {} ms", url, delay.as_millis());

        tokio::select! {
            _ = cancel.cancelled() => break 'reconnect,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    status.send_replace(ConnectionStatus::Closed);
    log::info!("Live feed {} closed", url);
}

/// Live subscription to `waste` events.
pub struct WasteLiveHook {
    channel: ResilientChannel,
}

impl WasteLiveHook {
    /// Connects to `url`, handing every decoded entry to `on_entry`.
    ///
    /// Frames that do not decode, and frames of any other type, are dropped.
    pub fn connect<F>(url: impl Into<String>, policy: BackoffPolicy, mut on_entry: F) -> Self
    where
        F: FnMut(WasteLogEntry) + Send + 'static,
    {
        let channel = ResilientChannel::spawn(url, policy, move |text| {
            match ServerMessage::decode(text) {
                Some(message @ ServerMessage::Waste { .. }) => match message.waste_entry() {
                    Some(entry) => on_entry(entry),
                    None => log::debug!("Dropping waste frame without an entry payload"),
                },
                Some(ServerMessage::Welcome { ts }) => log::debug!("Live feed welcome at {}", ts),
                None => log::debug!("Dropping unrecognised frame"),
            }
        });
        Self { channel }
    }

    /// Like [`WasteLiveHook::connect`], delivering entries on a channel.
    pub fn subscribe(
        url: impl Into<String>,
        policy: BackoffPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<WasteLogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hook = Self::connect(url, policy, move |entry| {
            // Receiver gone means the consumer stopped listening.
            let _ = tx.send(entry);
        });
        (hook, rx)
    }

    /// Watch handle on the connection phase.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.channel.status()
    }

    /// Current connection phase.
    pub fn current_status(&self) -> ConnectionStatus {
        self.channel.current_status()
    }

    /// Tears the subscription down.
    pub async fn close(self) {
        self.channel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn fast() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(80),
            factor: 2.0,
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<ConnectionStatus>, want: fn(&ConnectionStatus) -> bool) {
        timeout(Duration::from_secs(5), rx.wait_for(want))
            .await
            .expect("status not reached in time")
            .expect("status sender dropped");
    }

    #[tokio::test]
    async fn unreachable_host_keeps_retrying() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let channel = ResilientChannel::spawn(format!("ws://127.0.0.1:{port}/ws"), fast(), |_| {});
        let mut status = channel.status();

        wait_for(&mut status, |s| matches!(s, ConnectionStatus::Disconnected { .. })).await;
        wait_for(&mut status, |s| {
            matches!(s, ConnectionStatus::Disconnected { retry_in } if *retry_in >= Duration::from_millis(40))
        })
        .await;

        channel.close().await;
        assert_eq!(*status.borrow(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn close_cancels_pending_retry() {
        let channel = ResilientChannel::spawn(
            "ws://127.0.0.1:9/ws",
            BackoffPolicy {
                initial: Duration::from_secs(3600),
                max: Duration::from_secs(3600),
                factor: 1.0,
            },
            |_| {},
        );
        let mut status = channel.status();
        wait_for(&mut status, |s| matches!(s, ConnectionStatus::Disconnected { .. })).await;

        timeout(Duration::from_secs(2), channel.close())
            .await
            .expect("close must not wait out the retry timer");
    }

    #[tokio::test]
    async fn drop_tears_down_loop() {
        let channel = ResilientChannel::spawn("ws://127.0.0.1:9/ws", fast(), |_| {});
        let mut status = channel.status();
        drop(channel);
        wait_for(&mut status, |s| *s == ConnectionStatus::Closed).await;
    }
}
