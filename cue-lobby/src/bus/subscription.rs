//! Long-lived subscriber connection with reconnect and visibility handling.
//!
//! ```text
//!              ┌────────────┐  ok   ┌───────────┐
//!   spawn ───► │ Connecting │ ────► │ Connected │ ── frame ──► on_message
//!              └────────────┘       └───────────┘
//!                 ▲    │ err              │ closed
//!                 │    ▼                  ▼
//!              ┌──────────────┐  delay elapsed
//!              │ Reconnecting │ ◄─────────────
//!              └──────────────┘
//!
//!   hidden (any state) ──► Suspended ── visible after resumable hide ──► Connecting
//!   stop() (any state) ──► Disconnected
//! ```

use futures_util::StreamExt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::transport::Transport;

/// Whether the host is currently showing the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    /// `resumable` is false when the host is being torn down rather than
    /// merely backgrounded; such a subscription never comes back on its own.
    Hidden { resumable: bool },
}

impl Visibility {
    pub fn is_hidden(&self) -> bool {
        matches!(self, Visibility::Hidden { .. })
    }
}

/// Host lifecycle observer shared by every subscription of one client.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<Visibility>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Visibility::Visible);
        Self { tx: Arc::new(tx) }
    }

    pub fn hide(&self, resumable: bool) {
        self.tx.send_replace(Visibility::Hidden { resumable });
    }

    pub fn show(&self) {
        self.tx.send_replace(Visibility::Visible);
    }

    pub fn visibility(&self) -> Visibility {
        *self.tx.borrow()
    }

    pub(crate) fn observe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Waiting out the reconnect delay.
    Reconnecting,
    /// Host hidden; no connection and no reconnect timer.
    Suspended,
    /// Stopped for good.
    Disconnected,
}

pub(crate) type FrameHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Handle to a running subscriber task. Dropping it stops the task.
pub struct Subscription {
    state: watch::Receiver<ConnectionState>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Worker {
    transport: Arc<dyn Transport>,
    kind: String,
    channel: String,
    reconnect_delay: Duration,
    on_message: FrameHandler,
    state: watch::Sender<ConnectionState>,
}

/// How an established connection ended.
enum Ended {
    Stopped,
    Hidden,
    Lost,
}

impl Subscription {
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        kind: &str,
        channel: &str,
        reconnect_delay: Duration,
        on_message: FrameHandler,
        visibility: Option<watch::Receiver<Visibility>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = Worker {
            transport,
            kind: kind.to_string(),
            channel: channel.to_string(),
            reconnect_delay,
            on_message,
            state: state_tx,
        };
        let task = tokio::spawn(worker.run(stop_rx, visibility));

        Self {
            state: state_rx,
            stop_tx,
            task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Cancel any pending reconnect and close the active connection.
    /// Calling it again is a no-op.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Worker {
    async fn run(
        self,
        mut stop: watch::Receiver<bool>,
        mut visibility: Option<watch::Receiver<Visibility>>,
    ) {
        loop {
            if *stop.borrow() {
                break;
            }

            if current(&visibility).is_hidden() {
                self.state.send_replace(ConnectionState::Suspended);
                log::debug!("Subscription to '{}' suspended", self.channel);
                tokio::select! {
                    _ = stopped(&mut stop) => break,
                    _ = until_resumed(&mut visibility) => continue,
                }
            }

            self.state.send_replace(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = until_hidden(&mut visibility) => continue,
                result = self.transport.connect(&self.kind, &self.channel) => result,
            };

            match connected {
                Ok(mut frames) => {
                    self.state.send_replace(ConnectionState::Connected);
                    log::info!("Subscribed to '{}'", self.channel);

                    let ended = loop {
                        tokio::select! {
                            _ = stopped(&mut stop) => break Ended::Stopped,
                            _ = until_hidden(&mut visibility) => break Ended::Hidden,
                            frame = frames.next() => match frame {
                                Some(Ok(text)) => (self.on_message)(text),
                                Some(Err(e)) => {
                                    log::warn!("Subscription to '{}' failed: {e}", self.channel);
                                    break Ended::Lost;
                                }
                                None => break Ended::Lost,
                            },
                        }
                    };
                    drop(frames);

                    match ended {
                        Ended::Stopped => break,
                        Ended::Hidden => continue,
                        Ended::Lost => log::info!("Connection to '{}' closed", self.channel),
                    }
                }
                Err(e) => log::warn!("Connect to '{}' failed: {e}", self.channel),
            }

            self.state.send_replace(ConnectionState::Reconnecting);
            let delay = tokio::time::sleep(self.reconnect_delay);
            tokio::pin!(delay);
            tokio::select! {
                _ = stopped(&mut stop) => break,
                _ = until_hidden(&mut visibility) => continue,
                _ = &mut delay => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        log::debug!("Subscription to '{}' stopped", self.channel);
    }
}

fn current(visibility: &Option<watch::Receiver<Visibility>>) -> Visibility {
    visibility
        .as_ref()
        .map_or(Visibility::Visible, |rx| *rx.borrow())
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a stop.
    let _ = stop.wait_for(|stop| *stop).await;
}

async fn until_hidden(visibility: &mut Option<watch::Receiver<Visibility>>) {
    let Some(rx) = visibility else {
        return pending().await;
    };
    let closed = rx.wait_for(Visibility::is_hidden).await.is_err();
    if closed {
        pending::<()>().await;
    }
}

/// Resolves once the host is visible again after a resumable hide.
async fn until_resumed(visibility: &mut Option<watch::Receiver<Visibility>>) {
    let Some(rx) = visibility else {
        return;
    };
    let mut resumable = match *rx.borrow_and_update() {
        Visibility::Visible => return,
        Visibility::Hidden { resumable } => resumable,
    };
    loop {
        if rx.changed().await.is_err() {
            return pending().await;
        }
        match *rx.borrow_and_update() {
            Visibility::Visible if resumable => return,
            Visibility::Visible => {}
            Visibility::Hidden { resumable: again } => resumable = again,
        }
    }
}
