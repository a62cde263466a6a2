//! Keeps the [`ConfigStore`] in sync with a remotely watched config object.
//!
//! ```text
//!   Disconnected ──▶ Connecting ──▶ Streaming ──┬──▶ Disconnected (stream closed)
//!        ▲               │                      └──▶ Terminated   (cancelled)
//!        └── backoff ◀───┘ (subscribe failed)
//! ```
//!
//! Only the watcher writes to the store. A bad payload or a deleted object
//! never clears the table: the last good config stays active.

pub mod backoff;
pub mod kubernetes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::routes::RoutingConfig;
use crate::store::ConfigStore;
use backoff::Backoff;

pub use kubernetes::KubeConfigSource;

/// Change notification for the watched config object. Add/modify carry the
/// raw routing payload, `None` when the object lacks the data key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Added(Option<String>),
    Modified(Option<String>),
    Deleted,
}

/// Errors from opening or reading a watch subscription.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("cannot load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("watch stream error: {0}")]
    Stream(String),

    #[error("config source unavailable: {0}")]
    Unavailable(String),
}

pub type EventStream = BoxStream<'static, Result<SourceEvent, SourceError>>;

/// A watch-style subscription on a single named config object.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Identity of the watched object, for logs.
    fn describe(&self) -> String;

    /// Open a new subscription. The stream ends when the remote side closes it.
    async fn subscribe(&self) -> Result<EventStream, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Disconnected,
    Connecting,
    Streaming,
    Terminated,
}

/// What a single event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New table installed with this generation.
    Installed(u64),
    /// Payload missing or invalid; previous table kept.
    Rejected,
    /// Object deleted upstream; previous table kept.
    Retained,
    /// Payload decodes to the table already installed.
    Unchanged,
}

/// How long a session must stay open before its end resets the backoff.
pub const DEFAULT_STABLE_SESSION: Duration = Duration::from_secs(10);

enum SessionEnd {
    Closed { events: usize },
    Cancelled,
}

pub struct ConfigWatcher<S> {
    source: S,
    store: Arc<ConfigStore>,
    backoff: Backoff,
    cancel: CancellationToken,
    state: watch::Sender<WatchState>,
    stable_session: Duration,
}

impl<S: ConfigSource> ConfigWatcher<S> {
    pub fn new(
        source: S,
        store: Arc<ConfigStore>,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(WatchState::Disconnected);
        Self {
            source,
            store,
            backoff,
            cancel,
            state,
            stable_session: DEFAULT_STABLE_SESSION,
        }
    }

    /// A session that delivered events and stayed open at least this long
    /// counts as healthy: its end re-subscribes at once and resets the
    /// backoff. Shorter sessions back off like a failed subscribe, since
    /// every new watch replays the current object.
    pub fn with_stable_session(mut self, stable_session: Duration) -> Self {
        self.stable_session = stable_session;
        self
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WatchState) {
        self.state.send_replace(state);
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self) {
        let object = self.source.describe();
        tracing::info!(object = %object, "Starting config watcher");

        loop {
            self.set_state(WatchState::Connecting);
            tracing::debug!(object = %object, "Opening config watch");

            let subscription = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.source.subscribe() => result,
            };

            match subscription {
                Ok(stream) => {
                    self.set_state(WatchState::Streaming);
                    let opened = Instant::now();
                    match self.consume(stream).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed { events }
                            if events > 0 && opened.elapsed() >= self.stable_session =>
                        {
                            self.set_state(WatchState::Disconnected);
                            self.backoff.reset();
                            tracing::info!(
                                object = %object,
                                events,
                                "Config watch closed by remote, re-subscribing"
                            );
                            continue;
                        }
                        SessionEnd::Closed { events } => {
                            self.set_state(WatchState::Disconnected);
                            tracing::warn!(
                                object = %object,
                                events,
                                session_ms = opened.elapsed().as_millis() as u64,
                                "Config watch closed before it became stable"
                            );
                        }
                    }
                }
                Err(e) => {
                    self.set_state(WatchState::Disconnected);
                    tracing::warn!(
                        object = %object,
                        error = %e,
                        attempt = self.backoff.attempt() + 1,
                        "Failed to open config watch"
                    );
                }
            }

            let delay = self.backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off before re-subscribing");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(WatchState::Terminated);
        tracing::info!(
            object = %object,
            generation = self.store.generation(),
            "Config watcher terminated"
        );
    }

    /// Drain one subscription. Dropping the stream on return releases it.
    async fn consume(&self, mut stream: EventStream) -> SessionEnd {
        let mut events = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    events += 1;
                    self.apply(event);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Config watch stream failed");
                    return SessionEnd::Closed { events };
                }
                None => return SessionEnd::Closed { events },
            }
        }
    }

    fn apply(&self, event: SourceEvent) -> ApplyOutcome {
        match event {
            SourceEvent::Added(payload) | SourceEvent::Modified(payload) => {
                tracing::debug!("Routing config reload triggered");
                let Some(payload) = payload else {
                    tracing::warn!(
                        generation = self.store.generation(),
                        "Config object has no routing payload, keeping current routing config"
                    );
                    return ApplyOutcome::Rejected;
                };

                match RoutingConfig::from_yaml(&payload) {
                    Ok(config) if self.store.get().is_some_and(|current| *current == config) => {
                        tracing::debug!(
                            generation = self.store.generation(),
                            "Routing config unchanged"
                        );
                        ApplyOutcome::Unchanged
                    }
                    Ok(config) => {
                        let services = config.services.len();
                        let generation = self.store.replace(config);
                        tracing::info!(generation, services, "Routing config installed");
                        ApplyOutcome::Installed(generation)
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            generation = self.store.generation(),
                            "Rejected routing config update, keeping current routing config"
                        );
                        ApplyOutcome::Rejected
                    }
                }
            }
            SourceEvent::Deleted => {
                tracing::warn!(
                    generation = self.store.generation(),
                    "Config object deleted upstream, keeping last known routing config"
                );
                ApplyOutcome::Retained
            }
        }
    }
}
