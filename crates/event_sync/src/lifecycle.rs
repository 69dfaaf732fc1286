//! Owns the transport connection and the create/destroy cycle of
//! subscription sessions, driven by the embedding shell's mount, unmount,
//! and window focus/blur signals.

use std::{sync::Arc, time::Duration};

use shared::protocol;
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::{
    commands::CommandSender,
    error::{CommandError, MountError, TransportError},
    replica::EventReplica,
    router::SnapshotHolder,
    session::SubscriptionSession,
    transport::{ConnectOptions, Transport, TransportConnector},
};

const CONNECT_RETRY_ATTEMPTS: usize = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(750);

/// Joined-ness of the event subscription, published for the rest of the
/// application (e.g. to disable write actions while resyncing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Joined,
    NotJoined,
}

struct LifecycleInner {
    transport: Option<Arc<dyn Transport>>,
    session: Option<Arc<SubscriptionSession>>,
}

/// One instance per mounted event page. Holds exactly one transport
/// connection and at most one current session.
pub struct SessionLifecycle {
    connector: Arc<dyn TransportConnector>,
    options: ConnectOptions,
    topic: String,
    holder: Arc<SnapshotHolder>,
    status: watch::Sender<ChannelStatus>,
    inner: Mutex<LifecycleInner>,
}

impl SessionLifecycle {
    /// Opens the transport and joins the event's topic. Pair with
    /// `unmount`. A join rejection is not fatal here: it is logged and the
    /// status stays `NotJoined` until the next focus cycle.
    pub async fn mount(
        connector: Arc<dyn TransportConnector>,
        options: ConnectOptions,
        event_hash: &str,
    ) -> Result<Arc<Self>, MountError> {
        let lifecycle = Arc::new(Self {
            connector,
            options,
            topic: protocol::event_topic(event_hash),
            holder: SnapshotHolder::new(),
            status: watch::channel(ChannelStatus::Connecting).0,
            inner: Mutex::new(LifecycleInner {
                transport: None,
                session: None,
            }),
        });

        let transport = lifecycle.connect_with_retry().await?;
        lifecycle.inner.lock().await.transport = Some(transport);
        lifecycle.join_fresh_session().await;
        Ok(lifecycle)
    }

    /// Window lost focus: tear the current session down and drop the
    /// snapshot. In-flight results from the torn-down session are fenced
    /// off by the generation bump.
    pub async fn handle_blur(&self) {
        let mut inner = self.inner.lock().await;
        let generation = self.holder.advance_generation();
        if let Some(session) = inner.session.take() {
            session.leave().await;
        }
        self.holder.clear(generation);
        let _ = self.status.send(ChannelStatus::NotJoined);
        info!(topic = %self.topic, "lifecycle: suspended on blur");
    }

    /// Window regained focus: full resync through a brand-new session. The
    /// join payload supersedes whatever the previous session held; missed
    /// operations are deliberately not reconciled.
    pub async fn handle_focus(&self) {
        {
            let mut inner = self.inner.lock().await;
            let generation = self.holder.advance_generation();
            if let Some(session) = inner.session.take() {
                session.leave().await;
            }
            self.holder.clear(generation);

            let transport_alive = inner
                .transport
                .as_ref()
                .map(|transport| transport.is_open())
                .unwrap_or(false);
            if !transport_alive {
                info!(topic = %self.topic, "lifecycle: transport gone; reconnecting");
                match self.connect_with_retry().await {
                    Ok(transport) => inner.transport = Some(transport),
                    Err(err) => {
                        warn!(topic = %self.topic, "lifecycle: reconnect failed: {err}");
                        inner.transport = None;
                        let _ = self.status.send(ChannelStatus::NotJoined);
                        return;
                    }
                }
            }
        }
        self.join_fresh_session().await;
    }

    /// Component unmount: tear everything down. The lifecycle is not usable
    /// afterwards.
    pub async fn unmount(&self) {
        let mut inner = self.inner.lock().await;
        let generation = self.holder.advance_generation();
        if let Some(session) = inner.session.take() {
            session.leave().await;
        }
        if let Some(transport) = inner.transport.take() {
            transport.close().await;
        }
        self.holder.clear(generation);
        let _ = self.status.send(ChannelStatus::NotJoined);
        info!(topic = %self.topic, "lifecycle: unmounted");
    }

    /// The snapshot holder; `None` until a join succeeds and between blur
    /// and the next successful join.
    pub fn snapshot(&self) -> watch::Receiver<Option<EventReplica>> {
        self.holder.subscribe()
    }

    pub fn snapshot_stream(&self) -> WatchStream<Option<EventReplica>> {
        WatchStream::new(self.holder.subscribe())
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }

    /// Commands bound to the currently joined session.
    pub async fn commands(&self) -> Result<CommandSender, CommandError> {
        let session = self.inner.lock().await.session.clone();
        let Some(session) = session else {
            return Err(CommandError::NotJoined);
        };
        if !session.is_joined().await {
            return Err(CommandError::NotJoined);
        }
        Ok(CommandSender::new(session))
    }

    async fn connect_with_retry(&self) -> Result<Arc<dyn Transport>, MountError> {
        let mut last = None;
        for attempt in 1..=CONNECT_RETRY_ATTEMPTS {
            match self.connector.connect(&self.options).await {
                Ok(transport) => {
                    if attempt > 1 {
                        info!(attempt, "lifecycle: transport connected after retry");
                    }
                    return Ok(transport);
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = CONNECT_RETRY_ATTEMPTS,
                        "lifecycle: transport connect failed: {err}"
                    );
                    last = Some(err);
                    if attempt < CONNECT_RETRY_ATTEMPTS {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(MountError::ConnectExhausted {
            attempts: CONNECT_RETRY_ATTEMPTS,
            last: last.unwrap_or(TransportError::Closed),
        })
    }

    /// Creates and joins a brand-new session under a fresh generation. The
    /// inner lock is not held across the handshake so blur stays prompt.
    async fn join_fresh_session(&self) {
        let (transport, generation) = {
            let inner = self.inner.lock().await;
            let Some(transport) = inner.transport.clone() else {
                let _ = self.status.send(ChannelStatus::NotJoined);
                return;
            };
            (transport, self.holder.advance_generation())
        };

        let writer = self.holder.writer(generation);
        let joined = SubscriptionSession::join(
            transport,
            self.topic.clone(),
            writer,
            self.status.clone(),
        )
        .await;

        match joined {
            Ok(session) => {
                let mut inner = self.inner.lock().await;
                if self.holder.current_generation() != generation {
                    // A blur raced the handshake; this session is already
                    // stale and must not become current.
                    drop(inner);
                    session.leave().await;
                    return;
                }
                inner.session = Some(session);
                let _ = self.status.send(ChannelStatus::Joined);
            }
            Err(err) => {
                // No retry here; the next focus event tries again.
                warn!(topic = %self.topic, "lifecycle: join failed: {err}");
                let _ = self.status.send(ChannelStatus::NotJoined);
            }
        }
    }
}
