//! One subscription to an event topic, bounded by join and leave.
//!
//! The receive loop is the only place this session's frames are processed:
//! the join acknowledgement seeds the snapshot before any queued operation
//! applies, operations apply strictly in arrival order, and command
//! acknowledgements resolve their waiting callers. A session is never
//! reused; the lifecycle manager constructs a fresh one for every join.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::Value;
use shared::{
    error::{JoinRejection, ValidationErrors},
    protocol::{self, ClientCommand, Envelope, JoinResponse, Reply, ReplyStatus, ServerOp},
};
use tokio::{
    sync::{broadcast, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::{CommandError, JoinError, TransportError},
    lifecycle::ChannelStatus,
    replica,
    router::SessionWriter,
    transport::Transport,
};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Joining,
    Joined,
    Left,
}

type JoinSignal = oneshot::Sender<Result<(), JoinError>>;

pub struct SubscriptionSession {
    topic: String,
    transport: Arc<dyn Transport>,
    writer: SessionWriter,
    status: watch::Sender<ChannelStatus>,
    state: Mutex<SessionState>,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    next_ref: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionSession {
    /// Joins `topic` over `transport`. Resolves once the server acknowledges
    /// the handshake and the snapshot is seeded; the receive loop keeps
    /// running for the session's lifetime.
    pub(crate) async fn join(
        transport: Arc<dyn Transport>,
        topic: String,
        writer: SessionWriter,
        status: watch::Sender<ChannelStatus>,
    ) -> Result<Arc<Self>, JoinError> {
        let session = Arc::new(Self {
            topic,
            transport: Arc::clone(&transport),
            writer,
            status,
            state: Mutex::new(SessionState::Joining),
            pending: Mutex::new(HashMap::new()),
            next_ref: AtomicU64::new(1),
            reader: Mutex::new(None),
        });

        // Subscribe before the join frame goes out so the acknowledgement
        // cannot slip past the loop.
        let frames = transport.subscribe();
        let open = transport.watch_open();
        let join_ref = session.take_ref();
        let (joined_tx, joined_rx) = oneshot::channel();
        let task = tokio::spawn(Self::run(
            Arc::clone(&session),
            frames,
            open,
            join_ref.clone(),
            joined_tx,
        ));
        *session.reader.lock().await = Some(task);

        let handshake = session
            .transport
            .send(Envelope {
                topic: session.topic.clone(),
                event: protocol::EVENT_JOIN.to_string(),
                payload: Value::Object(Default::default()),
                msg_ref: Some(join_ref),
            })
            .await;
        if let Err(err) = handshake {
            session.abandon().await;
            return Err(err.into());
        }

        match tokio::time::timeout(JOIN_TIMEOUT, joined_rx).await {
            Ok(Ok(Ok(()))) => Ok(session),
            Ok(Ok(Err(join_error))) => {
                session.abandon().await;
                Err(join_error)
            }
            Ok(Err(_)) => {
                session.abandon().await;
                Err(JoinError::SessionClosed)
            }
            Err(_) => {
                session.abandon().await;
                Err(JoinError::Timeout(JOIN_TIMEOUT))
            }
        }
    }

    /// Ends the session: no handler drains, no acknowledgements awaited.
    /// Pending command callers observe `SessionClosed`.
    pub(crate) async fn leave(&self) {
        if self.mark_left().await {
            // Best effort; the server also notices socket-level departure.
            let _ = self
                .transport
                .send(Envelope {
                    topic: self.topic.clone(),
                    event: protocol::EVENT_LEAVE.to_string(),
                    payload: Value::Object(Default::default()),
                    msg_ref: Some(self.take_ref()),
                })
                .await;
            info!(topic = %self.topic, "channel: left");
        }
        self.abort_reader().await;
    }

    pub async fn is_joined(&self) -> bool {
        *self.state.lock().await == SessionState::Joined
    }

    /// Sends a command and waits for its acknowledgement.
    pub(crate) async fn push(&self, command: ClientCommand) -> Result<Value, CommandError> {
        if !self.is_joined().await {
            return Err(CommandError::NotJoined);
        }
        let payload = command.payload().map_err(TransportError::Encode)?;
        let msg_ref = self.take_ref();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending.lock().await.insert(msg_ref.clone(), ack_tx);
        // A leave that raced the insert has already cleared the map; don't
        // leave this caller waiting on a reply that can never arrive.
        if !self.is_joined().await {
            self.pending.lock().await.remove(&msg_ref);
            return Err(CommandError::SessionClosed);
        }

        let sent = self
            .transport
            .send(Envelope {
                topic: self.topic.clone(),
                event: command.name().to_string(),
                payload,
                msg_ref: Some(msg_ref.clone()),
            })
            .await;
        if let Err(err) = sent {
            self.pending.lock().await.remove(&msg_ref);
            return Err(err.into());
        }

        let reply = match tokio::time::timeout(PUSH_TIMEOUT, ack_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(CommandError::SessionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&msg_ref);
                return Err(CommandError::Timeout(PUSH_TIMEOUT));
            }
        };

        match reply.status {
            ReplyStatus::Ok => Ok(reply.response),
            ReplyStatus::Error | ReplyStatus::Timeout => {
                let errors = match reply.response {
                    Value::Object(mut map) => match map.remove("errors") {
                        Some(errors) => errors,
                        None => Value::Object(map),
                    },
                    other => other,
                };
                Err(CommandError::Rejected(ValidationErrors(errors)))
            }
        }
    }

    async fn run(
        session: Arc<Self>,
        mut frames: broadcast::Receiver<Envelope>,
        mut open: watch::Receiver<bool>,
        join_ref: String,
        joined_tx: JoinSignal,
    ) {
        let mut joined_tx = Some(joined_tx);
        loop {
            let envelope = tokio::select! {
                frame = frames.recv() => match frame {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            topic = %session.topic,
                            skipped,
                            "channel: receiver lagged; inbound operations were lost"
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = open.changed() => {
                    if changed.is_err() || !*open.borrow() {
                        warn!(topic = %session.topic, "channel: transport closed under the session");
                        break;
                    }
                    continue;
                }
            };

            if envelope.topic != session.topic {
                continue;
            }
            if envelope.event == protocol::EVENT_REPLY {
                session
                    .handle_reply(envelope, &join_ref, &mut joined_tx)
                    .await;
            } else if envelope.event == protocol::EVENT_ERROR
                || envelope.event == protocol::EVENT_CLOSE
            {
                warn!(
                    topic = %session.topic,
                    event = %envelope.event,
                    "channel: server ended the subscription"
                );
                break;
            } else {
                session.handle_operation(envelope);
            }
        }

        session.mark_left().await;
        if let Some(tx) = joined_tx.take() {
            let _ = tx.send(Err(JoinError::SessionClosed));
        }
    }

    fn handle_operation(&self, envelope: Envelope) {
        match ServerOp::decode(&envelope.event, envelope.payload) {
            Ok(Some(op)) => {
                let name = op.name();
                if self.writer.apply(op) {
                    debug!(topic = %self.topic, op = name, "channel: applied operation");
                } else {
                    debug!(topic = %self.topic, op = name, "channel: dropped stale operation");
                }
            }
            Ok(None) => {
                debug!(topic = %self.topic, event = %envelope.event, "channel: ignoring unknown event");
            }
            Err(err) => {
                warn!(
                    topic = %self.topic,
                    event = %envelope.event,
                    "channel: undecodable operation payload: {err}"
                );
            }
        }
    }

    async fn handle_reply(
        &self,
        envelope: Envelope,
        join_ref: &str,
        joined_tx: &mut Option<JoinSignal>,
    ) {
        let Some(msg_ref) = envelope.msg_ref else {
            debug!(topic = %self.topic, "channel: reply without ref");
            return;
        };
        let reply: Reply = match serde_json::from_value(envelope.payload) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(topic = %self.topic, "channel: undecodable reply: {err}");
                return;
            }
        };

        if msg_ref == join_ref {
            let outcome = self.complete_join(reply).await;
            if let Some(tx) = joined_tx.take() {
                let _ = tx.send(outcome);
            }
            return;
        }

        match self.pending.lock().await.remove(&msg_ref) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => {
                debug!(topic = %self.topic, msg_ref = %msg_ref, "channel: late acknowledgement ignored");
            }
        }
    }

    /// Seeding happens here, inside the receive loop, so every operation
    /// queued behind the acknowledgement finds the snapshot in place.
    async fn complete_join(&self, reply: Reply) -> Result<(), JoinError> {
        match reply.status {
            ReplyStatus::Ok => {
                let response: JoinResponse =
                    serde_json::from_value(reply.response).map_err(|err| JoinError::Rejected {
                        reason: format!("malformed join response: {err}"),
                    })?;
                if !self.writer.seed(replica::seed(response.event)) {
                    return Err(JoinError::SessionClosed);
                }
                *self.state.lock().await = SessionState::Joined;
                info!(topic = %self.topic, "channel: joined");
                Ok(())
            }
            ReplyStatus::Error | ReplyStatus::Timeout => {
                let reason = serde_json::from_value::<JoinRejection>(reply.response)
                    .map(|rejection| rejection.reason)
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(JoinError::Rejected { reason })
            }
        }
    }

    /// Flips the session to left and drops pending acknowledgements.
    /// Returns whether this call performed the transition.
    async fn mark_left(&self) -> bool {
        {
            let mut state = self.state.lock().await;
            if *state == SessionState::Left {
                return false;
            }
            *state = SessionState::Left;
        }
        self.pending.lock().await.clear();
        // Only the active session may demote the published status; a
        // superseded one stays silent.
        if self.writer.is_current() {
            let _ = self.status.send(ChannelStatus::NotJoined);
        }
        true
    }

    async fn abandon(&self) {
        self.mark_left().await;
        self.abort_reader().await;
    }

    async fn abort_reader(&self) {
        if let Some(task) = self.reader.lock().await.take() {
            task.abort();
        }
    }

    fn take_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }
}
