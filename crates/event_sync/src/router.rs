//! Routes inbound operations into replica transforms and owns the snapshot
//! holder the rest of the application observes.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use shared::protocol::ServerOp;
use tokio::sync::watch;

use crate::{presence, replica, replica::EventReplica};

/// Applies one inbound operation to a snapshot, producing the next one.
pub fn apply_op(snapshot: &EventReplica, op: ServerOp) -> EventReplica {
    match op {
        ServerOp::UserJoined { user } => replica::participant_joined(snapshot, &user),
        ServerOp::UserLeft { user_id } => replica::participant_left(snapshot, user_id),
        ServerOp::EventUpdated { event } => replica::event_updated(snapshot, &event),
        ServerOp::DecisionAdded { decision } => replica::decision_added(snapshot, decision),
        ServerOp::DecisionUpdated { decision } => replica::decision_updated(snapshot, &decision),
        ServerOp::DecisionResolved { decision } => replica::decision_resolved(snapshot, &decision),
        ServerOp::ResolutionDiscarded { decision_id } => {
            replica::resolution_discarded(snapshot, decision_id)
        }
        ServerOp::DecisionRemoved { decision_id } => {
            replica::decision_removed(snapshot, decision_id)
        }
        ServerOp::DiscussionOpened { decision } => replica::discussion_opened(snapshot, decision),
        ServerOp::PollAdded { decision_id, poll } => {
            replica::poll_added(snapshot, decision_id, poll)
        }
        ServerOp::PollRemoved { decision_id } => replica::poll_removed(snapshot, decision_id),
        ServerOp::UserVoted {
            user_id,
            decision_id,
            custom_option,
            options,
        } => replica::vote_cast(snapshot, user_id, decision_id, custom_option.as_ref(), &options),
        ServerOp::ChatShout { message } => replica::chat_shout_received(snapshot, message),
        ServerOp::PresenceState(state) => presence::presence_state_synced(snapshot, &state),
        ServerOp::PresenceDiff(diff) => presence::presence_diff_applied(snapshot, &diff),
    }
}

/// Shared holder for the current snapshot. The generation counter is the
/// fence against stale sessions: each session's writer captures the
/// generation it was created under, and a write lands only while that
/// generation is still the current one.
pub struct SnapshotHolder {
    generation: AtomicU64,
    tx: watch::Sender<Option<EventReplica>>,
}

impl SnapshotHolder {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(None);
        Arc::new(Self {
            generation: AtomicU64::new(0),
            tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<EventReplica>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<EventReplica> {
        self.tx.borrow().clone()
    }

    /// Invalidates every writer created under a previous generation and
    /// returns the new current generation.
    pub(crate) fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drops the snapshot, unless `generation` has already been superseded.
    pub(crate) fn clear(&self, generation: u64) {
        self.tx.send_if_modified(|slot| {
            if self.generation.load(Ordering::SeqCst) != generation || slot.is_none() {
                return false;
            }
            *slot = None;
            true
        });
    }

    pub(crate) fn writer(self: &Arc<Self>, generation: u64) -> SessionWriter {
        SessionWriter {
            generation,
            holder: Arc::clone(self),
        }
    }
}

/// Write handle bound to one session generation. The generation comparison
/// happens inside the watch channel's modify closure, so a session torn down
/// mid-flight can never clobber a newer session's snapshot.
#[derive(Clone)]
pub(crate) struct SessionWriter {
    generation: u64,
    holder: Arc<SnapshotHolder>,
}

impl SessionWriter {
    /// Seeds the snapshot from a join response. Returns false when this
    /// writer's session has been superseded during the handshake.
    pub fn seed(&self, replica: EventReplica) -> bool {
        self.holder.tx.send_if_modified(|slot| {
            if self.holder.generation.load(Ordering::SeqCst) != self.generation {
                return false;
            }
            *slot = Some(replica);
            true
        })
    }

    /// Applies one operation in arrival order. Returns false when the write
    /// was dropped: the session is stale, or no snapshot is seeded yet.
    pub fn apply(&self, op: ServerOp) -> bool {
        self.holder.tx.send_if_modified(|slot| {
            if self.holder.generation.load(Ordering::SeqCst) != self.generation {
                return false;
            }
            let Some(current) = slot.as_ref() else {
                return false;
            };
            *slot = Some(apply_op(current, op));
            true
        })
    }

    pub fn is_current(&self) -> bool {
        self.holder.current_generation() == self.generation
    }
}

#[cfg(test)]
mod tests {
    use shared::{
        domain::{DecisionId, EventId, UserId},
        protocol::{DecisionSnapshot, EventSnapshot},
    };

    use super::*;

    fn seeded_replica() -> EventReplica {
        replica::seed(EventSnapshot {
            id: EventId(1),
            title: "picnic".to_string(),
            description: None,
            place: None,
            time: None,
            creator_id: UserId(1),
            decisions: vec![],
            participants: vec![],
            ex_participants: vec![],
        })
    }

    fn decision_op(id: i64) -> ServerOp {
        ServerOp::DecisionAdded {
            decision: DecisionSnapshot {
                id: DecisionId(id),
                title: format!("decision {id}"),
                description: None,
                objective: shared::domain::Objective::General,
                pending: true,
                creator_id: UserId(1),
                resolution: None,
                poll: None,
            },
        }
    }

    #[test]
    fn stale_writer_cannot_clobber_newer_generation() {
        let holder = SnapshotHolder::new();
        let old = holder.writer(holder.advance_generation());
        assert!(old.seed(seeded_replica()));

        let fresh = holder.writer(holder.advance_generation());
        assert!(!old.is_current());
        assert!(!old.apply(decision_op(1)));

        assert!(fresh.seed(seeded_replica()));
        assert!(!old.apply(decision_op(2)));
        let current = holder.current().expect("seeded");
        assert!(current.decisions.is_empty());
    }

    #[test]
    fn apply_before_seed_is_dropped() {
        let holder = SnapshotHolder::new();
        let writer = holder.writer(holder.advance_generation());
        assert!(!writer.apply(decision_op(1)));
        assert!(holder.current().is_none());
    }

    #[test]
    fn clear_is_fenced_by_generation() {
        let holder = SnapshotHolder::new();
        let generation = holder.advance_generation();
        let writer = holder.writer(generation);
        assert!(writer.seed(seeded_replica()));

        let newer = holder.advance_generation();
        let fresh = holder.writer(newer);
        assert!(fresh.seed(seeded_replica()));

        // A clear issued for the superseded generation must not wipe the
        // fresh session's snapshot.
        holder.clear(generation);
        assert!(holder.current().is_some());
        holder.clear(newer);
        assert!(holder.current().is_none());
    }
}
