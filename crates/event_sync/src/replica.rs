//! The replica document and the pure transforms that advance it.
//!
//! Each server operation maps to one function `(snapshot, payload) ->
//! snapshot'`. Transforms never mutate their input and never fail: an
//! operation aimed at something that no longer exists (a removed decision, a
//! poll-less decision) returns the snapshot unchanged, because broadcasts may
//! race with a removal that already applied.

use chrono::{DateTime, Utc};
use im::{HashMap, HashSet, Vector};
use shared::{
    domain::{DecisionId, EventId, Objective, UserId},
    protocol::{
        ChatMessage, CustomOption, DecisionPatch, DecisionResolution, DecisionSnapshot,
        EventPatch, EventSnapshot, Poll, PollOption, UserSnapshot,
    },
};
use uuid::Uuid;

/// Oldest chat entries are dropped past this point.
pub const CHAT_BACKLOG_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub is_online: bool,
}

impl Participant {
    fn from_snapshot(user: &UserSnapshot, is_online: bool) -> Self {
        Self {
            name: user.name.clone(),
            email: user.email.clone(),
            image: user.image.clone(),
            is_online,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOptionState {
    pub id: String,
    pub text: String,
    pub votes: Vec<UserId>,
}

impl PollOptionState {
    fn from_wire(option: PollOption) -> Self {
        Self {
            id: option.id,
            text: option.text,
            votes: option.votes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    pub question: String,
    pub custom_answer_enabled: bool,
    pub multiple_answers_enabled: bool,
    pub voted_by: HashSet<UserId>,
    pub options: Vec<PollOptionState>,
}

impl PollState {
    fn from_wire(poll: Poll) -> Self {
        Self {
            question: poll.question,
            custom_answer_enabled: poll.custom_answer_enabled,
            multiple_answers_enabled: poll.multiple_answers_enabled,
            voted_by: poll.voted_by.into_iter().collect(),
            options: poll.options.into_iter().map(PollOptionState::from_wire).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub id: DecisionId,
    pub title: String,
    pub description: Option<String>,
    pub objective: Objective,
    pub pending: bool,
    pub creator_id: UserId,
    pub resolution: Option<String>,
    pub poll: Option<PollState>,
}

impl Decision {
    fn from_wire(decision: DecisionSnapshot) -> Self {
        Self {
            id: decision.id,
            title: decision.title,
            description: decision.description,
            objective: decision.objective,
            pending: decision.pending,
            creator_id: decision.creator_id,
            resolution: decision.resolution,
            poll: decision.poll.map(PollState::from_wire),
        }
    }
}

/// One immutable snapshot of the event document. Cloning is cheap: the
/// keyed collections share structure with their ancestors, so observers can
/// hold on to a previous snapshot (e.g. to render what a removed decision
/// used to say) at no cost.
#[derive(Debug, Clone, PartialEq)]
pub struct EventReplica {
    pub id: EventId,
    pub title: String,
    pub description: Option<String>,
    pub place: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub creator_id: UserId,
    pub decisions: HashMap<DecisionId, Decision>,
    pub participants: HashMap<UserId, Participant>,
    pub ex_participants: HashMap<UserId, Participant>,
    pub chat: Vector<ChatMessage>,
}

/// Builds the initial replica from a join response. Everyone starts offline;
/// the presence full sync that follows the join flips the connected ones.
pub fn seed(snapshot: EventSnapshot) -> EventReplica {
    EventReplica {
        id: snapshot.id,
        title: snapshot.title,
        description: snapshot.description,
        place: snapshot.place,
        time: snapshot.time,
        creator_id: snapshot.creator_id,
        decisions: snapshot
            .decisions
            .into_iter()
            .map(|decision| (decision.id, Decision::from_wire(decision)))
            .collect(),
        participants: keyed_participants(&snapshot.participants),
        ex_participants: keyed_participants(&snapshot.ex_participants),
        chat: Vector::new(),
    }
}

fn keyed_participants(users: &[UserSnapshot]) -> HashMap<UserId, Participant> {
    users
        .iter()
        .map(|user| (user.id, Participant::from_snapshot(user, false)))
        .collect()
}

pub fn participant_joined(replica: &EventReplica, user: &UserSnapshot) -> EventReplica {
    let mut next = replica.clone();
    // A returning user keeps their presence flag; membership and presence
    // travel on separate messages.
    let was_online = next
        .participants
        .get(&user.id)
        .or_else(|| next.ex_participants.get(&user.id))
        .map(|participant| participant.is_online)
        .unwrap_or(false);
    next.ex_participants.remove(&user.id);
    next.participants
        .insert(user.id, Participant::from_snapshot(user, was_online));
    next
}

pub fn participant_left(replica: &EventReplica, user_id: UserId) -> EventReplica {
    let mut next = replica.clone();
    if let Some(participant) = next.participants.remove(&user_id) {
        next.ex_participants.insert(user_id, participant);
    }
    next
}

pub fn event_updated(replica: &EventReplica, patch: &EventPatch) -> EventReplica {
    let mut next = replica.clone();
    next.title = patch.title.clone();
    next.description = patch.description.clone();
    next.place = patch.place.clone();
    next.time = patch.time;
    next
}

/// Last write wins: a duplicate id is treated as a corrected re-broadcast of
/// the same decision.
pub fn decision_added(replica: &EventReplica, decision: DecisionSnapshot) -> EventReplica {
    let mut next = replica.clone();
    next.decisions.insert(decision.id, Decision::from_wire(decision));
    next
}

pub fn decision_updated(replica: &EventReplica, patch: &DecisionPatch) -> EventReplica {
    let mut next = replica.clone();
    if let Some(decision) = next.decisions.get_mut(&patch.id) {
        decision.title = patch.title.clone();
        decision.description = patch.description.clone();
    }
    next
}

pub fn decision_resolved(replica: &EventReplica, resolution: &DecisionResolution) -> EventReplica {
    let mut next = replica.clone();
    if let Some(decision) = next.decisions.get_mut(&resolution.id) {
        decision.pending = false;
        decision.resolution = Some(resolution.resolution.clone());
    }
    next
}

pub fn resolution_discarded(replica: &EventReplica, decision_id: DecisionId) -> EventReplica {
    let mut next = replica.clone();
    if let Some(decision) = next.decisions.get_mut(&decision_id) {
        decision.pending = true;
        decision.resolution = None;
    }
    next
}

pub fn decision_removed(replica: &EventReplica, decision_id: DecisionId) -> EventReplica {
    let mut next = replica.clone();
    next.decisions.remove(&decision_id);
    next
}

/// A discussion slot arrives as a full decision record; inserting it shares
/// `decision_added` semantics.
pub fn discussion_opened(replica: &EventReplica, decision: DecisionSnapshot) -> EventReplica {
    decision_added(replica, decision)
}

pub fn poll_added(replica: &EventReplica, decision_id: DecisionId, poll: Poll) -> EventReplica {
    let mut next = replica.clone();
    if let Some(decision) = next.decisions.get_mut(&decision_id) {
        decision.poll = Some(PollState::from_wire(poll));
    }
    next
}

pub fn poll_removed(replica: &EventReplica, decision_id: DecisionId) -> EventReplica {
    let mut next = replica.clone();
    if let Some(decision) = next.decisions.get_mut(&decision_id) {
        decision.poll = None;
    }
    next
}

/// Replaces the voter's selections: their previous marks are erased before
/// the new option set is applied, so re-voting moves votes instead of
/// accumulating them. A custom answer updates the matching synthetic option
/// or appends a new one.
pub fn vote_cast(
    replica: &EventReplica,
    user_id: UserId,
    decision_id: DecisionId,
    custom_option: Option<&CustomOption>,
    options: &[String],
) -> EventReplica {
    let mut next = replica.clone();
    let Some(decision) = next.decisions.get_mut(&decision_id) else {
        return next;
    };
    let Some(poll) = decision.poll.as_mut() else {
        return next;
    };

    for option in poll.options.iter_mut() {
        option.votes.retain(|voter| *voter != user_id);
    }
    for option_id in options {
        if let Some(option) = poll.options.iter_mut().find(|option| &option.id == option_id) {
            if !option.votes.contains(&user_id) {
                option.votes.push(user_id);
            }
        }
    }
    if let Some(custom) = custom_option {
        let existing = poll.options.iter_mut().find(|option| {
            custom.id.as_deref() == Some(option.id.as_str()) || option.text == custom.text
        });
        match existing {
            Some(option) => {
                if !option.votes.contains(&user_id) {
                    option.votes.push(user_id);
                }
            }
            None => poll.options.push(PollOptionState {
                id: custom
                    .id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                text: custom.text.clone(),
                votes: vec![user_id],
            }),
        }
    }
    poll.voted_by.insert(user_id);
    next
}

pub fn chat_shout_received(replica: &EventReplica, message: ChatMessage) -> EventReplica {
    let mut next = replica.clone();
    next.chat.push_back(message);
    while next.chat.len() > CHAT_BACKLOG_LIMIT {
        next.chat.pop_front();
    }
    next
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use shared::domain::MessageId;

    use super::*;

    fn user(id: i64, name: &str) -> UserSnapshot {
        UserSnapshot {
            id: UserId(id),
            name: name.to_string(),
            email: format!("{name}@example.com"),
            image: None,
        }
    }

    fn decision(id: i64, title: &str) -> DecisionSnapshot {
        DecisionSnapshot {
            id: DecisionId(id),
            title: title.to_string(),
            description: None,
            objective: Objective::General,
            pending: true,
            creator_id: UserId(1),
            resolution: None,
            poll: None,
        }
    }

    fn poll_with_options(ids: &[&str]) -> Poll {
        Poll {
            question: "which one".to_string(),
            custom_answer_enabled: true,
            multiple_answers_enabled: false,
            voted_by: Vec::new(),
            options: ids
                .iter()
                .map(|id| PollOption {
                    id: (*id).to_string(),
                    text: format!("option {id}"),
                    votes: Vec::new(),
                })
                .collect(),
        }
    }

    fn base_replica() -> EventReplica {
        seed(EventSnapshot {
            id: EventId(1),
            title: "team offsite".to_string(),
            description: Some("three days".to_string()),
            place: None,
            time: None,
            creator_id: UserId(1),
            decisions: vec![decision(1, "where to sleep")],
            participants: vec![user(1, "ann"), user(2, "ben")],
            ex_participants: vec![],
        })
    }

    fn message(id: i64, text: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId(id),
            user_id: UserId(1),
            text: text.to_string(),
            is_bot: false,
            inserted_at: NaiveDate::from_ymd_opt(2020, 5, 2)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn add_then_remove_decision_restores_previous_map() {
        let replica = base_replica();
        let added = decision_added(&replica, decision(2, "what to eat"));
        assert_eq!(added.decisions.len(), 2);
        let removed = decision_removed(&added, DecisionId(2));
        assert_eq!(removed.decisions, replica.decisions);
    }

    #[test]
    fn duplicate_decision_add_keeps_last_write() {
        let replica = base_replica();
        let first = decision_added(&replica, decision(2, "first title"));
        let second = decision_added(&first, decision(2, "corrected title"));
        assert_eq!(second.decisions.len(), 2);
        assert_eq!(second.decisions[&DecisionId(2)].title, "corrected title");
    }

    #[test]
    fn update_for_absent_decision_is_a_no_op() {
        let replica = base_replica();
        let patched = decision_updated(
            &replica,
            &DecisionPatch {
                id: DecisionId(42),
                title: "ghost".to_string(),
                description: None,
            },
        );
        assert_eq!(patched, replica);
    }

    #[test]
    fn event_update_replaces_fields_but_not_collections() {
        let replica = base_replica();
        let updated = event_updated(
            &replica,
            &EventPatch {
                title: "spring offsite".to_string(),
                description: None,
                place: Some("riga".to_string()),
                time: None,
            },
        );
        assert_eq!(updated.title, "spring offsite");
        assert_eq!(updated.description, None);
        assert_eq!(updated.place.as_deref(), Some("riga"));
        assert_eq!(updated.decisions, replica.decisions);
        assert_eq!(updated.participants, replica.participants);
    }

    #[test]
    fn participant_left_moves_exactly_one_entry_and_keeps_fields() {
        let replica = base_replica();
        let left = participant_left(&replica, UserId(2));
        assert_eq!(left.participants.len(), 1);
        assert_eq!(left.ex_participants.len(), 1);
        assert_eq!(
            left.ex_participants[&UserId(2)],
            replica.participants[&UserId(2)]
        );

        let twice = participant_left(&left, UserId(2));
        assert_eq!(twice, left);
    }

    #[test]
    fn rejoining_participant_leaves_ex_participants() {
        let replica = participant_left(&base_replica(), UserId(2));
        let rejoined = participant_joined(&replica, &user(2, "ben"));
        assert!(rejoined.participants.contains_key(&UserId(2)));
        assert!(!rejoined.ex_participants.contains_key(&UserId(2)));
    }

    #[test]
    fn resolution_cycle_toggles_pending_state() {
        let replica = base_replica();
        let resolved = decision_resolved(
            &replica,
            &DecisionResolution {
                id: DecisionId(1),
                resolution: "the cabin".to_string(),
            },
        );
        let decision = &resolved.decisions[&DecisionId(1)];
        assert!(!decision.pending);
        assert_eq!(decision.resolution.as_deref(), Some("the cabin"));

        let discarded = resolution_discarded(&resolved, DecisionId(1));
        let decision = &discarded.decisions[&DecisionId(1)];
        assert!(decision.pending);
        assert_eq!(decision.resolution, None);
    }

    #[test]
    fn revote_replaces_previous_selection() {
        let replica = poll_added(&base_replica(), DecisionId(1), poll_with_options(&["a", "b"]));
        let first = vote_cast(&replica, UserId(7), DecisionId(1), None, &["a".to_string()]);
        let second = vote_cast(&first, UserId(7), DecisionId(1), None, &["b".to_string()]);

        let poll = second.decisions[&DecisionId(1)].poll.as_ref().unwrap();
        assert!(poll.options[0].votes.is_empty());
        assert_eq!(poll.options[1].votes, vec![UserId(7)]);
        assert!(poll.voted_by.contains(&UserId(7)));
    }

    #[test]
    fn custom_option_vote_appends_synthetic_option_once() {
        let replica = poll_added(&base_replica(), DecisionId(1), poll_with_options(&["a"]));
        let custom = CustomOption {
            id: None,
            text: "a third thing".to_string(),
        };
        let voted = vote_cast(&replica, UserId(3), DecisionId(1), Some(&custom), &[]);
        let poll = voted.decisions[&DecisionId(1)].poll.as_ref().unwrap();
        assert_eq!(poll.options.len(), 2);
        assert_eq!(poll.options[1].text, "a third thing");
        assert_eq!(poll.options[1].votes, vec![UserId(3)]);

        // A second voter picking the same text lands on the same option.
        let again = vote_cast(&voted, UserId(4), DecisionId(1), Some(&custom), &[]);
        let poll = again.decisions[&DecisionId(1)].poll.as_ref().unwrap();
        assert_eq!(poll.options.len(), 2);
        assert_eq!(poll.options[1].votes, vec![UserId(3), UserId(4)]);
    }

    #[test]
    fn vote_against_missing_poll_is_a_no_op() {
        let replica = base_replica();
        let voted = vote_cast(&replica, UserId(7), DecisionId(1), None, &["a".to_string()]);
        assert_eq!(voted, replica);
    }

    #[test]
    fn chat_backlog_is_bounded() {
        let mut replica = base_replica();
        for i in 0..(CHAT_BACKLOG_LIMIT as i64 + 10) {
            replica = chat_shout_received(&replica, message(i, "hi"));
        }
        assert_eq!(replica.chat.len(), CHAT_BACKLOG_LIMIT);
        assert_eq!(replica.chat.front().unwrap().id, MessageId(10));
        assert_eq!(
            replica.chat.back().unwrap().id,
            MessageId(CHAT_BACKLOG_LIMIT as i64 + 9)
        );
    }

    #[test]
    fn snapshots_are_independent_values() {
        let replica = base_replica();
        let updated = decision_removed(&replica, DecisionId(1));
        // The older snapshot still sees the removed decision.
        assert!(replica.decisions.contains_key(&DecisionId(1)));
        assert!(!updated.decisions.contains_key(&DecisionId(1)));
    }
}
