use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DecisionId, EventId, MessageId, Objective, UserId};

/// Channel control events, as spoken by the server's socket layer.
pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";

pub fn event_topic(event_hash: &str) -> String {
    format!("event:{event_hash}")
}

/// One websocket frame. Everything on the wire, in both directions, is an
/// envelope: control events, command pushes, replies, and broadcast
/// operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub msg_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Error,
    Timeout,
}

/// Payload of a `phx_reply` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub response: Value,
}

/// Successful join handshake response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub event: EventSnapshot,
}

/// Full event document as the server serializes it: participant and
/// decision collections are lists, keyed maps are a replica-side shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    pub creator_id: UserId,
    #[serde(default)]
    pub decisions: Vec<DecisionSnapshot>,
    #[serde(default)]
    pub participants: Vec<UserSnapshot>,
    #[serde(default)]
    pub ex_participants: Vec<UserSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub id: DecisionId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub objective: Objective,
    pub pending: bool,
    pub creator_id: UserId,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub poll: Option<Poll>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub question: String,
    pub custom_answer_enabled: bool,
    pub multiple_answers_enabled: bool,
    #[serde(default)]
    pub voted_by: Vec<UserId>,
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub votes: Vec<UserId>,
}

/// `event_updated` / `update_event` body: a full replacement of the four
/// negotiable event fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPatch {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPatch {
    pub id: DecisionId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResolution {
    pub id: DecisionId,
    pub resolution: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDecision {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPoll {
    pub question: String,
    pub custom_answer_enabled: bool,
    pub multiple_answers_enabled: bool,
    pub options: Vec<NewPollOption>,
}

/// Poll option as submitted by a client; the id is absent for options the
/// server has not assigned one yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPollOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
}

/// Free-text answer cast alongside a vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
}

/// One chat entry. `inserted_at` is a naive UTC timestamp, matching how the
/// server serializes record insertion times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub text: String,
    #[serde(default)]
    pub is_bot: bool,
    pub inserted_at: NaiveDateTime,
}

/// Presence full sync: one entry per currently-connected user, keyed by
/// stringified user id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceState(pub HashMap<String, PresenceEntry>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceEntry {
    #[serde(default)]
    pub metas: Vec<PresenceMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceMeta {
    #[serde(default)]
    pub phx_ref: Option<String>,
    #[serde(default)]
    pub online_at: Option<Value>,
}

/// Presence increment: connections that appeared and disappeared since the
/// previous presence message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceDiff {
    #[serde(default)]
    pub joins: HashMap<String, PresenceEntry>,
    #[serde(default)]
    pub leaves: HashMap<String, PresenceEntry>,
}

/// Server-pushed operations that advance the replica, in the order the
/// transport delivers them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerOp {
    UserJoined {
        user: UserSnapshot,
    },
    UserLeft {
        user_id: UserId,
    },
    EventUpdated {
        event: EventPatch,
    },
    DecisionAdded {
        decision: DecisionSnapshot,
    },
    DecisionUpdated {
        decision: DecisionPatch,
    },
    DecisionResolved {
        decision: DecisionResolution,
    },
    ResolutionDiscarded {
        decision_id: DecisionId,
    },
    DecisionRemoved {
        decision_id: DecisionId,
    },
    DiscussionOpened {
        decision: DecisionSnapshot,
    },
    PollAdded {
        decision_id: DecisionId,
        poll: Poll,
    },
    PollRemoved {
        decision_id: DecisionId,
    },
    UserVoted {
        user_id: UserId,
        decision_id: DecisionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_option: Option<CustomOption>,
        options: Vec<String>,
    },
    ChatShout {
        message: ChatMessage,
    },
    PresenceState(PresenceState),
    PresenceDiff(PresenceDiff),
}

impl ServerOp {
    /// Decodes a broadcast frame into an operation. `None` for event names
    /// this client does not know; control frames never reach this point.
    pub fn decode(event: &str, payload: Value) -> serde_json::Result<Option<Self>> {
        if !Self::is_operation(event) {
            return Ok(None);
        }
        serde_json::from_value(serde_json::json!({ "event": event, "payload": payload })).map(Some)
    }

    /// Splits the operation into its wire event name and payload object.
    pub fn encode(&self) -> serde_json::Result<(String, Value)> {
        let payload = match serde_json::to_value(self)? {
            Value::Object(mut map) => map.remove("payload").unwrap_or(Value::Null),
            other => other,
        };
        Ok((self.name().to_string(), payload))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerOp::UserJoined { .. } => "user_joined",
            ServerOp::UserLeft { .. } => "user_left",
            ServerOp::EventUpdated { .. } => "event_updated",
            ServerOp::DecisionAdded { .. } => "decision_added",
            ServerOp::DecisionUpdated { .. } => "decision_updated",
            ServerOp::DecisionResolved { .. } => "decision_resolved",
            ServerOp::ResolutionDiscarded { .. } => "resolution_discarded",
            ServerOp::DecisionRemoved { .. } => "decision_removed",
            ServerOp::DiscussionOpened { .. } => "discussion_opened",
            ServerOp::PollAdded { .. } => "poll_added",
            ServerOp::PollRemoved { .. } => "poll_removed",
            ServerOp::UserVoted { .. } => "user_voted",
            ServerOp::ChatShout { .. } => "chat_shout",
            ServerOp::PresenceState(_) => "presence_state",
            ServerOp::PresenceDiff(_) => "presence_diff",
        }
    }

    fn is_operation(event: &str) -> bool {
        matches!(
            event,
            "user_joined"
                | "user_left"
                | "event_updated"
                | "decision_added"
                | "decision_updated"
                | "decision_resolved"
                | "resolution_discarded"
                | "decision_removed"
                | "discussion_opened"
                | "poll_added"
                | "poll_removed"
                | "user_voted"
                | "chat_shout"
                | "presence_state"
                | "presence_diff"
        )
    }
}

/// User-initiated mutation requests. Every command is acknowledged with a
/// `phx_reply`; validation failures carry an `errors` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinEvent {},
    LeaveEvent {},
    UpdateEvent {
        event: EventPatch,
    },
    AddDecision {
        decision: NewDecision,
    },
    UpdateDecision {
        decision: DecisionPatch,
    },
    OpenDiscussion {
        objective: Objective,
    },
    ResolveDecision {
        decision: DecisionResolution,
    },
    DiscardResolution {
        decision_id: DecisionId,
    },
    RemoveDecision {
        decision_id: DecisionId,
    },
    AddPoll {
        decision_id: DecisionId,
        poll: NewPoll,
    },
    DiscardPoll {
        decision_id: DecisionId,
    },
    Vote {
        decision_id: DecisionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_option: Option<CustomOption>,
        options: Vec<String>,
    },
    ChatShout {
        text: String,
    },
}

impl ClientCommand {
    /// Wire payload object for this command.
    pub fn payload(&self) -> serde_json::Result<Value> {
        Ok(match serde_json::to_value(self)? {
            Value::Object(mut map) => map
                .remove("payload")
                .unwrap_or_else(|| Value::Object(Default::default())),
            other => other,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::JoinEvent {} => "join_event",
            ClientCommand::LeaveEvent {} => "leave_event",
            ClientCommand::UpdateEvent { .. } => "update_event",
            ClientCommand::AddDecision { .. } => "add_decision",
            ClientCommand::UpdateDecision { .. } => "update_decision",
            ClientCommand::OpenDiscussion { .. } => "open_discussion",
            ClientCommand::ResolveDecision { .. } => "resolve_decision",
            ClientCommand::DiscardResolution { .. } => "discard_resolution",
            ClientCommand::RemoveDecision { .. } => "remove_decision",
            ClientCommand::AddPoll { .. } => "add_poll",
            ClientCommand::DiscardPoll { .. } => "discard_poll",
            ClientCommand::Vote { .. } => "vote",
            ClientCommand::ChatShout { .. } => "chat_shout",
        }
    }
}
