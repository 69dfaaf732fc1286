//! Named wrappers over the session push contract, one per user-facing
//! mutation. A command never touches the snapshot itself; the resulting
//! state change arrives later as an ordinary inbound operation. `Ok(())`
//! only means the request was accepted.

use std::sync::Arc;

use shared::{
    domain::{DecisionId, Objective},
    protocol::{ClientCommand, CustomOption, DecisionPatch, DecisionResolution, EventPatch,
        NewDecision, NewPoll},
};

use crate::{error::CommandError, session::SubscriptionSession};

/// Handle bound to the session that was current when it was obtained. After
/// that session leaves, every call resolves with `SessionClosed`; fetch a
/// fresh handle from the lifecycle manager.
pub struct CommandSender {
    session: Arc<SubscriptionSession>,
}

impl CommandSender {
    pub(crate) fn new(session: Arc<SubscriptionSession>) -> Self {
        Self { session }
    }

    pub async fn join_event(&self) -> Result<(), CommandError> {
        self.send(ClientCommand::JoinEvent {}).await
    }

    pub async fn leave_event(&self) -> Result<(), CommandError> {
        self.send(ClientCommand::LeaveEvent {}).await
    }

    pub async fn update_event(&self, event: EventPatch) -> Result<(), CommandError> {
        self.send(ClientCommand::UpdateEvent { event }).await
    }

    pub async fn add_decision(&self, decision: NewDecision) -> Result<(), CommandError> {
        self.send(ClientCommand::AddDecision { decision }).await
    }

    pub async fn update_decision(&self, decision: DecisionPatch) -> Result<(), CommandError> {
        self.send(ClientCommand::UpdateDecision { decision }).await
    }

    pub async fn open_discussion(&self, objective: Objective) -> Result<(), CommandError> {
        self.send(ClientCommand::OpenDiscussion { objective }).await
    }

    pub async fn resolve_decision(
        &self,
        decision_id: DecisionId,
        resolution: impl Into<String>,
    ) -> Result<(), CommandError> {
        self.send(ClientCommand::ResolveDecision {
            decision: DecisionResolution {
                id: decision_id,
                resolution: resolution.into(),
            },
        })
        .await
    }

    pub async fn discard_resolution(&self, decision_id: DecisionId) -> Result<(), CommandError> {
        self.send(ClientCommand::DiscardResolution { decision_id }).await
    }

    pub async fn remove_decision(&self, decision_id: DecisionId) -> Result<(), CommandError> {
        self.send(ClientCommand::RemoveDecision { decision_id }).await
    }

    pub async fn add_poll(
        &self,
        decision_id: DecisionId,
        poll: NewPoll,
    ) -> Result<(), CommandError> {
        self.send(ClientCommand::AddPoll { decision_id, poll }).await
    }

    pub async fn discard_poll(&self, decision_id: DecisionId) -> Result<(), CommandError> {
        self.send(ClientCommand::DiscardPoll { decision_id }).await
    }

    pub async fn vote(
        &self,
        decision_id: DecisionId,
        custom_option: Option<CustomOption>,
        options: Vec<String>,
    ) -> Result<(), CommandError> {
        self.send(ClientCommand::Vote {
            decision_id,
            custom_option,
            options,
        })
        .await
    }

    pub async fn chat_shout(&self, text: impl Into<String>) -> Result<(), CommandError> {
        self.send(ClientCommand::ChatShout { text: text.into() }).await
    }

    async fn send(&self, command: ClientCommand) -> Result<(), CommandError> {
        self.session.push(command).await.map(|_| ())
    }
}
