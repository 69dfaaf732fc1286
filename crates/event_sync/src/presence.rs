//! Online/offline merge rules for the two presence payload shapes.
//!
//! A full sync is authoritative: it overwrites every participant's flag. A
//! diff only flips the users it names. Presence keys are stringified user
//! ids; a key that does not parse, or that names a user whose participant
//! record has not arrived yet, is skipped.

use im::HashSet;
use shared::{
    domain::UserId,
    protocol::{PresenceDiff, PresenceState},
};

use crate::replica::EventReplica;

pub fn presence_state_synced(replica: &EventReplica, state: &PresenceState) -> EventReplica {
    let online: HashSet<UserId> = state.0.keys().filter_map(parse_user_key).collect();
    let mut next = replica.clone();
    for (user_id, participant) in next.participants.iter_mut() {
        participant.is_online = online.contains(user_id);
    }
    for (user_id, participant) in next.ex_participants.iter_mut() {
        participant.is_online = online.contains(user_id);
    }
    next
}

pub fn presence_diff_applied(replica: &EventReplica, diff: &PresenceDiff) -> EventReplica {
    let mut next = replica.clone();
    for user_id in diff.joins.keys().filter_map(parse_user_key) {
        set_online(&mut next, user_id, true);
    }
    for user_id in diff.leaves.keys().filter_map(parse_user_key) {
        set_online(&mut next, user_id, false);
    }
    next
}

fn parse_user_key<S: AsRef<str>>(key: S) -> Option<UserId> {
    key.as_ref().parse::<i64>().ok().map(UserId)
}

fn set_online(replica: &mut EventReplica, user_id: UserId, is_online: bool) {
    if let Some(participant) = replica.participants.get_mut(&user_id) {
        participant.is_online = is_online;
    } else if let Some(participant) = replica.ex_participants.get_mut(&user_id) {
        participant.is_online = is_online;
    }
}

#[cfg(test)]
mod tests {
    use shared::{
        domain::{EventId, UserId},
        protocol::{EventSnapshot, PresenceEntry, UserSnapshot},
    };

    use super::*;
    use crate::replica::seed;

    fn entry() -> PresenceEntry {
        PresenceEntry { metas: Vec::new() }
    }

    fn replica_with_users(ids: &[i64]) -> EventReplica {
        seed(EventSnapshot {
            id: EventId(1),
            title: "brunch".to_string(),
            description: None,
            place: None,
            time: None,
            creator_id: UserId(ids[0]),
            decisions: vec![],
            participants: ids
                .iter()
                .map(|id| UserSnapshot {
                    id: UserId(*id),
                    name: format!("user-{id}"),
                    email: format!("user-{id}@example.com"),
                    image: None,
                })
                .collect(),
            ex_participants: vec![],
        })
    }

    #[test]
    fn full_sync_then_diff_leaves_only_remaining_users_online() {
        let replica = replica_with_users(&[1, 2, 3]);

        let mut state = PresenceState::default();
        state.0.insert("1".to_string(), entry());
        state.0.insert("2".to_string(), entry());
        let synced = presence_state_synced(&replica, &state);
        assert!(synced.participants[&UserId(1)].is_online);
        assert!(synced.participants[&UserId(2)].is_online);
        assert!(!synced.participants[&UserId(3)].is_online);

        let mut diff = PresenceDiff::default();
        diff.leaves.insert("1".to_string(), entry());
        let after = presence_diff_applied(&synced, &diff);
        assert!(!after.participants[&UserId(1)].is_online);
        assert!(after.participants[&UserId(2)].is_online);
        assert!(!after.participants[&UserId(3)].is_online);
    }

    #[test]
    fn full_sync_overwrites_rather_than_merges() {
        let replica = replica_with_users(&[1, 2]);

        let mut first = PresenceState::default();
        first.0.insert("1".to_string(), entry());
        let synced = presence_state_synced(&replica, &first);
        assert!(synced.participants[&UserId(1)].is_online);

        // A later sync without user 1 must flip them back offline.
        let mut second = PresenceState::default();
        second.0.insert("2".to_string(), entry());
        let resynced = presence_state_synced(&synced, &second);
        assert!(!resynced.participants[&UserId(1)].is_online);
        assert!(resynced.participants[&UserId(2)].is_online);
    }

    #[test]
    fn diff_for_unknown_user_is_ignored() {
        let replica = replica_with_users(&[1]);
        let mut diff = PresenceDiff::default();
        diff.joins.insert("99".to_string(), entry());
        diff.joins.insert("not-a-number".to_string(), entry());
        let after = presence_diff_applied(&replica, &diff);
        assert_eq!(after, replica);
    }

    #[test]
    fn diff_reaches_ex_participants() {
        let replica = replica_with_users(&[1, 2]);
        let left = crate::replica::participant_left(&replica, UserId(2));

        let mut diff = PresenceDiff::default();
        diff.joins.insert("2".to_string(), entry());
        let after = presence_diff_applied(&left, &diff);
        assert!(after.ex_participants[&UserId(2)].is_online);
    }
}
