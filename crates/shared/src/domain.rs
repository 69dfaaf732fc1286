use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(EventId);
id_newtype!(DecisionId);
id_newtype!(MessageId);

/// What a decision is negotiating. `Time` and `Place` decisions are
/// system-managed discussion slots tied to the event's own fields;
/// `General` decisions are free-standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Time,
    Place,
    General,
}

impl Objective {
    pub fn is_discussion_slot(self) -> bool {
        matches!(self, Objective::Time | Objective::Place)
    }
}
