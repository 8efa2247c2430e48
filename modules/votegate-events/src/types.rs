//! Vote records as written and as read back.

use chrono::NaiveDateTime;
use votegate_common::Actor;

pub const UNKNOWN_SOURCE: &str = "unknown";

/// A vote to be appended. The store assigns the surrogate id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVote {
    pub actor: Actor,
    pub source: String,
    /// Wall-clock time, no zone attached.
    pub occurred_at: NaiveDateTime,
}

impl NewVote {
    pub fn new(actor: Actor, occurred_at: NaiveDateTime) -> Self {
        Self {
            actor,
            source: UNKNOWN_SOURCE.to_string(),
            occurred_at,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// A row as stored. Columns are kept as the backend returned them so a
/// migration copies them verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVote {
    pub actor_id: String,
    pub actor_name: String,
    pub source_name: String,
    pub occurred_at: String,
}

impl From<(String, String, String, String)> for StoredVote {
    fn from(row: (String, String, String, String)) -> Self {
        let (actor_id, actor_name, source_name, occurred_at) = row;
        Self {
            actor_id,
            actor_name,
            source_name,
            occurred_at,
        }
    }
}
