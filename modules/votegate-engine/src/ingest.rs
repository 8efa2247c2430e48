//! Turns incoming vote notifications into store appends.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;
use votegate_common::{Actor, FreshnessPolicy};
use votegate_events::NewVote;

use crate::traits::{IdentityResolver, VoteSink};

pub struct VoteIngestor<S, R> {
    sink: S,
    resolver: R,
    policy: RwLock<FreshnessPolicy>,
}

impl<S: VoteSink, R: IdentityResolver> VoteIngestor<S, R> {
    pub fn new(sink: S, resolver: R, policy: FreshnessPolicy) -> Self {
        Self {
            sink,
            resolver,
            policy: RwLock::new(policy),
        }
    }

    /// Vote times are written in the policy zone, so a reload changes both.
    pub fn set_policy(&self, policy: FreshnessPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Record a vote for `username` timestamped now.
    pub fn on_vote(&self, username: &str, service: Option<&str>) -> Option<NewVote> {
        self.on_vote_at(username, service, Utc::now())
    }

    /// Record a vote received at `now`. Blank usernames are dropped.
    /// Returns the vote handed to the sink.
    pub fn on_vote_at(
        &self,
        username: &str,
        service: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<NewVote> {
        let username = username.trim();
        if username.is_empty() {
            debug!("Ignoring vote with blank username");
            return None;
        }

        let id = match self.resolver.online(username) {
            Some(actor) => actor.id,
            None => self.resolver.offline_id(username),
        };
        let policy = *self.policy.read().unwrap_or_else(PoisonError::into_inner);

        let mut vote = NewVote::new(Actor::new(id, username), policy.vote_time_now(now));
        if let Some(service) = service {
            vote = vote.with_source(service);
        }

        debug!(actor = %vote.actor, source = %vote.source, "Logged vote");
        self.sink.append(vote.clone());
        Some(vote)
    }
}
