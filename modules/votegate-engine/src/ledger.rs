//! VoteLedger / VoteSink implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use votegate_common::{Actor, FreshnessPolicy};
use votegate_events::{EventStore, NewVote};

use crate::traits::{VoteLedger, VoteSink};

// ---------------------------------------------------------------------------
// EventStore adapter (production)
// ---------------------------------------------------------------------------

#[async_trait]
impl VoteLedger for EventStore {
    async fn has_satisfied_today(&self, actor: &Actor) -> bool {
        EventStore::has_satisfied_today(self, actor).await
    }
}

impl VoteSink for EventStore {
    fn append(&self, vote: NewVote) {
        EventStore::append(self, vote)
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger (tests, no database required)
// ---------------------------------------------------------------------------

/// In-memory ledger with the same lookup rules as the store: identifier
/// first, case-insensitive name when the identifier has no votes.
/// The clock is fixed when set with [`MemoryLedger::at`].
pub struct MemoryLedger {
    policy: FreshnessPolicy,
    now: Mutex<Option<DateTime<Utc>>>,
    votes: Mutex<Vec<NewVote>>,
    checks: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(policy: FreshnessPolicy) -> Self {
        Self {
            policy,
            now: Mutex::new(None),
            votes: Mutex::new(Vec::new()),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn at(self, now: DateTime<Utc>) -> Self {
        self.set_now(now);
        self
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
    }

    pub fn record(&self, actor: &Actor, occurred_at: NaiveDateTime) {
        self.append(NewVote::new(actor.clone(), occurred_at));
    }

    /// Every vote appended so far.
    pub fn votes(&self) -> Vec<NewVote> {
        self.votes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of freshness checks answered.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn latest_vote(&self, actor: &Actor) -> Option<NaiveDateTime> {
        let votes = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
        let by_id = votes
            .iter()
            .filter(|v| v.actor.id == actor.id)
            .map(|v| v.occurred_at)
            .max();
        by_id.or_else(|| {
            if actor.name.trim().is_empty() {
                return None;
            }
            votes
                .iter()
                .filter(|v| v.actor.name.eq_ignore_ascii_case(&actor.name))
                .map(|v| v.occurred_at)
                .max()
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl VoteLedger for MemoryLedger {
    async fn has_satisfied_today(&self, actor: &Actor) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.latest_vote(actor)
            .is_some_and(|at| self.policy.is_fresh(at, self.now()))
    }
}

impl VoteSink for MemoryLedger {
    fn append(&self, vote: NewVote) {
        self.votes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(vote);
    }
}

// ---------------------------------------------------------------------------
// Arc<T> blankets, so one ledger can back the gate, the ingestor and the test
// ---------------------------------------------------------------------------

#[async_trait]
impl<L: VoteLedger + ?Sized> VoteLedger for Arc<L> {
    async fn has_satisfied_today(&self, actor: &Actor) -> bool {
        (**self).has_satisfied_today(actor).await
    }
}

impl<S: VoteSink + ?Sized> VoteSink for Arc<S> {
    fn append(&self, vote: NewVote) {
        (**self).append(vote)
    }
}
