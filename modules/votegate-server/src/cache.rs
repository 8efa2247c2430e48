//! Short-lived per-actor vote status, for callers that cannot wait on the
//! store (status lines, scoreboards).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;
use votegate_common::Actor;
use votegate_engine::VoteLedger;

pub const STATUS_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct CachedVote {
    voted: bool,
    checked_at: Instant,
}

#[derive(Debug, Default)]
struct Entries {
    votes: HashMap<Uuid, CachedVote>,
    /// Actors with a refresh already queued.
    inflight: HashSet<Uuid>,
    /// Bumped by `clear`; refreshes started under an older generation are
    /// discarded.
    generation: u64,
}

#[derive(Clone)]
pub struct VoteStatusCache {
    entries: Arc<Mutex<Entries>>,
    ttl: Duration,
}

impl VoteStatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            ttl,
        }
    }

    /// Answer from the cache without waiting. A missing or expired entry
    /// triggers one background refresh and the last known verdict (or
    /// `false`) is returned meanwhile.
    pub fn lookup<L: VoteLedger + 'static>(&self, actor: &Actor, ledger: Arc<L>) -> bool {
        let (cached, generation) = {
            let mut entries = self.lock();
            let cached = entries.votes.get(&actor.id).copied();
            if let Some(entry) = cached.filter(|e| e.checked_at.elapsed() < self.ttl) {
                return entry.voted;
            }
            if !entries.inflight.insert(actor.id) {
                return cached.is_some_and(|e| e.voted);
            }
            (cached, entries.generation)
        };

        let cache = self.clone();
        let actor = actor.clone();
        tokio::spawn(async move {
            cache.refresh_from(generation, &actor, &*ledger).await;
        });

        cached.is_some_and(|e| e.voted)
    }

    /// Query the ledger and store the verdict.
    pub async fn refresh<L: VoteLedger + ?Sized>(&self, actor: &Actor, ledger: &L) -> bool {
        let generation = self.lock().generation;
        self.refresh_from(generation, actor, ledger).await
    }

    async fn refresh_from<L: VoteLedger + ?Sized>(
        &self,
        generation: u64,
        actor: &Actor,
        ledger: &L,
    ) -> bool {
        let voted = ledger.has_satisfied_today(actor).await;

        let mut entries = self.lock();
        if entries.generation != generation {
            debug!(actor = %actor.name, "Vote status discarded after clear");
            return voted;
        }
        entries.inflight.remove(&actor.id);
        entries.votes.insert(
            actor.id,
            CachedVote {
                voted,
                checked_at: Instant::now(),
            },
        );
        debug!(actor = %actor.name, voted, "Vote status refreshed");
        voted
    }

    /// Forget every verdict, including refreshes still in flight.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.votes.clear();
        entries.inflight.clear();
        entries.generation += 1;
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VoteStatusCache {
    fn default() -> Self {
        Self::new(STATUS_TTL)
    }
}
