//! EventStore: the vote ledger behind a single sequential worker.
//!
//! The connection is owned by a spawned task and only touched there. Callers
//! hold a cheap cloneable handle that queues commands; replies come back on
//! oneshot channels. Commands run in arrival order, one statement at a time.

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use votegate_common::{format_vote_time, parse_vote_time, Actor, FreshnessPolicy};

use crate::backend::{BackendSettings, VoteTable};
use crate::error::{StoreError, StoreResult};
use crate::types::{NewVote, StoredVote};

enum Command {
    Append(NewVote),
    HasSatisfied {
        actor: Actor,
        now: DateTime<Utc>,
        reply: oneshot::Sender<bool>,
    },
    LatestVote {
        actor: Actor,
        reply: oneshot::Sender<StoreResult<Option<NaiveDateTime>>>,
    },
    Count {
        reply: oneshot::Sender<StoreResult<u64>>,
    },
    Wipe {
        reply: oneshot::Sender<StoreResult<u64>>,
    },
    Reconnect {
        settings: BackendSettings,
        policy: FreshnessPolicy,
        reply: oneshot::Sender<StoreResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the vote store. Clones share the same worker and connection.
#[derive(Clone)]
pub struct EventStore {
    tx: mpsc::UnboundedSender<Command>,
}

impl EventStore {
    /// Start the worker and connect. A failed connect is logged and leaves the
    /// store disconnected; every later operation fails on its own until a
    /// successful [`reconnect`](Self::reconnect).
    pub async fn open(settings: BackendSettings, policy: FreshnessPolicy) -> Self {
        let (store, connected) = Self::spawn(settings, policy);
        let _ = connected.await;
        store
    }

    /// Like [`open`](Self::open) but surfaces the connect failure and stops
    /// the worker.
    pub async fn try_open(settings: BackendSettings, policy: FreshnessPolicy) -> StoreResult<Self> {
        let (store, connected) = Self::spawn(settings, policy);
        match connected.await {
            Ok(Ok(())) => Ok(store),
            Ok(Err(e)) => {
                store.shutdown().await;
                Err(e)
            }
            Err(_) => Err(StoreError::Closed),
        }
    }

    fn spawn(
        settings: BackendSettings,
        policy: FreshnessPolicy,
    ) -> (Self, oneshot::Receiver<StoreResult<()>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = Worker::new(policy);
        tokio::spawn(worker.run(settings, rx, ready_tx));
        (Self { tx }, ready_rx)
    }

    /// Fire-and-forget insert. Failures are logged by the worker.
    pub fn append(&self, vote: NewVote) {
        if self.tx.send(Command::Append(vote)).is_err() {
            warn!("Vote dropped: store has been shut down");
        }
    }

    /// Whether the actor's latest vote is fresh right now.
    pub async fn has_satisfied_today(&self, actor: &Actor) -> bool {
        self.has_satisfied_at(actor, Utc::now()).await
    }

    /// Whether the actor's latest vote is fresh at `now`. `false` when there
    /// is no vote, the stored time is unparsable, or the lookup fails.
    pub async fn has_satisfied_at(&self, actor: &Actor, now: DateTime<Utc>) -> bool {
        let actor = actor.clone();
        self.request(|reply| Command::HasSatisfied { actor, now, reply })
            .await
            .unwrap_or(false)
    }

    /// Most recent vote time for the actor: by identifier first, then by
    /// case-insensitive name when the identifier has no history.
    pub async fn latest_vote(&self, actor: &Actor) -> StoreResult<Option<NaiveDateTime>> {
        let actor = actor.clone();
        self.request(|reply| Command::LatestVote { actor, reply })
            .await
            .unwrap_or(Err(StoreError::Closed))
    }

    pub async fn count(&self) -> StoreResult<u64> {
        self.request(|reply| Command::Count { reply })
            .await
            .unwrap_or(Err(StoreError::Closed))
    }

    pub async fn try_is_empty(&self) -> StoreResult<bool> {
        self.count().await.map(|n| n == 0)
    }

    /// `true` iff the table has no rows. A failed check reports `false`.
    pub async fn is_empty(&self) -> bool {
        match self.try_is_empty().await {
            Ok(empty) => empty,
            Err(e) => {
                error!(error = %e, "Failed to check vote store state");
                false
            }
        }
    }

    /// Delete every vote. Idempotent. Returns the number of rows removed.
    pub async fn wipe(&self) -> StoreResult<u64> {
        self.request(|reply| Command::Wipe { reply })
            .await
            .unwrap_or(Err(StoreError::Closed))
    }

    /// Close the current connection and open one from `settings`, then
    /// re-bootstrap the schema. The freshness policy is replaced as well.
    pub async fn reconnect(
        &self,
        settings: BackendSettings,
        policy: FreshnessPolicy,
    ) -> StoreResult<()> {
        self.request(|reply| Command::Reconnect {
            settings,
            policy,
            reply,
        })
        .await
        .unwrap_or(Err(StoreError::Closed))
    }

    /// Release the connection and stop the worker. Commands queued behind the
    /// shutdown are dropped.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).ok()?;
        rx.await.ok()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    table: Option<VoteTable>,
    /// Where the last connect attempt pointed; re-used after a lost
    /// connection.
    settings: Option<BackendSettings>,
    policy: FreshnessPolicy,
}

/// Run a table operation; if the connection turns out to be gone, reopen
/// from the last settings and run it once more.
macro_rules! retry_once {
    ($worker:ident, $op:expr) => {{
        let first = $op;
        match first {
            Err(e) if e.is_connection_lost() => {
                $worker.recover(&e).await?;
                $op
            }
            other => other,
        }
    }};
}

impl Worker {
    fn new(policy: FreshnessPolicy) -> Self {
        Self {
            table: None,
            settings: None,
            policy,
        }
    }

    async fn run(
        mut self,
        settings: BackendSettings,
        mut rx: mpsc::UnboundedReceiver<Command>,
        ready: oneshot::Sender<StoreResult<()>>,
    ) {
        let _ = ready.send(self.connect(&settings).await);

        while let Some(command) = rx.recv().await {
            match command {
                Command::Append(vote) => {
                    if let Err(e) = self.append(&vote).await {
                        error!(actor = %vote.actor, error = %e, "Failed to insert vote");
                    }
                }
                Command::HasSatisfied { actor, now, reply } => {
                    let _ = reply.send(self.has_satisfied(&actor, now).await);
                }
                Command::LatestVote { actor, reply } => {
                    let _ = reply.send(self.latest_vote(&actor).await);
                }
                Command::Count { reply } => {
                    let _ = reply.send(self.count().await);
                }
                Command::Wipe { reply } => {
                    let _ = reply.send(self.wipe().await);
                }
                Command::Reconnect {
                    settings,
                    policy,
                    reply,
                } => {
                    self.disconnect().await;
                    self.policy = policy;
                    let _ = reply.send(self.connect(&settings).await);
                }
                Command::Shutdown { reply } => {
                    rx.close();
                    self.disconnect().await;
                    info!("Vote store shut down");
                    let _ = reply.send(());
                    return;
                }
            }
        }

        // Every handle dropped without an explicit shutdown.
        self.disconnect().await;
    }

    async fn connect(&mut self, settings: &BackendSettings) -> StoreResult<()> {
        self.settings = Some(settings.clone());
        match VoteTable::open(settings).await {
            Ok(table) => {
                self.table = Some(table);
                Ok(())
            }
            Err(e) => {
                error!(backend = %settings.kind(), error = %e, "Failed to connect vote store");
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(table) = self.table.take() {
            debug!(table = table.name(), "Closing vote store connection");
            table.close().await;
        }
    }

    /// Drop a dead table and open a fresh one from the last settings. A
    /// failure leaves the store disconnected.
    async fn recover(&mut self, cause: &StoreError) -> StoreResult<()> {
        let Some(settings) = self.settings.clone() else {
            return Err(StoreError::Disconnected);
        };
        warn!(backend = %settings.kind(), error = %cause, "Vote store connection lost, reopening");
        self.disconnect().await;
        self.connect(&settings).await
    }

    fn table(&self) -> StoreResult<&VoteTable> {
        self.table.as_ref().ok_or(StoreError::Disconnected)
    }

    async fn append(&mut self, vote: &NewVote) -> StoreResult<()> {
        let row = StoredVote {
            actor_id: vote.actor.id.to_string(),
            actor_name: vote.actor.name.clone(),
            source_name: vote.source.clone(),
            occurred_at: format_vote_time(vote.occurred_at),
        };
        retry_once!(self, self.table()?.insert(&row).await)?;
        debug!(actor = %vote.actor, source = %vote.source, at = %row.occurred_at, "Vote recorded");
        Ok(())
    }

    async fn count(&mut self) -> StoreResult<u64> {
        retry_once!(self, self.table()?.count().await)
    }

    async fn latest_vote(&mut self, actor: &Actor) -> StoreResult<Option<NaiveDateTime>> {
        let raw = retry_once!(self, self.latest_raw(actor).await)?;
        raw.map(|raw| parse_vote_time(&raw).ok_or(StoreError::InvalidTimestamp(raw)))
            .transpose()
    }

    async fn latest_raw(&self, actor: &Actor) -> StoreResult<Option<String>> {
        let table = self.table()?;
        let raw = table.latest_time_by_id(&actor.id.to_string()).await?;
        if raw.is_some() || actor.name.trim().is_empty() {
            return Ok(raw);
        }
        table.latest_time_by_name(&actor.name).await
    }

    async fn has_satisfied(&mut self, actor: &Actor, now: DateTime<Utc>) -> bool {
        match self.latest_vote(actor).await {
            Ok(Some(at)) => self.policy.is_fresh(at, now),
            Ok(None) => false,
            Err(e) => {
                error!(actor = %actor, error = %e, "Failed to check vote");
                false
            }
        }
    }

    async fn wipe(&mut self) -> StoreResult<u64> {
        let result = retry_once!(self, self.table()?.delete_all().await);
        match &result {
            Ok(deleted) => info!(deleted, "All vote records have been wiped"),
            Err(e) => error!(error = %e, "Failed to wipe votes"),
        }
        result
    }
}
