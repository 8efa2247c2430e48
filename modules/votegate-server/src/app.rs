//! VoteGate: the core object every host-facing path goes through.
//!
//! Constructed once with [`VoteGate::init`], usable immediately (ready) and
//! released with [`VoteGate::shutdown`]. Nothing is global; hosts keep the
//! handle and pass it where needed.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};
use votegate_common::{Actor, ConfigResult, FileConfig};
use votegate_engine::{CommandGate, GateConfig, Host, IdentityResolver, Interception, VoteIngestor};
use votegate_events::{BackendSettings, EventStore, NewVote, StoreResult};

use crate::cache::VoteStatusCache;

pub struct VoteGate<H: Host + IdentityResolver> {
    config: RwLock<Arc<FileConfig>>,
    store: Arc<EventStore>,
    gate: CommandGate<EventStore, H>,
    ingestor: VoteIngestor<Arc<EventStore>, Arc<H>>,
    status: VoteStatusCache,
}

impl<H: Host + IdentityResolver> VoteGate<H> {
    /// Open the store from `config.database` and wire the gate and ingestor.
    /// A store that fails to connect is logged; the gate then denies every
    /// gated command until a successful [`reload`](Self::reload). Only an
    /// invalid config is an error here.
    pub async fn init(config: FileConfig, host: Arc<H>) -> ConfigResult<Self> {
        config.validate()?;
        let policy = config.freshness();
        let store = Arc::new(EventStore::open(BackendSettings::live(&config.database), policy).await);
        let gate = CommandGate::new(GateConfig::from_file(&config), store.clone(), host.clone());
        let ingestor = VoteIngestor::new(store.clone(), host, policy);

        info!(
            backend = %config.database.kind,
            enabled = config.enable_plugin,
            "Vote gate ready"
        );

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            store,
            gate,
            ingestor,
            status: VoteStatusCache::default(),
        })
    }

    pub fn config(&self) -> Arc<FileConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn gate(&self) -> &CommandGate<EventStore, H> {
        &self.gate
    }

    /// A vote arrived from the external source.
    pub fn on_vote(&self, username: &str, service: Option<&str>) -> Option<NewVote> {
        self.ingestor.on_vote(username, service)
    }

    /// An actor issued `message` (including its leading `/`).
    pub fn on_command(&self, actor: &Actor, message: &str) -> Interception {
        self.gate.intercept_command(actor, message)
    }

    /// The console is about to dispatch `line`.
    pub fn on_console(&self, line: &str) -> Interception {
        self.gate.intercept_console(line)
    }

    /// Cached vote status, `false` when not yet known.
    pub fn has_voted(&self, actor: &Actor) -> bool {
        self.status.lookup(actor, self.store.clone())
    }

    /// Apply a new configuration: swap the gate snapshot, then reconnect the
    /// store with the new database settings and freshness policy. An invalid
    /// config is rejected before anything changes.
    pub async fn reload(&self, config: FileConfig) -> StoreResult<()> {
        config.validate()?;
        let policy = config.freshness();
        self.gate.reload(GateConfig::from_file(&config));
        self.ingestor.set_policy(policy);
        self.status.clear();

        let settings = BackendSettings::live(&config.database);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);

        let result = self.store.reconnect(settings, policy).await;
        match &result {
            Ok(()) => info!("Configuration reloaded"),
            Err(e) => warn!(error = %e, "Configuration reloaded but the vote store is disconnected"),
        }
        result
    }

    pub async fn shutdown(self) {
        self.store.shutdown().await;
        info!("Vote gate stopped");
    }
}
