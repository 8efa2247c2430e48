//! A line-oriented stand-in for a game server host.
//!
//! Players join by name, permissions are a per-name set, and every main
//! context task is queued on a channel that the run loop drains.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;
use votegate_common::Actor;
use votegate_engine::{Host, IdentityResolver, MainTask};

/// Prefix hashed into offline identifiers so the same name always maps to
/// the same id.
const OFFLINE_NAMESPACE: &str = "OfflinePlayer:";

pub struct ConsoleHost {
    online: RwLock<HashMap<String, Actor>>,
    permissions: RwLock<HashMap<String, HashSet<String>>>,
    main: mpsc::UnboundedSender<MainTask>,
}

impl ConsoleHost {
    /// The host plus the receiving end of its main-context queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MainTask>) {
        let (main, rx) = mpsc::unbounded_channel();
        let host = Self {
            online: RwLock::new(HashMap::new()),
            permissions: RwLock::new(HashMap::new()),
            main,
        };
        (host, rx)
    }

    /// Bring `name` online, reusing the actor if already connected.
    pub fn join(&self, name: &str) -> Actor {
        let mut online = self.online.write().unwrap_or_else(PoisonError::into_inner);
        online
            .entry(name.to_string())
            .or_insert_with(|| Actor::new(offline_id(name), name))
            .clone()
    }

    pub fn leave(&self, name: &str) -> Option<Actor> {
        self.online
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn grant(&self, name: &str, permission: &str) {
        self.permissions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_lowercase())
            .or_default()
            .insert(permission.to_string());
    }

    /// The online actor, or the offline identity for `name`.
    pub fn actor(&self, name: &str) -> Actor {
        self.find_player_exact(name)
            .unwrap_or_else(|| Actor::new(offline_id(name), name))
    }
}

/// Deterministic identifier for a name, stable across restarts.
pub fn offline_id(name: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{OFFLINE_NAMESPACE}{name}").as_bytes(),
    )
}

impl Host for ConsoleHost {
    fn has_permission(&self, actor: &Actor, permission: &str) -> bool {
        self.permissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&actor.name.to_lowercase())
            .is_some_and(|granted| granted.contains(permission))
    }

    fn find_player_exact(&self, name: &str) -> Option<Actor> {
        self.online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn schedule(&self, task: MainTask) {
        if self.main.send(task).is_err() {
            warn!("Main context is gone; task dropped");
        }
    }
}

impl IdentityResolver for ConsoleHost {
    fn online(&self, name: &str) -> Option<Actor> {
        self.find_player_exact(name)
    }

    fn offline_id(&self, name: &str) -> Uuid {
        offline_id(name)
    }
}
