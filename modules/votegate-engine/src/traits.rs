//! Seams between the gate and the outside world.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;
use votegate_common::Actor;
use votegate_events::NewVote;

/// Answers "has this actor voted recently enough".
///
/// Implemented by `EventStore` and `MemoryLedger` (tests).
/// Also implemented for `Arc<L>` so a ledger can be shared for assertions.
#[async_trait]
pub trait VoteLedger: Send + Sync {
    /// Never fails: a lookup error is a `false`.
    async fn has_satisfied_today(&self, actor: &Actor) -> bool;
}

/// Best-effort vote recording.
pub trait VoteSink: Send + Sync {
    fn append(&self, vote: NewVote);
}

/// Work that must run on the host's main context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainTask {
    /// Run `command` (no leading `/`) as if the actor had typed it.
    PerformCommand { actor: Actor, command: String },
    /// Dispatch a console-directed command verbatim.
    DispatchConsole { command: String },
    /// Send a message to the actor.
    Notify { actor: Actor, message: String },
}

/// The host application as the gate sees it.
pub trait Host: Send + Sync + 'static {
    fn has_permission(&self, actor: &Actor, permission: &str) -> bool;

    /// Online actor with exactly this name.
    fn find_player_exact(&self, name: &str) -> Option<Actor>;

    /// Queue a task onto the main context. Must not run it inline.
    fn schedule(&self, task: MainTask);
}

/// Maps vote usernames to identities.
pub trait IdentityResolver: Send + Sync {
    /// The identity of a currently connected actor.
    fn online(&self, name: &str) -> Option<Actor>;

    /// Stable identifier for an actor that is not connected.
    fn offline_id(&self, name: &str) -> Uuid;
}

impl<R: IdentityResolver + ?Sized> IdentityResolver for Arc<R> {
    fn online(&self, name: &str) -> Option<Actor> {
        (**self).online(name)
    }

    fn offline_id(&self, name: &str) -> Uuid {
        (**self).offline_id(name)
    }
}
