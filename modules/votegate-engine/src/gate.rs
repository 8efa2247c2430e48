//! The command gate.
//!
//! Each attempt walks `Received -> Classifying -> PassThrough` or
//! `AwaitingVerdict -> Resuming | Notifying`. The ledger lookup is the only
//! suspension point; it runs on a spawned task and every actor-visible effect
//! goes back to the host through [`Host::schedule`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;
use votegate_common::{Actor, FileConfig, MessagesConfig};

use crate::traits::{Host, MainTask, VoteLedger};

const CONSOLE_PLAYER_PREFIX: &str = "[player] ";

/// Snapshot of everything the gate reads from configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub enabled: bool,
    /// Normalized tokens, config order, no duplicates.
    pub blocked: Vec<String>,
    pub bypass_permission: String,
    pub messages: MessagesConfig,
}

impl GateConfig {
    pub fn from_file(config: &FileConfig) -> Self {
        let mut blocked: Vec<String> = Vec::new();
        for token in config.blocked_commands.iter().filter_map(|c| base_command(c)) {
            if !blocked.contains(&token) {
                blocked.push(token);
            }
        }
        debug!(?blocked, "Blocked commands");

        Self {
            enabled: config.enable_plugin,
            blocked,
            bypass_permission: config.bypass_permission.clone(),
            messages: config.messages.clone(),
        }
    }

    pub fn is_blocked(&self, token: &str) -> bool {
        self.blocked.iter().any(|b| b == token)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

/// Lowercased first token of a command line, without its leading `/`.
/// `None` for blank input.
pub fn base_command(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    trimmed
        .split_whitespace()
        .next()
        .map(|token| token.to_lowercase())
}

/// How the host should treat the action it just handed to the gate.
#[derive(Debug)]
pub enum Interception {
    /// Not gated; let the default execution happen.
    PassThrough,
    /// Cancel the default execution. The verdict is being computed and its
    /// effect will arrive via [`Host::schedule`].
    Suspended(JoinHandle<Resolution>),
}

impl Interception {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Interception::Suspended(_))
    }

    /// Wait for the verdict. `None` for pass-through or a panicked task.
    pub async fn resolution(self) -> Option<Resolution> {
        match self {
            Interception::PassThrough => None,
            Interception::Suspended(handle) => handle.await.ok(),
        }
    }
}

/// Terminal state of a suspended attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resumed,
    Denied,
}

/// What to do once the ledger answers `true`.
enum Resume {
    Perform { command: String },
    Console { command: String },
}

pub struct CommandGate<L, H> {
    config: RwLock<Arc<GateConfig>>,
    ledger: Arc<L>,
    host: Arc<H>,
    /// Actors whose next command is a resumed one. Consume-once.
    reentry: Arc<Mutex<HashSet<Uuid>>>,
}

impl<L, H> CommandGate<L, H>
where
    L: VoteLedger + 'static,
    H: Host,
{
    pub fn new(config: GateConfig, ledger: Arc<L>, host: Arc<H>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            ledger,
            host,
            reentry: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Swap the configuration snapshot. Attempts already suspended keep the
    /// snapshot they started with.
    pub fn reload(&self, config: GateConfig) {
        debug!(blocked = ?config.blocked, enabled = config.enabled, "Gate configuration reloaded");
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    pub fn config(&self) -> Arc<GateConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A command typed by (or performed on behalf of) an actor. `message` is
    /// the full line including its leading `/`.
    pub fn intercept_command(&self, actor: &Actor, message: &str) -> Interception {
        if self.take_reentry(actor) {
            debug!(actor = %actor.name, message, "[REENTRY] resumed command passes");
            return Interception::PassThrough;
        }

        let Some((config, base)) = self.classify(actor, message) else {
            return Interception::PassThrough;
        };

        debug!(actor = %actor.name, message, "[INTERCEPT]");
        let command = message.trim().strip_prefix('/').unwrap_or(message.trim()).to_string();
        self.suspend(actor.clone(), config, base, Resume::Perform { command })
    }

    /// A console line of the form `[player] <name> <command...>`. Anything
    /// else, or an actor that is not online, passes through.
    pub fn intercept_console(&self, line: &str) -> Interception {
        let Some(rest) = line.trim().strip_prefix(CONSOLE_PLAYER_PREFIX) else {
            return Interception::PassThrough;
        };
        let Some((name, command)) = rest.trim().split_once(char::is_whitespace) else {
            return Interception::PassThrough;
        };
        let command = command.trim();
        if command.is_empty() {
            return Interception::PassThrough;
        }
        let Some(actor) = self.host.find_player_exact(name) else {
            return Interception::PassThrough;
        };

        let Some((config, base)) = self.classify(&actor, command) else {
            return Interception::PassThrough;
        };

        debug!(actor = %actor.name, command, "[INTERCEPT] console directed");
        let command = format!("{CONSOLE_PLAYER_PREFIX}{} {command}", actor.name);
        self.suspend(actor, config, base, Resume::Console { command })
    }

    fn take_reentry(&self, actor: &Actor) -> bool {
        self.reentry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&actor.id)
    }

    /// `Some` when the command is gated for this actor.
    fn classify(&self, actor: &Actor, command: &str) -> Option<(Arc<GateConfig>, String)> {
        let config = self.config();
        let base = base_command(command)?;
        if !config.is_blocked(&base) || !config.enabled {
            return None;
        }
        if self.host.has_permission(actor, &config.bypass_permission) {
            debug!(actor = %actor.name, command = %base, "[BYPASS]");
            return None;
        }
        Some((config, base))
    }

    fn suspend(&self, actor: Actor, config: Arc<GateConfig>, base: String, resume: Resume) -> Interception {
        let ledger = self.ledger.clone();
        let host = self.host.clone();
        let reentry = self.reentry.clone();

        let handle = tokio::spawn(async move {
            if ledger.has_satisfied_today(&actor).await {
                debug!(actor = %actor.name, command = %base, "[ALLOW]");
                let task = match resume {
                    Resume::Perform { command } => {
                        reentry
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(actor.id);
                        MainTask::PerformCommand { actor, command }
                    }
                    Resume::Console { command } => MainTask::DispatchConsole { command },
                };
                host.schedule(task);
                Resolution::Resumed
            } else {
                debug!(actor = %actor.name, command = %base, "[BLOCK]");
                let message = config
                    .messages
                    .render_not_voted(&actor.name, &format!("/{base}"));
                host.schedule(MainTask::Notify { actor, message });
                Resolution::Denied
            }
        });

        Interception::Suspended(handle)
    }
}
