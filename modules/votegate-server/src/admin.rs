//! Operator commands: status, wipe, migrate.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use votegate_common::BackendKind;
use votegate_engine::{Host, IdentityResolver};
use votegate_events::{migrate, MigrationOutcome, StoreError};

use crate::app::VoteGate;

/// Token the operator must pass to wipe the store.
pub const WIPE_CONFIRMATION: &str = "confirm";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("wipe deletes every vote record; repeat with `confirm` to proceed")]
    ConfirmationRequired,

    #[error("unknown database type `{0}` (expected sqlite or mysql)")]
    UnknownBackend(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub has_records: bool,
    pub plugin_enabled: bool,
    pub blocked_count: usize,
    pub blocked_commands: Vec<String>,
    pub backend: BackendKind,
    pub pool_size: u32,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database: {} ({})", if self.has_records { "active" } else { "empty" }, self.backend)?;
        if self.backend == BackendKind::MySql {
            writeln!(f, "Pool size: {}", self.pool_size)?;
        }
        writeln!(f, "Plugin status: {}", if self.plugin_enabled { "enabled" } else { "disabled" })?;
        write!(f, "Blocked commands: {}", self.blocked_count)?;
        for command in &self.blocked_commands {
            write!(f, "\n  - {command}")?;
        }
        Ok(())
    }
}

impl<H: Host + IdentityResolver> VoteGate<H> {
    pub async fn info(&self) -> StatusReport {
        let config = self.config();
        // A store that cannot answer is reported as holding nothing.
        let has_records = matches!(self.store().try_is_empty().await, Ok(false));

        StatusReport {
            has_records,
            plugin_enabled: config.enable_plugin,
            blocked_count: config.blocked_commands.len(),
            blocked_commands: config.blocked_commands.clone(),
            backend: config.database.kind,
            pool_size: config.database.mysql.pool_size,
        }
    }

    /// Delete every vote once the operator passed [`WIPE_CONFIRMATION`].
    pub async fn wipe(&self, token: &str) -> Result<u64, AdminError> {
        if !token.trim().eq_ignore_ascii_case(WIPE_CONFIRMATION) {
            return Err(AdminError::ConfirmationRequired);
        }
        let deleted = self.store().wipe().await?;
        info!(deleted, "Vote store wiped by operator");
        Ok(deleted)
    }

    /// Copy votes between the two configured backends, named
    /// case-insensitively.
    pub async fn migrate(&self, from: &str, to: &str) -> Result<MigrationOutcome, AdminError> {
        let from = parse_backend(from)?;
        let to = parse_backend(to)?;
        let config = self.config();

        let outcome = migrate(&config.database, from, to).await;
        if let MigrationOutcome::Failed(e) = &outcome {
            warn!(%from, %to, error = %e, "Operator migration failed");
        }
        Ok(outcome)
    }
}

fn parse_backend(name: &str) -> Result<BackendKind, AdminError> {
    name.parse()
        .map_err(|_| AdminError::UnknownBackend(name.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!(parse_backend("sqlite").unwrap(), BackendKind::Sqlite);
        assert_eq!(parse_backend(" MySQL ").unwrap(), BackendKind::MySql);
        assert!(matches!(
            parse_backend("postgres"),
            Err(AdminError::UnknownBackend(name)) if name == "postgres"
        ));
    }

    #[test]
    fn status_report_lists_blocked_commands() {
        let report = StatusReport {
            has_records: false,
            plugin_enabled: true,
            blocked_count: 2,
            blocked_commands: vec!["rewards".into(), "spawn".into()],
            backend: BackendKind::Sqlite,
            pool_size: 10,
        };
        let text = report.to_string();
        assert!(text.starts_with("Database: empty (SQLITE)"));
        assert!(!text.contains("Pool size"));
        assert!(text.ends_with("Blocked commands: 2\n  - rewards\n  - spawn"));
    }
}
