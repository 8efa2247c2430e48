//! Copy votes between backends without touching the live store.
//!
//! Both ends get their own pool. Rows already present at the
//! destination (same `player_uuid` and `vote_time`) are skipped, so a second
//! run over the same data copies nothing. The source is only read.

use futures::TryStreamExt;
use tracing::{error, info, warn};
use votegate_common::{BackendKind, DatabaseConfig};

use crate::backend::{BackendSettings, VoteTable};
use crate::error::{StoreError, StoreResult};

/// Result of a migration run.
#[derive(Debug)]
pub enum MigrationOutcome {
    /// Source and destination are the same backend; nothing was done.
    Skipped,
    /// Completed; number of rows inserted at the destination.
    Copied(u64),
    /// Aborted. Rows inserted before the failure stay in place.
    Failed(StoreError),
}

impl MigrationOutcome {
    /// Rows copied, `0` for skipped or failed runs.
    pub fn copied(&self) -> u64 {
        match self {
            MigrationOutcome::Copied(n) => *n,
            MigrationOutcome::Skipped | MigrationOutcome::Failed(_) => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MigrationOutcome::Failed(_))
    }
}

/// Migrate between two configured backends by kind.
pub async fn migrate(config: &DatabaseConfig, from: BackendKind, to: BackendKind) -> MigrationOutcome {
    if from == to {
        warn!(backend = %from, "Migration skipped: same database type");
        return MigrationOutcome::Skipped;
    }
    migrate_between(
        &BackendSettings::from_config(config, from),
        &BackendSettings::from_config(config, to),
    )
    .await
}

/// Migrate between two explicit locations.
pub async fn migrate_between(from: &BackendSettings, to: &BackendSettings) -> MigrationOutcome {
    if from == to {
        warn!(backend = %from.kind(), "Migration skipped: source and destination are identical");
        return MigrationOutcome::Skipped;
    }

    info!(from = %from.kind(), to = %to.kind(), "Starting migration");
    match copy_between(from, to).await {
        Ok(copied) => {
            info!(copied, "Migration complete");
            MigrationOutcome::Copied(copied)
        }
        Err(e) => {
            error!(from = %from.kind(), to = %to.kind(), error = %e, "Migration failed");
            MigrationOutcome::Failed(e)
        }
    }
}

async fn copy_between(from: &BackendSettings, to: &BackendSettings) -> StoreResult<u64> {
    let source = VoteTable::open(from).await?;
    let dest = match VoteTable::open(to).await {
        Ok(dest) => dest,
        Err(e) => {
            source.close().await;
            return Err(e);
        }
    };

    let result = copy_votes(&source, &dest).await;
    source.close().await;
    dest.close().await;
    result
}

async fn copy_votes(source: &VoteTable, dest: &VoteTable) -> StoreResult<u64> {
    info!(
        source = source.name(),
        source_backend = %source.kind(),
        dest = dest.name(),
        dest_backend = %dest.kind(),
        "Copying vote table"
    );

    let select = source.select_all_sql();
    let mut rows = source.rows(&select);
    let mut copied = 0;

    while let Some(vote) = rows
        .try_next()
        .await
        .map_err(|e| StoreError::statement("read source votes", e))?
    {
        if dest.contains(&vote.actor_id, &vote.occurred_at).await? {
            continue;
        }
        dest.insert(&vote).await?;
        copied += 1;
    }

    Ok(copied)
}
