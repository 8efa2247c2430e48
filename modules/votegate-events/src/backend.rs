//! Connection establishment and SQL for the two backends.
//!
//! Both backends share one logical table
//! `(id, player_uuid, player_name, service_name, vote_time)`; only the id
//! column type and the way indexes are declared differ (see [`Dialect`]).

use std::time::Duration;

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};
use votegate_common::{BackendKind, DatabaseConfig, MySqlSettings, SqliteSettings};

use crate::error::{StoreError, StoreResult};
use crate::types::StoredVote;

/// Bounded wait for an SQLite lock before the statement fails.
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// How long opening (or re-opening) a connection may take, retries included.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const TABLE_BASE_NAME: &str = "votes";

/// Where a vote table lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSettings {
    Sqlite(SqliteSettings),
    MySql(MySqlSettings),
}

impl BackendSettings {
    /// Settings for `kind`, taken from the matching section of `config`.
    pub fn from_config(config: &DatabaseConfig, kind: BackendKind) -> Self {
        match kind {
            BackendKind::Sqlite => BackendSettings::Sqlite(config.sqlite.clone()),
            BackendKind::MySql => BackendSettings::MySql(config.mysql.clone()),
        }
    }

    /// Settings for the configured live backend.
    pub fn live(config: &DatabaseConfig) -> Self {
        Self::from_config(config, config.kind)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSettings::Sqlite(_) => BackendKind::Sqlite,
            BackendSettings::MySql(_) => BackendKind::MySql,
        }
    }

    /// `votes`, or `<prefix>votes` on MySQL.
    pub fn table_name(&self) -> String {
        match self {
            BackendSettings::Sqlite(_) => TABLE_BASE_NAME.to_string(),
            BackendSettings::MySql(s) => format!("{}{}", s.table_prefix, TABLE_BASE_NAME),
        }
    }
}

// ---------------------------------------------------------------------------
// Dialect
// ---------------------------------------------------------------------------

/// Per-backend DDL differences.
#[derive(Debug)]
pub(crate) struct Dialect {
    id_column: &'static str,
    /// MySQL declares indexes inside CREATE TABLE; SQLite needs separate
    /// CREATE INDEX statements.
    inline_indexes: bool,
}

const SQLITE_DIALECT: Dialect = Dialect {
    id_column: "id INTEGER PRIMARY KEY AUTOINCREMENT",
    inline_indexes: false,
};

const MYSQL_DIALECT: Dialect = Dialect {
    id_column: "id BIGINT AUTO_INCREMENT PRIMARY KEY",
    inline_indexes: true,
};

const INDEXED_COLUMNS: [&str; 2] = ["player_uuid", "player_name"];

impl Dialect {
    pub(crate) fn for_kind(kind: BackendKind) -> &'static Dialect {
        match kind {
            BackendKind::Sqlite => &SQLITE_DIALECT,
            BackendKind::MySql => &MYSQL_DIALECT,
        }
    }

    /// Idempotent schema statements, in execution order.
    pub(crate) fn bootstrap(&self, table: &str) -> Vec<String> {
        let mut columns = vec![
            self.id_column.to_string(),
            "player_uuid VARCHAR(36) NOT NULL".to_string(),
            "player_name VARCHAR(64) NOT NULL".to_string(),
            "service_name VARCHAR(128) NOT NULL".to_string(),
            "vote_time VARCHAR(64) NOT NULL".to_string(),
        ];

        if self.inline_indexes {
            for column in INDEXED_COLUMNS {
                columns.push(format!("INDEX idx_{table}_{column} ({column})"));
            }
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {table} ({})",
            columns.join(", ")
        )];

        if !self.inline_indexes {
            for column in INDEXED_COLUMNS {
                statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})"
                ));
            }
        }

        statements
    }
}

// ---------------------------------------------------------------------------
// VoteTable
// ---------------------------------------------------------------------------

/// A single-connection pool. The worker already serializes statements; the
/// pool pings an idle connection before handing it out and replaces it when
/// the server has dropped it.
enum Conn {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
}

/// Run the same statement body against whichever connection is live.
macro_rules! on_conn {
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            Conn::Sqlite($c) => $body,
            Conn::MySql($c) => $body,
        }
    };
}

type VoteRow = (String, String, String, String);

/// One open pool plus the vote table it reads and writes.
pub(crate) struct VoteTable {
    conn: Conn,
    table: String,
    kind: BackendKind,
}

impl VoteTable {
    /// Connect and bootstrap the schema.
    pub(crate) async fn open(settings: &BackendSettings) -> StoreResult<Self> {
        let kind = settings.kind();
        let connect_err = |source: sqlx::Error| StoreError::Connect {
            backend: kind,
            source,
        };

        let conn = match settings {
            BackendSettings::Sqlite(s) => {
                if let Some(parent) = s.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        warn!(path = %parent.display(), error = %e, "Failed to create data folder");
                    }
                }
                let options = SqliteConnectOptions::new()
                    .filename(&s.path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(SQLITE_BUSY_TIMEOUT);
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(CONNECT_TIMEOUT)
                    .connect_with(options)
                    .await
                    .map_err(connect_err)?;
                info!(path = %s.path.display(), "Connected to SQLite database");
                Conn::Sqlite(pool)
            }
            BackendSettings::MySql(s) => {
                s.validate()?;
                let ssl_mode = if s.use_ssl {
                    MySqlSslMode::Required
                } else {
                    MySqlSslMode::Disabled
                };
                let options = MySqlConnectOptions::new()
                    .host(&s.host)
                    .port(s.port)
                    .database(&s.database)
                    .username(&s.user)
                    .password(&s.password)
                    .ssl_mode(ssl_mode);
                let pool = MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(CONNECT_TIMEOUT)
                    .test_before_acquire(true)
                    .connect_with(options)
                    .await
                    .map_err(connect_err)?;
                info!(host = %s.host, database = %s.database, "Connected to MySQL database");
                Conn::MySql(pool)
            }
        };

        let table = Self {
            conn,
            table: settings.table_name(),
            kind,
        };
        if let Err(e) = table.bootstrap().await {
            table.close().await;
            return Err(e);
        }
        Ok(table)
    }

    pub(crate) fn kind(&self) -> BackendKind {
        self.kind
    }

    pub(crate) fn name(&self) -> &str {
        &self.table
    }

    async fn bootstrap(&self) -> StoreResult<()> {
        for sql in Dialect::for_kind(self.kind).bootstrap(&self.table) {
            on_conn!(&self.conn, c => sqlx::query(&sql).execute(c).await.map(|_| ()))
                .map_err(|e| StoreError::statement(format!("create table {}", self.table), e))?;
        }
        info!(table = %self.table, backend = %self.kind, "Vote table checked/created");
        Ok(())
    }

    pub(crate) async fn insert(&self, vote: &StoredVote) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (player_uuid, player_name, service_name, vote_time) VALUES (?, ?, ?, ?)",
            self.table
        );
        on_conn!(&self.conn, c => sqlx::query(&sql)
            .bind(vote.actor_id.as_str())
            .bind(vote.actor_name.as_str())
            .bind(vote.source_name.as_str())
            .bind(vote.occurred_at.as_str())
            .execute(c)
            .await
            .map(|_| ()))
        .map_err(|e| StoreError::statement(format!("insert vote for {}", vote.actor_name), e))
    }

    /// Most recent `vote_time` for an identifier.
    pub(crate) async fn latest_time_by_id(&self, actor_id: &str) -> StoreResult<Option<String>> {
        let sql = format!(
            "SELECT vote_time FROM {} WHERE player_uuid = ? ORDER BY vote_time DESC LIMIT 1",
            self.table
        );
        on_conn!(&self.conn, c => sqlx::query_scalar::<_, String>(&sql)
            .bind(actor_id)
            .fetch_optional(c)
            .await)
        .map_err(|e| StoreError::statement(format!("latest vote for {actor_id}"), e))
    }

    /// Most recent `vote_time` for a case-insensitive name.
    pub(crate) async fn latest_time_by_name(&self, actor_name: &str) -> StoreResult<Option<String>> {
        let sql = format!(
            "SELECT vote_time FROM {} WHERE LOWER(player_name) = LOWER(?) ORDER BY vote_time DESC LIMIT 1",
            self.table
        );
        on_conn!(&self.conn, c => sqlx::query_scalar::<_, String>(&sql)
            .bind(actor_name)
            .fetch_optional(c)
            .await)
        .map_err(|e| StoreError::statement(format!("latest vote for {actor_name}"), e))
    }

    pub(crate) async fn contains(&self, actor_id: &str, occurred_at: &str) -> StoreResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE player_uuid = ? AND vote_time = ? LIMIT 1",
            self.table
        );
        on_conn!(&self.conn, c => sqlx::query(&sql)
            .bind(actor_id)
            .bind(occurred_at)
            .fetch_optional(c)
            .await
            .map(|row| row.is_some()))
        .map_err(|e| StoreError::statement("check existing vote", e))
    }

    pub(crate) async fn count(&self) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count = on_conn!(&self.conn, c => sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(c)
            .await)
        .map_err(|e| StoreError::statement("count votes", e))?;
        Ok(count.max(0) as u64)
    }

    /// Delete every row. Returns the number removed.
    pub(crate) async fn delete_all(&self) -> StoreResult<u64> {
        let sql = format!("DELETE FROM {}", self.table);
        on_conn!(&self.conn, c => sqlx::query(&sql)
            .execute(c)
            .await
            .map(|done| done.rows_affected()))
        .map_err(|e| StoreError::statement("wipe votes", e))
    }

    pub(crate) fn select_all_sql(&self) -> String {
        format!(
            "SELECT player_uuid, player_name, service_name, vote_time FROM {} ORDER BY id",
            self.table
        )
    }

    /// Stream every row of the table. `sql` comes from [`Self::select_all_sql`].
    pub(crate) fn rows<'a>(&'a self, sql: &'a str) -> BoxStream<'a, Result<StoredVote, sqlx::Error>> {
        let rows = on_conn!(&self.conn, c => sqlx::query_as::<_, VoteRow>(sql).fetch(c));
        rows.map_ok(StoredVote::from).boxed()
    }

    /// Close the pool. Statements issued afterwards fail with
    /// `PoolClosed`.
    pub(crate) async fn close(&self) {
        on_conn!(&self.conn, c => c.close().await);
    }
}
