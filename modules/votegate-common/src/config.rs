use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::freshness::FreshnessPolicy;
use crate::types::BackendKind;

static TABLE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]*$").unwrap());

/// Env var that overrides `database.mysql.password`.
pub const MYSQL_PASSWORD_ENV: &str = "VOTEGATE_MYSQL_PASSWORD";

/// TOML-backed configuration loaded from disk.
/// The MySQL password may instead come from the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    pub enable_plugin: bool,
    pub debug: bool,
    pub blocked_commands: Vec<String>,
    pub vote_reset: String,
    pub vote_reset_timezone: String,
    pub bypass_permission: String,
    pub messages: MessagesConfig,
    pub database: DatabaseConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enable_plugin: true,
            debug: false,
            blocked_commands: vec!["rewards".to_string(), "spawn".to_string()],
            vote_reset: "24h".to_string(),
            vote_reset_timezone: String::new(),
            bypass_permission: "votechecker.bypass".to_string(),
            messages: MessagesConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl FileConfig {
    pub fn freshness(&self) -> FreshnessPolicy {
        FreshnessPolicy::new(&self.vote_reset, &self.vote_reset_timezone)
    }

    /// Reject values that would be unsafe to splice into SQL.
    pub fn validate(&self) -> ConfigResult<()> {
        self.database.mysql.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MessagesConfig {
    pub prefix: String,
    /// Sent when a gated command is blocked. `{player}` and `{command}` are
    /// substituted.
    pub not_voted: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            prefix: "[VoteChecker] ".to_string(),
            not_voted: "{player}, you need to vote today before using {command}.".to_string(),
        }
    }
}

impl MessagesConfig {
    pub fn render_not_voted(&self, player: &str, command: &str) -> String {
        let body = self
            .not_voted
            .replace("{player}", player)
            .replace("{command}", command);
        format!("{}{}", self.prefix, body)
    }
}

/// Settings for both backends. `kind` picks the live one; migration reads
/// the other section too.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub sqlite: SqliteSettings,
    pub mysql: MySqlSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Sqlite,
            sqlite: SqliteSettings::default(),
            mysql: MySqlSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SqliteSettings {
    pub path: PathBuf,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("votes.db"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MySqlSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub use_ssl: bool,
    pub table_prefix: String,
    /// Accepted for compatibility; the store pools a single connection.
    pub pool_size: u32,
}

impl MySqlSettings {
    /// The table prefix must be a plain identifier fragment.
    pub fn validate(&self) -> ConfigResult<()> {
        if !TABLE_PREFIX_RE.is_match(&self.table_prefix) {
            return Err(ConfigError::InvalidTablePrefix(self.table_prefix.clone()));
        }
        Ok(())
    }
}

impl Default for MySqlSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            database: "minecraft".to_string(),
            user: "root".to_string(),
            password: String::new(),
            use_ssl: false,
            table_prefix: "votechecker_".to_string(),
            pool_size: 10,
        }
    }
}

impl std::fmt::Debug for MySqlSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("use_ssl", &self.use_ssl)
            .field("table_prefix", &self.table_prefix)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// Parse config from a TOML string. Missing keys take their defaults.
pub fn parse_config(content: &str, path: &Path) -> ConfigResult<FileConfig> {
    let config: FileConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load and parse a TOML config file, then apply env overrides.
pub fn load_config(path: &Path) -> ConfigResult<FileConfig> {
    dotenvy::dotenv().ok();

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_config(&content, path)?;

    if let Ok(password) = std::env::var(MYSQL_PASSWORD_ENV) {
        config.database.mysql.password = password;
    }

    tracing::info!(
        path = %path.display(),
        backend = %config.database.kind,
        blocked = config.blocked_commands.len(),
        vote_reset = %config.vote_reset,
        "Config loaded"
    );
    Ok(config)
}
