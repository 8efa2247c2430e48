//! Shared building blocks for the vote gate: actor identity, the freshness
//! policy, configuration and the error taxonomy.
//!
//! Nothing in here touches a database or a host. The freshness arithmetic is
//! pure so it can be tested against fixed instants.

pub mod config;
pub mod error;
pub mod freshness;
pub mod types;

pub use config::{
    load_config, parse_config, DatabaseConfig, FileConfig, MessagesConfig, MySqlSettings,
    SqliteSettings, MYSQL_PASSWORD_ENV,
};
pub use error::{ConfigError, ConfigResult};
pub use freshness::{
    format_vote_time, is_fresh, parse_vote_time, FreshnessPolicy, FreshnessRule, Zone,
};
pub use types::{Actor, BackendKind};
