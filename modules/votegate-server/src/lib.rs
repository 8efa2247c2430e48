//! The vote gate as a running service: the core object, operator commands,
//! a cached status query and a console host.

pub mod admin;
pub mod app;
pub mod cache;
pub mod console;
pub mod host;

pub use admin::{AdminError, StatusReport, WIPE_CONFIRMATION};
pub use app::VoteGate;
pub use cache::{VoteStatusCache, STATUS_TTL};
pub use console::{Console, ConsoleLine};
pub use host::{offline_id, ConsoleHost};
