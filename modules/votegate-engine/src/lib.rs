//! Command gating and vote ingestion.
//!
//! The gate holds the configuration snapshot and the consume-once reentry
//! markers; the ledger and the host are injected. `MemoryLedger` stands in
//! for the store in tests.

pub mod gate;
pub mod ingest;
pub mod ledger;
pub mod traits;

pub use gate::{base_command, CommandGate, GateConfig, Interception, Resolution};
pub use ingest::VoteIngestor;
pub use ledger::MemoryLedger;
pub use traits::{Host, IdentityResolver, MainTask, VoteLedger, VoteSink};
