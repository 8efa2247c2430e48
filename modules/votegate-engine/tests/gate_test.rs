//! CommandGate and VoteIngestor against an in-memory ledger and a host that
//! records what it is asked to do. No database required.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;
use votegate_common::{parse_vote_time, Actor, FileConfig, FreshnessPolicy, SqliteSettings};
use votegate_engine::{
    CommandGate, GateConfig, Host, IdentityResolver, MainTask, MemoryLedger,
    Resolution, VoteIngestor,
};
use votegate_events::{BackendSettings, EventStore};

// ---------------------------------------------------------------------------
// Recording host
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingHost {
    online: Mutex<HashMap<String, Actor>>,
    bypass: Mutex<HashSet<Uuid>>,
    tasks: Mutex<Vec<MainTask>>,
}

impl RecordingHost {
    fn join(&self, actor: &Actor) {
        self.online
            .lock()
            .unwrap()
            .insert(actor.name.clone(), actor.clone());
    }

    fn grant_bypass(&self, actor: &Actor) {
        self.bypass.lock().unwrap().insert(actor.id);
    }

    fn tasks(&self) -> Vec<MainTask> {
        self.tasks.lock().unwrap().clone()
    }
}

impl Host for RecordingHost {
    fn has_permission(&self, actor: &Actor, permission: &str) -> bool {
        permission == "votechecker.bypass" && self.bypass.lock().unwrap().contains(&actor.id)
    }

    fn find_player_exact(&self, name: &str) -> Option<Actor> {
        self.online.lock().unwrap().get(name).cloned()
    }

    fn schedule(&self, task: MainTask) {
        self.tasks.lock().unwrap().push(task);
    }
}

impl IdentityResolver for RecordingHost {
    fn online(&self, name: &str) -> Option<Actor> {
        self.find_player_exact(name)
    }

    fn offline_id(&self, name: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn at(s: &str) -> NaiveDateTime {
    parse_vote_time(s).unwrap()
}

fn now(s: &str) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at(s))
}

const NOW: &str = "2024-01-02T10:00:00";

fn ledger() -> Arc<MemoryLedger> {
    Arc::new(MemoryLedger::new(FreshnessPolicy::new("24h", "UTC")).at(now(NOW)))
}

fn gate_with(
    config: FileConfig,
    ledger: &Arc<MemoryLedger>,
    host: &Arc<RecordingHost>,
) -> CommandGate<MemoryLedger, RecordingHost> {
    CommandGate::new(GateConfig::from_file(&config), ledger.clone(), host.clone())
}

fn gate(
    ledger: &Arc<MemoryLedger>,
    host: &Arc<RecordingHost>,
) -> CommandGate<MemoryLedger, RecordingHost> {
    gate_with(FileConfig::default(), ledger, host)
}

fn steve() -> Actor {
    Actor::new(Uuid::new_v4(), "Steve")
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unblocked_command_passes_through() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);

    assert!(!gate.intercept_command(&steve(), "/home").is_suspended());
    assert!(!gate.intercept_command(&steve(), "/rewardsplus").is_suspended());
    assert_eq!(ledger.checks(), 0);
    assert!(host.tasks().is_empty());
}

#[tokio::test]
async fn disabled_gate_passes_everything() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let config = FileConfig {
        enable_plugin: false,
        ..FileConfig::default()
    };
    let gate = gate_with(config, &ledger, &host);

    assert!(!gate.intercept_command(&steve(), "/rewards").is_suspended());
    assert_eq!(ledger.checks(), 0);
}

#[tokio::test]
async fn bypass_permission_is_never_suspended() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let admin = steve();
    host.grant_bypass(&admin);

    for line in ["/rewards", "/REWARDS claim", "/spawn"] {
        assert!(!gate.intercept_command(&admin, line).is_suspended());
    }
    assert_eq!(ledger.checks(), 0);
    assert!(host.tasks().is_empty());
}

#[tokio::test]
async fn blocked_token_matches_case_insensitively() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);

    let interception = gate.intercept_command(&steve(), "/ReWaRdS daily");
    assert!(interception.is_suspended());
    assert_eq!(interception.resolution().await, Some(Resolution::Denied));
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_vote_is_denied_with_one_notification() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let steve = steve();
    ledger.record(&steve, at("2024-01-01T09:59:59"));

    let resolution = gate
        .intercept_command(&steve, "/rewards claim")
        .resolution()
        .await;

    assert_eq!(resolution, Some(Resolution::Denied));
    assert_eq!(
        host.tasks(),
        vec![MainTask::Notify {
            actor: steve,
            message: "[VoteChecker] Steve, you need to vote today before using /rewards."
                .to_string(),
        }]
    );
}

#[tokio::test]
async fn no_vote_is_denied() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);

    let resolution = gate.intercept_command(&steve(), "/spawn").resolution().await;
    assert_eq!(resolution, Some(Resolution::Denied));
    assert!(matches!(&host.tasks()[..], [MainTask::Notify { .. }]));
}

#[tokio::test]
async fn fresh_vote_resumes_command_on_main_context() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let steve = steve();
    ledger.record(&steve, at("2024-01-02T09:00:00"));

    let resolution = gate
        .intercept_command(&steve, "/rewards claim 1")
        .resolution()
        .await;

    assert_eq!(resolution, Some(Resolution::Resumed));
    assert_eq!(
        host.tasks(),
        vec![MainTask::PerformCommand {
            actor: steve,
            command: "rewards claim 1".to_string(),
        }]
    );
}

#[tokio::test]
async fn resumed_command_bypasses_gate_exactly_once() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let steve = steve();
    ledger.record(&steve, at("2024-01-02T09:00:00"));

    let first = gate.intercept_command(&steve, "/rewards").resolution().await;
    assert_eq!(first, Some(Resolution::Resumed));
    assert_eq!(ledger.checks(), 1);

    // The host performs the resumed command, which comes back through the gate.
    assert!(!gate.intercept_command(&steve, "/rewards").is_suspended());
    assert_eq!(ledger.checks(), 1);

    // A fresh attempt afterwards is gated again.
    let again = gate.intercept_command(&steve, "/rewards").resolution().await;
    assert_eq!(again, Some(Resolution::Resumed));
    assert_eq!(ledger.checks(), 2);
}

#[tokio::test]
async fn reentry_marker_is_per_actor() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let steve = steve();
    let alex = Actor::new(Uuid::new_v4(), "Alex");
    ledger.record(&steve, at("2024-01-02T09:00:00"));

    gate.intercept_command(&steve, "/rewards").resolution().await;

    let other = gate.intercept_command(&alex, "/rewards");
    assert_eq!(other.resolution().await, Some(Resolution::Denied));
}

#[tokio::test]
async fn denied_attempt_sets_no_marker() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let steve = steve();

    gate.intercept_command(&steve, "/rewards").resolution().await;
    assert!(gate.intercept_command(&steve, "/rewards").is_suspended());
}

// ---------------------------------------------------------------------------
// Console-directed commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn console_command_for_voter_is_redispatched() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let steve = steve();
    host.join(&steve);
    ledger.record(&steve, at("2024-01-02T09:00:00"));

    let resolution = gate
        .intercept_console("[player] Steve rewards open")
        .resolution()
        .await;

    assert_eq!(resolution, Some(Resolution::Resumed));
    assert_eq!(
        host.tasks(),
        vec![MainTask::DispatchConsole {
            command: "[player] Steve rewards open".to_string(),
        }]
    );
    // Console path never arms the reentry marker.
    assert!(gate.intercept_command(&steve, "/rewards").is_suspended());
}

#[tokio::test]
async fn console_command_for_non_voter_notifies_actor() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let steve = steve();
    host.join(&steve);

    let resolution = gate
        .intercept_console("[player] Steve /spawn")
        .resolution()
        .await;

    assert_eq!(resolution, Some(Resolution::Denied));
    assert!(matches!(
        &host.tasks()[..],
        [MainTask::Notify { actor, message }] if actor == &steve && message.ends_with("/spawn.")
    ));
}

#[tokio::test]
async fn console_lines_that_do_not_apply_pass_through() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    host.join(&steve());

    for line in [
        "say hello",
        "[player] Steve",
        "[player] Steve   ",
        "[player] Nobody rewards",
        "[player] Steve home",
    ] {
        assert!(!gate.intercept_console(line).is_suspended(), "{line}");
    }
    assert_eq!(ledger.checks(), 0);
}

// ---------------------------------------------------------------------------
// Reload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reload_swaps_block_list() {
    let (ledger, host) = (ledger(), Arc::new(RecordingHost::default()));
    let gate = gate(&ledger, &host);
    let steve = steve();

    assert!(!gate.intercept_command(&steve, "/warp").is_suspended());

    gate.reload(GateConfig::from_file(&FileConfig {
        blocked_commands: vec!["/warp".to_string()],
        ..FileConfig::default()
    }));

    assert!(gate.intercept_command(&steve, "/warp spawn").is_suspended());
    assert!(!gate.intercept_command(&steve, "/rewards").is_suspended());
    assert_eq!(gate.config().blocked, vec!["warp"]);
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingestion_uses_online_identity_when_connected() {
    let ledger = ledger();
    let host = Arc::new(RecordingHost::default());
    let steve = steve();
    host.join(&steve);
    let ingestor = VoteIngestor::new(ledger.clone(), host.clone(), FreshnessPolicy::new("24h", "UTC"));

    let vote = ingestor
        .on_vote_at("Steve", Some("topg"), now("2024-01-02T08:30:00"))
        .unwrap();

    assert_eq!(vote.actor, steve);
    assert_eq!(vote.source, "topg");
    assert_eq!(vote.occurred_at, at("2024-01-02T08:30:00"));
    assert_eq!(ledger.votes(), vec![vote]);
}

#[tokio::test]
async fn ingestion_falls_back_to_offline_identity() {
    let ledger = ledger();
    let host = Arc::new(RecordingHost::default());
    let ingestor = VoteIngestor::new(ledger.clone(), host.clone(), FreshnessPolicy::new("24h", "UTC"));

    let vote = ingestor.on_vote("Alex", None).unwrap();

    assert_eq!(vote.actor.id, host.offline_id("Alex"));
    assert_eq!(vote.source, "unknown");
}

#[tokio::test]
async fn ingestion_drops_blank_names() {
    let ledger = ledger();
    let host = Arc::new(RecordingHost::default());
    let ingestor = VoteIngestor::new(ledger.clone(), host, FreshnessPolicy::new("24h", "UTC"));

    assert!(ingestor.on_vote("   ", Some("topg")).is_none());
    assert!(ledger.votes().is_empty());
}

#[tokio::test]
async fn ingestion_writes_wall_clock_in_policy_zone() {
    let ledger = ledger();
    let host = Arc::new(RecordingHost::default());
    let ingestor = VoteIngestor::new(
        ledger.clone(),
        host,
        FreshnessPolicy::new("24h", "America/New_York"),
    );

    let vote = ingestor
        .on_vote_at("Steve", None, now("2024-01-02T15:00:00"))
        .unwrap();
    assert_eq!(vote.occurred_at, at("2024-01-02T10:00:00"));
}

#[tokio::test]
async fn ingested_vote_opens_the_gate() {
    let ledger = ledger();
    let host = Arc::new(RecordingHost::default());
    let steve = steve();
    host.join(&steve);
    let ingestor = VoteIngestor::new(ledger.clone(), host.clone(), FreshnessPolicy::new("24h", "UTC"));
    let gate = gate(&ledger, &host);

    assert_eq!(
        gate.intercept_command(&steve, "/rewards").resolution().await,
        Some(Resolution::Denied)
    );
    ingestor.on_vote_at("Steve", Some("topg"), now("2024-01-02T09:59:00"));
    assert_eq!(
        gate.intercept_command(&steve, "/rewards").resolution().await,
        Some(Resolution::Resumed)
    );
}

// ---------------------------------------------------------------------------
// Gate over the SQLite store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gate_over_sqlite_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        EventStore::try_open(
            BackendSettings::Sqlite(SqliteSettings {
                path: dir.path().join("votes.db"),
            }),
            FreshnessPolicy::new("24h", "UTC"),
        )
        .await
        .unwrap(),
    );
    let host = Arc::new(RecordingHost::default());
    let steve = steve();
    host.join(&steve);
    let gate = CommandGate::new(GateConfig::default(), store.clone(), host.clone());
    let ingestor = VoteIngestor::new(store.clone(), host.clone(), FreshnessPolicy::new("24h", "UTC"));

    assert_eq!(
        gate.intercept_command(&steve, "/spawn").resolution().await,
        Some(Resolution::Denied)
    );

    ingestor.on_vote("Steve", Some("topg"));
    assert_eq!(
        gate.intercept_command(&steve, "/spawn").resolution().await,
        Some(Resolution::Resumed)
    );
    assert!(matches!(
        host.tasks().last(),
        Some(MainTask::PerformCommand { command, .. }) if command == "spawn"
    ));

    store.shutdown().await;
}
