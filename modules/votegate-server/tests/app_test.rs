//! VoteGate end to end over SQLite files in a temp dir, driven directly and
//! through the console loop.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::BufReader;
use votegate_common::{BackendKind, ConfigError, FileConfig, MySqlSettings};
use votegate_engine::{Host, Resolution};
use votegate_events::{MigrationOutcome, StoreError};
use votegate_server::{AdminError, Console, ConsoleHost, VoteGate};

fn config_in(dir: &TempDir, file: &str) -> FileConfig {
    let mut config = FileConfig::default();
    config.database.sqlite.path = dir.path().join(file);
    config
}

async fn start(config: FileConfig) -> (VoteGate<ConsoleHost>, Arc<ConsoleHost>) {
    let (host, _main) = ConsoleHost::new();
    let host = Arc::new(host);
    let app = VoteGate::init(config, host.clone()).await.unwrap();
    (app, host)
}

#[tokio::test]
async fn vote_then_gated_command_is_resumed() {
    let dir = TempDir::new().unwrap();
    let (app, host) = start(config_in(&dir, "votes.db")).await;
    let steve = host.join("Steve");

    assert_eq!(
        app.on_command(&steve, "/rewards").resolution().await,
        Some(Resolution::Denied)
    );

    let vote = app.on_vote("Steve", Some("topg")).unwrap();
    assert_eq!(vote.actor, steve);

    assert_eq!(
        app.on_command(&steve, "/rewards").resolution().await,
        Some(Resolution::Resumed)
    );
    app.shutdown().await;
}

#[tokio::test]
async fn info_reports_records_and_config() {
    let dir = TempDir::new().unwrap();
    let (app, _host) = start(config_in(&dir, "votes.db")).await;

    let report = app.info().await;
    assert!(!report.has_records);
    assert!(report.plugin_enabled);
    assert_eq!(report.blocked_count, 2);
    assert_eq!(report.backend, BackendKind::Sqlite);

    app.on_vote("Steve", None);
    assert!(app.info().await.has_records);
    app.shutdown().await;
}

#[tokio::test]
async fn wipe_requires_confirmation() {
    let dir = TempDir::new().unwrap();
    let (app, _host) = start(config_in(&dir, "votes.db")).await;
    app.on_vote("Steve", None);
    app.on_vote("Alex", None);

    assert!(matches!(app.wipe("").await, Err(AdminError::ConfirmationRequired)));
    assert!(matches!(app.wipe("yes").await, Err(AdminError::ConfirmationRequired)));
    assert!(app.info().await.has_records);

    assert_eq!(app.wipe("CONFIRM").await.unwrap(), 2);
    assert!(!app.info().await.has_records);
    app.shutdown().await;
}

#[tokio::test]
async fn migrate_by_name() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir, "votes.db");
    config.database.mysql = MySqlSettings {
        host: "127.0.0.1".into(),
        port: 1,
        ..MySqlSettings::default()
    };
    let (app, _host) = start(config).await;

    assert!(matches!(
        app.migrate("sqlite", "SQLITE").await,
        Ok(MigrationOutcome::Skipped)
    ));
    assert!(matches!(
        app.migrate("sqlite", "oracle").await,
        Err(AdminError::UnknownBackend(name)) if name == "oracle"
    ));
    assert!(app.migrate("sqlite", "mysql").await.unwrap().is_failed());
    app.shutdown().await;
}

#[tokio::test]
async fn reload_switches_database_and_block_list() {
    let dir = TempDir::new().unwrap();
    let (app, host) = start(config_in(&dir, "votes.db")).await;
    let steve = host.join("Steve");
    app.on_vote("Steve", None);
    assert!(app.info().await.has_records);

    let mut next = config_in(&dir, "other.db");
    next.blocked_commands = vec!["warp".into()];
    app.reload(next).await.unwrap();

    assert!(!app.info().await.has_records);
    assert_eq!(app.config().blocked_commands, vec!["warp"]);
    assert!(!app.on_command(&steve, "/rewards").is_suspended());
    assert!(app.on_command(&steve, "/warp").is_suspended());
    app.shutdown().await;
}

#[tokio::test]
async fn unsafe_table_prefix_is_rejected_at_init() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir, "votes.db");
    config.database.mysql.table_prefix = "x; DROP TABLE votes; --".into();

    let (host, _main) = ConsoleHost::new();
    let err = VoteGate::init(config, Arc::new(host)).await.err();
    assert!(matches!(err, Some(ConfigError::InvalidTablePrefix(_))));
}

#[tokio::test]
async fn unsafe_table_prefix_is_rejected_at_reload() {
    let dir = TempDir::new().unwrap();
    let (app, host) = start(config_in(&dir, "votes.db")).await;
    let steve = host.join("Steve");
    app.on_vote("Steve", None);

    let mut next = config_in(&dir, "other.db");
    next.blocked_commands = vec!["warp".into()];
    next.database.mysql.table_prefix = "vc`votes".into();
    assert!(matches!(
        app.reload(next).await,
        Err(StoreError::Config(ConfigError::InvalidTablePrefix(_)))
    ));

    assert_eq!(app.config().blocked_commands, vec!["rewards", "spawn"]);
    assert!(app.info().await.has_records);
    assert!(!app.on_command(&steve, "/warp").is_suspended());
    app.shutdown().await;
}

#[tokio::test]
async fn unreachable_store_denies_gated_commands() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("blocker"), b"").unwrap();
    let (app, host) = start(config_in(&dir, "blocker/votes.db")).await;
    let steve = host.join("Steve");

    app.on_vote("Steve", None);
    assert_eq!(
        app.on_command(&steve, "/spawn").resolution().await,
        Some(Resolution::Denied)
    );
    assert!(!app.info().await.has_records);

    app.reload(config_in(&dir, "votes.db")).await.unwrap();
    app.on_vote("Steve", None);
    assert_eq!(
        app.on_command(&steve, "/spawn").resolution().await,
        Some(Resolution::Resumed)
    );
    app.shutdown().await;
}

#[tokio::test]
async fn has_voted_is_answered_from_cache() {
    let dir = TempDir::new().unwrap();
    let (app, host) = start(config_in(&dir, "votes.db")).await;
    let steve = host.join("Steve");
    app.on_vote("Steve", None);

    // First lookup only schedules the refresh.
    assert!(!app.has_voted(&steve));

    let mut voted = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if app.has_voted(&steve) {
            voted = true;
            break;
        }
    }
    assert!(voted);
    app.shutdown().await;
}

#[tokio::test]
async fn console_session() {
    let dir = TempDir::new().unwrap();
    let (host, mut main) = ConsoleHost::new();
    let host = Arc::new(host);
    let app = VoteGate::init(config_in(&dir, "votes.db"), host.clone())
        .await
        .unwrap();

    let script = "\
join Steve
join Alex
join Bob
grant Bob votechecker.bypass
vote Steve topg
cmd Steve /home
cmd Bob /spawn
cmd Alex /rewards
cmd Steve /rewards claim
console [player] Alex spawn
console say hello
info
quit
";

    let mut console = Console::new(&app, host.clone(), None, Vec::new());
    console
        .run(BufReader::new(script.as_bytes()), &mut main)
        .await
        .unwrap();
    let output = String::from_utf8(console.into_output()).unwrap();

    for expected in [
        "vote from topg recorded for Steve",
        "Steve ran /home",
        "Bob ran /spawn",
        "[to Alex] [VoteChecker] Alex, you need to vote today before using /rewards.",
        "Steve ran /rewards claim",
        "[to Alex] [VoteChecker] Alex, you need to vote today before using /spawn.",
        "console ran say hello",
        "Database: active (SQLITE)",
    ] {
        assert!(output.contains(expected), "missing `{expected}` in:\n{output}");
    }
    assert!(host.has_permission(&host.actor("Bob"), "votechecker.bypass"));
    app.shutdown().await;
}
