use super::*;
use crate::config::{CapitanSettings, ParticipatingSet};
use crate::error::CapitanError;
use crate::project::ProjectDefinition;
use crate::runtime::{MockContainer, MockRuntime};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WINDOW: u32 = 2;

fn shop_definition(hook_log: &Path, before_web: &str, after_web: &str) -> ProjectDefinition {
    let source = format!(
        r#"
project = "shop"

[[service]]
name = "db"
image = "postgres:16"
placement = 1

[service.hooks]
"before.up" = 'echo "before $CAPITAN_CONTAINER_NAME" >> {log}'

[[service]]
name = "web"
image = "nginx:1"
placement = 2
scale = 2

[service.hooks]
"before.up" = '{before_web}'
"after.up" = '{after_web}'
"#,
        log = hook_log.display(),
        before_web = before_web,
        after_web = after_web,
    );
    ProjectDefinition::parse(&source).unwrap()
}

struct Fixture {
    _dir: TempDir,
    hook_log: std::path::PathBuf,
    runtime: Arc<MockRuntime>,
    app: CapitanApp,
}

fn fixture_with(settings: CapitanSettings, dry_run: bool, before_web: &str, after_web: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let hook_log = dir.path().join("hooks.log");
    let definition = shop_definition(&hook_log, before_web, after_web);

    let runtime = Arc::new(MockRuntime::new());
    runtime.add_image("postgres:16", "sha256:postgres");
    runtime.add_image("nginx:1", "sha256:nginx");

    let app = CapitanApp::new(
        settings,
        definition.expand(WINDOW),
        runtime.clone(),
        dry_run,
    );
    Fixture {
        _dir: dir,
        hook_log,
        runtime,
        app,
    }
}

fn fixture() -> Fixture {
    fixture_with(CapitanSettings::default(), false, "true", "true")
}

fn leftover(runtime: &MockRuntime, name: &str) {
    runtime.add_container(
        name,
        MockContainer {
            running: true,
            image_id: "sha256:nginx".to_string(),
            run_signature: "old".to_string(),
        },
    );
}

#[tokio::test]
async fn test_up_runs_hooks_and_creates_in_placement_order() {
    let f = fixture();

    f.app.run(&CommandKind::Up { attach: false }).await.unwrap();

    assert_eq!(
        f.runtime.calls_of("create"),
        vec!["shop_db_1", "shop_web_1", "shop_web_2"]
    );
    assert_eq!(
        f.runtime.calls_of("start"),
        vec!["shop_db_1", "shop_web_1", "shop_web_2"]
    );
    let log = std::fs::read_to_string(&f.hook_log).unwrap();
    assert_eq!(log, "before shop_db_1\n");
}

#[tokio::test]
async fn test_failing_before_hook_aborts_before_any_engine_call() {
    let f = fixture_with(CapitanSettings::default(), false, "exit 1", "true");

    let result = f.app.run(&CommandKind::Up { attach: false }).await;

    match result {
        Err(CapitanError::Hook { hook, container, .. }) => {
            assert_eq!(hook, "before.up");
            assert_eq!(container, "shop_web_1");
        }
        other => panic!("expected hook failure, got {:?}", other),
    }
    assert!(f.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_failing_after_hook_keeps_applied_actions() {
    let f = fixture_with(CapitanSettings::default(), false, "true", "exit 2");

    let result = f.app.run(&CommandKind::Up { attach: false }).await;

    assert!(matches!(result, Err(CapitanError::Hook { .. })));
    assert!(f.runtime.container("shop_web_2").unwrap().running);
    assert!(f.runtime.calls_of("rm").is_empty());
}

#[tokio::test]
async fn test_up_removes_surplus_instances_first() {
    let f = fixture();
    leftover(&f.runtime, "shop_web_3");

    f.app.run(&CommandKind::Up { attach: false }).await.unwrap();

    assert_eq!(f.runtime.calls_of("rm"), vec!["shop_web_3"]);
    assert!(f.runtime.container("shop_web_3").is_none());
    let first_create = f
        .runtime
        .calls()
        .iter()
        .position(|call| call.operation() == "create")
        .unwrap();
    let removal = f
        .runtime
        .calls()
        .iter()
        .position(|call| call.operation() == "rm")
        .unwrap();
    assert!(removal < first_create);
}

#[tokio::test]
async fn test_pre_clean_failure_only_warns() {
    let f = fixture();
    leftover(&f.runtime, "shop_web_3");
    f.runtime.fail_on("rm", "shop_web_3");

    f.app.run(&CommandKind::Create).await.unwrap();

    assert_eq!(
        f.runtime.calls_of("create"),
        vec!["shop_db_1", "shop_web_1", "shop_web_2"]
    );
    assert!(f.runtime.calls_of("start").is_empty());
}

#[tokio::test]
async fn test_scale_touches_one_service() {
    let f = fixture();
    leftover(&f.runtime, "shop_db_2");
    leftover(&f.runtime, "shop_web_4");

    f.app
        .run(&CommandKind::Scale {
            service: "web".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(f.runtime.calls_of("rm"), vec!["shop_web_4"]);
    assert_eq!(f.runtime.calls_of("create"), vec!["shop_web_1", "shop_web_2"]);
    assert!(f.runtime.container("shop_db_2").is_some());
}

#[tokio::test]
async fn test_rm_includes_surplus_in_teardown_order() {
    let f = fixture();
    f.app.run(&CommandKind::Up { attach: false }).await.unwrap();
    leftover(&f.runtime, "shop_web_3");

    f.app
        .run(&CommandKind::Rm {
            args: vec!["-f".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(
        f.runtime.calls_of("rm"),
        vec!["shop_web_3", "shop_web_2", "shop_web_1", "shop_db_1"]
    );
}

#[tokio::test]
async fn test_stop_follows_participating_policy() {
    let mut settings = CapitanSettings::default();
    settings.teardown.stop = ParticipatingSet::Declared;
    let f = fixture_with(settings, false, "true", "true");
    f.app.run(&CommandKind::Up { attach: false }).await.unwrap();
    leftover(&f.runtime, "shop_web_3");

    f.app
        .run(&CommandKind::Stop { args: Vec::new() })
        .await
        .unwrap();

    assert_eq!(
        f.runtime.calls_of("stop"),
        vec!["shop_web_2", "shop_web_1", "shop_db_1"]
    );
    assert!(f.runtime.container("shop_web_3").unwrap().running);
}

#[tokio::test]
async fn test_participating_sets() {
    let f = fixture();
    assert_eq!(
        f.app.participating(ParticipatingSet::Declared).names(),
        vec!["shop_db_1", "shop_web_1", "shop_web_2"]
    );
    assert_eq!(
        f.app.participating(ParticipatingSet::Cleanup).names(),
        vec!["shop_db_2", "shop_db_3", "shop_web_3", "shop_web_4"]
    );
    assert_eq!(f.app.participating(ParticipatingSet::Combined).len(), 7);
    assert_eq!(f.app.containers_for(&CommandKind::Build).len(), 3);
    assert_eq!(f.app.containers_for(&CommandKind::Pull).len(), 3);
}

#[tokio::test]
async fn test_build_hooks_run_for_every_declared_service() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("db-built");
    let source = format!(
        r#"
project = "shop"

[[service]]
name = "db"
image = "postgres:16"
placement = 1

[service.hooks]
"before.build" = 'touch {marker}'

[[service]]
name = "api"
build = "./api"
placement = 2
"#,
        marker = marker.display(),
    );
    let definition = ProjectDefinition::parse(&source).unwrap();
    let runtime = Arc::new(MockRuntime::new());
    let app = CapitanApp::new(
        CapitanSettings::default(),
        definition.expand(WINDOW),
        runtime.clone(),
        false,
    );

    app.run(&CommandKind::Build).await.unwrap();

    assert!(marker.exists());
    assert_eq!(runtime.calls_of("build"), vec!["shop_api"]);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let f = fixture_with(CapitanSettings::default(), true, "exit 1", "true");
    leftover(&f.runtime, "shop_web_3");

    f.app.run(&CommandKind::Up { attach: true }).await.unwrap();
    f.app
        .run(&CommandKind::Rm { args: Vec::new() })
        .await
        .unwrap();

    assert!(f.runtime.mutating_calls().is_empty());
    assert!(f.runtime.calls_of("attach").is_empty());
    assert!(!f.hook_log.exists());
    assert!(f.runtime.container("shop_web_3").is_some());
}

#[tokio::test]
async fn test_read_only_commands() {
    let f = fixture();
    f.app.run(&CommandKind::Up { attach: false }).await.unwrap();
    f.runtime.clear_calls();

    f.app.run(&CommandKind::Ip).await.unwrap();
    f.app
        .run(&CommandKind::Ps { args: Vec::new() })
        .await
        .unwrap();
    f.app.run(&CommandKind::Show).await.unwrap();

    assert!(f.runtime.mutating_calls().is_empty());
    assert_eq!(
        f.runtime.calls_of("ip"),
        vec!["shop_db_1", "shop_web_1", "shop_web_2"]
    );
    assert_eq!(f.runtime.calls_of("ps").len(), 1);
}

#[tokio::test]
async fn test_show_serializes_project() {
    let f = fixture();
    let shown = toml::to_string_pretty(f.app.project()).unwrap();
    assert!(shown.contains("project_name = \"shop\""));
    assert!(shown.contains("shop_web_4"));
}

#[tokio::test]
async fn test_attached_run_waits_for_requested_shutdown() {
    let f = fixture();
    let containers = f.app.containers_for(&CommandKind::Up { attach: true });
    let coordinator = ShutdownCoordinator::new(Arc::new(SequencedTeardown::new(
        f.runtime.clone(),
        f.app.participating(ParticipatingSet::Combined),
    )));

    let run = f
        .app
        .attached(&coordinator, f.app.sequencer.up(&containers, true));
    let interrupt = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(coordinator.request_stop());
        tokio::time::sleep(Duration::from_millis(30)).await;
        f.runtime.release_streams();
    };

    let (result, ()) = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(run, interrupt)
    })
    .await
    .unwrap();

    result.unwrap();
    assert_eq!(coordinator.state(), EscalationState::Done);
    assert_eq!(
        f.runtime.calls_of("stop"),
        vec!["shop_web_2", "shop_web_1", "shop_db_1"]
    );
}

#[tokio::test]
async fn test_attached_run_returns_once_shutdown_completes() {
    let f = fixture();
    let containers = f.app.containers_for(&CommandKind::Up { attach: true });
    let coordinator = ShutdownCoordinator::new(Arc::new(SequencedTeardown::new(
        f.runtime.clone(),
        containers.clone(),
    )));

    let run = f
        .app
        .attached(&coordinator, f.app.sequencer.up(&containers, true));
    let interrupt = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(coordinator.request_stop());
    };

    // Attach streams are never released, so only the completed stop ends the run
    let (result, ()) = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(run, interrupt)
    })
    .await
    .unwrap();

    result.unwrap();
    assert_eq!(coordinator.state(), EscalationState::Done);
    assert_eq!(
        f.runtime.calls_of("stop"),
        vec!["shop_web_2", "shop_web_1", "shop_db_1"]
    );
}

#[tokio::test]
async fn test_attached_run_without_signal_returns_when_streams_end() {
    let f = fixture();
    let containers = f.app.containers_for(&CommandKind::Up { attach: true });
    let coordinator = ShutdownCoordinator::new(Arc::new(SequencedTeardown::new(
        f.runtime.clone(),
        containers.clone(),
    )));
    f.runtime.release_streams();

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        f.app
            .attached(&coordinator, f.app.sequencer.up(&containers, true)),
    )
    .await
    .unwrap();

    assert!(result.is_ok());
    assert_eq!(coordinator.state(), EscalationState::Idle);
    assert!(f.runtime.calls_of("stop").is_empty());
}

#[test]
fn test_command_kind() {
    assert_eq!(CommandKind::Rm { args: Vec::new() }.name(), "rm");
    assert!(CommandKind::Build.has_hooks());
    assert!(!CommandKind::Pull.has_hooks());
    assert!(!CommandKind::Show.has_hooks());
    assert!(CommandKind::Restart { args: Vec::new() }.pre_cleans());
    assert!(!CommandKind::Stop { args: Vec::new() }.pre_cleans());
}
