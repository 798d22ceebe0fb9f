// ABOUTME: End-to-end self-test runs over a loopback adapter: trigger,
// ABOUTME: tagged round-trips, scoring, and the authorization gates.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{user_message, wait_for_sent, LoopbackAdapter};
use quorum::dispatcher::Dispatcher;
use quorum::modules::ControlsModule;
use quorum::registry::ModuleRegistry;
use quorum::router::MessageRouter;
use quorum::runtime::RuntimeContext;
use quorum::selftest::session::PlannedCase;
use quorum::selftest::{SelfTestModule, SelfTestSettings};
use quorum_core::{ChatModule, OperatingMode, ServiceAdapter};

const CONTROL_CHANNEL: &str = "C-control";
const OPERATOR_ID: &str = "U-op";
const BOT_USER: &str = "quorum";

fn build_stack() -> (Arc<MessageRouter>, Arc<LoopbackAdapter>, Arc<RuntimeContext>) {
    let runtime = Arc::new(RuntimeContext::new());
    let operator_ids = HashSet::from([OPERATOR_ID.to_string()]);

    let controls: Arc<dyn ChatModule> = Arc::new(ControlsModule::new(
        Arc::clone(&runtime),
        CONTROL_CHANNEL,
        operator_ids.clone(),
        vec!["controls".to_string(), "selftest".to_string()],
    ));
    let plan: Vec<PlannedCase> = controls
        .test_cases()
        .into_iter()
        .map(|case| PlannedCase {
            module: controls.name().to_string(),
            case,
        })
        .collect();

    let selftest = Arc::new(SelfTestModule::new(
        Arc::clone(&runtime),
        SelfTestSettings {
            control_channel_id: CONTROL_CHANNEL.to_string(),
            operator_ids,
            settle: Duration::from_millis(200),
            run_ceiling: Duration::from_secs(120),
        },
        plan,
    ));

    let mut registry = ModuleRegistry::new();
    registry.register(controls).unwrap();
    registry.register(selftest).unwrap();
    registry.validate_test_cases().unwrap();

    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::clone(&runtime),
        Duration::from_secs(5),
    );
    let router = Arc::new(MessageRouter::new(
        dispatcher,
        Arc::clone(&runtime),
        None,
    ));
    let adapter = Arc::new(LoopbackAdapter::new(BOT_USER));
    (router, adapter, runtime)
}

fn spawn_router(router: Arc<MessageRouter>, adapter: Arc<LoopbackAdapter>) {
    tokio::spawn(async move {
        router
            .run(vec![adapter as Arc<dyn ServiceAdapter>])
            .await
            .unwrap();
    });
}

#[tokio::test(start_paused = true)]
async fn test_full_run_passes_every_declared_case() {
    let (router, adapter, runtime) = build_stack();
    spawn_router(router, Arc::clone(&adapter));

    adapter
        .inject(user_message(OPERATOR_ID, "op", CONTROL_CHANNEL, "test yourself"))
        .await;

    wait_for_sent(&adapter, "run summary", |s| {
        s.contains("The percentage of tests passed is")
    })
    .await;

    let transcript = adapter.sent();
    // Tagged round trips for the controls cases, in declaration order
    assert!(transcript.iter().any(|s| s == "TEST_QUESTION 0: ping"));
    assert!(transcript
        .iter()
        .any(|s| s == "TEST_RESPONSE 0: I'm alive!"));
    assert!(transcript.iter().any(|s| s == "TEST_QUESTION 1: stats"));
    assert!(transcript
        .iter()
        .any(|s| s == "TEST_QUESTION 2: reboot"));
    // The bot itself is not an operator, so reboot must be refused
    assert!(transcript
        .iter()
        .any(|s| s == "TEST_RESPONSE 2: You're not my supervisor!"));
    // The harness's own trigger phrases answer busy mid-run
    assert!(transcript
        .iter()
        .any(|s| s.starts_with("TEST_RESPONSE 3: I am running my integration test")));

    // Every case passed: 3 controls + 2 selftest triggers
    for id in 0..5 {
        let needle = format!("QUESTION # {}: PASSED", id);
        assert!(
            transcript.iter().any(|s| s.starts_with(&needle)),
            "missing {:?} in {:#?}",
            needle,
            transcript
        );
    }
    assert!(transcript
        .iter()
        .any(|s| s == "The percentage of tests passed is 100.00%"));

    // Mode is restored once the run completes
    assert_eq!(runtime.mode(), OperatingMode::Normal);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_trigger_is_refused_by_name() {
    let (router, adapter, runtime) = build_stack();
    spawn_router(router, Arc::clone(&adapter));

    adapter
        .inject(user_message("u9", "mallory", CONTROL_CHANNEL, "test yourself"))
        .await;

    wait_for_sent(&adapter, "refusal", |s| {
        s == "You are not a trusted operator, mallory"
    })
    .await;

    // No run started
    assert_eq!(runtime.mode(), OperatingMode::Normal);
    assert!(!adapter.sent().iter().any(|s| s.starts_with("TEST_QUESTION")));
}

#[tokio::test(start_paused = true)]
async fn test_trigger_outside_control_channel_is_refused() {
    let (router, adapter, _runtime) = build_stack();
    spawn_router(router, Arc::clone(&adapter));

    adapter
        .inject(user_message(OPERATOR_ID, "op", "C-general", "test modules"))
        .await;

    wait_for_sent(&adapter, "wrong-channel refusal", |s| {
        s.contains("control channel")
    })
    .await;
    assert!(!adapter.sent().iter().any(|s| s.starts_with("TEST_QUESTION")));
}

#[tokio::test(start_paused = true)]
async fn test_normal_traffic_answers_untagged() {
    let (router, adapter, _runtime) = build_stack();
    spawn_router(router, Arc::clone(&adapter));

    adapter
        .inject(user_message("u1", "alice", "C-general", "ping"))
        .await;

    wait_for_sent(&adapter, "ping reply", |s| s == "I'm alive!").await;
    // The echoed reply is self-authored and must be dropped, not re-answered
    tokio::time::sleep(Duration::from_secs(2)).await;
    let replies: Vec<_> = adapter
        .sent()
        .into_iter()
        .filter(|s| s == "I'm alive!")
        .collect();
    assert_eq!(replies.len(), 1);
}
