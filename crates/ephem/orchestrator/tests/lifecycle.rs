//! Deploy and teardown behavior against the scripted driver.

use ephem_doctor::{Doctor, ToolCheck};
use ephem_driver::{DriverError, DriverRegistry, ScriptedDriver};
use ephem_orchestrator::{
    CancellationToken, DeployRequest, Orchestrator, OrchestratorError, RetryPolicy,
};
use ephem_store::{InMemoryStackStore, StackStore};
use ephem_types::{
    ErrorKind, FailureKind, Phase, Provider, ResourceSpec, ResourceState, Stack, StackName,
    StackState,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    orchestrator: Orchestrator,
    driver: Arc<ScriptedDriver>,
    store: Arc<InMemoryStackStore>,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
        multiplier: 2.0,
        max_attempts: 5,
        max_elapsed: Duration::from_secs(30),
        call_timeout: Duration::from_secs(10),
        jitter: false,
    }
}

fn harness() -> Harness {
    let driver = Arc::new(ScriptedDriver::new());
    let store = Arc::new(InMemoryStackStore::new());
    let drivers = DriverRegistry::new().with(Provider::LocalCluster, driver.clone());
    let orchestrator = Orchestrator::new(store.clone(), drivers).with_retry_policy(fast_policy());
    Harness {
        orchestrator,
        driver,
        store,
    }
}

fn name(s: &str) -> StackName {
    StackName::new(s).unwrap()
}

fn resource_state(stack: &Stack, resource: &str) -> ResourceState {
    stack
        .resources
        .iter()
        .find(|r| r.name() == resource)
        .map(|r| r.state)
        .unwrap()
}

fn demo_request(stack: &str) -> DeployRequest {
    DeployRequest::new(
        name(stack),
        Provider::LocalCluster,
        vec![
            ResourceSpec::new("db", "postgres"),
            ResourceSpec::new("api", "mlflow-server").exposed(),
        ],
    )
    .with_ttl(Duration::from_secs(3600))
}

#[tokio::test(start_paused = true)]
async fn deploy_demo_reaches_running_with_api_url() {
    let h = harness();
    let cancel = CancellationToken::new();

    let urls = h.orchestrator.deploy(demo_request("demo"), &cancel).await.unwrap();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls.get("api").map(String::as_str), Some("http://demo-mlflow-server-api.test"));

    let stack = h.orchestrator.get_stack(&name("demo")).await.unwrap();
    assert_eq!(stack.state, StackState::Running);
    assert!(stack.resources.iter().all(|r| r.state == ResourceState::Ready));
    assert!(stack.teardown_deadline.is_some());
    assert!(stack
        .resources
        .iter()
        .all(|r| r.external_ref().is_some_and(|ext| ext.starts_with("ext-"))));

    assert_eq!(h.orchestrator.get_service_urls(&name("demo")).await.unwrap(), urls);
}

#[tokio::test(start_paused = true)]
async fn deploy_then_teardown_ends_destroyed() {
    let h = harness();
    let cancel = CancellationToken::new();
    h.orchestrator.deploy(demo_request("demo"), &cancel).await.unwrap();
    assert_eq!(h.driver.live_count(), 2);

    let report = h.orchestrator.teardown(&name("demo"), &cancel).await.unwrap();
    assert_eq!(report.state, StackState::Destroyed);
    assert_eq!(report.destroyed, vec!["api".to_string(), "db".to_string()]);
    assert!(!report.already_destroyed);

    assert_eq!(h.driver.live_count(), 0);
    assert!(h.store.list_active().await.unwrap().is_empty());
    assert_eq!(h.store.list_all().await.unwrap().len(), 1);

    let err = h.orchestrator.get_service_urls(&name("demo")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
}

#[tokio::test(start_paused = true)]
async fn teardown_of_destroyed_stack_is_a_noop() {
    let h = harness();
    let cancel = CancellationToken::new();
    h.orchestrator.deploy(demo_request("demo"), &cancel).await.unwrap();
    h.orchestrator.teardown(&name("demo"), &cancel).await.unwrap();
    let destroy_calls = h.driver.calls_for("db", Phase::Destroy);

    for _ in 0..2 {
        let report = h.orchestrator.teardown(&name("demo"), &cancel).await.unwrap();
        assert!(report.already_destroyed);
        assert_eq!(report.state, StackState::Destroyed);
    }
    assert_eq!(h.driver.calls_for("db", Phase::Destroy), destroy_calls);
}

#[tokio::test(start_paused = true)]
async fn teardown_unknown_stack_is_not_found() {
    let h = harness();
    let err = h
        .orchestrator
        .teardown(&name("ghost"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn duplicate_deploy_is_rejected() {
    let h = harness();
    let cancel = CancellationToken::new();
    h.orchestrator.deploy(demo_request("demo"), &cancel).await.unwrap();

    let err = h.orchestrator.deploy(demo_request("demo"), &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test(start_paused = true)]
async fn permanent_create_failure_cleans_up_in_reverse() {
    let h = harness();
    h.driver.fail_create("cache", DriverError::permanent("invalid machine type"));
    let request = DeployRequest::new(
        name("partial"),
        Provider::LocalCluster,
        vec![
            ResourceSpec::new("db", "postgres"),
            ResourceSpec::new("cache", "redis"),
            ResourceSpec::new("api", "fastapi").exposed(),
        ],
    );

    let err = h
        .orchestrator
        .deploy(request, &CancellationToken::new())
        .await
        .unwrap_err();
    match &err {
        OrchestratorError::DeployFailed(failure) => {
            assert_eq!(failure.resource, "cache");
            assert_eq!(failure.phase, Phase::Create);
            assert_eq!(failure.kind, FailureKind::Permanent);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.kind(), ErrorKind::Permanent);

    let stack = h.store.get(&name("partial")).await.unwrap();
    assert_eq!(stack.state, StackState::Failed);
    assert_eq!(stack.errors.len(), 1);
    assert_eq!(h.driver.calls_for("db", Phase::Destroy), 1);
    assert_eq!(h.driver.calls_for("api", Phase::Create), 0);
    assert_eq!(h.driver.live_count(), 0);
    assert_eq!(resource_state(&stack, "db"), ResourceState::Destroyed);
    assert_eq!(resource_state(&stack, "api"), ResourceState::Pending);

    // Failed stacks still tear down to Destroyed
    let report = h
        .orchestrator
        .teardown(&name("partial"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.state, StackState::Destroyed);
    assert_eq!(h.driver.calls_for("api", Phase::Destroy), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let h = harness();
    h.driver.fail_create_times("db", 2, DriverError::transient("rate limited"));
    h.driver.ready_after("api", 3);

    h.orchestrator
        .deploy(demo_request("retry"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.driver.calls_for("db", Phase::Create), 3);
    assert_eq!(h.driver.calls_for("api", Phase::Ready), 4);
}

#[tokio::test(start_paused = true)]
async fn exhausted_transient_budget_fails_the_stack() {
    let h = harness();
    h.driver.fail_create_times("db", 100, DriverError::transient("quota"));

    let err = h
        .orchestrator
        .deploy(demo_request("flaky"), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        OrchestratorError::DeployFailed(failure) => {
            assert_eq!(failure.kind, FailureKind::Transient);
            assert!(failure.message.contains("quota"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.driver.calls_for("db", Phase::Create), fast_policy().max_attempts as usize);
    assert_eq!(
        h.store.get(&name("flaky")).await.unwrap().state,
        StackState::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn hung_driver_call_times_out() {
    let h = harness();
    h.driver.delay("db", Phase::Create, Duration::from_secs(3600));

    let err = h
        .orchestrator
        .deploy(demo_request("hung"), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        OrchestratorError::DeployFailed(failure) => {
            assert_eq!(failure.kind, FailureKind::Transient);
            assert!(failure.message.contains("timed out"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn partial_teardown_resumes_without_repeating_work() {
    let h = harness();
    let cancel = CancellationToken::new();
    h.orchestrator.deploy(demo_request("demo"), &cancel).await.unwrap();
    h.driver.fail_destroy("db", DriverError::permanent("permission denied"));

    let err = h.orchestrator.teardown(&name("demo"), &cancel).await.unwrap_err();
    match &err {
        OrchestratorError::TeardownIncomplete { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].resource, "db");
            assert_eq!(failures[0].phase, Phase::Destroy);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let stack = h.store.get(&name("demo")).await.unwrap();
    assert_eq!(stack.state, StackState::TearingDown);
    assert!(!stack.errors.is_empty());
    assert_eq!(resource_state(&stack, "api"), ResourceState::Destroyed);
    assert_eq!(resource_state(&stack, "db"), ResourceState::Errored);

    // The retried destroy is recorded as in flight before the driver call
    h.driver.delay("db", Phase::Destroy, Duration::from_secs(5));
    let demo = name("demo");
    let (report, during) = tokio::join!(h.orchestrator.teardown(&demo, &cancel), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.store.get(&name("demo")).await.unwrap()
    });
    assert_eq!(resource_state(&during, "db"), ResourceState::Destroying);
    assert_eq!(resource_state(&during, "api"), ResourceState::Destroyed);
    assert_eq!(during.state, StackState::TearingDown);

    let report = report.unwrap();
    assert_eq!(report.state, StackState::Destroyed);
    assert_eq!(report.destroyed, vec!["db".to_string()]);
    assert_eq!(h.driver.calls_for("api", Phase::Destroy), 1);
    assert_eq!(h.driver.calls_for("db", Phase::Destroy), 2);
    assert_eq!(h.driver.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn teardown_racing_a_deploy_leaks_nothing() {
    let h = harness();
    h.driver.delay("api", Phase::Create, Duration::from_secs(5));
    let policy = RetryPolicy {
        call_timeout: Duration::from_secs(60),
        ..fast_policy()
    };
    let orchestrator = h.orchestrator.clone().with_retry_policy(policy);

    let deploy = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .deploy(demo_request("race"), &CancellationToken::new())
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    let report = orchestrator
        .teardown(&name("race"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.state, StackState::Destroyed);

    let err = deploy.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert_eq!(h.driver.live_count(), 0);
    assert_eq!(
        h.store.get(&name("race")).await.unwrap().state,
        StackState::Destroyed
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_deploy_keeps_last_state_and_tears_down() {
    let h = harness();
    h.driver.ready_after("db", 10_000);
    let policy = RetryPolicy {
        max_attempts: 0,
        max_elapsed: Duration::from_secs(24 * 3600),
        ..fast_policy()
    };
    let orchestrator = h.orchestrator.clone().with_retry_policy(policy);
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });

    let err = orchestrator
        .deploy(demo_request("cancel"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Cancelled(_)));
    assert_eq!(
        h.store.get(&name("cancel")).await.unwrap().state,
        StackState::Provisioning
    );

    orchestrator
        .teardown(&name("cancel"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.driver.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_preflight_refuses_to_provision() {
    let h = harness();
    let doctor = Doctor::new().with_check(ToolCheck::new("ephem-missing-tool").search_path("/nonexistent"));
    let orchestrator = h.orchestrator.clone().with_preflight(Arc::new(doctor));

    let err = orchestrator
        .deploy(demo_request("gated"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::PreflightFailed(_)));
    assert!(h.store.is_empty());
    assert!(h.driver.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_driver_and_bad_requests_are_permanent() {
    let h = harness();
    let cancel = CancellationToken::new();

    let mut aws = demo_request("cloud");
    aws.provider = Provider::Aws;
    let err = h.orchestrator.deploy(aws, &cancel).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoDriver(Provider::Aws)));

    let empty = DeployRequest::new(name("empty"), Provider::LocalCluster, Vec::new());
    let err = h.orchestrator.deploy(empty, &cancel).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

    let forever = demo_request("forever").with_ttl(Duration::from_secs(10_000_000_000_000));
    let err = h.orchestrator.deploy(forever, &cancel).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
    assert_eq!(err.kind(), ErrorKind::Permanent);

    let dup = DeployRequest::new(
        name("dup"),
        Provider::LocalCluster,
        vec![ResourceSpec::new("db", "postgres"), ResourceSpec::new("db", "redis")],
    );
    let err = h.orchestrator.deploy(dup, &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert!(h.store.is_empty());
    assert!(h.driver.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn destroyed_name_can_be_deployed_again() {
    let h = harness();
    let cancel = CancellationToken::new();
    h.orchestrator.deploy(demo_request("again"), &cancel).await.unwrap();
    h.orchestrator.teardown(&name("again"), &cancel).await.unwrap();

    let urls = h.orchestrator.deploy(demo_request("again"), &cancel).await.unwrap();
    assert_eq!(urls.len(), 1);
    let stack = h.store.get(&name("again")).await.unwrap();
    assert_eq!(stack.state, StackState::Running);
    assert!(stack.errors.is_empty());
    assert_eq!(h.driver.calls_for("db", Phase::Create), 2);
    assert_eq!(h.driver.live_count(), 2);

    let err = h.orchestrator.deploy(demo_request("again"), &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}
