mod support;

use std::collections::BTreeMap;
use std::time::Duration;

use container_launcher::{LaunchError, ReadinessError, ReadinessProbe};
use runtime::models::RunStatus;
use runtime::{RuntimeError, SupervisorCallError};
use serde_json::json;
use support::{fast_probe, harness, seed_built_image, seed_run, FakeRuntime, IMAGE};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn healthy_supervisor() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn given_ready_supervisor_when_dispatching_then_run_is_running() {
    let server = healthy_supervisor().await;
    Mock::given(method("POST"))
        .and(path("/run/r1/start"))
        .and(body_json(json!({"envs": {"K": "V"}, "inputs": {"topic": "x"}})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "RUNNING", "pid": 77})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let h = harness(FakeRuntime::new(server.address().port()), fast_probe());
    seed_run(&h.store, "r1", RunStatus::Pending).await;

    let outcome = h
        .state
        .dispatcher
        .start_run("r1", IMAGE, map(&[("K", "V")]), map(&[("topic", "x")]))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Running);
    assert_eq!(outcome.pid, 77);
    assert_eq!(outcome.container_id, "ctr-1");
    assert_eq!(h.runtime.launches(), 1);
    assert_eq!(h.store.get_run("r1").await.unwrap().status, RunStatus::Running);
}

#[tokio::test]
async fn given_supervisor_rejects_start_then_run_is_error_with_response_body() {
    let server = healthy_supervisor().await;
    Mock::given(method("POST"))
        .and(path("/run/r1/start"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "spawn failed"})))
        .mount(&server)
        .await;
    let h = harness(FakeRuntime::new(server.address().port()), fast_probe());
    seed_run(&h.store, "r1", RunStatus::Pending).await;

    let err = h
        .state
        .dispatcher
        .start_run("r1", IMAGE, BTreeMap::new(), BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::Supervisor(SupervisorCallError::Rejected { status: 500, .. })
    ));
    let record = h.store.get_run("r1").await.unwrap();
    assert_eq!(record.status, RunStatus::Error);
    assert_eq!(record.output.unwrap().stderr, "spawn failed");
    assert!(record.error.unwrap().contains("spawn failed"));
}

#[tokio::test]
async fn given_supervisor_never_ready_then_readiness_timeout_marks_run_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let probe = ReadinessProbe::new(Duration::from_millis(300), Duration::from_millis(50));
    let h = harness(FakeRuntime::new(server.address().port()), probe);
    seed_run(&h.store, "r1", RunStatus::Pending).await;

    let err = h
        .state
        .dispatcher
        .start_run("r1", IMAGE, BTreeMap::new(), BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::Readiness(ReadinessError::Timeout { .. })
    ));
    let record = h.store.get_run("r1").await.unwrap();
    assert_eq!(record.status, RunStatus::Error);
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn given_launch_failure_then_run_is_error_and_nothing_started() {
    let h = harness(FakeRuntime::failing(1), fast_probe());
    seed_run(&h.store, "r1", RunStatus::Pending).await;

    let err = h
        .state
        .dispatcher
        .start_run("r1", IMAGE, BTreeMap::new(), BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::Launch(LaunchError::CommandFailed { .. })
    ));
    let record = h.store.get_run("r1").await.unwrap();
    assert_eq!(record.status, RunStatus::Error);
    assert!(record.error.unwrap().contains("Unable to find image"));
}

#[tokio::test]
async fn given_blank_image_ref_then_rejected_without_side_effects() {
    let h = harness(FakeRuntime::new(1), fast_probe());
    seed_run(&h.store, "r1", RunStatus::Pending).await;

    let err = h
        .state
        .dispatcher
        .start_run("r1", " ", BTreeMap::new(), BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::Launch(LaunchError::MissingImageRef)));
    assert_eq!(h.runtime.lookups(), 0);
    assert_eq!(h.store.get_run("r1").await.unwrap().status, RunStatus::Pending);
}

#[tokio::test]
async fn given_already_dispatched_run_then_conflict() {
    let h = harness(FakeRuntime::new(1), fast_probe());
    seed_run(&h.store, "r1", RunStatus::Running).await;

    let err = h
        .state
        .dispatcher
        .start_run("r1", IMAGE, BTreeMap::new(), BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::RunNotPending { .. }));
    assert_eq!(h.runtime.lookups(), 0);
}

#[tokio::test]
async fn given_unknown_run_then_not_found() {
    let h = harness(FakeRuntime::new(1), fast_probe());

    let err = h
        .state
        .dispatcher
        .start_run("ghost", IMAGE, BTreeMap::new(), BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::RunNotFound { .. }));
}

#[tokio::test]
async fn given_built_image_when_submitting_then_run_is_created_and_dispatched() {
    let server = healthy_supervisor().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "RUNNING", "pid": 5})),
        )
        .mount(&server)
        .await;
    let h = harness(FakeRuntime::new(server.address().port()), fast_probe());
    seed_built_image(&h.store, &["topic"]).await;

    let outcome = h
        .state
        .dispatcher
        .submit_run(support::AGENT, map(&[("K", "V")]), map(&[("topic", "x")]))
        .await
        .unwrap();

    let record = h.store.get_run(&outcome.run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Running);
    assert_eq!(record.image_ref, IMAGE);
    assert_eq!(record.config.envs["K"], "V");
    assert_eq!(record.config.inputs["topic"], "x");
}

#[tokio::test]
async fn given_inputs_not_matching_declaration_then_rejected_before_launch() {
    let h = harness(FakeRuntime::new(1), fast_probe());
    seed_built_image(&h.store, &["topic"]).await;

    let missing = h
        .state
        .dispatcher
        .submit_run(support::AGENT, BTreeMap::new(), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(missing, RuntimeError::MissingInputs { .. }));

    let extra = h
        .state
        .dispatcher
        .submit_run(
            support::AGENT,
            BTreeMap::new(),
            map(&[("topic", "x"), ("colour", "red")]),
        )
        .await
        .unwrap_err();
    assert!(matches!(extra, RuntimeError::UndeclaredInputs { .. }));
    assert_eq!(h.runtime.lookups(), 0);
}

#[tokio::test]
async fn given_no_built_image_then_submission_is_rejected() {
    let h = harness(FakeRuntime::new(1), fast_probe());

    let err = h
        .state
        .dispatcher
        .submit_run(support::AGENT, BTreeMap::new(), BTreeMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::NoBuiltImage { .. }));
}
