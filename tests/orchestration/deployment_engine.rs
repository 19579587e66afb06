use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;

use deployment_engine::constants::{events, MAIN_MARKER};
use deployment_engine::events::PublishedEvent;
use deployment_engine::models::{Execution, JsonMap, NewStep};
use deployment_engine::orchestration::DeploymentEngine;
use deployment_engine::state_machine::ExecutionStatus;
use deployment_engine::telemetry::{DeploymentMetric, TelemetryScope};
use deployment_engine::EngineError;

use crate::common::{ready_engine, settings, MockExecutor, MockResponse, PolicyBuilder};

fn statuses(engine: &DeploymentEngine<MockExecutor>, step: &str) -> Vec<ExecutionStatus> {
    engine
        .step(step)
        .expect("step exists")
        .executions
        .iter()
        .map(|e| e.status)
        .collect()
}

/// Failure kinds attached to transition events, in publish order
fn failure_kinds(rx: &mut broadcast::Receiver<PublishedEvent>) -> Vec<String> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Some(kind) = event.context["failure"]["kind"].as_str() {
            kinds.push(kind.to_string());
        }
    }
    kinds
}

#[tokio::test(start_paused = true)]
async fn test_steps_run_in_priority_order() {
    let executor = MockExecutor::new();
    let mut outputs = JsonMap::new();
    outputs.insert("vnetId".into(), json!("vnet-1"));
    executor.script(
        "infra",
        Duration::from_secs(5),
        MockResponse::Succeed { outputs },
    );

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new().max_retries(2).build(),
        1,
        &[("app", 2), ("infra", 1)],
    );

    let summary = engine.run().await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(executor.call_order(), vec!["infra", "app"]);
    assert_eq!(summary.outputs["infra"].values["vnetId"], "vnet-1");
    assert!(summary.outputs.contains_key("app"));
    assert!(summary.outputs.contains_key(MAIN_MARKER));

    let infra = engine.step("infra").unwrap();
    assert_eq!(infra.executions.len(), 1);
    assert_eq!(infra.executions[0].duration, "00:00:05");
    assert!(infra.executions[0].resume_token.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failing_step_is_retried_until_budget_exhausted() {
    let executor = MockExecutor::new();
    executor.script_n("infra", 5, Duration::from_secs(1), MockResponse::fail("QuotaExceeded"));

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new().max_retries(2).retry_delay(30).build(),
        2,
        &[("infra", 1)],
    );

    let summary = engine.run().await.unwrap();

    assert!(!summary.succeeded());
    assert_eq!(
        statuses(&engine, "infra"),
        vec![
            ExecutionStatus::Retrying,
            ExecutionStatus::Retrying,
            ExecutionStatus::Failed
        ]
    );
    let calls = executor.calls_for("infra");
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_secs(31));
    }
    let attempts: Vec<u32> = calls.iter().map(|c| c.request.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let step = summary.step("infra").unwrap();
    assert_eq!(step.status, Some(ExecutionStatus::Failed));
    assert_eq!(step.code, "QuotaExceeded");
    assert_eq!(
        engine
            .telemetry()
            .get(DeploymentMetric::Attempts, &TelemetryScope::step("infra")),
        Some("3".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success() {
    let executor = MockExecutor::new();
    executor
        .script("app", Duration::from_secs(2), MockResponse::fail("Conflict"))
        .script("app", Duration::from_secs(2), MockResponse::succeed());

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new().max_retries(3).retry_delay(10).build(),
        1,
        &[("app", 1)],
    );

    let summary = engine.run().await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(
        statuses(&engine, "app"),
        vec![ExecutionStatus::Retrying, ExecutionStatus::Succeeded]
    );
    assert_eq!(engine.step("app").unwrap().executions[0].code, "Conflict");
}

#[tokio::test(start_paused = true)]
async fn test_deployment_timeout_applies_retry_rule() {
    let executor = MockExecutor::new();
    executor
        .script("infra", Duration::from_secs(600), MockResponse::succeed())
        .script("infra", Duration::from_secs(600), MockResponse::succeed());

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new()
            .max_retries(1)
            .deployment_timeout(60)
            .build(),
        1,
        &[("infra", 1)],
    );
    let mut events_rx = engine.events().subscribe();

    let summary = engine.run().await.unwrap();

    assert_eq!(
        statuses(&engine, "infra"),
        vec![ExecutionStatus::Retrying, ExecutionStatus::TimedOut]
    );
    assert_eq!(failure_kinds(&mut events_rx), vec!["timeout", "timeout"]);
    let last = engine.step("infra").unwrap().latest_execution().unwrap();
    assert!(last.error.contains("No deployment result within 00:01:00"));
    assert!(summary.elapsed < Duration::from_secs(600));
}

#[tokio::test(start_paused = true)]
async fn test_absent_deployment_fails_with_empty_error() {
    let executor = MockExecutor::new();
    executor.script(
        "infra",
        Duration::ZERO,
        MockResponse::NotCreated {
            payload: String::new(),
        },
    );

    let mut engine = ready_engine(&executor, PolicyBuilder::new().build(), 1, &[("infra", 1)]);
    let summary = engine.run().await.unwrap();

    let execution = engine.step("infra").unwrap().latest_execution().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error, "");
    assert_eq!(execution.code, "");
    assert!(!summary.outputs.contains_key("infra"));
}

#[tokio::test(start_paused = true)]
async fn test_succeeded_result_with_error_payload_keeps_both() {
    let executor = MockExecutor::new();
    executor.script(
        "infra",
        Duration::ZERO,
        MockResponse::Report {
            status: ExecutionStatus::Succeeded,
            payload: r#"{"error":{"message":"quota exceeded","code":"QuotaExceeded"}}"#.into(),
        },
    );

    let mut engine = ready_engine(&executor, PolicyBuilder::new().build(), 1, &[("infra", 1)]);
    let summary = engine.run().await.unwrap();

    let execution = engine.step("infra").unwrap().latest_execution().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.error, "quota exceeded");
    assert_eq!(execution.code, "QuotaExceeded");
    assert!(summary.outputs.contains_key("infra"));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_payload_still_transitions() {
    let executor = MockExecutor::new();
    executor.script(
        "infra",
        Duration::ZERO,
        MockResponse::Fail {
            payload: "<html>Bad Gateway</html>".into(),
        },
    );

    let mut engine = ready_engine(&executor, PolicyBuilder::new().build(), 1, &[("infra", 1)]);
    let mut events_rx = engine.events().subscribe();
    engine.run().await.unwrap();

    let execution = engine.step("infra").unwrap().latest_execution().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(!execution.error.is_empty());
    assert_eq!(execution.code, "");
    assert_eq!(failure_kinds(&mut events_rx), vec!["error_payload_decode"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempt_event_carries_executor_error() {
    let executor = MockExecutor::new();
    executor
        .script("infra", Duration::ZERO, MockResponse::fail("QuotaExceeded"))
        .script("infra", Duration::ZERO, MockResponse::succeed());

    let mut engine = ready_engine(&executor, PolicyBuilder::new().max_retries(1).build(), 1, &[("infra", 1)]);
    let mut events_rx = engine.events().subscribe();
    engine.run().await.unwrap();

    let mut retry = None;
    while let Ok(event) = events_rx.try_recv() {
        if event.name == events::STEP_RETRY_SCHEDULED {
            retry = Some(event);
        } else if event.name == events::STEP_COMPLETED {
            assert!(event.context.get("failure").is_none());
        }
    }
    let retry = retry.expect("retry event published");
    assert_eq!(retry.context["failure"]["kind"], "executor");
    assert_eq!(retry.context["failure"]["recoverable"], true);
    assert_eq!(retry.context["failure"]["message"], "Executor error: QuotaExceeded happened");
}

#[tokio::test(start_paused = true)]
async fn test_executor_panic_is_absorbed() {
    let executor = MockExecutor::new();
    executor.script("infra", Duration::ZERO, MockResponse::Panic);

    let mut engine = ready_engine(&executor, PolicyBuilder::new().build(), 1, &[("infra", 1), ("app", 2)]);
    let summary = engine.run().await.unwrap();

    let infra = summary.step("infra").unwrap();
    assert_eq!(infra.status, Some(ExecutionStatus::Failed));
    assert_eq!(infra.code, "ExecutorPanicked");
    assert_eq!(summary.step("app").unwrap().status, Some(ExecutionStatus::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_is_respected() {
    let executor = MockExecutor::new();
    for step in ["a", "b", "c", "d", "e"] {
        executor.script(step, Duration::from_secs(10), MockResponse::succeed());
    }

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new().build(),
        2,
        &[("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1)],
    );
    let summary = engine.run().await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(executor.max_concurrent(), 2);
    assert_eq!(executor.call_order(), vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test(start_paused = true)]
async fn test_overall_timeout_goes_fatal_and_lets_in_flight_finish() {
    let executor = MockExecutor::new();
    executor.script_n("infra", 10, Duration::from_secs(20), MockResponse::fail("Flaky"));

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new()
            .max_retries(5)
            .retry_delay(25)
            .deployment_timeout(60)
            .restart_timeout(60)
            .overall_timeout(100)
            .build(),
        1,
        &[("infra", 1)],
    );
    let mut events_rx = engine.events().subscribe();

    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, EngineError::OverallTimeoutExceeded { .. }));
    assert!(err.is_run_terminating());
    assert!(engine.status().is_fatal_state);
    assert_eq!(
        statuses(&engine, "infra"),
        vec![
            ExecutionStatus::Retrying,
            ExecutionStatus::Retrying,
            ExecutionStatus::FatallyFailed
        ]
    );
    assert_eq!(executor.calls().len(), 3);

    let mut names = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        names.push(event.name);
    }
    assert!(names.iter().any(|n| n == events::ENGINE_FATAL));
    assert!(!names.iter().any(|n| n == events::ENGINE_FINISHED));
}

#[tokio::test(start_paused = true)]
async fn test_resume_within_restart_window_reuses_token() {
    let executor = MockExecutor::new();
    let mut engine = DeploymentEngine::with_policy(
        executor.clone(),
        PolicyBuilder::new().restart_timeout(300).build(),
        settings(1),
    )
    .unwrap();
    engine.load_templates(vec![NewStep::new("infra", 1)]).unwrap();
    engine.load_main_outputs(JsonMap::new()).unwrap();

    let mut interrupted = Execution::scaffold(41, 0, Utc::now() - chrono::Duration::seconds(120));
    interrupted.status = ExecutionStatus::Running;
    interrupted.resume_token = "poll-cursor-7".into();
    engine.resume_execution("infra", interrupted).unwrap();

    let summary = engine.run().await.unwrap();

    assert!(summary.succeeded());
    let calls = executor.calls_for("infra");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request.resume_token.as_deref(), Some("poll-cursor-7"));

    let step = engine.step("infra").unwrap();
    assert_eq!(step.executions.len(), 1);
    assert_eq!(step.executions[0].id, 41);
    assert!(step.executions[0].resume_token.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resume_outside_restart_window_times_out_and_retries() {
    let executor = MockExecutor::new();
    let mut engine = DeploymentEngine::with_policy(
        executor.clone(),
        PolicyBuilder::new().restart_timeout(60).max_retries(1).build(),
        settings(1),
    )
    .unwrap();
    engine.load_templates(vec![NewStep::new("infra", 1)]).unwrap();
    engine.load_main_outputs(JsonMap::new()).unwrap();

    let mut stale = Execution::scaffold(1, 0, Utc::now() - chrono::Duration::hours(2));
    stale.status = ExecutionStatus::Running;
    stale.resume_token = "expired".into();
    engine.resume_execution("infra", stale).unwrap();

    let summary = engine.run().await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(
        statuses(&engine, "infra"),
        vec![ExecutionStatus::Retrying, ExecutionStatus::Succeeded]
    );
    let calls = executor.calls_for("infra");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].request.resume_token.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resumed_executions_share_the_concurrency_limit() {
    let executor = MockExecutor::new();
    for step in ["a", "b", "c"] {
        executor.script(step, Duration::from_secs(10), MockResponse::succeed());
    }
    let mut engine = DeploymentEngine::with_policy(
        executor.clone(),
        PolicyBuilder::new().restart_timeout(300).build(),
        settings(1),
    )
    .unwrap();
    engine
        .load_templates(vec![
            NewStep::new("a", 1),
            NewStep::new("b", 2),
            NewStep::new("c", 3),
        ])
        .unwrap();
    engine.load_main_outputs(JsonMap::new()).unwrap();

    for (id, step) in [(1, "a"), (2, "b"), (3, "c")] {
        let mut interrupted = Execution::scaffold(id, 0, Utc::now() - chrono::Duration::seconds(30));
        interrupted.status = ExecutionStatus::Running;
        interrupted.resume_token = format!("cursor-{step}");
        engine.resume_execution(step, interrupted).unwrap();
    }

    let started = tokio::time::Instant::now();
    let summary = engine.run().await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(executor.max_concurrent(), 1);
    assert_eq!(executor.call_order(), vec!["a", "b", "c"]);
    assert!(started.elapsed() >= Duration::from_secs(30));
    for step in ["a", "b", "c"] {
        assert_eq!(statuses(&engine, step), vec![ExecutionStatus::Succeeded]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_pending_execution_waits_for_a_permit() {
    let executor = MockExecutor::new();
    executor.script("a", Duration::from_secs(10), MockResponse::succeed());
    executor.script("b", Duration::from_secs(10), MockResponse::succeed());
    let mut engine = DeploymentEngine::with_policy(
        executor.clone(),
        PolicyBuilder::new().build(),
        settings(1),
    )
    .unwrap();
    engine
        .load_templates(vec![NewStep::new("a", 1), NewStep::new("b", 2)])
        .unwrap();
    engine.load_main_outputs(JsonMap::new()).unwrap();

    for (id, step) in [(1, "a"), (2, "b")] {
        engine
            .resume_execution(step, Execution::scaffold(id, 0, Utc::now()))
            .unwrap();
    }

    let summary = engine.run().await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(executor.max_concurrent(), 1);
    assert_eq!(executor.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_overall_timeout_beyond_calendar_range_never_trips() {
    let executor = MockExecutor::new();
    executor.script("infra", Duration::from_secs(5), MockResponse::fail("Flaky"));

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new()
            .max_retries(1)
            .retry_delay(3)
            .overall_timeout(10_000_000_000_000)
            .build(),
        1,
        &[("infra", 1)],
    );
    let summary = engine.run().await.unwrap();

    assert!(summary.succeeded());
    assert!(!engine.status().is_fatal_state);
    assert_eq!(
        statuses(&engine, "infra"),
        vec![ExecutionStatus::Retrying, ExecutionStatus::Succeeded]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_delay_beyond_calendar_range_never_retries() {
    let executor = MockExecutor::new();
    executor.script("infra", Duration::ZERO, MockResponse::fail("Flaky"));

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new()
            .max_retries(1)
            .retry_delay(10_000_000_000_000)
            .build(),
        1,
        &[("infra", 1)],
    );
    let summary = engine.run().await.unwrap();

    assert!(!summary.succeeded());
    assert_eq!(statuses(&engine, "infra"), vec![ExecutionStatus::Retrying]);
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_rejects_closed_execution() {
    let executor = MockExecutor::new();
    let mut engine = ready_engine(&executor, PolicyBuilder::new().build(), 1, &[("infra", 1)]);

    let mut closed = Execution::scaffold(1, 0, Utc::now());
    closed.status = ExecutionStatus::Failed;
    assert!(matches!(
        engine.resume_execution("infra", closed),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.resume_execution("missing", Execution::scaffold(2, 0, Utc::now())),
        Err(EngineError::UnknownStep(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_run_requires_loaded_milestones() {
    let executor = MockExecutor::new();
    let mut engine =
        DeploymentEngine::with_policy(executor, PolicyBuilder::new().build(), settings(1)).unwrap();
    engine.load_templates(vec![NewStep::new("infra", 1)]).unwrap();

    assert!(matches!(engine.run().await, Err(EngineError::NotReady(_))));
}

#[tokio::test(start_paused = true)]
async fn test_run_level_telemetry_and_events() {
    let executor = MockExecutor::new();
    executor.script("b", Duration::ZERO, MockResponse::fail("Denied"));

    let mut engine = ready_engine(
        &executor,
        PolicyBuilder::new().exit_delay(5).build(),
        2,
        &[("a", 1), ("b", 2)],
    );
    let mut events_rx = engine.events().subscribe();

    let started = tokio::time::Instant::now();
    engine.run().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));

    let telemetry = engine.telemetry();
    assert_eq!(telemetry.metric(DeploymentMetric::StepsTotal), Some("2".into()));
    assert_eq!(telemetry.metric(DeploymentMetric::StepsSucceeded), Some("1".into()));
    assert_eq!(telemetry.metric(DeploymentMetric::StepsFailed), Some("1".into()));
    assert_eq!(telemetry.metric(DeploymentMetric::Status), Some("Failed".into()));
    assert_eq!(
        telemetry.get(DeploymentMetric::ErrorCode, &TelemetryScope::step("b")),
        Some("Denied".into())
    );

    let mut names = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        names.push(event.name);
    }
    assert!(names.iter().any(|n| n == events::STEP_DISPATCHED));
    assert!(names.iter().any(|n| n == events::STEP_COMPLETED));
    assert!(names.iter().any(|n| n == events::STEP_FAILED));
    assert_eq!(names.last().map(String::as_str), Some(events::ENGINE_FINISHED));
}

#[test]
fn test_duplicate_and_reserved_step_names_abort_loading() {
    let executor = MockExecutor::new();
    let mut engine =
        DeploymentEngine::with_policy(executor, PolicyBuilder::new().build(), settings(1)).unwrap();

    let err = engine
        .load_templates(vec![NewStep::new("infra", 1), NewStep::new("infra", 2)])
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateStep(_)));
    assert!(err.is_run_terminating());

    let err = engine
        .load_templates(vec![NewStep::new(MAIN_MARKER, 1)])
        .unwrap_err();
    assert!(matches!(err, EngineError::ReservedStepName(_)));
    assert!(!engine.status().templates_loaded);
}
