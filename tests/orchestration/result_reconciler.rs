use chrono::Utc;

use deployment_engine::models::{DeploymentResult, Execution};
use deployment_engine::orchestration::{DeploymentOutcome, ExecutorError, ResultReconciler};
use deployment_engine::state_machine::ExecutionStatus;

fn running_scaffold() -> Execution {
    let mut execution = Execution::scaffold(1, 1, Utc::now());
    execution.status = ExecutionStatus::Running;
    execution.resume_token = "opaque".into();
    execution
}

#[test]
fn test_nil_result_and_empty_payload() {
    let mut execution = running_scaffold();
    ResultReconciler::reconcile(&mut execution, &DeploymentOutcome::from_parts(None, ""));

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error, "");
    assert_eq!(execution.code, "");
    assert_eq!(execution.resume_token, "");
}

#[test]
fn test_whitespace_payload_is_reported_as_undecodable() {
    let mut execution = running_scaffold();
    let result = DeploymentResult::new("dep", ExecutionStatus::Succeeded, Utc::now());
    let outcome = DeploymentOutcome::from_parts(Some(result), " ");

    let report = ResultReconciler::reconcile(&mut execution, &outcome);

    assert_eq!(report.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(report.decode_error.is_some());
    assert!(!execution.error.is_empty());
    assert_eq!(execution.code, "");
}

#[test]
fn test_success_with_quota_payload() {
    let mut execution = running_scaffold();
    let result = DeploymentResult::new("dep", ExecutionStatus::Succeeded, Utc::now());
    let outcome = DeploymentOutcome::from_executor(Err(ExecutorError::failed(
        result,
        r#"{"error":{"message":"quota exceeded","code":"QuotaExceeded"}}"#,
    )));

    let report = ResultReconciler::reconcile(&mut execution, &outcome);

    assert_eq!(report.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.error, "quota exceeded");
    assert_eq!(execution.code, "QuotaExceeded");
}

#[test]
fn test_reconciling_into_used_record_accumulates_fields() {
    let decoded = DeploymentOutcome::from_parts(
        None,
        r#"{"error":{"message":"first","code":"A","details":"d"}}"#,
    );
    let undecodable = DeploymentOutcome::from_parts(None, "not-json");

    let mut reused = running_scaffold();
    ResultReconciler::reconcile(&mut reused, &decoded);
    ResultReconciler::reconcile(&mut reused, &undecodable);
    assert_eq!(reused.code, "A");
    assert_eq!(reused.error_details, "d");

    reused.reset_for_reconciliation();
    ResultReconciler::reconcile(&mut reused, &undecodable);
    assert_eq!(reused.code, "");
    assert_eq!(reused.error_details, "");
    assert!(!reused.error.is_empty());
}
