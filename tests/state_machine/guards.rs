use chrono::Utc;

use deployment_engine::models::{EngineStatus, Execution, RecordTimestamps, Step};
use deployment_engine::state_machine::guards::*;
use deployment_engine::state_machine::{ExecutionStatus, GuardError};

fn step_with(statuses: &[ExecutionStatus]) -> Step {
    let now = Utc::now();
    Step {
        id: 1,
        name: "infra".into(),
        template: Default::default(),
        parameters: Default::default(),
        priority: 1,
        executions: statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut execution = Execution::scaffold(i as u64 + 1, 1, now);
                execution.status = *status;
                execution
            })
            .collect(),
        record: RecordTimestamps::new(now),
    }
}

#[test]
fn test_guard_descriptions() {
    assert_eq!(
        StepNotCompleteGuard.description(),
        "Step has no succeeded execution"
    );
    assert_eq!(
        StepNotInFlightGuard.description(),
        "Step has no pending or running execution"
    );
    assert_eq!(
        ExecutionOwnershipGuard { step_id: 1 }.description(),
        "Execution belongs to the step"
    );
}

#[test]
fn test_step_guards() {
    let fresh = step_with(&[]);
    assert!(StepNotCompleteGuard.check(&fresh).is_ok());
    assert!(StepNotInFlightGuard.check(&fresh).is_ok());

    let running = step_with(&[ExecutionStatus::Retrying, ExecutionStatus::Running]);
    assert_eq!(
        StepNotInFlightGuard.check(&running),
        Err(GuardError::ExecutionInFlight {
            step: "infra".into()
        })
    );

    let done = step_with(&[ExecutionStatus::Succeeded]);
    assert!(matches!(
        StepNotCompleteGuard.check(&done),
        Err(GuardError::AlreadyComplete { .. })
    ));
}

#[test]
fn test_ownership_and_engine_guards() {
    let execution = Execution::scaffold(1, 2, Utc::now());
    assert!(ExecutionOwnershipGuard { step_id: 2 }.check(&execution).is_ok());
    assert_eq!(
        ExecutionOwnershipGuard { step_id: 3 }.check(&execution),
        Err(GuardError::StepMismatch {
            expected: 3,
            actual: 2
        })
    );

    let mut status = EngineStatus::default();
    assert!(EngineDispatchGuard.check(&status).is_ok());
    status.is_fatal_state = true;
    assert_eq!(EngineDispatchGuard.check(&status), Err(GuardError::EngineFatal));
}
