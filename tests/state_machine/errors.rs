use deployment_engine::state_machine::errors::*;
use deployment_engine::EngineError;

#[test]
fn test_error_chain() {
    let guard_err = GuardError::ExecutionInFlight {
        step: "infra".to_string(),
    };
    let sm_err: StateMachineError = guard_err.into();

    match &sm_err {
        StateMachineError::GuardFailed { reason } => {
            assert!(reason.contains("already has an in-flight execution"));
        }
        _ => panic!("Expected GuardFailed error"),
    }

    let engine_err: EngineError = sm_err.into();
    assert!(matches!(engine_err, EngineError::StateMachine(_)));
    assert!(!engine_err.is_run_terminating());
}

#[test]
fn test_error_messages() {
    let err = StateMachineError::InvalidTransition {
        from: "Succeeded".to_string(),
        event: "start".to_string(),
    };
    assert_eq!(err.to_string(), "Invalid state transition from Succeeded on start");

    let err = GuardError::ExecutionInFlight {
        step: "infra".to_string(),
    };
    assert_eq!(err.to_string(), "Step 'infra' already has an in-flight execution");

    let err = ActionError::InvalidState {
        state: "Retrying".to_string(),
    };
    assert_eq!(err.to_string(), "Invalid state for action execution: Retrying");
}
