// State machine module for deployment execution attempts
//
// Each execution moves through a small, fixed lifecycle. Guards reject
// transitions that would break step or engine rules; actions apply the
// side effects every transition shares.

pub mod actions;
pub mod errors;
pub mod events;
pub mod execution_state_machine;
pub mod guards;
pub mod states;

// Re-export main types for convenient access
pub use errors::{ActionError, GuardError, StateMachineError};
pub use events::ExecutionEvent;
pub use execution_state_machine::{
    AttemptContext, ExecutionStateMachine, ReconciledTransition, Transition,
};
pub use states::ExecutionStatus;

// Common traits and utilities
pub use actions::StateAction;
pub use guards::StateGuard;
