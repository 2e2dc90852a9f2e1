use thiserror::Error;

/// Errors raised by the core types (state machine validation, settings,
/// session path handling).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("state machine has no states")]
    EmptyStateMachine,

    #[error("duplicate state name: {0}")]
    DuplicateState(String),

    #[error("state '{state}' transitions to unknown state '{target}'")]
    UnknownTarget { state: String, target: String },

    #[error("state '{0}' has no transitions and can never be left")]
    DeadEndState(String),

    #[error("no state in the machine reaches exit")]
    NoExit,

    #[error("state name is empty")]
    EmptyStateName,

    #[error("state '{0}' has a negative timer")]
    NegativeTimer(String),

    #[error("expected exactly one subject, found {0}")]
    SubjectCount(usize),

    #[error("no session numbers left for {subject} on {date}")]
    SessionNumberExhausted { subject: String, date: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
