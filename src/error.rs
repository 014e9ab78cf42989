use super::status::{EventStatus, TransactionStatus};
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Transaction,
    Event,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Transaction => f.write_str("transaction"),
            Entity::Event => f.write_str("event"),
        }
    }
}

/// Why a status change was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// there is no edge between the two statuses
    NoSuchEdge,
    /// the edge exists but the caller's role may not take it
    Unauthorized,
    CommentRequired,
    CapacityExhausted,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            DenyReason::NoSuchEdge => "no such transition",
            DenyReason::Unauthorized => "actor is not permitted to make this transition",
            DenyReason::CommentRequired => "a comment is required",
            DenyReason::CapacityExhausted => "event has no remaining capacity",
        };
        f.write_str(reason)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("a help event needs at least one need")]
    NoNeeds,
    #[error("need amount {0} is outside 1..=50")]
    NeedAmountOutOfRange(u32),
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
    #[error("unknown status '{0}'")]
    UnknownStatus(String),
    #[error("max concurrent requests must be at least 1")]
    NoCapacity,
    #[error("need {0} does not exist on this event")]
    UnknownNeed(u32),
    #[error("contribution to need {0} must be positive")]
    EmptyContribution(u32),
    #[error("proposal events don't take contributions")]
    ContributionsNotAccepted,
    #[error("only proposal events have a request limit")]
    NotAProposal,
    #[error("max concurrent requests {max} is below the {in_use} requests already holding a slot")]
    CapacityInUse { max: u32, in_use: u32 },
}

/// Stable error kinds returned by every engine operation
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: String },
    #[error("cannot move transaction from {from} to {to}: {reason}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
        reason: DenyReason,
    },
    #[error("transaction {0} is completed and can no longer change")]
    AlreadyCompleted(String),
    #[error("cannot move event from {from} to {to}: {reason}")]
    InvalidEventStatus {
        from: EventStatus,
        to: EventStatus,
        reason: DenyReason,
    },
    #[error("{actor} does not own event {id}")]
    NotEventOwner { actor: String, id: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: Entity, id: String },
    #[error("{op} did not finish within {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("store failure during {op} on '{entity}': {source}")]
    StoreFailure {
        op: &'static str,
        entity: String,
        #[source]
        source: BoxError,
    },
}

/// Closed set of error kinds for handlers to dispatch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    AlreadyCompleted,
    InvalidEventStatus,
    Forbidden,
    Validation,
    Conflict,
    Timeout,
    StoreFailure,
}

impl ErrorKind {
    /// Conventional http status for the kind
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidTransition
            | ErrorKind::AlreadyCompleted
            | ErrorKind::InvalidEventStatus
            | ErrorKind::Validation => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::Timeout => 408,
            ErrorKind::StoreFailure => 500,
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::AlreadyCompleted(_) => ErrorKind::AlreadyCompleted,
            EngineError::InvalidEventStatus { .. } => ErrorKind::InvalidEventStatus,
            EngineError::NotEventOwner { .. } => ErrorKind::Forbidden,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::StoreFailure { .. } => ErrorKind::StoreFailure,
        }
    }

    pub fn not_found(entity: Entity, id: &str) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: Entity, id: &str) -> Self {
        EngineError::Conflict {
            entity,
            id: id.to_string(),
        }
    }

    pub fn store_failure(op: &'static str, entity: &str, source: impl Into<BoxError>) -> Self {
        EngineError::StoreFailure {
            op,
            entity: entity.to_string(),
            source: source.into(),
        }
    }
}
