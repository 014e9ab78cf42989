//! Transaction and event statuses, and the table of legal transaction transitions.
//!
//! Everything here is pure: the engine hands in the current status, the requested status
//! and the caller's role, and gets back a yes or a reason for no.
use super::error::{DenyReason, ValidationError};
use std::fmt;
use std::str::FromStr;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum TransactionStatus {
    #[n(0)]
    NotStarted,
    #[n(1)]
    Waiting,
    #[n(2)]
    InProcess,
    #[n(3)]
    Accepted,
    #[n(4)]
    Completed,
    #[n(5)]
    Interrupted,
    #[n(6)]
    Canceled,
    #[n(7)]
    Aborted,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    #[n(0)]
    Active,
    #[n(1)]
    InActive,
    #[n(2)]
    Done,
    #[n(3)]
    Blocked,
}

/// The caller's relationship to a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// owns the event the transaction was opened against
    EventCreator,
    /// opened the transaction in response to the event
    Responder,
}

/// Who may take an edge of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permitted {
    /// only taken by the engine itself when a transaction is created
    System,
    EventCreator,
    Responder,
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub permitted: Permitted,
    pub comment_required: bool,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 8] = [
        TransactionStatus::NotStarted,
        TransactionStatus::Waiting,
        TransactionStatus::InProcess,
        TransactionStatus::Accepted,
        TransactionStatus::Completed,
        TransactionStatus::Interrupted,
        TransactionStatus::Canceled,
        TransactionStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::NotStarted => "not_started",
            TransactionStatus::Waiting => "waiting",
            TransactionStatus::InProcess => "in_progress",
            TransactionStatus::Accepted => "accepted",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Interrupted => "interrupted",
            TransactionStatus::Canceled => "canceled",
            TransactionStatus::Aborted => "aborted",
        }
    }

    /// Completed, Canceled, Aborted and Interrupted. Only Completed is enforced by the engine,
    /// the others simply have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Canceled
                | TransactionStatus::Aborted
                | TransactionStatus::Interrupted
        )
    }

    /// Statuses that hold one of a proposal event's slots
    pub fn consumes_capacity(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Accepted | TransactionStatus::InProcess | TransactionStatus::Completed
        )
    }
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "active",
            EventStatus::InActive => "inactive",
            EventStatus::Done => "done",
            EventStatus::Blocked => "blocked",
        }
    }
}

impl Permitted {
    pub fn allows(&self, role: Role) -> bool {
        match self {
            Permitted::System => false,
            Permitted::Either => true,
            Permitted::EventCreator => role == Role::EventCreator,
            Permitted::Responder => role == Role::Responder,
        }
    }
}

/// Looks up the edge `from -> to`. `None` when the transition does not exist.
pub fn edge(from: TransactionStatus, to: TransactionStatus) -> Option<Edge> {
    use TransactionStatus::*;

    let open = matches!(from, Waiting | Accepted | InProcess);
    let permitted = match (from, to) {
        (NotStarted, Waiting) => Permitted::System,
        (Waiting, Accepted) => Permitted::EventCreator,
        (Waiting | Accepted, InProcess) => Permitted::Responder,
        (InProcess, Completed) => Permitted::Either,
        (_, Canceled) if open => Permitted::Responder,
        (_, Interrupted) if open => Permitted::Either,
        (_, Aborted) if open => Permitted::EventCreator,
        _ => return None,
    };

    Some(Edge {
        permitted,
        comment_required: to == Interrupted,
    })
}

/// The authorization predicate. `role` is `None` when the caller is neither the event creator
/// nor the responder. Hands back the role the transition was allowed for.
pub fn authorize(
    from: TransactionStatus,
    to: TransactionStatus,
    role: Option<Role>,
    comment: &str,
) -> Result<Role, DenyReason> {
    let edge = edge(from, to).ok_or(DenyReason::NoSuchEdge)?;

    let role = match role {
        Some(role) if edge.permitted.allows(role) => role,
        _ => return Err(DenyReason::Unauthorized),
    };
    if edge.comment_required && comment.trim().is_empty() {
        return Err(DenyReason::CommentRequired);
    }

    Ok(role)
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

impl FromStr for EventStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EventStatus::Active),
            "inactive" => Ok(EventStatus::InActive),
            "done" => Ok(EventStatus::Done),
            "blocked" => Ok(EventStatus::Blocked),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::TransactionStatus::*;

    #[test]
    fn completed_has_no_outgoing_edges() {
        for to in TransactionStatus::ALL {
            assert_eq!(edge(Completed, to), None);
        }
    }

    #[test]
    fn interrupt_needs_a_comment() {
        assert_eq!(
            authorize(InProcess, Interrupted, Some(Role::Responder), "  "),
            Err(DenyReason::CommentRequired)
        );
        assert!(authorize(InProcess, Interrupted, Some(Role::EventCreator), "flooded").is_ok());
    }

    #[test]
    fn system_edge_is_never_authorized() {
        assert_eq!(
            authorize(NotStarted, Waiting, Some(Role::EventCreator), ""),
            Err(DenyReason::Unauthorized)
        );
    }

    #[test]
    fn status_names_parse_back() {
        for status in TransactionStatus::ALL {
            assert_eq!(status.as_str().parse::<TransactionStatus>(), Ok(status));
        }
        assert_eq!("in_progress".parse::<TransactionStatus>(), Ok(InProcess));
        assert!("done".parse::<TransactionStatus>().is_err());
    }
}
