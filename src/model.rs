//! Records persisted by the store: transactions, events and their needs
use super::error::ValidationError;
use super::status::{EventStatus, Role, TransactionStatus};
use chrono::{DateTime, TimeZone, Utc};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    #[n(0)]
    Kilogram,
    #[n(1)]
    Liter,
    #[n(2)]
    #[default]
    Item,
    #[n(3)]
    Work,
}

impl FromStr for Unit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kilogram" => Ok(Unit::Kilogram),
            "liter" => Ok(Unit::Liter),
            "item" | "" => Ok(Unit::Item),
            "work" => Ok(Unit::Work),
            other => Err(ValidationError::UnknownUnit(other.to_string())),
        }
    }
}

/// A quantified requirement of a help event
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Need {
    #[n(0)]
    pub id: u32, // position within the event
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub target: u32,
    #[n(3)]
    pub unit: Unit,
    #[n(4)]
    pub received: u32, // only ever written by the aggregator
}

/// Amount a transaction brings towards one need
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution {
    #[n(0)]
    pub need_id: u32,
    #[n(1)]
    pub amount: u32,
}

impl Contribution {
    pub fn new(need_id: u32, amount: u32) -> Self {
        Self { need_id, amount }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    #[n(0)]
    Help,
    #[n(1)]
    Proposal {
        #[n(0)]
        max_concurrent_requests: u32,
        #[n(1)]
        remaining_capacity: u32,
    },
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Event {
    #[n(0)]
    pub id: String, // bech32 "event_"
    #[n(1)]
    pub owner_id: String,
    #[n(2)]
    pub kind: EventKind,
    #[n(3)]
    pub title: String,
    #[n(4)]
    pub description: String,
    #[n(5)]
    pub status: EventStatus,
    #[n(6)]
    pub completion_percentage: f64,
    #[n(7)]
    pub needs: Vec<Need>,
    #[n(8)]
    pub transaction_ids: Vec<String>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub version: u64,
    #[n(12)]
    pub competition_date: Option<TimeStamp<Utc>>, // when the owner expects the event to wrap up
}

impl Event {
    pub fn is_proposal(&self) -> bool {
        matches!(self.kind, EventKind::Proposal { .. })
    }

    pub fn remaining_capacity(&self) -> Option<u32> {
        match self.kind {
            EventKind::Help => None,
            EventKind::Proposal {
                remaining_capacity, ..
            } => Some(remaining_capacity),
        }
    }

    pub fn need(&self, need_id: u32) -> Option<&Need> {
        self.needs.iter().find(|need| need.id == need_id)
    }

    /// Contributions must name needs of this event with a positive amount. Proposal events
    /// don't have needs, so they take none.
    pub fn check_contributions(&self, contributions: &[Contribution]) -> Result<(), ValidationError> {
        if self.is_proposal() && !contributions.is_empty() {
            return Err(ValidationError::ContributionsNotAccepted);
        }
        for contribution in contributions {
            if self.need(contribution.need_id).is_none() {
                return Err(ValidationError::UnknownNeed(contribution.need_id));
            }
            if contribution.amount == 0 {
                return Err(ValidationError::EmptyContribution(contribution.need_id));
            }
        }
        Ok(())
    }
}

/// One entry of a transaction's history
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    #[n(0)]
    pub from: TransactionStatus,
    #[n(1)]
    pub to: TransactionStatus,
    #[n(2)]
    pub actor_id: String,
    #[n(3)]
    pub comment: String,
    #[n(4)]
    pub at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    #[n(0)]
    pub id: String, // bech32 "txn_"
    #[n(1)]
    pub event_id: String,
    #[n(2)]
    pub event_type: EventType,
    #[n(3)]
    pub creator_id: String, // the responder who opened the transaction
    #[n(4)]
    pub event_owner_id: String,
    #[n(5)]
    pub status: TransactionStatus,
    #[n(6)]
    pub responder_status: TransactionStatus,
    #[n(7)]
    pub comment: String,
    #[n(8)]
    pub report_url: Option<String>,
    #[n(9)]
    pub contributions: Vec<Contribution>,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(12)]
    pub history: Vec<TransitionRecord>,
    #[n(13)]
    pub version: u64,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    #[n(0)]
    Help,
    #[n(1)]
    Proposal,
}

impl Transaction {
    /// A freshly opened transaction: waiting on the event side, not started on the responder's.
    pub fn open(id: String, event: &Event, creator_id: &str, comment: &str) -> Self {
        let now = TimeStamp::new();
        let event_type = if event.is_proposal() {
            EventType::Proposal
        } else {
            EventType::Help
        };

        Self {
            id,
            event_id: event.id.clone(),
            event_type,
            creator_id: creator_id.to_string(),
            event_owner_id: event.owner_id.clone(),
            status: TransactionStatus::Waiting,
            responder_status: TransactionStatus::NotStarted,
            comment: comment.to_string(),
            report_url: None,
            contributions: vec![],
            created_at: now.clone(),
            completed_at: None,
            history: vec![TransitionRecord {
                from: TransactionStatus::NotStarted,
                to: TransactionStatus::Waiting,
                actor_id: creator_id.to_string(),
                comment: comment.to_string(),
                at: now,
            }],
            version: 0,
        }
    }

    /// Role of `actor_id` relative to this transaction. The event owner wins if somehow both
    /// match.
    pub fn role_of(&self, actor_id: &str, event_owner_id: &str) -> Option<Role> {
        if actor_id == event_owner_id {
            Some(Role::EventCreator)
        } else if actor_id == self.creator_id {
            Some(Role::Responder)
        } else {
            None
        }
    }

    /// Moves the transaction to `to` and appends the history entry. Callers are expected to
    /// have run [`crate::status::authorize`] first.
    pub fn record_transition(
        &mut self,
        to: TransactionStatus,
        role: Role,
        actor_id: &str,
        comment: &str,
    ) {
        let at = TimeStamp::new();
        self.history.push(TransitionRecord {
            from: self.status,
            to,
            actor_id: actor_id.to_string(),
            comment: comment.to_string(),
            at: at.clone(),
        });

        self.status = to;
        if role == Role::Responder {
            self.responder_status = to;
        }
        if to == TransactionStatus::Completed {
            self.completed_at = Some(at);
        }
        if !comment.is_empty() {
            self.comment = comment.to_string();
        }
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Logs the transition history at debug level, oldest first
    pub fn view_history(&self) {
        for record in &self.history {
            debug!(
                txn = %self.id,
                at = %record.at.to_datetime_utc(),
                from = %record.from,
                to = %record.to,
                actor = %record.actor_id,
                comment = %record.comment,
                "history"
            );
        }
    }
}

/// An event together with every transaction opened against it
#[derive(Debug, Clone, PartialEq)]
pub struct EventAggregate {
    pub event: Event,
    pub transactions: Vec<Transaction>,
}

impl EventAggregate {
    /// Transactions holding one of a proposal event's slots
    pub fn slots_in_use(&self) -> u32 {
        self.transactions
            .iter()
            .filter(|txn| txn.status.consumes_capacity())
            .count() as u32
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn help_event() -> Event {
        Event {
            id: "event_test".into(),
            owner_id: "user_owner".into(),
            kind: EventKind::Help,
            title: "Winter coats".into(),
            description: "Coats for the shelter".into(),
            status: EventStatus::Active,
            completion_percentage: 0.0,
            needs: vec![Need {
                id: 0,
                title: "coats".into(),
                target: 10,
                unit: Unit::Item,
                received: 0,
            }],
            transaction_ids: vec![],
            created_at: TimeStamp::new(),
            completed_at: None,
            version: 0,
            competition_date: None,
        }
    }

    #[test]
    fn transaction_encoding() {
        let mut original = Transaction::open("txn_test".into(), &help_event(), "user_x", "hi");
        original.contributions.push(Contribution::new(0, 3));

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: Transaction = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn roles_follow_event_owner_and_creator() {
        let event = help_event();
        let txn = Transaction::open("txn_test".into(), &event, "user_x", "");

        assert_eq!(txn.role_of("user_owner", &event.owner_id), Some(Role::EventCreator));
        assert_eq!(txn.role_of("user_x", &event.owner_id), Some(Role::Responder));
        assert_eq!(txn.role_of("user_other", &event.owner_id), None);
    }

    #[test]
    fn contributions_must_name_existing_needs() {
        let event = help_event();

        assert!(event.check_contributions(&[Contribution::new(0, 2)]).is_ok());
        assert_eq!(
            event.check_contributions(&[Contribution::new(4, 2)]),
            Err(ValidationError::UnknownNeed(4))
        );
        assert_eq!(
            event.check_contributions(&[Contribution::new(0, 0)]),
            Err(ValidationError::EmptyContribution(0))
        );
    }
}
