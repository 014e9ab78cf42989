//! Event aggregation.
//!
//! Derived event state (need received totals, completion percentage, remaining capacity and
//! the automatic flip to `Done`) is only ever computed here, from the transactions of the event.
//! A completed transaction can't change again, so recomputing from scratch is stable.
use super::error::EngineError;
use super::model::{EventAggregate, EventKind, TimeStamp};
use super::status::{EventStatus, TransactionStatus};
use super::store::UnitOfWork;
use std::collections::HashMap;
use tracing::{debug, info};

/// What the aggregator derives from an event's transactions
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// received amount per need id, already clamped to the need's target
    pub received: HashMap<u32, u32>,
    pub completion_percentage: f64,
    pub remaining_capacity: Option<u32>,
    pub done: bool,
}

pub fn summarize(aggregate: &EventAggregate) -> Summary {
    let event = &aggregate.event;

    match event.kind {
        EventKind::Help => {
            let mut delivered: HashMap<u32, u64> = HashMap::new();
            for txn in aggregate
                .transactions
                .iter()
                .filter(|txn| txn.status == TransactionStatus::Completed)
            {
                for contribution in &txn.contributions {
                    *delivered.entry(contribution.need_id).or_default() +=
                        u64::from(contribution.amount);
                }
            }

            let mut received = HashMap::with_capacity(event.needs.len());
            let mut total_target: u64 = 0;
            let mut total_received: u64 = 0;
            for need in &event.needs {
                let got = delivered
                    .get(&need.id)
                    .copied()
                    .unwrap_or_default()
                    .min(u64::from(need.target)) as u32;
                received.insert(need.id, got);
                total_target += u64::from(need.target);
                total_received += u64::from(got);
            }

            let completion_percentage = if total_target == 0 {
                0.0
            } else {
                100.0 * total_received as f64 / total_target as f64
            };

            Summary {
                received,
                completion_percentage,
                remaining_capacity: None,
                done: total_target > 0 && total_received == total_target,
            }
        }
        EventKind::Proposal {
            max_concurrent_requests,
            ..
        } => {
            let remaining = max_concurrent_requests.saturating_sub(aggregate.slots_in_use());

            let completion_percentage = if max_concurrent_requests == 0 {
                0.0
            } else {
                100.0 * f64::from(max_concurrent_requests - remaining)
                    / f64::from(max_concurrent_requests)
            };

            Summary {
                received: HashMap::new(),
                completion_percentage,
                remaining_capacity: Some(remaining),
                done: remaining == 0,
            }
        }
    }
}

/// Writes the summary back into the event. `Done` is sticky, `Blocked` and `InActive` are left
/// for the event creator to change.
pub fn apply(aggregate: &mut EventAggregate) -> Summary {
    let summary = summarize(aggregate);
    let event = &mut aggregate.event;

    for need in event.needs.iter_mut() {
        need.received = summary.received.get(&need.id).copied().unwrap_or_default();
    }
    event.completion_percentage = summary.completion_percentage;
    if let (
        EventKind::Proposal {
            remaining_capacity, ..
        },
        Some(remaining),
    ) = (&mut event.kind, summary.remaining_capacity)
    {
        *remaining_capacity = remaining;
    }

    if summary.done && event.status != EventStatus::Done {
        event.status = EventStatus::Done;
        event.completed_at = Some(TimeStamp::new());
    }

    summary
}

/// Reloads the event with its transactions, recomputes and saves it, all inside `uow`.
pub fn recompute(uow: &dyn UnitOfWork, event_id: &str) -> Result<EventAggregate, EngineError> {
    let mut aggregate = uow.load_event_with_transactions_and_needs(event_id)?;
    let before = aggregate.event.status;

    let summary = apply(&mut aggregate);
    aggregate.event.version = uow.save_event_aggregate(&aggregate)?;

    debug!(
        event = event_id,
        completion = summary.completion_percentage,
        remaining = ?summary.remaining_capacity,
        "recomputed event"
    );
    if before != aggregate.event.status {
        info!(event = event_id, status = %aggregate.event.status, "event status changed");
    }

    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{HelpEventDraft, ProposalEventDraft};
    use crate::model::{Contribution, Transaction, Unit};
    use crate::status::Role;

    fn completed(event: &crate::model::Event, id: &str, contributions: Vec<Contribution>) -> Transaction {
        let mut txn = Transaction::open(id.into(), event, "user_x", "");
        txn.contributions = contributions;
        txn.record_transition(TransactionStatus::InProcess, Role::Responder, "user_x", "");
        txn.record_transition(TransactionStatus::Completed, Role::EventCreator, "user_owner", "");
        txn
    }

    #[test]
    fn overdelivery_is_clamped_at_target() {
        let event = HelpEventDraft::new()
            .set_title("Soup kitchen")
            .set_description("Vegetables")
            .add_need("potatoes", 10, Unit::Kilogram)
            .add_need("carrots", 20, Unit::Kilogram)
            .validate_and_finalise("event_a".into(), "user_owner")
            .unwrap();
        let txn = completed(&event, "txn_a", vec![Contribution::new(0, 15)]);
        let mut aggregate = EventAggregate {
            event,
            transactions: vec![txn],
        };

        let summary = apply(&mut aggregate);

        assert_eq!(aggregate.event.needs[0].received, 10);
        assert_eq!(aggregate.event.needs[1].received, 0);
        assert!((summary.completion_percentage - 100.0 * 10.0 / 30.0).abs() < 1e-9);
        assert_eq!(aggregate.event.status, EventStatus::Active);
    }

    #[test]
    fn proposal_capacity_counts_accepted_and_completed() {
        let event = ProposalEventDraft::new()
            .set_title("Rides")
            .set_description("Rides to the clinic")
            .set_max_concurrent_requests(3)
            .validate_and_finalise("event_p".into(), "user_owner")
            .unwrap();
        let done = completed(&event, "txn_1", vec![]);
        let mut accepted = Transaction::open("txn_2".into(), &event, "user_y", "");
        accepted.record_transition(TransactionStatus::Accepted, Role::EventCreator, "user_owner", "");
        let waiting = Transaction::open("txn_3".into(), &event, "user_z", "");
        let mut aggregate = EventAggregate {
            event,
            transactions: vec![done, accepted, waiting],
        };

        let summary = apply(&mut aggregate);

        assert_eq!(summary.remaining_capacity, Some(1));
        assert_eq!(aggregate.event.remaining_capacity(), Some(1));
        assert!(!summary.done);
    }
}
