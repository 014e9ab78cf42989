//! Property-based tests for event aggregation
//!
//! Events are generated with random needs and random sets of transactions in
//! random statuses. The derived state must respect its bounds whatever the mix:
//! received never exceeds a target, completion stays within 0..=100, and the
//! flip to done matches the needs actually being met.

use help_coordination::{
    EventStatus, TransactionStatus,
    aggregator::{apply, summarize},
    draft::{HelpEventDraft, ProposalEventDraft},
    model::{Contribution, Event, EventAggregate, Transaction, Unit},
    status::Role,
};
use proptest::prelude::*;

fn status_strategy() -> impl Strategy<Value = TransactionStatus> {
    (1usize..TransactionStatus::ALL.len()).prop_map(|i| TransactionStatus::ALL[i])
}

/// 1 to 5 need targets within the allowed range
fn targets_strategy() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(1u32..=50, 1..=5)
}

/// Transactions as (status, contributions) where need ids may point past the event's needs
fn transactions_strategy() -> impl Strategy<Value = Vec<(TransactionStatus, Vec<(u32, u32)>)>> {
    prop::collection::vec(
        (
            status_strategy(),
            prop::collection::vec((0u32..6, 1u32..=60), 0..=3),
        ),
        0..=8,
    )
}

fn help_event(targets: &[u32]) -> Event {
    let mut draft = HelpEventDraft::new()
        .set_title("Winter coats")
        .set_description("Coats in all sizes");
    for (i, target) in targets.iter().enumerate() {
        draft = draft.add_need(&format!("size {i}"), *target, Unit::Item);
    }
    draft
        .validate_and_finalise("event_prop".into(), "user_owner")
        .unwrap()
}

fn transaction(
    event: &Event,
    i: usize,
    status: TransactionStatus,
    contributions: &[(u32, u32)],
) -> Transaction {
    let mut txn = Transaction::open(format!("txn_{i}"), event, "user_v", "");
    txn.contributions = contributions
        .iter()
        .map(|(need, amount)| Contribution::new(*need, *amount))
        .collect();
    if status != TransactionStatus::Waiting {
        txn.record_transition(status, Role::EventCreator, "user_owner", "");
    }
    txn
}

fn aggregate_of(
    event: Event,
    transactions: &[(TransactionStatus, Vec<(u32, u32)>)],
) -> EventAggregate {
    let transactions = transactions
        .iter()
        .enumerate()
        .map(|(i, (status, contributions))| transaction(&event, i, *status, contributions))
        .collect();
    EventAggregate { event, transactions }
}

// PROPERTY TESTS
proptest! {
    /// Property: received amounts and completion stay within their bounds
    #[test]
    fn prop_help_summary_is_bounded(
        targets in targets_strategy(),
        transactions in transactions_strategy(),
    ) {
        let aggregate = aggregate_of(help_event(&targets), &transactions);
        let summary = summarize(&aggregate);

        for need in &aggregate.event.needs {
            let received = summary.received[&need.id];
            prop_assert!(received <= need.target);
        }
        prop_assert!((0.0..=100.0).contains(&summary.completion_percentage));

        let all_met = aggregate
            .event
            .needs
            .iter()
            .all(|need| summary.received[&need.id] == need.target);
        prop_assert_eq!(summary.done, all_met);
    }

    /// Property: only completed transactions count towards the needs
    #[test]
    fn prop_only_completed_contributions_count(
        targets in targets_strategy(),
        transactions in transactions_strategy(),
    ) {
        let aggregate = aggregate_of(help_event(&targets), &transactions);
        let summary = summarize(&aggregate);

        let mut completed_only = aggregate.clone();
        completed_only.transactions.retain(|txn| txn.status == TransactionStatus::Completed);

        prop_assert_eq!(summarize(&completed_only), summary);
    }

    /// Property: recomputing is idempotent, and done never flips back
    #[test]
    fn prop_apply_is_idempotent_and_done_is_sticky(
        targets in targets_strategy(),
        transactions in transactions_strategy(),
    ) {
        let mut aggregate = aggregate_of(help_event(&targets), &transactions);
        let first = apply(&mut aggregate);
        let snapshot = aggregate.clone();
        let second = apply(&mut aggregate);

        prop_assert_eq!(first, second);
        prop_assert_eq!(&snapshot, &aggregate);

        if aggregate.event.status == EventStatus::Done {
            aggregate.transactions.clear();
            apply(&mut aggregate);
            prop_assert_eq!(aggregate.event.status, EventStatus::Done);
        }
    }

    /// Property: a proposal's remaining capacity is what its transactions leave over
    #[test]
    fn prop_proposal_capacity_is_bounded(
        max in 1u32..=6,
        statuses in prop::collection::vec(status_strategy(), 0..=10),
    ) {
        let event = ProposalEventDraft::new()
            .set_title("Spare room")
            .set_description("For up to a week")
            .set_max_concurrent_requests(max)
            .validate_and_finalise("event_prop".into(), "user_owner")
            .unwrap();
        let transactions: Vec<_> = statuses.iter().map(|status| (*status, vec![])).collect();
        let mut aggregate = aggregate_of(event, &transactions);

        let consuming = statuses.iter().filter(|s| s.consumes_capacity()).count() as u32;
        let summary = apply(&mut aggregate);

        prop_assert_eq!(summary.remaining_capacity, Some(max.saturating_sub(consuming)));
        prop_assert_eq!(aggregate.event.remaining_capacity(), summary.remaining_capacity);
        prop_assert!((0.0..=100.0).contains(&summary.completion_percentage));
        prop_assert_eq!(summary.done, consuming >= max);
    }
}
