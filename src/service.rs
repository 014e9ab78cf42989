//! Service layer API for help coordination.
//!
//! `HelpService` is what request handlers talk to. Every operation runs its store work as one
//! unit of work on a blocking worker, raced against the request deadline.
use super::aggregator;
use super::config::EngineConfig;
use super::deadline::Deadline;
use super::draft::{EventUpdate, HelpEventDraft, ProposalEventDraft};
use super::error::{DenyReason, EngineError, Entity};
use super::model::{Contribution, Event, EventAggregate, EventKind, Transaction};
use super::notify::{Notice, Notifier, TracingNotifier};
use super::status::{self, EventStatus, TransactionStatus};
use super::store::Store;
use super::utils::{IdKind, new_id};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// A responder's request to take part in an event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCreate {
    pub event_id: String,
    pub comment: String,
    pub contributions: Vec<Contribution>, // pledged amounts, help events only
}

impl RequestCreate {
    pub fn new(event_id: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            ..Self::default()
        }
    }
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }
    pub fn with_contribution(mut self, need_id: u32, amount: u32) -> Self {
        self.contributions.push(Contribution::new(need_id, amount));
        self
    }
}

/// Asks to move a transaction to `requested_status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub transaction_id: String,
    pub requested_status: TransactionStatus,
    pub comment: String,
    /// replaces the transaction's contributions, e.g. with what was actually delivered
    pub contributions: Option<Vec<Contribution>>,
    pub report_url: Option<String>,
    /// version the caller last saw. A mismatch is a `Conflict` and is never retried.
    pub expected_version: Option<u64>,
}

impl TransitionRequest {
    pub fn new(transaction_id: &str, requested_status: TransactionStatus) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            requested_status,
            comment: String::new(),
            contributions: None,
            report_url: None,
            expected_version: None,
        }
    }
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }
    pub fn with_contributions(mut self, contributions: Vec<Contribution>) -> Self {
        self.contributions = Some(contributions);
        self
    }
    pub fn with_report_url(mut self, url: &str) -> Self {
        self.report_url = Some(url.to_string());
        self
    }
    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

struct Applied {
    from: TransactionStatus,
    txn: Transaction,
}

pub struct HelpService<S: Store> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    request_timeout: Duration,
    retry_on_conflict: bool,
}

impl<S: Store> HelpService<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            store,
            notifier: Arc::new(TracingNotifier),
            request_timeout: config.request_timeout(),
            retry_on_conflict: config.retry_on_conflict,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Runs `work` on a blocking worker and waits for it at most until the deadline. When the
    /// deadline wins the worker is told to give up, so it rolls back instead of committing late.
    async fn scoped<T, F>(&self, op: &'static str, work: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&S, &Deadline) -> Result<T, EngineError> + Send + 'static,
    {
        let deadline = Deadline::new(op, self.request_timeout);
        let worker = deadline.clone();
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || work(store.as_ref(), &worker));

        match tokio::time::timeout(deadline.budget(), task).await {
            Ok(joined) => joined.map_err(|e| EngineError::store_failure(op, "worker", e))?,
            Err(_) => {
                deadline.abandon();
                warn!(
                    op = deadline.op(),
                    budget = ?deadline.budget(),
                    "deadline exceeded, abandoning store work"
                );
                Err(deadline.expired())
            }
        }
    }

    fn allocate(&self, kind: IdKind) -> Result<String, EngineError> {
        new_id(kind).map_err(|e| EngineError::store_failure("allocate_id", kind.hrp(), e))
    }

    // notifications are best effort
    fn notify(&self, notice: Notice) {
        if let Err(e) = self.notifier.notify(&notice) {
            warn!(error = %e, ?notice, "notification failed");
        }
    }

    /// Create a help event owned by `owner_id`
    pub async fn create_help_event(
        &self,
        owner_id: &str,
        draft: HelpEventDraft,
    ) -> Result<String, EngineError> {
        let event = draft.validate_and_finalise(self.allocate(IdKind::Event)?, owner_id)?;
        self.insert_event("create_help_event", event).await
    }

    /// Create a capacity bounded proposal event owned by `owner_id`
    pub async fn create_proposal_event(
        &self,
        owner_id: &str,
        draft: ProposalEventDraft,
    ) -> Result<String, EngineError> {
        let event = draft.validate_and_finalise(self.allocate(IdKind::Event)?, owner_id)?;
        self.insert_event("create_proposal_event", event).await
    }

    async fn insert_event(&self, op: &'static str, event: Event) -> Result<String, EngineError> {
        let id = self
            .scoped(op, move |store, deadline| {
                store.run_in_transaction(|uow| {
                    deadline.check()?;
                    uow.insert_event(&event)?;
                    Ok(event.id.clone())
                })
            })
            .await?;

        info!(event = %id, op, "event created");
        Ok(id)
    }

    /// Open a transaction against an active event. The new transaction is `Waiting`, with the
    /// responder side `NotStarted`.
    #[instrument(skip_all, fields(actor = actor_id, event = %request.event_id))]
    pub async fn create_request(
        &self,
        actor_id: &str,
        request: RequestCreate,
    ) -> Result<String, EngineError> {
        const OP: &str = "create_request";
        let txn_id = self.allocate(IdKind::Transaction)?;
        let actor = actor_id.to_string();

        let txn = self
            .scoped(OP, move |store, deadline| {
                store.run_in_transaction(|uow| {
                    deadline.check()?;
                    let mut aggregate = uow.load_event_with_transactions_and_needs(&request.event_id)?;
                    let event = &aggregate.event;

                    if event.status != EventStatus::Active {
                        return Err(EngineError::not_found(Entity::Event, &event.id));
                    }
                    let deny = |reason| EngineError::InvalidTransition {
                        from: TransactionStatus::NotStarted,
                        to: TransactionStatus::Waiting,
                        reason,
                    };
                    if actor == event.owner_id {
                        return Err(deny(DenyReason::Unauthorized));
                    }
                    if let EventKind::Proposal {
                        max_concurrent_requests,
                        ..
                    } = event.kind
                    {
                        if aggregate.slots_in_use() >= max_concurrent_requests {
                            return Err(deny(DenyReason::CapacityExhausted));
                        }
                    }
                    event.check_contributions(&request.contributions)?;

                    let mut txn = Transaction::open(txn_id.clone(), event, &actor, &request.comment);
                    txn.contributions = request.contributions.clone();
                    uow.insert_transaction(&txn)?;

                    aggregate.event.transaction_ids.push(txn.id.clone());
                    uow.save_event_aggregate(&aggregate)?;

                    deadline.check()?;
                    Ok(txn)
                })
            })
            .await?;

        info!(txn = %txn.id, "request created");
        self.notify(Notice::RequestCreated {
            transaction_id: txn.id.clone(),
            event_id: txn.event_id.clone(),
            event_owner_id: txn.event_owner_id.clone(),
        });

        Ok(txn.id)
    }

    /// Move a transaction to `request.requested_status` on behalf of `actor_id`. Moving into
    /// `Completed` recomputes the owning event in the same unit of work.
    #[instrument(
        skip_all,
        fields(actor = actor_id, txn = %request.transaction_id, to = %request.requested_status)
    )]
    pub async fn apply(&self, actor_id: &str, request: TransitionRequest) -> Result<(), EngineError> {
        let applied = match self.try_apply(actor_id, &request).await {
            Err(EngineError::Conflict { .. })
                if self.retry_on_conflict && request.expected_version.is_none() =>
            {
                warn!("concurrent modification, retrying once");
                self.try_apply(actor_id, &request).await?
            }
            res => res?,
        };

        info!(from = %applied.from, version = applied.txn.version, "transaction moved");
        self.notify(Notice::Transitioned {
            transaction_id: applied.txn.id.clone(),
            event_id: applied.txn.event_id.clone(),
            from: applied.from,
            to: applied.txn.status,
            actor_id: actor_id.to_string(),
        });

        Ok(())
    }

    async fn try_apply(
        &self,
        actor_id: &str,
        request: &TransitionRequest,
    ) -> Result<Applied, EngineError> {
        let actor = actor_id.to_string();
        let request = request.clone();

        self.scoped("apply", move |store, deadline| {
            store.run_in_transaction(|uow| {
                deadline.check()?;
                let mut txn = uow.load_transaction(&request.transaction_id)?;
                let loaded_version = txn.version;

                if request.expected_version.is_some_and(|v| v != loaded_version) {
                    return Err(EngineError::conflict(Entity::Transaction, &txn.id));
                }
                if txn.status == TransactionStatus::Completed {
                    return Err(EngineError::AlreadyCompleted(txn.id.clone()));
                }

                let event = uow.load_event(&txn.event_id)?;
                let from = txn.status;
                let to = request.requested_status;
                let role = status::authorize(
                    from,
                    to,
                    txn.role_of(&actor, &event.owner_id),
                    &request.comment,
                )
                .map_err(|reason| EngineError::InvalidTransition { from, to, reason })?;

                // taking a slot on a proposal, e.g. accepting a waiting request
                if let EventKind::Proposal {
                    max_concurrent_requests,
                    ..
                } = event.kind
                {
                    if to.consumes_capacity() && !from.consumes_capacity() {
                        let aggregate = uow.load_event_with_transactions_and_needs(&event.id)?;
                        if aggregate.slots_in_use() >= max_concurrent_requests {
                            return Err(EngineError::InvalidTransition {
                                from,
                                to,
                                reason: DenyReason::CapacityExhausted,
                            });
                        }
                    }
                }

                if let Some(contributions) = &request.contributions {
                    event.check_contributions(contributions)?;
                    txn.contributions = contributions.clone();
                }
                if let Some(url) = &request.report_url {
                    txn.report_url = Some(url.clone());
                }
                txn.record_transition(to, role, &actor, &request.comment);
                txn.version = uow.save_transaction(&txn, loaded_version)?;

                if to == TransactionStatus::Completed {
                    aggregator::recompute(uow, &txn.event_id)?;
                }

                deadline.check()?;
                Ok(Applied { from, txn })
            })
        })
        .await
    }

    /// Recompute the derived state of an event from its transactions
    pub async fn recompute(&self, event_id: &str) -> Result<EventAggregate, EngineError> {
        let event_id = event_id.to_string();

        self.scoped("recompute", move |store, deadline| {
            store.run_in_transaction(|uow| {
                deadline.check()?;
                let aggregate = aggregator::recompute(uow, &event_id)?;
                deadline.check()?;
                Ok(aggregate)
            })
        })
        .await
    }

    /// Creator initiated event status change. `Done` belongs to the aggregator and a done event
    /// stays done.
    #[instrument(skip(self))]
    pub async fn set_event_status(
        &self,
        actor_id: &str,
        event_id: &str,
        status: EventStatus,
    ) -> Result<(), EngineError> {
        let actor = actor_id.to_string();
        let id = event_id.to_string();

        self.scoped("set_event_status", move |store, deadline| {
            store.run_in_transaction(|uow| {
                deadline.check()?;
                let mut event = uow.load_event(&id)?;
                let from = event.status;
                let deny = |reason| EngineError::InvalidEventStatus {
                    from,
                    to: status,
                    reason,
                };

                if actor != event.owner_id {
                    return Err(deny(DenyReason::Unauthorized));
                }
                if status == EventStatus::Done || from == EventStatus::Done || from == status {
                    return Err(deny(DenyReason::NoSuchEdge));
                }

                event.status = status;
                uow.save_event(&event, event.version)?;

                deadline.check()?;
                Ok(())
            })
        })
        .await?;

        self.notify(Notice::EventStatusChanged {
            event_id: event_id.to_string(),
            status,
        });
        Ok(())
    }

    /// Owner edit of an event's details. A new request limit is applied to the remaining
    /// capacity in the same unit of work.
    #[instrument(skip(self, update))]
    pub async fn update_event(
        &self,
        actor_id: &str,
        event_id: &str,
        update: EventUpdate,
    ) -> Result<(), EngineError> {
        let actor = actor_id.to_string();
        let id = event_id.to_string();

        let aggregate = self
            .scoped("update_event", move |store, deadline| {
                store.run_in_transaction(|uow| {
                    deadline.check()?;
                    let mut aggregate = uow.load_event_with_transactions_and_needs(&id)?;
                    if actor != aggregate.event.owner_id {
                        return Err(EngineError::NotEventOwner {
                            actor: actor.clone(),
                            id: id.clone(),
                        });
                    }

                    update.validate_and_apply(&mut aggregate)?;
                    aggregator::apply(&mut aggregate);
                    aggregate.event.version = uow.save_event_aggregate(&aggregate)?;

                    deadline.check()?;
                    Ok(aggregate)
                })
            })
            .await?;

        info!(
            event = %aggregate.event.id,
            remaining = ?aggregate.event.remaining_capacity(),
            "event updated"
        );
        Ok(())
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Transaction, EngineError> {
        let id = id.to_string();
        self.scoped("get_transaction", move |store, deadline| {
            deadline.check()?;
            store.load_transaction(&id)
        })
        .await
    }

    /// The event with its needs and every transaction opened against it
    pub async fn get_event(&self, id: &str) -> Result<EventAggregate, EngineError> {
        let id = id.to_string();
        self.scoped("get_event", move |store, deadline| {
            deadline.check()?;
            store.load_event_with_transactions_and_needs(&id)
        })
        .await
    }
}
