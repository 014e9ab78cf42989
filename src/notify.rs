//! Best effort notifications about transaction changes. A failing notifier never fails the
//! operation that triggered it.
use super::status::{EventStatus, TransactionStatus};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    RequestCreated {
        transaction_id: String,
        event_id: String,
        event_owner_id: String,
    },
    Transitioned {
        transaction_id: String,
        event_id: String,
        from: TransactionStatus,
        to: TransactionStatus,
        actor_id: String,
    },
    EventStatusChanged {
        event_id: String,
        status: EventStatus,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice) -> anyhow::Result<()>;
}

/// Default notifier, writes notices to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        match notice {
            Notice::RequestCreated {
                transaction_id,
                event_id,
                event_owner_id,
            } => info!(
                txn = %transaction_id,
                event = %event_id,
                owner = %event_owner_id,
                "new request on event"
            ),
            Notice::Transitioned {
                transaction_id,
                from,
                to,
                actor_id,
                ..
            } => info!(
                txn = %transaction_id,
                %from,
                %to,
                actor = %actor_id,
                "transaction moved"
            ),
            Notice::EventStatusChanged { event_id, status } => {
                info!(event = %event_id, %status, "event status changed")
            }
        }
        Ok(())
    }
}
