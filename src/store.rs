//! The storage contract the engine needs, and its sled implementation.
//!
//! Everything the engine reads or writes goes through a [`UnitOfWork`] handed out by
//! [`Store::run_in_transaction`]. The unit commits when the closure returns `Ok` and rolls back
//! on any `Err`, so an early `?` inside the closure never leaves a half written aggregate behind.
use super::error::{EngineError, Entity};
use super::model::{Event, EventAggregate, Transaction};
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub trait UnitOfWork {
    fn load_transaction(&self, id: &str) -> Result<Transaction, EngineError>;
    /// Fails with `Conflict` if a transaction with this id already exists
    fn insert_transaction(&self, txn: &Transaction) -> Result<(), EngineError>;
    /// Writes `txn` if the stored version is still `expected_version`. Returns the new version.
    fn save_transaction(&self, txn: &Transaction, expected_version: u64) -> Result<u64, EngineError>;
    fn load_event(&self, id: &str) -> Result<Event, EngineError>;
    fn insert_event(&self, event: &Event) -> Result<(), EngineError>;
    fn save_event(&self, event: &Event, expected_version: u64) -> Result<u64, EngineError>;

    fn load_event_with_transactions_and_needs(
        &self,
        event_id: &str,
    ) -> Result<EventAggregate, EngineError> {
        let event = self.load_event(event_id)?;
        let transactions = event
            .transaction_ids
            .iter()
            .map(|id| self.load_transaction(id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EventAggregate {
            event,
            transactions,
        })
    }

    /// Persists the event half of the aggregate. Transactions are never written by aggregation.
    fn save_event_aggregate(&self, aggregate: &EventAggregate) -> Result<u64, EngineError> {
        self.save_event(&aggregate.event, aggregate.event.version)
    }
}

pub trait Store: Send + Sync + 'static {
    /// Runs `work` inside one atomic unit. `work` may be called again if the backend retries.
    fn run_in_transaction<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        F: Fn(&dyn UnitOfWork) -> Result<T, EngineError>;

    fn load_transaction(&self, id: &str) -> Result<Transaction, EngineError> {
        self.run_in_transaction(|uow| uow.load_transaction(id))
    }

    fn save_transaction(&self, txn: &Transaction, expected_version: u64) -> Result<u64, EngineError> {
        self.run_in_transaction(|uow| uow.save_transaction(txn, expected_version))
    }

    fn load_event_with_transactions_and_needs(
        &self,
        event_id: &str,
    ) -> Result<EventAggregate, EngineError> {
        self.run_in_transaction(|uow| uow.load_event_with_transactions_and_needs(event_id))
    }

    fn save_event_aggregate(&self, aggregate: &EventAggregate) -> Result<u64, EngineError> {
        self.run_in_transaction(|uow| uow.save_event_aggregate(aggregate))
    }
}

const TRANSACTIONS_TREE: &str = "transactions";
const EVENTS_TREE: &str = "events";

/// Store backed by two sled trees, records encoded as cbor
pub struct SledStore {
    instance: Arc<sled::Db>,
    transactions: sled::Tree,
    events: sled::Tree,
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, EngineError> {
        let transactions = instance
            .open_tree(TRANSACTIONS_TREE)
            .map_err(|e| EngineError::store_failure("open_tree", TRANSACTIONS_TREE, e))?;
        let events = instance
            .open_tree(EVENTS_TREE)
            .map_err(|e| EngineError::store_failure("open_tree", EVENTS_TREE, e))?;

        Ok(Self {
            instance,
            transactions,
            events,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let db = sled::open(path)
            .map_err(|e| EngineError::store_failure("open", &path.display().to_string(), e))?;
        info!(path = %path.display(), "opened store");

        Self::new(Arc::new(db))
    }

    pub fn flush(&self) -> Result<(), EngineError> {
        self.instance
            .flush()
            .map_err(|e| EngineError::store_failure("flush", "db", e))?;
        Ok(())
    }
}

impl Store for SledStore {
    fn run_in_transaction<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        F: Fn(&dyn UnitOfWork) -> Result<T, EngineError>,
    {
        let res = (&self.transactions, &self.events).transaction(|(transactions, events)| {
            let unit = SledUnit {
                transactions,
                events,
            };
            work(&unit).map_err(ConflictableTransactionError::Abort)
        });

        match res {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => {
                Err(EngineError::store_failure("run_in_transaction", "db", e))
            }
        }
    }
}

struct SledUnit<'a> {
    transactions: &'a TransactionalTree,
    events: &'a TransactionalTree,
}

fn unabortable(
    op: &'static str,
    entity: Entity,
    id: &str,
    err: UnabortableTransactionError,
) -> EngineError {
    match err {
        UnabortableTransactionError::Conflict => EngineError::conflict(entity, id),
        UnabortableTransactionError::Storage(e) => EngineError::store_failure(op, id, e),
    }
}

fn decode<T>(op: &'static str, id: &str, bytes: &[u8]) -> Result<T, EngineError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| EngineError::store_failure(op, id, e.to_string()))
}

fn encode<T: minicbor::Encode<()>>(op: &'static str, id: &str, value: &T) -> Result<Vec<u8>, EngineError> {
    minicbor::to_vec(value).map_err(|e| EngineError::store_failure(op, id, e.to_string()))
}

fn get(
    op: &'static str,
    tree: &TransactionalTree,
    entity: Entity,
    id: &str,
) -> Result<Option<sled::IVec>, EngineError> {
    tree.get(id.as_bytes())
        .map_err(|e| unabortable(op, entity, id, e))
}

fn put(
    op: &'static str,
    tree: &TransactionalTree,
    entity: Entity,
    id: &str,
    bytes: Vec<u8>,
) -> Result<(), EngineError> {
    tree.insert(id.as_bytes(), bytes)
        .map_err(|e| unabortable(op, entity, id, e))?;
    Ok(())
}

impl UnitOfWork for SledUnit<'_> {
    fn load_transaction(&self, id: &str) -> Result<Transaction, EngineError> {
        const OP: &str = "load_transaction";
        match get(OP, self.transactions, Entity::Transaction, id)? {
            Some(bytes) => decode(OP, id, &bytes),
            None => Err(EngineError::not_found(Entity::Transaction, id)),
        }
    }

    fn insert_transaction(&self, txn: &Transaction) -> Result<(), EngineError> {
        const OP: &str = "insert_transaction";
        if get(OP, self.transactions, Entity::Transaction, &txn.id)?.is_some() {
            return Err(EngineError::conflict(Entity::Transaction, &txn.id));
        }
        let bytes = encode(OP, &txn.id, txn)?;
        put(OP, self.transactions, Entity::Transaction, &txn.id, bytes)
    }

    fn save_transaction(&self, txn: &Transaction, expected_version: u64) -> Result<u64, EngineError> {
        const OP: &str = "save_transaction";
        let stored = self.load_transaction(&txn.id)?;
        if stored.version != expected_version {
            return Err(EngineError::conflict(Entity::Transaction, &txn.id));
        }

        let mut next = txn.clone();
        next.version = expected_version + 1;
        let bytes = encode(OP, &next.id, &next)?;
        put(OP, self.transactions, Entity::Transaction, &next.id, bytes)?;

        Ok(next.version)
    }

    fn load_event(&self, id: &str) -> Result<Event, EngineError> {
        const OP: &str = "load_event";
        match get(OP, self.events, Entity::Event, id)? {
            Some(bytes) => decode(OP, id, &bytes),
            None => Err(EngineError::not_found(Entity::Event, id)),
        }
    }

    fn insert_event(&self, event: &Event) -> Result<(), EngineError> {
        const OP: &str = "insert_event";
        if get(OP, self.events, Entity::Event, &event.id)?.is_some() {
            return Err(EngineError::conflict(Entity::Event, &event.id));
        }
        let bytes = encode(OP, &event.id, event)?;
        put(OP, self.events, Entity::Event, &event.id, bytes)
    }

    fn save_event(&self, event: &Event, expected_version: u64) -> Result<u64, EngineError> {
        const OP: &str = "save_event";
        let stored = self.load_event(&event.id)?;
        if stored.version != expected_version {
            return Err(EngineError::conflict(Entity::Event, &event.id));
        }

        let mut next = event.clone();
        next.version = expected_version + 1;
        let bytes = encode(OP, &next.id, &next)?;
        put(OP, self.events, Entity::Event, &next.id, bytes)?;

        Ok(next.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::HelpEventDraft;
    use crate::model::{Transaction, Unit};
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, SledStore) {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path().join("store.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn stale_save_is_a_conflict() {
        let (_dir, store) = store();
        let event = HelpEventDraft::new()
            .set_title("Books")
            .set_description("School books")
            .add_need("books", 5, Unit::Item)
            .validate_and_finalise("event_a".into(), "user_owner")
            .unwrap();
        let txn = Transaction::open("txn_a".into(), &event, "user_x", "");

        store
            .run_in_transaction(|uow| {
                uow.insert_event(&event)?;
                uow.insert_transaction(&txn)
            })
            .unwrap();

        assert_eq!(store.save_transaction(&txn, 0).unwrap(), 1);
        let err = store.save_transaction(&txn, 0).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(store.load_transaction("txn_a").unwrap().version, 1);
    }

    #[test]
    fn failed_unit_rolls_back() {
        let (_dir, store) = store();
        let event = HelpEventDraft::new()
            .set_title("Books")
            .set_description("School books")
            .add_need("books", 5, Unit::Item)
            .validate_and_finalise("event_b".into(), "user_owner")
            .unwrap();

        let res: Result<(), EngineError> = store.run_in_transaction(|uow| {
            uow.insert_event(&event)?;
            Err(EngineError::not_found(Entity::Transaction, "txn_missing"))
        });

        assert!(res.is_err());
        let err = store.load_event_with_transactions_and_needs("event_b").unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
