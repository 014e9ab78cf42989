#![allow(dead_code)]

use help_coordination::{
    HelpService, RequestCreate, SledStore, TransactionStatus, TransitionRequest,
    config::{EngineConfig, setup_tracing},
    draft::{HelpEventDraft, ProposalEventDraft},
    model::Unit,
    utils::{IdKind, new_id},
};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

/// A service over a fresh sled database, plus an event owner and two volunteers.
pub struct Harness {
    pub dir: TempDir, // dropped last, removes the db
    pub db: Arc<sled::Db>,
    pub service: HelpService<SledStore>,
    pub owner: String,
    pub volunteer: String,
    pub other_volunteer: String,
}

pub fn harness() -> anyhow::Result<Harness> {
    harness_with(&EngineConfig::default())
}

pub fn harness_with(config: &EngineConfig) -> anyhow::Result<Harness> {
    // only the first harness in a test binary gets to install the subscriber
    let _ = setup_tracing(&config.log_level);

    // Sled locks the db file, so every test gets its own database under a temp dir.
    let dir = tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("help.db"))?);
    let store = Arc::new(SledStore::new(Arc::clone(&db))?);

    Ok(Harness {
        dir,
        db,
        service: HelpService::new(store, config),
        owner: new_id(IdKind::User)?,
        volunteer: new_id(IdKind::User)?,
        other_volunteer: new_id(IdKind::User)?,
    })
}

impl Harness {
    /// help event with one need per target, all counted in items
    pub async fn help_event(&self, targets: &[u32]) -> anyhow::Result<String> {
        let mut draft = HelpEventDraft::new()
            .set_title("Shelter supplies")
            .set_description("Supplies for the night shelter");
        for (i, target) in targets.iter().enumerate() {
            draft = draft.add_need(&format!("need {i}"), *target, Unit::Item);
        }
        Ok(self.service.create_help_event(&self.owner, draft).await?)
    }

    pub async fn proposal_event(&self, max: u32) -> anyhow::Result<String> {
        let draft = ProposalEventDraft::new()
            .set_title("Rides to the clinic")
            .set_description("Two seats on weekdays")
            .set_max_concurrent_requests(max);
        Ok(self.service.create_proposal_event(&self.owner, draft).await?)
    }

    pub async fn request(&self, actor: &str, event_id: &str) -> anyhow::Result<String> {
        Ok(self
            .service
            .create_request(actor, RequestCreate::new(event_id).with_comment("I can help"))
            .await?)
    }

    pub async fn apply(
        &self,
        actor: &str,
        txn_id: &str,
        status: TransactionStatus,
    ) -> Result<(), help_coordination::EngineError> {
        self.service
            .apply(actor, TransitionRequest::new(txn_id, status).with_comment("update"))
            .await
    }
}
