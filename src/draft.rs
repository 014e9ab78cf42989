//! Builders for new help and proposal events, and for owner edits of existing ones
use super::error::ValidationError;
use super::model::{Event, EventAggregate, EventKind, Need, TimeStamp, Unit};
use super::status::EventStatus;
use chrono::Utc;

const NEED_AMOUNT: std::ops::RangeInclusive<u32> = 1..=50;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NeedDraft {
    pub title: String,
    pub amount: u32,
    pub unit: Unit,
}

// used for constructing help events before they are stored
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HelpEventDraft {
    title: Option<String>,
    description: Option<String>,
    competition_date: Option<TimeStamp<Utc>>,
    needs: Vec<NeedDraft>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProposalEventDraft {
    title: Option<String>,
    description: Option<String>,
    competition_date: Option<TimeStamp<Utc>>,
    max_concurrent_requests: u32,
}

/// Owner edits of an existing event. Unset fields are left as they are.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventUpdate {
    title: Option<String>,
    description: Option<String>,
    competition_date: Option<TimeStamp<Utc>>,
    max_concurrent_requests: Option<u32>,
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

impl HelpEventDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
    pub fn set_competition_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.competition_date = Some(date);
        self
    }
    pub fn add_need(mut self, title: &str, amount: u32, unit: Unit) -> Self {
        self.needs.push(NeedDraft {
            title: title.to_string(),
            amount,
            unit,
        });
        self
    }
    /// Checks the draft and turns it into a new active event. `id` and `owner_id` are
    /// supplied by the service.
    pub fn validate_and_finalise(&self, id: String, owner_id: &str) -> Result<Event, ValidationError> {
        let title = required(&self.title, "title")?;
        let description = required(&self.description, "description")?;

        if self.needs.is_empty() {
            return Err(ValidationError::NoNeeds);
        }

        let mut needs = Vec::with_capacity(self.needs.len());
        for (i, need) in self.needs.iter().enumerate() {
            if need.title.trim().is_empty() {
                return Err(ValidationError::MissingField("need title"));
            }
            if !NEED_AMOUNT.contains(&need.amount) {
                return Err(ValidationError::NeedAmountOutOfRange(need.amount));
            }
            needs.push(Need {
                id: i as u32,
                title: need.title.clone(),
                target: need.amount,
                unit: need.unit,
                received: 0,
            });
        }

        let mut event = new_event(id, owner_id, EventKind::Help, title, description, needs);
        event.competition_date = self.competition_date.clone();
        Ok(event)
    }
}

impl ProposalEventDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
    pub fn set_competition_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.competition_date = Some(date);
        self
    }
    pub fn set_max_concurrent_requests(mut self, max: u32) -> Self {
        self.max_concurrent_requests = max;
        self
    }
    pub fn validate_and_finalise(&self, id: String, owner_id: &str) -> Result<Event, ValidationError> {
        let title = required(&self.title, "title")?;
        let description = required(&self.description, "description")?;

        if self.max_concurrent_requests == 0 {
            return Err(ValidationError::NoCapacity);
        }

        let kind = EventKind::Proposal {
            max_concurrent_requests: self.max_concurrent_requests,
            remaining_capacity: self.max_concurrent_requests,
        };

        let mut event = new_event(id, owner_id, kind, title, description, vec![]);
        event.competition_date = self.competition_date.clone();
        Ok(event)
    }
}

fn new_event(
    id: String,
    owner_id: &str,
    kind: EventKind,
    title: String,
    description: String,
    needs: Vec<Need>,
) -> Event {
    Event {
        id,
        owner_id: owner_id.to_string(),
        kind,
        title,
        description,
        status: EventStatus::Active,
        completion_percentage: 0.0,
        needs,
        transaction_ids: vec![],
        created_at: TimeStamp::new(),
        completed_at: None,
        version: 0,
        competition_date: None,
    }
}

impl EventUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
    pub fn set_competition_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.competition_date = Some(date);
        self
    }
    pub fn set_max_concurrent_requests(mut self, max: u32) -> Self {
        self.max_concurrent_requests = Some(max);
        self
    }

    /// Checks the edit against the same rules as a new event and writes it into the aggregate.
    /// A new maximum may not drop below the slots already taken. Derived fields are left for
    /// the aggregator.
    pub fn validate_and_apply(&self, aggregate: &mut EventAggregate) -> Result<(), ValidationError> {
        let title = self
            .title
            .as_ref()
            .map(|_| required(&self.title, "title"))
            .transpose()?;
        let description = self
            .description
            .as_ref()
            .map(|_| required(&self.description, "description"))
            .transpose()?;
        let in_use = aggregate.slots_in_use();
        let event = &mut aggregate.event;

        if let Some(max) = self.max_concurrent_requests {
            let EventKind::Proposal {
                max_concurrent_requests,
                ..
            } = &mut event.kind
            else {
                return Err(ValidationError::NotAProposal);
            };
            if max == 0 {
                return Err(ValidationError::NoCapacity);
            }
            if max < in_use {
                return Err(ValidationError::CapacityInUse { max, in_use });
            }
            *max_concurrent_requests = max;
        }

        if let Some(title) = title {
            event.title = title;
        }
        if let Some(description) = description {
            event.description = description;
        }
        if let Some(date) = &self.competition_date {
            event.competition_date = Some(date.clone());
        }
        Ok(())
    }
}
