//! Nurture agent: keeps relationships from going cold.
//!
//! Reacts to cadence, relationship and milestone events for a single person
//! and proposes a low-friction touchpoint. The subject is always resolved from
//! the person store first; an unknown person yields no proposals.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use rapport_core::domain::action::{ActionProposal, RiskLevel};
use rapport_core::domain::event::{
    AnniversaryApproachingPayload, ContactDuePayload, EventPayload, EventType,
    LifeEventDetectedPayload, RelationshipScoreChangedPayload, SegmentChangedPayload,
    SystemEvent,
};
use rapport_core::domain::person::{Person, Segment};
use rapport_db::PersonRepository;

use crate::handler::{AgentHandler, HandlerError};

pub const NURTURE_AGENT: &str = "nurture_agent";

pub const SUBSCRIBED_EVENTS: [EventType; 5] = [
    EventType::ContactDue,
    EventType::RelationshipScoreChanged,
    EventType::SegmentChanged,
    EventType::AnniversaryApproaching,
    EventType::LifeEventDetected,
];

/// Score drop at or beyond which a reconnection is proposed.
const SCORE_DROP_THRESHOLD: i32 = -15;
const CALL_AFTER_DAYS_OVERDUE: i64 = 30;
const EMAIL_AFTER_DAYS_OVERDUE: i64 = 14;
const ANNIVERSARY_LEAD_DAYS: i64 = 14;

pub struct NurtureAgent {
    people: Arc<dyn PersonRepository>,
}

impl NurtureAgent {
    pub fn new(people: Arc<dyn PersonRepository>) -> Self {
        Self { people }
    }

    async fn resolve_subject(&self, event: &SystemEvent) -> Option<Person> {
        let person_id = event.person_id.as_ref()?;

        match self.people.find_by_id(person_id).await {
            Ok(Some(person)) => Some(person),
            Ok(None) => {
                debug!(
                    event_name = "agent.nurture.subject_missing",
                    correlation_id = %event.id,
                    person_id = %person_id.0,
                    "person not found, skipping event"
                );
                None
            }
            Err(error) => {
                warn!(
                    event_name = "agent.nurture.subject_lookup_failed",
                    correlation_id = %event.id,
                    person_id = %person_id.0,
                    error = %error,
                    "person lookup failed, skipping event"
                );
                None
            }
        }
    }
}

#[async_trait]
impl AgentHandler for NurtureAgent {
    async fn handle(&self, event: &SystemEvent) -> Result<Vec<ActionProposal>, HandlerError> {
        let Some(person) = self.resolve_subject(event).await else {
            return Ok(Vec::new());
        };

        let proposal = match &event.payload {
            EventPayload::ContactDue(payload) => Some(contact_due(&person, payload)),
            EventPayload::RelationshipScoreChanged(payload) => score_changed(&person, payload),
            EventPayload::SegmentChanged(payload) => Some(segment_changed(&person, payload)),
            EventPayload::AnniversaryApproaching(payload) => anniversary(&person, payload),
            EventPayload::LifeEventDetected(payload) => Some(life_event(&person, payload)),
            EventPayload::FordUpdated(_)
            | EventPayload::DealStageChanged(_)
            | EventPayload::LeadCreated(_) => None,
        };

        Ok(proposal.into_iter().collect())
    }
}

fn contact_due(person: &Person, payload: &ContactDuePayload) -> ActionProposal {
    let (action_type, channel, risk_level) = match payload.days_overdue {
        days if days > CALL_AFTER_DAYS_OVERDUE => ("suggest_call", "call", RiskLevel::Medium),
        days if days > EMAIL_AFTER_DAYS_OVERDUE => ("suggest_email", "email", RiskLevel::Low),
        _ => ("suggest_text", "text", RiskLevel::Low),
    };

    proposal(
        person,
        action_type,
        risk_level,
        format!(
            "{} is {} days overdue for contact ({}); last contact was {} days ago.",
            person.name, payload.days_overdue, payload.due_reason, payload.days_since_contact
        ),
        content(
            person,
            Some(channel),
            format!("Reach out to {}", person.name),
            json!({ "daysOverdue": payload.days_overdue, "dueReason": payload.due_reason }),
        ),
        Some(80),
    )
}

fn score_changed(
    person: &Person,
    payload: &RelationshipScoreChangedPayload,
) -> Option<ActionProposal> {
    let delta = payload.delta();
    if delta > SCORE_DROP_THRESHOLD {
        return None;
    }

    Some(proposal(
        person,
        "suggest_reconnect",
        RiskLevel::Medium,
        format!(
            "{}'s relationship score dropped by {} points ({} -> {}): {}.",
            person.name,
            delta.unsigned_abs(),
            payload.old_score,
            payload.new_score,
            payload.change_reason
        ),
        content(
            person,
            None,
            format!("Reconnect with {}", person.name),
            json!({
                "oldScore": payload.old_score,
                "newScore": payload.new_score,
                "delta": delta,
            }),
        ),
        Some(70),
    ))
}

fn segment_changed(person: &Person, payload: &SegmentChangedPayload) -> ActionProposal {
    let old = payload.old_segment.as_deref().and_then(Segment::parse);
    let new = payload.new_segment.as_deref().and_then(Segment::parse);
    let describe = |segment: Option<&str>| segment.unwrap_or("none").to_string();
    let from = describe(payload.old_segment.as_deref());
    let to = describe(payload.new_segment.as_deref());

    let name = &person.name;
    let (movement, reasoning) = match (old, new) {
        (Some(old), Some(new)) if new.rank() > old.rank() => (
            "promoted",
            format!("{name} was promoted from {from} to {to}; the relationship is deepening."),
        ),
        (Some(old), Some(new)) if new.rank() < old.rank() => (
            "demoted",
            format!("{name} was demoted from {from} to {to}; the relationship may need attention."),
        ),
        _ => ("moved", format!("{name} moved from {from} to {to}.")),
    };

    proposal(
        person,
        "log_insight",
        RiskLevel::Low,
        reasoning,
        content(
            person,
            None,
            format!("{name} {movement} to {to}"),
            json!({
                "oldSegment": payload.old_segment,
                "newSegment": payload.new_segment,
                "movement": movement,
            }),
        ),
        None,
    )
}

fn anniversary(person: &Person, payload: &AnniversaryApproachingPayload) -> Option<ActionProposal> {
    if payload.days_until > ANNIVERSARY_LEAD_DAYS {
        return None;
    }

    Some(proposal(
        person,
        "suggest_message",
        RiskLevel::Low,
        format!(
            "{}'s {} is on {} ({} days away).",
            person.name, payload.anniversary_type, payload.date, payload.days_until
        ),
        content(
            person,
            Some("message"),
            format!("Send {} a note for their {}", person.name, payload.anniversary_type),
            json!({
                "anniversaryType": payload.anniversary_type,
                "date": payload.date,
                "daysUntil": payload.days_until,
            }),
        ),
        Some(75),
    ))
}

fn life_event(person: &Person, payload: &LifeEventDetectedPayload) -> ActionProposal {
    proposal(
        person,
        "suggest_check_in",
        RiskLevel::Medium,
        format!(
            "{} had a life event ({}): {}.",
            person.name, payload.event_kind, payload.description
        ),
        content(
            person,
            None,
            format!("Check in with {}", person.name),
            json!({ "eventKind": payload.event_kind, "occurredOn": payload.occurred_on }),
        ),
        Some(60),
    )
}

fn proposal(
    person: &Person,
    action_type: &str,
    risk_level: RiskLevel,
    reasoning: String,
    proposed_content: Value,
    confidence: Option<u8>,
) -> ActionProposal {
    ActionProposal {
        action_type: action_type.to_string(),
        person_id: Some(person.id.clone()),
        target_entity: Some("person".to_string()),
        proposed_content,
        risk_level,
        reasoning,
        confidence,
    }
}

/// `{channel?, personName, headline}` merged with event-specific fields.
fn content(person: &Person, channel: Option<&str>, headline: String, extra: Value) -> Value {
    let mut content = json!({ "personName": person.name, "headline": headline });
    if let (Value::Object(target), Some(channel)) = (&mut content, channel) {
        target.insert("channel".to_string(), Value::String(channel.to_string()));
    }
    if let (Value::Object(target), Value::Object(extra)) = (&mut content, extra) {
        target.extend(extra);
    }
    content
}
