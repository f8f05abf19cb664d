use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::person::PersonId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "contact.due")]
    ContactDue,
    #[serde(rename = "ford.updated")]
    FordUpdated,
    #[serde(rename = "deal.stage_changed")]
    DealStageChanged,
    #[serde(rename = "relationship.score_changed")]
    RelationshipScoreChanged,
    #[serde(rename = "segment.changed")]
    SegmentChanged,
    #[serde(rename = "anniversary.approaching")]
    AnniversaryApproaching,
    #[serde(rename = "lead.created")]
    LeadCreated,
    #[serde(rename = "life_event.detected")]
    LifeEventDetected,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        Self::ContactDue,
        Self::FordUpdated,
        Self::DealStageChanged,
        Self::RelationshipScoreChanged,
        Self::SegmentChanged,
        Self::AnniversaryApproaching,
        Self::LeadCreated,
        Self::LifeEventDetected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactDue => "contact.due",
            Self::FordUpdated => "ford.updated",
            Self::DealStageChanged => "deal.stage_changed",
            Self::RelationshipScoreChanged => "relationship.score_changed",
            Self::SegmentChanged => "segment.changed",
            Self::AnniversaryApproaching => "anniversary.approaching",
            Self::LeadCreated => "lead.created",
            Self::LifeEventDetected => "life_event.detected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|event_type| event_type.as_str() == normalized)
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Self::ContactDue => EventCategory::Cadence,
            Self::FordUpdated => EventCategory::Profile,
            Self::DealStageChanged | Self::LeadCreated => EventCategory::Pipeline,
            Self::RelationshipScoreChanged | Self::SegmentChanged => EventCategory::Relationship,
            Self::AnniversaryApproaching | Self::LifeEventDetected => EventCategory::Milestone,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Cadence,
    Profile,
    Pipeline,
    Relationship,
    Milestone,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cadence => "cadence",
            Self::Profile => "profile",
            Self::Pipeline => "pipeline",
            Self::Relationship => "relationship",
            Self::Milestone => "milestone",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cadence" => Some(Self::Cadence),
            "profile" => Some(Self::Profile),
            "pipeline" => Some(Self::Pipeline),
            "relationship" => Some(Self::Relationship),
            "milestone" => Some(Self::Milestone),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDuePayload {
    pub due_reason: String,
    pub days_since_contact: i64,
    pub days_overdue: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FordUpdatedPayload {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealStageChangedPayload {
    pub old_stage: Option<String>,
    pub new_stage: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipScoreChangedPayload {
    pub old_score: i32,
    pub new_score: i32,
    pub change_reason: String,
}

impl RelationshipScoreChangedPayload {
    pub fn delta(&self) -> i32 {
        self.new_score - self.old_score
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentChangedPayload {
    pub old_segment: Option<String>,
    pub new_segment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnniversaryApproachingPayload {
    pub anniversary_type: String,
    pub date: String,
    pub days_until: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadCreatedPayload {
    pub lead_source: String,
    pub referred_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifeEventDetectedPayload {
    pub event_kind: String,
    pub description: String,
    pub occurred_on: Option<String>,
}

/// Typed event body. The variant tag is the wire event type, so a stored
/// payload always carries the type it was validated against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload")]
pub enum EventPayload {
    #[serde(rename = "contact.due")]
    ContactDue(ContactDuePayload),
    #[serde(rename = "ford.updated")]
    FordUpdated(FordUpdatedPayload),
    #[serde(rename = "deal.stage_changed")]
    DealStageChanged(DealStageChangedPayload),
    #[serde(rename = "relationship.score_changed")]
    RelationshipScoreChanged(RelationshipScoreChangedPayload),
    #[serde(rename = "segment.changed")]
    SegmentChanged(SegmentChangedPayload),
    #[serde(rename = "anniversary.approaching")]
    AnniversaryApproaching(AnniversaryApproachingPayload),
    #[serde(rename = "lead.created")]
    LeadCreated(LeadCreatedPayload),
    #[serde(rename = "life_event.detected")]
    LifeEventDetected(LifeEventDetectedPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::ContactDue(_) => EventType::ContactDue,
            Self::FordUpdated(_) => EventType::FordUpdated,
            Self::DealStageChanged(_) => EventType::DealStageChanged,
            Self::RelationshipScoreChanged(_) => EventType::RelationshipScoreChanged,
            Self::SegmentChanged(_) => EventType::SegmentChanged,
            Self::AnniversaryApproaching(_) => EventType::AnniversaryApproaching,
            Self::LeadCreated(_) => EventType::LeadCreated,
            Self::LifeEventDetected(_) => EventType::LifeEventDetected,
        }
    }

    /// Decodes an untyped producer payload against the schema of `event_type`.
    pub fn from_raw(event_type: &str, payload: serde_json::Value) -> Result<Self, DomainError> {
        let parsed = EventType::parse(event_type)
            .ok_or_else(|| DomainError::UnknownEventType(event_type.to_string()))?;

        let envelope = serde_json::json!({ "eventType": parsed.as_str(), "payload": payload });
        let decoded = serde_json::from_value::<Self>(envelope).map_err(|error| {
            DomainError::InvalidEventPayload {
                event_type: parsed.as_str().to_string(),
                reason: error.to_string(),
            }
        })?;

        decoded.validate()?;
        Ok(decoded)
    }

    /// The flat payload record without its type tag, as accepted by `from_raw`.
    pub fn to_raw(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut envelope = serde_json::to_value(self)?;
        Ok(envelope.get_mut("payload").map(serde_json::Value::take).unwrap_or_default())
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let invalid = |reason: &str| DomainError::InvalidEventPayload {
            event_type: self.event_type().as_str().to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::ContactDue(payload) => {
                if payload.due_reason.trim().is_empty() {
                    return Err(invalid("dueReason must not be empty"));
                }
                if payload.days_since_contact < 0 || payload.days_overdue < 0 {
                    return Err(invalid("day counts must be non-negative"));
                }
            }
            Self::FordUpdated(payload) => {
                if payload.field.trim().is_empty() {
                    return Err(invalid("field must not be empty"));
                }
            }
            Self::DealStageChanged(payload) => {
                if payload.new_stage.trim().is_empty() {
                    return Err(invalid("newStage must not be empty"));
                }
            }
            Self::RelationshipScoreChanged(payload) => {
                let in_range = |score: i32| (0..=100).contains(&score);
                if !in_range(payload.old_score) || !in_range(payload.new_score) {
                    return Err(invalid("scores must be in range 0..=100"));
                }
            }
            Self::SegmentChanged(payload) => {
                if payload.old_segment.is_none() && payload.new_segment.is_none() {
                    return Err(invalid("at least one of oldSegment/newSegment is required"));
                }
            }
            Self::AnniversaryApproaching(payload) => {
                if payload.anniversary_type.trim().is_empty() || payload.date.trim().is_empty() {
                    return Err(invalid("anniversaryType and date must not be empty"));
                }
                if payload.days_until < 0 {
                    return Err(invalid("daysUntil must be non-negative"));
                }
            }
            Self::LeadCreated(payload) => {
                if payload.lead_source.trim().is_empty() {
                    return Err(invalid("leadSource must not be empty"));
                }
            }
            Self::LifeEventDetected(payload) => {
                if payload.event_kind.trim().is_empty() {
                    return Err(invalid("eventKind must not be empty"));
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEntity {
    pub entity_type: String,
    pub entity_id: String,
}

impl SourceEntity {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(), entity_id: entity_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub id: EventId,
    pub event_type: EventType,
    pub event_category: EventCategory,
    pub source: SourceEntity,
    pub person_id: Option<PersonId>,
    pub payload: EventPayload,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl SystemEvent {
    /// Builds a new unprocessed event after validating the payload.
    pub fn new(
        payload: EventPayload,
        source: SourceEntity,
        person_id: Option<PersonId>,
    ) -> Result<Self, DomainError> {
        payload.validate()?;
        let event_type = payload.event_type();

        Ok(Self {
            id: EventId::generate(),
            event_type,
            event_category: event_type.category(),
            source,
            person_id,
            payload,
            processed: false,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ContactDuePayload, EventCategory, EventPayload, EventType, RelationshipScoreChangedPayload,
        SourceEntity, SystemEvent,
    };
    use crate::errors::DomainError;

    #[test]
    fn event_type_parses_wire_names_and_rejects_unknown() {
        assert_eq!(EventType::parse("contact.due"), Some(EventType::ContactDue));
        assert_eq!(EventType::parse(" Segment.Changed "), Some(EventType::SegmentChanged));
        assert_eq!(EventType::parse("contact.overdue"), None);
        for event_type in EventType::ALL {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn categories_follow_event_family() {
        assert_eq!(EventType::ContactDue.category(), EventCategory::Cadence);
        assert_eq!(EventType::LeadCreated.category(), EventCategory::Pipeline);
        assert_eq!(EventType::SegmentChanged.category(), EventCategory::Relationship);
        assert_eq!(EventType::LifeEventDetected.category(), EventCategory::Milestone);
    }

    #[test]
    fn from_raw_decodes_typed_payload() {
        let payload = EventPayload::from_raw(
            "contact.due",
            serde_json::json!({
                "dueReason": "monthly cadence",
                "daysSinceContact": 45,
                "daysOverdue": 15
            }),
        )
        .expect("valid payload");

        assert_eq!(
            payload,
            EventPayload::ContactDue(ContactDuePayload {
                due_reason: "monthly cadence".to_string(),
                days_since_contact: 45,
                days_overdue: 15,
            })
        );
    }

    #[test]
    fn from_raw_rejects_unknown_type_and_missing_fields() {
        let unknown = EventPayload::from_raw("contact.lost", serde_json::json!({}));
        assert!(matches!(
            unknown,
            Err(DomainError::UnknownEventType(ref name)) if name == "contact.lost"
        ));

        let missing = EventPayload::from_raw(
            "relationship.score_changed",
            serde_json::json!({ "oldScore": 80 }),
        );
        assert!(matches!(missing, Err(DomainError::InvalidEventPayload { .. })));
    }

    #[test]
    fn validation_rejects_out_of_range_scores() {
        let payload = EventPayload::RelationshipScoreChanged(RelationshipScoreChangedPayload {
            old_score: 80,
            new_score: 140,
            change_reason: "recalculated".to_string(),
        });

        let result = SystemEvent::new(payload, SourceEntity::new("person", "p-1"), None);
        assert!(matches!(result, Err(DomainError::InvalidEventPayload { .. })));
    }

    #[test]
    fn new_event_derives_type_and_category_from_payload() {
        let event = SystemEvent::new(
            EventPayload::ContactDue(ContactDuePayload {
                due_reason: "quarterly check-in".to_string(),
                days_since_contact: 100,
                days_overdue: 10,
            }),
            SourceEntity::new("person", "p-1"),
            None,
        )
        .expect("valid event");

        assert_eq!(event.event_type, EventType::ContactDue);
        assert_eq!(event.event_category, EventCategory::Cadence);
        assert!(!event.processed);
    }

    #[test]
    fn payload_serializes_with_wire_event_type_tag() {
        let payload = EventPayload::RelationshipScoreChanged(RelationshipScoreChangedPayload {
            old_score: 80,
            new_score: 60,
            change_reason: "no replies".to_string(),
        });

        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["eventType"], "relationship.score_changed");
        assert_eq!(value["payload"]["newScore"], 60);
    }

    #[test]
    fn raw_payload_omits_type_tag() {
        let payload = EventPayload::RelationshipScoreChanged(RelationshipScoreChangedPayload {
            old_score: 80,
            new_score: 60,
            change_reason: "no replies".to_string(),
        });

        let raw = payload.to_raw().expect("serialize");
        assert!(raw.get("eventType").is_none());
        assert_eq!(
            EventPayload::from_raw("relationship.score_changed", raw).expect("decode"),
            payload
        );
    }
}
