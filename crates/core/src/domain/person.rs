use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonId(pub String);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subject of most events. Owned by the contact store; the orchestration core
/// only reads it to resolve names and current segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub segment: Option<String>,
    pub relationship_score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Relationship segments on a fixed total order, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Dormant,
    Acquaintance,
    Network,
    Friend,
    InnerCircle,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dormant => "dormant",
            Self::Acquaintance => "acquaintance",
            Self::Network => "network",
            Self::Friend => "friend",
            Self::InnerCircle => "inner_circle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "dormant" => Some(Self::Dormant),
            "acquaintance" => Some(Self::Acquaintance),
            "network" => Some(Self::Network),
            "friend" => Some(Self::Friend),
            "inner_circle" => Some(Self::InnerCircle),
            _ => None,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Dormant => 0,
            Self::Acquaintance => 1,
            Self::Network => 2,
            Self::Friend => 3,
            Self::InnerCircle => 4,
        }
    }
}
