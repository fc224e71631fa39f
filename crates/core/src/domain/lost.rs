use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::lead::LeadId;
use crate::domain::owner::OwnerId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LostOpportunityId(pub String);

/// Why the CRM reported the opportunity as lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LostSource {
    #[serde(rename = "no_interesado")]
    NotInterested,
    #[serde(rename = "no_contactable")]
    NotReachable,
}

impl LostSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInterested => "no_interesado",
            Self::NotReachable => "no_contactable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "no_interesado" => Some(Self::NotInterested),
            "no_contactable" => Some(Self::NotReachable),
            _ => None,
        }
    }

    /// Picks the reason matching this source; the other reason is ignored.
    pub fn select_reason(
        &self,
        reason_not_interested: Option<&str>,
        reason_not_reachable: Option<&str>,
    ) -> Result<String, DomainError> {
        let reason = match self {
            Self::NotInterested => reason_not_interested,
            Self::NotReachable => reason_not_reachable,
        };
        reason
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(DomainError::MissingLostReason { lost_source: *self })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LostOpportunityRecord {
    pub id: LostOpportunityId,
    pub lead_id: LeadId,
    pub owner_id: OwnerId,
    pub external_opportunity_id: Option<String>,
    pub external_pipeline_id: Option<String>,
    pub external_stage_id: Option<String>,
    /// Capture channel of the lead at the time it was lost.
    pub capture_channel: Option<String>,
    pub source: LostSource,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
    pub raw_payload: Value,
}
