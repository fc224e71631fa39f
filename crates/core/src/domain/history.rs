use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;
use crate::domain::owner::OwnerId;
use crate::domain::stage::StageCode;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageHistoryId(pub String);

/// Which event path produced a history row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistorySource {
    WebhookStageChange,
    WebhookOwnerChange,
    Replay,
}

impl HistorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebhookStageChange => "WEBHOOK_STAGE_CHANGE",
            Self::WebhookOwnerChange => "WEBHOOK_OWNER_CHANGE",
            Self::Replay => "REPLAY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WEBHOOK_STAGE_CHANGE" => Some(Self::WebhookStageChange),
            "WEBHOOK_OWNER_CHANGE" => Some(Self::WebhookOwnerChange),
            "REPLAY" => Some(Self::Replay),
            _ => None,
        }
    }
}

/// Append-only stage transition log entry. `from_stage` is `None` only for the
/// initial record an owner change writes for a lead without history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHistoryRecord {
    pub id: StageHistoryId,
    pub lead_id: LeadId,
    pub external_opportunity_id: Option<String>,
    pub from_stage: Option<StageCode>,
    pub to_stage: StageCode,
    pub changed_at: DateTime<Utc>,
    pub owner_id: Option<OwnerId>,
    pub source: HistorySource,
    pub dedup_key: String,
}

impl StageHistoryRecord {
    pub fn is_same_move(&self, from: Option<&StageCode>, to: &StageCode) -> bool {
        self.from_stage.as_ref() == from && &self.to_stage == to
    }
}

/// Storage-level idempotency key for a transition: the lead, the history record it
/// follows (`-` for the first one) and the target stage. Two writers that both saw
/// the same latest record and want the same stage collapse to one row; a later
/// move back to a stage follows a different record and gets a fresh key.
pub fn transition_dedup_key(
    lead_id: &LeadId,
    predecessor: Option<&StageHistoryId>,
    to: &StageCode,
) -> String {
    let predecessor = predecessor.map(|id| id.0.as_str()).unwrap_or("-");
    format!("{}:{}:{}", lead_id.0, predecessor, to.as_str())
}
