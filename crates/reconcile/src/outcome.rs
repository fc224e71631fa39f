use leadsync_db::RepositoryError;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Why an event was acknowledged without being applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    InvalidJson,
    PayloadTooLarge,
    NoOpportunityId,
    NoStageName,
    NoAssignedUser,
    ProspectNotFound,
    StageNotMapped,
    AsesorNotFound,
    DuplicateWindow,
    SameStage,
    InvalidSource,
    MissingReason,
    MissingForeignKeys,
    MissingMinFields,
    LookupFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "INVALID_JSON",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::NoOpportunityId => "NO_OPPORTUNITY_ID",
            Self::NoStageName => "NO_STAGE_NAME",
            Self::NoAssignedUser => "NO_ASSIGNED_USER",
            Self::ProspectNotFound => "PROSPECT_NOT_FOUND",
            Self::StageNotMapped => "STAGE_NOT_MAPPED",
            Self::AsesorNotFound => "ASESOR_NOT_FOUND",
            Self::DuplicateWindow => "DUPLICATE_WINDOW",
            Self::SameStage => "SAME_STAGE",
            Self::InvalidSource => "INVALID_SOURCE",
            Self::MissingReason => "MISSING_REASON",
            Self::MissingForeignKeys => "MISSING_FOREIGN_KEYS",
            Self::MissingMinFields => "MISSING_MIN_FIELDS",
            Self::LookupFailed => "LOOKUP_FAILED",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("event skipped: {0}")]
    Skip(SkipReason),
    #[error("lookup failed: {0}")]
    Lookup(RepositoryError),
    #[error("persistence failed: {0}")]
    Persistence(RepositoryError),
}

/// Tags a repository error from a read as a lookup failure.
pub(crate) fn lookup_failed(error: RepositoryError) -> ReconcileError {
    ReconcileError::Lookup(error)
}

pub(crate) fn write_failed(error: RepositoryError) -> ReconcileError {
    ReconcileError::Persistence(error)
}

/// Body of every webhook answer. The HTTP status is always 200; the outcome lives here.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
}

impl WebhookResponse {
    pub fn skipped(reason: SkipReason) -> Self {
        Self { ok: true, skip: Some(reason), ..Self::default() }
    }

    pub fn saved() -> Self {
        Self { ok: true, saved: Some(true), ..Self::default() }
    }

    pub fn not_saved(error: impl Into<String>) -> Self {
        Self { ok: true, saved: Some(false), error: Some(error.into()), ..Self::default() }
    }

    pub fn from_error(error: &ReconcileError) -> Self {
        match error {
            ReconcileError::Skip(reason) => Self::skipped(*reason),
            ReconcileError::Lookup(_) => Self {
                error: Some(error.to_string()),
                ..Self::skipped(SkipReason::LookupFailed)
            },
            ReconcileError::Persistence(_) => Self::not_saved(error.to_string()),
        }
    }

    /// Adds one camelCase detail field. `None`-like values are still written as `null`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.details.insert(key.to_string(), value);
        self
    }

    pub fn with_debug(mut self, debug: Value) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Short label for logs: the skip code, `saved` or `not_saved`.
    pub fn outcome_label(&self) -> &'static str {
        match (self.skip, self.saved) {
            (Some(reason), _) => reason.as_str(),
            (None, Some(false)) => "not_saved",
            _ => "saved",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ReconcileError, SkipReason, WebhookResponse};
    use leadsync_db::RepositoryError;

    #[test]
    fn skip_response_serializes_code_and_details() {
        let response =
            WebhookResponse::skipped(SkipReason::ProspectNotFound).with("opportunityId", "opp-1");

        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({ "ok": true, "skip": "PROSPECT_NOT_FOUND", "opportunityId": "opp-1" })
        );
    }

    #[test]
    fn persistence_error_becomes_unsaved_acknowledgement() {
        let error = ReconcileError::Persistence(RepositoryError::Decode("bad row".to_string()));
        let response = WebhookResponse::from_error(&error);

        assert!(response.ok);
        assert_eq!(response.saved, Some(false));
        assert_eq!(response.outcome_label(), "not_saved");
        assert!(response.error.as_deref().is_some_and(|text| text.contains("bad row")));
    }

    #[test]
    fn lookup_error_is_reported_as_skip() {
        let error = ReconcileError::Lookup(RepositoryError::Decode("timeout".to_string()));
        let response = WebhookResponse::from_error(&error);

        assert_eq!(response.skip, Some(SkipReason::LookupFailed));
        assert!(response.error.is_some());
    }
}
