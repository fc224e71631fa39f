use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::owner::OwnerId;
use crate::domain::stage::StageCode;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Internal prospect record. Root entity for history, lost-opportunity and
/// appointment records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub external_opportunity_id: Option<String>,
    pub phone_normalized: Option<String>,
    pub email_normalized: Option<String>,
    pub current_stage: StageCode,
    pub owner_id: Option<OwnerId>,
    pub capture_channel: Option<String>,
    pub stage_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// A freshly captured lead sitting in `initial_stage` with no owner yet.
    pub fn new(id: LeadId, initial_stage: StageCode, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            external_opportunity_id: None,
            phone_normalized: None,
            email_normalized: None,
            current_stage: initial_stage,
            owner_id: None,
            capture_channel: None,
            stage_changed_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_phone(mut self, raw: &str) -> Self {
        self.phone_normalized = normalize_phone(raw);
        self
    }

    pub fn with_email(mut self, raw: &str) -> Self {
        self.email_normalized = normalize_email(raw);
        self
    }

    pub fn with_opportunity(mut self, external_id: impl Into<String>) -> Self {
        self.external_opportunity_id = Some(external_id.into());
        self
    }

    pub fn with_owner(mut self, owner_id: OwnerId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }
}

/// Number of trailing digits kept when comparing phone numbers. Country
/// prefixes and formatting differ between the capture form and the CRM.
pub const PHONE_MATCH_DIGITS: usize = 9;

/// Digits only, last nine. `None` when nothing numeric remains.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let start = digits.len().saturating_sub(PHONE_MATCH_DIGITS);
    Some(digits[start..].to_string())
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let compact: String =
        raw.trim().to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        None
    } else {
        Some(compact)
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_email, normalize_phone};

    #[test]
    fn phone_keeps_last_nine_digits() {
        assert_eq!(normalize_phone("+51 987-654-321"), Some("987654321".to_string()));
        assert_eq!(normalize_phone("0051987654321"), Some("987654321".to_string()));
        assert_eq!(normalize_phone("12345"), Some("12345".to_string()));
    }

    #[test]
    fn phone_without_digits_is_absent() {
        assert_eq!(normalize_phone("n/a"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn email_is_trimmed_lowercased_and_compacted() {
        assert_eq!(normalize_email("  Maria.Lopez @Example.COM "), Some("maria.lopez@example.com".to_string()));
        assert_eq!(normalize_email("   "), None);
    }
}
