use chrono::{DateTime, Utc};
use leadsync_core::domain::lead::{normalize_email, normalize_phone, Lead};
use leadsync_core::envelope::EventEnvelope;
use leadsync_db::repositories::LeadRepository;
use leadsync_db::RepositoryError;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    OpportunityId,
    Phone,
    Email,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub lead: Lead,
    pub matched_by: MatchedBy,
    /// The envelope's opportunity id was attached to a lead found by contact data.
    pub anchored: bool,
}

/// Finds the lead an event is about: opportunity id, then phone, then email.
///
/// A lead found by contact data that has no opportunity id yet gets the envelope's id
/// attached, so later events for the same opportunity resolve on the first strategy.
pub async fn resolve_lead(
    leads: &dyn LeadRepository,
    envelope: &EventEnvelope,
    now: DateTime<Utc>,
) -> Result<Option<Resolution>, RepositoryError> {
    let opportunity_id = envelope.opportunity_external_id.as_deref();

    if let Some(opportunity_id) = opportunity_id {
        if let Some(lead) = leads.find_by_external_opportunity_id(opportunity_id).await? {
            return Ok(Some(Resolution { lead, matched_by: MatchedBy::OpportunityId, anchored: false }));
        }
    }

    let mut found = None;
    if let Some(phone) = envelope.contact_phone.as_deref().and_then(normalize_phone) {
        found = leads.find_latest_by_phone(&phone).await?.map(|lead| (lead, MatchedBy::Phone));
    }
    if found.is_none() {
        if let Some(email) = envelope.contact_email.as_deref().and_then(normalize_email) {
            found = leads.find_latest_by_email(&email).await?.map(|lead| (lead, MatchedBy::Email));
        }
    }
    let Some((mut lead, matched_by)) = found else {
        return Ok(None);
    };

    let mut anchored = false;
    if let (Some(opportunity_id), None) = (opportunity_id, lead.external_opportunity_id.as_ref()) {
        match leads.attach_opportunity(&lead.id, opportunity_id, now).await {
            Ok(true) => {
                info!(
                    event_name = "reconcile.identity.anchored",
                    lead_id = %lead.id,
                    opportunity_id = %opportunity_id,
                    matched_by = ?matched_by,
                    "attached opportunity id to lead"
                );
                lead.external_opportunity_id = Some(opportunity_id.to_string());
                lead.updated_at = now;
                anchored = true;
            }
            Ok(false) => {}
            Err(error) => warn!(
                event_name = "reconcile.identity.anchor_failed",
                lead_id = %lead.id,
                error = %error,
                "could not attach opportunity id"
            ),
        }
    }

    Ok(Some(Resolution { lead, matched_by, anchored }))
}
