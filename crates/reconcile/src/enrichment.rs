use std::time::Duration;

use leadsync_core::config::CrmConfig;
use serde::Serialize;
use tracing::{debug, info};

use crate::crm_client::{ContactDetail, CrmApi, CrmLookup};

/// Retry policy for reading an opportunity's assignee. The CRM writes assignments
/// asynchronously, so a freshly created opportunity may not carry one yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssignmentRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for AssignmentRetry {
    fn default() -> Self {
        Self { attempts: 4, delay: Duration::from_millis(800) }
    }
}

impl From<&CrmConfig> for AssignmentRetry {
    fn from(config: &CrmConfig) -> Self {
        Self {
            attempts: config.assignment_retry_attempts,
            delay: Duration::from_millis(config.assignment_retry_delay_ms),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentLookup {
    pub assigned_user_external_id: Option<String>,
    pub tried: bool,
    pub opportunity_found: bool,
    pub attempts: u32,
    pub last_status: Option<u16>,
}

/// Polls the opportunity until it names an assignee or the attempts run out.
pub async fn fetch_assigned_user(
    crm: &dyn CrmApi,
    opportunity_external_id: &str,
    retry: AssignmentRetry,
) -> AssignmentLookup {
    let mut lookup = AssignmentLookup::default();
    if !crm.is_enabled() {
        return lookup;
    }
    lookup.tried = true;

    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        lookup.attempts = attempt;
        match crm.fetch_opportunity(opportunity_external_id).await {
            CrmLookup::Found(detail) => {
                lookup.opportunity_found = true;
                lookup.last_status = Some(200);
                if let Some(user) = detail.assigned_user_external_id {
                    info!(
                        event_name = "crm.assignment.resolved",
                        opportunity_id = %opportunity_external_id,
                        attempt,
                        "assigned user read from crm"
                    );
                    lookup.assigned_user_external_id = Some(user);
                    return lookup;
                }
            }
            CrmLookup::NotFound => lookup.last_status = Some(404),
            CrmLookup::Unavailable { status, .. } => lookup.last_status = status,
        }

        if attempt < attempts {
            debug!(
                event_name = "crm.assignment.retry",
                opportunity_id = %opportunity_external_id,
                attempt,
                delay_ms = retry.delay.as_millis() as u64,
                "assignment not visible yet"
            );
            tokio::time::sleep(retry.delay).await;
        }
    }

    lookup
}

/// Contact identifiers pulled from the CRM when the payload carried neither phone nor email.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEnrichment {
    pub tried: bool,
    pub contact_external_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Looks up the contact behind an opportunity. `contact_external_id` short-cuts the
/// opportunity read when the payload already named the contact.
pub async fn fetch_contact_identity(
    crm: &dyn CrmApi,
    opportunity_external_id: Option<&str>,
    contact_external_id: Option<&str>,
) -> ContactEnrichment {
    let mut enrichment = ContactEnrichment::default();
    if !crm.is_enabled() {
        return enrichment;
    }

    let contact_id = match contact_external_id {
        Some(id) => Some(id.to_string()),
        None => match opportunity_external_id {
            Some(opportunity) => {
                enrichment.tried = true;
                crm.fetch_opportunity(opportunity)
                    .await
                    .found()
                    .and_then(|detail| detail.contact_external_id)
            }
            None => None,
        },
    };
    let Some(contact_id) = contact_id else {
        return enrichment;
    };

    enrichment.tried = true;
    enrichment.contact_external_id = Some(contact_id.clone());
    if let Some(ContactDetail { phone, email, .. }) = crm.fetch_contact(&contact_id).await.found() {
        enrichment.phone = phone;
        enrichment.email = email;
    }
    enrichment
}
