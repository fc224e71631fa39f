//! The reconciliation engine: one entry point per inbound CRM event kind.
//!
//! Every call is stateless. The engine reads and writes through the shared repositories,
//! asks the CRM for data the payload left out, and always produces a [`WebhookResponse`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadsync_core::config::AppConfig;
use leadsync_core::domain::stage::StageCode;
use leadsync_core::envelope::{parse_body, AppointmentEnvelope, EventEnvelope};
use leadsync_core::stage_machine::DedupWindows;
use leadsync_db::Repositories;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::crm_client::CrmApi;
use crate::enrichment::{fetch_contact_identity, AssignmentLookup, AssignmentRetry, ContactEnrichment};
use crate::identity::{resolve_lead, MatchedBy, Resolution};
use crate::outcome::{lookup_failed, ReconcileError, SkipReason, WebhookResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    StageChange,
    OwnerChange,
    OpportunityLost,
    AppointmentCreated,
}

impl EventKind {
    pub const ALL: [EventKind; 4] =
        [Self::StageChange, Self::OwnerChange, Self::OpportunityLost, Self::AppointmentCreated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StageChange => "stage-change",
            Self::OwnerChange => "owner-change",
            Self::OpportunityLost => "opportunity-lost",
            Self::AppointmentCreated => "appointment-created",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|kind| kind.as_str() == normalized)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level facts about one delivery.
#[derive(Clone, Debug, Default)]
pub struct EventContext {
    pub correlation_id: String,
    /// `Location-Id` request header, used when the body names no location.
    pub location_header: Option<String>,
    /// Attach a `debug` object to the response.
    pub debug: bool,
    /// Offline replay: history rows are tagged as replayed.
    pub replay: bool,
}

#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    pub windows: DedupWindows,
    pub initial_stage: StageCode,
    pub location_id: Option<String>,
    pub assignment_retry: AssignmentRetry,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            windows: DedupWindows::default(),
            initial_stage: StageCode("PROSPECCION".to_string()),
            location_id: None,
            assignment_retry: AssignmentRetry::default(),
        }
    }
}

impl From<&AppConfig> for ReconcileSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            windows: DedupWindows {
                transition_secs: config.reconcile.transition_dedup_window_secs,
                reannounce_secs: config.reconcile.reannounce_dedup_window_secs,
            },
            initial_stage: StageCode(config.reconcile.initial_stage.clone()),
            location_id: config.crm.location_id.clone(),
            assignment_retry: AssignmentRetry::from(&config.crm),
        }
    }
}

/// CRM round-trips made while handling one event, reported under `debug`.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PathTrace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_by: Option<MatchedBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentLookup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactEnrichment>,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    pub(crate) repos: Repositories,
    pub(crate) crm: Arc<dyn CrmApi>,
    pub(crate) settings: ReconcileSettings,
}

impl ReconciliationEngine {
    pub fn new(repos: Repositories, crm: Arc<dyn CrmApi>, settings: ReconcileSettings) -> Self {
        Self { repos, crm, settings }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub async fn handle(&self, kind: EventKind, body: &[u8], context: &EventContext) -> WebhookResponse {
        self.handle_at(kind, body, context, Utc::now()).await
    }

    /// Same as [`Self::handle`] with an explicit clock.
    pub async fn handle_at(
        &self,
        kind: EventKind,
        body: &[u8],
        context: &EventContext,
        now: DateTime<Utc>,
    ) -> WebhookResponse {
        let payload = match parse_body(body) {
            Ok(payload) => payload,
            Err(parse_error) => {
                warn!(
                    event_name = "reconcile.event.invalid_json",
                    kind = kind.as_str(),
                    correlation_id = %context.correlation_id,
                    error = %parse_error,
                    "rejected unparseable webhook body"
                );
                let response = WebhookResponse::skipped(SkipReason::InvalidJson);
                return if context.debug {
                    response.with_debug(json!({ "kind": kind, "error": parse_error.to_string() }))
                } else {
                    response
                };
            }
        };

        let envelope = EventEnvelope::from_payload(&payload)
            .with_location_fallback(context.location_header.as_deref());
        let location_ok = envelope.location_matches(self.settings.location_id.as_deref());
        if !location_ok && kind != EventKind::AppointmentCreated {
            warn!(
                event_name = "reconcile.event.location_mismatch",
                kind = kind.as_str(),
                correlation_id = %context.correlation_id,
                location_id = ?envelope.location_external_id,
                "event location differs from the configured location"
            );
        }

        let mut trace = PathTrace::default();
        let result = match kind {
            EventKind::StageChange => self.stage_change(&envelope, context, &mut trace, now).await,
            EventKind::OwnerChange => self.owner_change(&envelope, context, &mut trace, now).await,
            EventKind::OpportunityLost => {
                self.opportunity_lost(&payload, &envelope, &mut trace, now).await
            }
            EventKind::AppointmentCreated => {
                self.appointment_created(&payload, &mut trace, now).await
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(reconcile_error) => {
                if !matches!(reconcile_error, ReconcileError::Skip(_)) {
                    error!(
                        event_name = "reconcile.event.failed",
                        kind = kind.as_str(),
                        correlation_id = %context.correlation_id,
                        error = %reconcile_error,
                        "event handling failed"
                    );
                }
                WebhookResponse::from_error(&reconcile_error)
            }
        };

        info!(
            event_name = "reconcile.event.handled",
            kind = kind.as_str(),
            correlation_id = %context.correlation_id,
            outcome = response.outcome_label(),
            "webhook event handled"
        );

        if context.debug {
            let parsed = match kind {
                EventKind::AppointmentCreated => json!(AppointmentEnvelope::from_payload(&payload)),
                _ => json!(envelope),
            };
            response.with_debug(self.debug_report(kind, context, parsed, location_ok, &trace))
        } else {
            response
        }
    }

    fn debug_report(
        &self,
        kind: EventKind,
        context: &EventContext,
        envelope: Value,
        location_ok: bool,
        trace: &PathTrace,
    ) -> Value {
        json!({
            "kind": kind,
            "correlationId": context.correlation_id,
            "envelope": envelope,
            "locationOk": location_ok,
            "env": {
                "hasToken": self.crm.is_enabled(),
                "hasLocation": self.settings.location_id.is_some(),
            },
            "crm": trace,
        })
    }

    /// Identity resolution with one CRM round-trip for contact data when the payload
    /// carried no phone or email and the opportunity id did not match.
    pub(crate) async fn locate_lead(
        &self,
        envelope: &EventEnvelope,
        trace: &mut PathTrace,
        now: DateTime<Utc>,
    ) -> Result<Option<Resolution>, ReconcileError> {
        let leads = &*self.repos.leads;
        let mut resolution = resolve_lead(leads, envelope, now).await.map_err(lookup_failed)?;

        let has_contact = envelope.contact_phone.is_some() || envelope.contact_email.is_some();
        if resolution.is_none() && !has_contact && self.crm.is_enabled() {
            let contact = fetch_contact_identity(
                &*self.crm,
                envelope.opportunity_external_id.as_deref(),
                envelope.contact_external_id.as_deref(),
            )
            .await;
            if contact.phone.is_some() || contact.email.is_some() {
                let enriched = EventEnvelope {
                    contact_phone: contact.phone.clone(),
                    contact_email: contact.email.clone(),
                    ..envelope.clone()
                };
                resolution = resolve_lead(leads, &enriched, now).await.map_err(lookup_failed)?;
            }
            trace.contact = Some(contact);
        }

        trace.matched_by = resolution.as_ref().map(|found| found.matched_by);
        Ok(resolution)
    }
}
