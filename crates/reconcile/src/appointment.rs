use chrono::{DateTime, Utc};
use leadsync_core::domain::appointment::{AppointmentId, AppointmentRecord};
use leadsync_core::domain::owner::OwnerId;
use leadsync_core::envelope::{AppointmentEnvelope, EventEnvelope};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::engine::{PathTrace, ReconciliationEngine};
use crate::outcome::{lookup_failed, write_failed, ReconcileError, SkipReason, WebhookResponse};

const DEFAULT_APPOINTMENT_STATUS: &str = "booked";

impl ReconciliationEngine {
    /// Stores a booked appointment. Lead and owner are attached when they resolve,
    /// but neither is required.
    pub(crate) async fn appointment_created(
        &self,
        payload: &Value,
        trace: &mut PathTrace,
        now: DateTime<Utc>,
    ) -> Result<WebhookResponse, ReconcileError> {
        let appointment = AppointmentEnvelope::from_payload(payload);
        let (Some(external_id), Some(starts_at), Some(calendar_key)) = (
            appointment.appointment_external_id.clone(),
            appointment.starts_at,
            appointment.calendar_key.clone(),
        ) else {
            return Ok(WebhookResponse::skipped(SkipReason::MissingMinFields)
                .with("missing", appointment.missing_required_fields()));
        };

        let identity = EventEnvelope {
            opportunity_external_id: appointment.opportunity_external_id.clone(),
            contact_external_id: appointment.contact.external_id.clone(),
            contact_phone: appointment.contact.phone.clone(),
            contact_email: appointment.contact.email.clone(),
            ..EventEnvelope::default()
        };
        let lead = self.locate_lead(&identity, trace, now).await?.map(|found| found.lead);

        let owner_id = match lead.as_ref().and_then(|lead| lead.owner_id.clone()) {
            Some(owner_id) => Some(owner_id),
            None => self.appointment_owner(appointment.assigned_user_external_id.as_deref()).await?,
        };

        let record = AppointmentRecord {
            id: AppointmentId(Uuid::new_v4().to_string()),
            external_appointment_id: external_id.clone(),
            external_opportunity_id: appointment
                .opportunity_external_id
                .clone()
                .or_else(|| lead.as_ref().and_then(|lead| lead.external_opportunity_id.clone())),
            external_calendar_id: appointment.calendar_external_id.clone(),
            calendar_key,
            calendar_name: appointment.calendar_name.clone(),
            starts_at,
            ends_at: appointment.ends_at,
            status: appointment
                .status
                .clone()
                .unwrap_or_else(|| DEFAULT_APPOINTMENT_STATUS.to_string()),
            location: appointment.location.clone(),
            meeting_url: appointment.meeting_url.clone(),
            lead_id: lead.as_ref().map(|lead| lead.id.clone()),
            owner_id: owner_id.clone(),
            contact: appointment.contact.clone(),
            raw_payload: payload.clone(),
            created_at: now,
        };
        let lead_id = record.lead_id.clone();
        self.repos.appointments.insert(record).await.map_err(write_failed)?;

        info!(
            event_name = "reconcile.appointment.recorded",
            appointment_id = %external_id,
            lead_id = ?lead_id.as_ref().map(|lead| lead.0.as_str()),
            owner_id = ?owner_id.as_ref().map(|owner| owner.0.as_str()),
            "appointment stored"
        );

        Ok(WebhookResponse::saved()
            .with("appointmentId", &external_id)
            .with("leadId", &lead_id)
            .with("ownerId", &owner_id))
    }

    async fn appointment_owner(
        &self,
        assigned_user: Option<&str>,
    ) -> Result<Option<OwnerId>, ReconcileError> {
        let Some(assigned_user) = assigned_user else {
            return Ok(None);
        };
        let owner = self
            .repos
            .owners
            .find_by_external_user_id(assigned_user)
            .await
            .map_err(lookup_failed)?;
        Ok(owner.map(|owner| owner.id))
    }
}
