use chrono::{DateTime, Utc};
use leadsync_core::domain::lead::{Lead, LeadId};
use leadsync_core::domain::lost::{LostOpportunityId, LostOpportunityRecord, LostSource};
use leadsync_core::domain::owner::OwnerId;
use leadsync_core::envelope::EventEnvelope;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::engine::{PathTrace, ReconciliationEngine};
use crate::outcome::{lookup_failed, write_failed, ReconcileError, SkipReason, WebhookResponse};

impl ReconciliationEngine {
    pub(crate) async fn opportunity_lost(
        &self,
        payload: &Value,
        envelope: &EventEnvelope,
        trace: &mut PathTrace,
        now: DateTime<Utc>,
    ) -> Result<WebhookResponse, ReconcileError> {
        let Some(source) = envelope.lost_source.as_deref().and_then(LostSource::parse) else {
            return Ok(WebhookResponse::skipped(SkipReason::InvalidSource)
                .with("source", &envelope.lost_source));
        };
        let reason = source
            .select_reason(
                envelope.reason_not_interested.as_deref(),
                envelope.reason_not_reachable.as_deref(),
            )
            .map_err(|_| ReconcileError::Skip(SkipReason::MissingReason))?;

        let lead = self.lost_lead(envelope, trace, now).await?;
        let owner_id = self.lost_owner(envelope, lead.as_ref()).await?;
        let (Some(lead), Some(owner_id)) = (lead, owner_id) else {
            return Ok(WebhookResponse::skipped(SkipReason::MissingForeignKeys)
                .with("leadHint", &envelope.lead_hint)
                .with("ownerHint", &envelope.owner_hint)
                .with("opportunityId", &envelope.opportunity_external_id));
        };

        let record = LostOpportunityRecord {
            id: LostOpportunityId(Uuid::new_v4().to_string()),
            lead_id: lead.id.clone(),
            owner_id: owner_id.clone(),
            external_opportunity_id: envelope
                .opportunity_external_id
                .clone()
                .or_else(|| lead.external_opportunity_id.clone()),
            external_pipeline_id: envelope.pipeline_external_id.clone(),
            external_stage_id: envelope.stage_external_id.clone(),
            capture_channel: lead.capture_channel.clone(),
            source,
            reason,
            recorded_at: now,
            raw_payload: payload.clone(),
        };
        let record_id = record.id.0.clone();
        self.repos.lost.insert(record).await.map_err(write_failed)?;

        info!(
            event_name = "reconcile.opportunity_lost.recorded",
            lead_id = %lead.id,
            owner_id = %owner_id,
            source = source.as_str(),
            "lost opportunity recorded"
        );

        Ok(WebhookResponse::saved()
            .with("lostId", record_id)
            .with("leadId", &lead.id)
            .with("ownerId", &owner_id)
            .with("source", source))
    }

    /// An explicit internal lead id wins, but it must exist.
    async fn lost_lead(
        &self,
        envelope: &EventEnvelope,
        trace: &mut PathTrace,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, ReconcileError> {
        match envelope.lead_hint.as_deref() {
            Some(hint) => self
                .repos
                .leads
                .find_by_id(&LeadId(hint.to_string()))
                .await
                .map_err(lookup_failed),
            None => Ok(self.locate_lead(envelope, trace, now).await?.map(|found| found.lead)),
        }
    }

    /// Explicit internal owner id, else the lead's owner, else the directory entry of
    /// the assigned CRM user.
    async fn lost_owner(
        &self,
        envelope: &EventEnvelope,
        lead: Option<&Lead>,
    ) -> Result<Option<OwnerId>, ReconcileError> {
        let owners = &self.repos.owners;
        if let Some(hint) = envelope.owner_hint.as_deref() {
            let owner = owners.find_by_id(&OwnerId(hint.to_string())).await.map_err(lookup_failed)?;
            return Ok(owner.map(|owner| owner.id));
        }
        if let Some(owner_id) = lead.and_then(|lead| lead.owner_id.clone()) {
            return Ok(Some(owner_id));
        }
        match envelope.assigned_user_external_id.as_deref() {
            Some(user) => Ok(owners
                .find_by_external_user_id(user)
                .await
                .map_err(lookup_failed)?
                .map(|owner| owner.id)),
            None => Ok(None),
        }
    }
}
