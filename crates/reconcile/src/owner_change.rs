use chrono::{DateTime, Utc};
use leadsync_core::domain::history::{
    transition_dedup_key, HistorySource, StageHistoryId, StageHistoryRecord,
};
use leadsync_core::envelope::EventEnvelope;
use leadsync_db::HistoryInsert;
use tracing::info;
use uuid::Uuid;

use crate::engine::{EventContext, PathTrace, ReconciliationEngine};
use crate::enrichment::fetch_assigned_user;
use crate::owner::resolve_owner;
use crate::outcome::{lookup_failed, write_failed, ReconcileError, SkipReason, WebhookResponse};

impl ReconciliationEngine {
    /// Reassigns a lead and stamps the owner on its ownerless history. A lead without any
    /// history gets exactly one initial record carrying the owner.
    pub(crate) async fn owner_change(
        &self,
        envelope: &EventEnvelope,
        context: &EventContext,
        trace: &mut PathTrace,
        now: DateTime<Utc>,
    ) -> Result<WebhookResponse, ReconcileError> {
        let opportunity_id = envelope
            .opportunity_external_id
            .clone()
            .ok_or(ReconcileError::Skip(SkipReason::NoOpportunityId))?;

        let assigned_user = match envelope.assigned_user_external_id.clone() {
            Some(user) => user,
            None => {
                let lookup = fetch_assigned_user(
                    &*self.crm,
                    &opportunity_id,
                    self.settings.assignment_retry,
                )
                .await;
                let user = lookup.assigned_user_external_id.clone();
                trace.assignment = Some(lookup);
                match user {
                    Some(user) => user,
                    None => {
                        return Ok(WebhookResponse::skipped(SkipReason::NoAssignedUser)
                            .with("opportunityId", &opportunity_id))
                    }
                }
            }
        };

        let Some(resolution) = self.locate_lead(envelope, trace, now).await? else {
            return Ok(WebhookResponse::skipped(SkipReason::ProspectNotFound)
                .with("opportunityId", &opportunity_id));
        };
        let mut lead = resolution.lead;

        let owner = resolve_owner(
            &*self.repos.owners,
            &*self.repos.leads,
            Some(&assigned_user),
            &mut lead,
            now,
        )
        .await?;
        let Some(owner_id) = owner.target.filter(|_| !owner.directory_miss) else {
            return Ok(WebhookResponse::skipped(SkipReason::AsesorNotFound)
                .with("assignedUserId", &assigned_user));
        };

        let history = &self.repos.history;
        let backfilled = history.backfill_owner(&lead.id, &owner_id).await.map_err(write_failed)?;

        let mut initial_record = None;
        if backfilled == 0 && history.latest_for_lead(&lead.id).await.map_err(lookup_failed)?.is_none() {
            let source =
                if context.replay { HistorySource::Replay } else { HistorySource::WebhookOwnerChange };
            let record = StageHistoryRecord {
                id: StageHistoryId(Uuid::new_v4().to_string()),
                lead_id: lead.id.clone(),
                external_opportunity_id: Some(opportunity_id.clone()),
                from_stage: None,
                to_stage: lead.current_stage.clone(),
                changed_at: now,
                owner_id: Some(owner_id.clone()),
                source,
                dedup_key: transition_dedup_key(&lead.id, None, &lead.current_stage),
            };
            let record_id = record.id.0.clone();
            if history.insert(record).await.map_err(write_failed)? == HistoryInsert::Inserted {
                initial_record = Some(record_id);
            }
        }

        info!(
            event_name = "reconcile.owner_change.applied",
            lead_id = %lead.id,
            opportunity_id = %opportunity_id,
            owner_id = %owner_id,
            owner_changed = owner.changed,
            history_backfilled = backfilled,
            initial_record = initial_record.is_some(),
            "lead ownership reconciled"
        );

        Ok(WebhookResponse::saved()
            .with("opportunityId", &opportunity_id)
            .with("leadId", &lead.id)
            .with("ownerId", &owner_id)
            .with("ownerChanged", owner.changed)
            .with("historyBackfilled", backfilled)
            .with("initialHistoryId", initial_record))
    }
}
