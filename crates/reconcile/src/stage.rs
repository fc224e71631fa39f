use chrono::{DateTime, Utc};
use leadsync_core::domain::history::{HistorySource, StageHistoryId, StageHistoryRecord};
use leadsync_core::domain::lead::Lead;
use leadsync_core::domain::stage::resolve_stage;
use leadsync_core::envelope::EventEnvelope;
use leadsync_core::stage_machine::{decide_transition, TransitionDecision};
use leadsync_db::HistoryInsert;
use tracing::info;
use uuid::Uuid;

use crate::engine::{EventContext, PathTrace, ReconciliationEngine};
use crate::owner::{resolve_owner, OwnerResolution};
use crate::outcome::{lookup_failed, write_failed, ReconcileError, SkipReason, WebhookResponse};

impl ReconciliationEngine {
    pub(crate) async fn stage_change(
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
        if envelope.stage_name_raw.is_none() && envelope.stage_external_id.is_none() {
            return Err(ReconcileError::Skip(SkipReason::NoStageName));
        }

        let Some(resolution) = self.locate_lead(envelope, trace, now).await? else {
            return Ok(WebhookResponse::skipped(SkipReason::ProspectNotFound)
                .with("opportunityId", &opportunity_id));
        };
        let mut lead = resolution.lead;

        let stages = self.repos.stages.list().await.map_err(lookup_failed)?;
        let Some(stage) = resolve_stage(
            &stages,
            envelope.stage_external_id.as_deref(),
            envelope.stage_name_raw.as_deref(),
        ) else {
            return Ok(WebhookResponse::skipped(SkipReason::StageNotMapped)
                .with("opportunityId", &opportunity_id)
                .with("stageName", &envelope.stage_name_raw)
                .with("stageId", &envelope.stage_external_id));
        };

        let owner = resolve_owner(
            &*self.repos.owners,
            &*self.repos.leads,
            envelope.assigned_user_external_id.as_deref(),
            &mut lead,
            now,
        )
        .await?;

        let latest = self.repos.history.latest_for_lead(&lead.id).await.map_err(lookup_failed)?;
        let decision = decide_transition(
            &lead,
            &stage.code,
            latest.as_ref(),
            owner.target.as_ref(),
            now,
            self.settings.windows,
        );
        let source =
            if context.replay { HistorySource::Replay } else { HistorySource::WebhookStageChange };

        let response =
            self.apply_transition(&lead, decision, &owner, &opportunity_id, source, now).await?;
        Ok(response
            .with("opportunityId", &opportunity_id)
            .with("matchedBy", resolution.matched_by)
            .with("stageMatchedBy", stage.matched_by)
            .with("ownerChanged", owner.changed))
    }

    async fn apply_transition(
        &self,
        lead: &Lead,
        decision: TransitionDecision,
        owner: &OwnerResolution,
        opportunity_id: &str,
        source: HistorySource,
        now: DateTime<Utc>,
    ) -> Result<WebhookResponse, ReconcileError> {
        match decision {
            TransitionDecision::SameStage => Ok(WebhookResponse::skipped(SkipReason::SameStage)
                .with("leadId", &lead.id)
                .with("stage", &lead.current_stage)),
            TransitionDecision::Suppress {
                tier,
                record_id,
                recorded_stage,
                backfill_owner,
                resync_lead,
            } => {
                let mut owner_backfilled = false;
                if let (true, Some(owner_id)) = (backfill_owner, owner.target.as_ref()) {
                    owner_backfilled = self
                        .repos
                        .history
                        .set_owner_if_missing(&record_id, owner_id)
                        .await
                        .map_err(write_failed)?;
                }
                if resync_lead {
                    self.repos
                        .leads
                        .update_stage(&lead.id, &recorded_stage, now)
                        .await
                        .map_err(write_failed)?;
                }
                info!(
                    event_name = "reconcile.stage_change.suppressed",
                    lead_id = %lead.id,
                    opportunity_id,
                    tier = ?tier,
                    owner_backfilled,
                    "duplicate stage event suppressed"
                );
                Ok(WebhookResponse::skipped(SkipReason::DuplicateWindow)
                    .with("leadId", &lead.id)
                    .with("tier", tier)
                    .with("historyId", &record_id.0)
                    .with("ownerBackfilled", owner_backfilled))
            }
            TransitionDecision::Record { from, to, dedup_key } => {
                let record = StageHistoryRecord {
                    id: StageHistoryId(Uuid::new_v4().to_string()),
                    lead_id: lead.id.clone(),
                    external_opportunity_id: Some(opportunity_id.to_string()),
                    from_stage: from.clone(),
                    to_stage: to.clone(),
                    changed_at: now,
                    owner_id: owner.target.clone(),
                    source,
                    dedup_key,
                };
                let history_id = record.id.0.clone();

                let inserted = self.repos.history.insert(record).await.map_err(write_failed)?;
                if inserted == HistoryInsert::Duplicate {
                    info!(
                        event_name = "reconcile.stage_change.dedup_key_conflict",
                        lead_id = %lead.id,
                        opportunity_id,
                        "transition already recorded after the same history record"
                    );
                    return Ok(WebhookResponse::skipped(SkipReason::DuplicateWindow)
                        .with("leadId", &lead.id)
                        .with("tier", "dedup_key"));
                }

                self.repos.leads.update_stage(&lead.id, &to, now).await.map_err(write_failed)?;
                info!(
                    event_name = "reconcile.stage_change.applied",
                    lead_id = %lead.id,
                    opportunity_id,
                    from_stage = ?from.as_ref().map(|stage| stage.as_str()),
                    to_stage = %to,
                    "lead stage changed"
                );
                Ok(WebhookResponse::saved()
                    .with("leadId", &lead.id)
                    .with("fromStage", &from)
                    .with("toStage", &to)
                    .with("historyId", history_id)
                    .with("ownerId", &owner.target))
            }
        }
    }
}
