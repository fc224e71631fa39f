//! Transition decisions for a lead's pipeline stage.
//!
//! Everything here is pure: callers load the lead and its latest history record,
//! ask for a [`TransitionDecision`], and perform the writes it describes.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::history::{transition_dedup_key, StageHistoryId, StageHistoryRecord};
use crate::domain::lead::Lead;
use crate::domain::owner::OwnerId;
use crate::domain::stage::StageCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DedupWindows {
    pub transition_secs: u64,
    pub reannounce_secs: u64,
}

impl Default for DedupWindows {
    fn default() -> Self {
        Self { transition_secs: 60, reannounce_secs: 180 }
    }
}

impl DedupWindows {
    fn transition(&self) -> Duration {
        Duration::seconds(i64::try_from(self.transition_secs).unwrap_or(i64::MAX / 1_000))
    }

    fn reannounce(&self) -> Duration {
        Duration::seconds(i64::try_from(self.reannounce_secs).unwrap_or(i64::MAX / 1_000))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionTier {
    /// Same `(from, to)` pair as the latest record, inside the transition window.
    IdenticalTransition,
    /// The lead's current stage announced again, inside the re-announcement window.
    Reannouncement,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionDecision {
    SameStage,
    Suppress {
        tier: SuppressionTier,
        record_id: StageHistoryId,
        recorded_stage: StageCode,
        backfill_owner: bool,
        resync_lead: bool,
    },
    Record { from: Option<StageCode>, to: StageCode, dedup_key: String },
}

/// Decides what an observed stage means for `lead`, given the most recent history record.
///
/// `owner` is the owner that would be stamped on a new record; it is only used to tell
/// whether a suppressed record still needs its owner backfilled.
pub fn decide_transition(
    lead: &Lead,
    target: &StageCode,
    latest: Option<&StageHistoryRecord>,
    owner: Option<&OwnerId>,
    now: DateTime<Utc>,
    windows: DedupWindows,
) -> TransitionDecision {
    let suppress = |record: &StageHistoryRecord, tier| TransitionDecision::Suppress {
        tier,
        record_id: record.id.clone(),
        recorded_stage: record.to_stage.clone(),
        backfill_owner: record.owner_id.is_none() && owner.is_some(),
        resync_lead: record.to_stage != lead.current_stage,
    };

    if &lead.current_stage == target {
        return match latest {
            Some(record)
                if &record.to_stage == target
                    && within(record.changed_at, now, windows.reannounce()) =>
            {
                suppress(record, SuppressionTier::Reannouncement)
            }
            _ => TransitionDecision::SameStage,
        };
    }

    let from = lead.current_stage.clone();
    if let Some(record) = latest {
        if record.is_same_move(Some(&from), target)
            && within(record.changed_at, now, windows.transition())
        {
            return suppress(record, SuppressionTier::IdenticalTransition);
        }
    }

    let dedup_key = transition_dedup_key(&lead.id, latest.map(|record| &record.id), target);
    TransitionDecision::Record { from: Some(from), to: target.clone(), dedup_key }
}

fn within(recorded_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    (now - recorded_at).abs() <= window
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{decide_transition, DedupWindows, SuppressionTier, TransitionDecision};
    use crate::domain::history::{HistorySource, StageHistoryId, StageHistoryRecord};
    use crate::domain::lead::{Lead, LeadId};
    use crate::domain::owner::OwnerId;
    use crate::domain::stage::StageCode;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default()
    }

    fn stage(code: &str) -> StageCode {
        StageCode(code.to_string())
    }

    fn lead_at(code: &str) -> Lead {
        Lead::new(LeadId("lead-1".to_string()), stage(code), now() - Duration::days(3))
    }

    fn record(from: Option<&str>, to: &str, age_secs: i64, owner: Option<&str>) -> StageHistoryRecord {
        StageHistoryRecord {
            id: StageHistoryId("hist-1".to_string()),
            lead_id: LeadId("lead-1".to_string()),
            external_opportunity_id: Some("opp-1".to_string()),
            from_stage: from.map(stage),
            to_stage: stage(to),
            changed_at: now() - Duration::seconds(age_secs),
            owner_id: owner.map(|id| OwnerId(id.to_string())),
            source: HistorySource::WebhookStageChange,
            dedup_key: format!("lead-1:{}:{to}:0", from.unwrap_or("-")),
        }
    }

    #[test]
    fn same_stage_without_recent_history_is_a_no_op() {
        let lead = lead_at("PROSPECCION");
        let latest = record(None, "PROSPECCION", 3_600, None);

        let decision = decide_transition(
            &lead,
            &stage("PROSPECCION"),
            Some(&latest),
            None,
            now(),
            DedupWindows::default(),
        );

        assert_eq!(decision, TransitionDecision::SameStage);
    }

    #[test]
    fn identical_transition_inside_window_is_suppressed_and_resyncs_lead() {
        let lead = lead_at("A");
        let latest = record(Some("A"), "B", 45, None);
        let owner = OwnerId("owner-1".to_string());

        let decision = decide_transition(
            &lead,
            &stage("B"),
            Some(&latest),
            Some(&owner),
            now(),
            DedupWindows::default(),
        );

        assert_eq!(
            decision,
            TransitionDecision::Suppress {
                tier: SuppressionTier::IdenticalTransition,
                record_id: StageHistoryId("hist-1".to_string()),
                recorded_stage: stage("B"),
                backfill_owner: true,
                resync_lead: true,
            }
        );
    }

    #[test]
    fn identical_transition_after_window_is_recorded_again() {
        let lead = lead_at("A");
        let latest = record(Some("A"), "B", 61, Some("owner-1"));

        let decision =
            decide_transition(&lead, &stage("B"), Some(&latest), None, now(), DedupWindows::default());

        match decision {
            TransitionDecision::Record { from, to, dedup_key } => {
                assert_eq!(from, Some(stage("A")));
                assert_eq!(to, stage("B"));
                assert_eq!(dedup_key, "lead-1:hist-1:B");
            }
            other => panic!("expected a new record, got {other:?}"),
        }
    }

    #[test]
    fn reannouncement_uses_the_longer_window() {
        let lead = lead_at("B");
        let latest = record(Some("A"), "B", 150, None);
        let owner = OwnerId("owner-1".to_string());

        let decision = decide_transition(
            &lead,
            &stage("B"),
            Some(&latest),
            Some(&owner),
            now(),
            DedupWindows::default(),
        );
        assert!(matches!(
            decision,
            TransitionDecision::Suppress {
                tier: SuppressionTier::Reannouncement,
                backfill_owner: true,
                resync_lead: false,
                ..
            }
        ));

        let stale = record(Some("A"), "B", 181, None);
        let decision =
            decide_transition(&lead, &stage("B"), Some(&stale), None, now(), DedupWindows::default());
        assert_eq!(decision, TransitionDecision::SameStage);
    }

    #[test]
    fn first_transition_starts_from_the_current_stage() {
        let lead = lead_at("PROSPECCION");

        let decision =
            decide_transition(&lead, &stage("PRIMERA_CITA"), None, None, now(), DedupWindows::default());

        assert_eq!(
            decision,
            TransitionDecision::Record {
                from: Some(stage("PROSPECCION")),
                to: stage("PRIMERA_CITA"),
                dedup_key: "lead-1:-:PRIMERA_CITA".to_string(),
            }
        );
    }

    #[test]
    fn move_back_to_an_earlier_target_follows_the_newer_record() {
        let lead = lead_at("PRIMERA_CITA");
        let mut latest = record(Some("VISITA"), "PRIMERA_CITA", 10, None);
        latest.id = StageHistoryId("hist-3".to_string());

        let decision =
            decide_transition(&lead, &stage("VISITA"), Some(&latest), None, now(), DedupWindows::default());

        assert!(matches!(
            decision,
            TransitionDecision::Record { ref dedup_key, .. } if dedup_key == "lead-1:hist-3:VISITA"
        ));
    }

    #[test]
    fn different_move_is_not_suppressed_by_a_recent_record() {
        let lead = lead_at("B");
        let latest = record(Some("A"), "B", 10, None);

        let decision =
            decide_transition(&lead, &stage("C"), Some(&latest), None, now(), DedupWindows::default());

        assert!(matches!(decision, TransitionDecision::Record { from: Some(ref from), .. } if from == &stage("B")));
    }
}
