use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use leadsync_core::domain::appointment::AppointmentRecord;
use leadsync_core::domain::history::{StageHistoryId, StageHistoryRecord};
use leadsync_core::domain::lead::{Lead, LeadId};
use leadsync_core::domain::lost::LostOpportunityRecord;
use leadsync_core::domain::owner::{Owner, OwnerId};
use leadsync_core::domain::stage::{StageCode, StageMapping};

use super::{
    AppointmentRepository, HistoryInsert, LeadRepository, LostOpportunityRepository,
    OwnerRepository, RepositoryError, StageHistoryRepository, StageMapRepository,
};

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<String, Lead>>,
}

impl InMemoryLeadRepository {
    async fn latest_matching(&self, matches: impl Fn(&Lead) -> bool) -> Option<Lead> {
        let leads = self.leads.read().await;
        leads
            .values()
            .filter(|lead| matches(lead))
            .max_by(|left, right| {
                left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
            })
            .cloned()
    }
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(&id.0).cloned())
    }

    async fn find_by_external_opportunity_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        Ok(self
            .latest_matching(|lead| lead.external_opportunity_id.as_deref() == Some(external_id))
            .await)
    }

    async fn find_latest_by_phone(&self, phone: &str) -> Result<Option<Lead>, RepositoryError> {
        Ok(self.latest_matching(|lead| lead.phone_normalized.as_deref() == Some(phone)).await)
    }

    async fn find_latest_by_email(&self, email: &str) -> Result<Option<Lead>, RepositoryError> {
        Ok(self.latest_matching(|lead| lead.email_normalized.as_deref() == Some(email)).await)
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        leads.insert(lead.id.0.clone(), lead);
        Ok(())
    }

    async fn attach_opportunity(
        &self,
        id: &LeadId,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&id.0) {
            Some(lead) if lead.external_opportunity_id.is_none() => {
                lead.external_opportunity_id = Some(external_id.to_string());
                lead.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_stage(
        &self,
        id: &LeadId,
        stage: &StageCode,
        changed_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        if let Some(lead) = leads.get_mut(&id.0) {
            lead.current_stage = stage.clone();
            lead.stage_changed_at = Some(changed_at);
            lead.updated_at = changed_at;
        }
        Ok(())
    }

    async fn update_owner(
        &self,
        id: &LeadId,
        owner_id: &OwnerId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        if let Some(lead) = leads.get_mut(&id.0) {
            lead.owner_id = Some(owner_id.clone());
            lead.updated_at = at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOwnerRepository {
    owners: RwLock<HashMap<String, Owner>>,
}

#[async_trait::async_trait]
impl OwnerRepository for InMemoryOwnerRepository {
    async fn find_by_id(&self, id: &OwnerId) -> Result<Option<Owner>, RepositoryError> {
        let owners = self.owners.read().await;
        Ok(owners.get(&id.0).cloned())
    }

    async fn find_by_external_user_id(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Owner>, RepositoryError> {
        let owners = self.owners.read().await;
        Ok(owners.values().find(|owner| owner.external_user_id == external_user_id).cloned())
    }

    async fn save(&self, owner: Owner) -> Result<(), RepositoryError> {
        let mut owners = self.owners.write().await;
        owners.insert(owner.id.0.clone(), owner);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStageMapRepository {
    stages: RwLock<HashMap<String, StageMapping>>,
}

#[async_trait::async_trait]
impl StageMapRepository for InMemoryStageMapRepository {
    async fn list(&self) -> Result<Vec<StageMapping>, RepositoryError> {
        let stages = self.stages.read().await;
        let mut listed: Vec<StageMapping> = stages.values().cloned().collect();
        listed.sort_by(|left, right| {
            left.position.cmp(&right.position).then_with(|| left.code.0.cmp(&right.code.0))
        });
        Ok(listed)
    }

    async fn save(&self, mapping: StageMapping) -> Result<(), RepositoryError> {
        let mut stages = self.stages.write().await;
        stages.insert(mapping.code.0.clone(), mapping);
        Ok(())
    }
}

/// Insertion-ordered history log; the dedup key is enforced like the SQL unique index.
#[derive(Default)]
pub struct InMemoryStageHistoryRepository {
    records: RwLock<Vec<StageHistoryRecord>>,
}

#[async_trait::async_trait]
impl StageHistoryRepository for InMemoryStageHistoryRepository {
    async fn latest_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<StageHistoryRecord>, RepositoryError> {
        let records = self.records.read().await;
        // Later insertions win ties on `changed_at`, matching `rowid DESC`.
        Ok(records
            .iter()
            .enumerate()
            .filter(|(_, record)| &record.lead_id == lead_id)
            .max_by(|(left_index, left), (right_index, right)| {
                left.changed_at.cmp(&right.changed_at).then_with(|| left_index.cmp(right_index))
            })
            .map(|(_, record)| record.clone()))
    }

    async fn insert(&self, record: StageHistoryRecord) -> Result<HistoryInsert, RepositoryError> {
        let mut records = self.records.write().await;
        if records.iter().any(|existing| existing.dedup_key == record.dedup_key) {
            return Ok(HistoryInsert::Duplicate);
        }
        records.push(record);
        Ok(HistoryInsert::Inserted)
    }

    async fn set_owner_if_missing(
        &self,
        id: &StageHistoryId,
        owner_id: &OwnerId,
    ) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|record| &record.id == id) {
            Some(record) if record.owner_id.is_none() => {
                record.owner_id = Some(owner_id.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn backfill_owner(
        &self,
        lead_id: &LeadId,
        owner_id: &OwnerId,
    ) -> Result<u64, RepositoryError> {
        let mut records = self.records.write().await;
        let mut updated = 0;
        for record in records
            .iter_mut()
            .filter(|record| &record.lead_id == lead_id && record.owner_id.is_none())
        {
            record.owner_id = Some(owner_id.clone());
            updated += 1;
        }
        Ok(updated)
    }

    async fn list_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<StageHistoryRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut listed: Vec<StageHistoryRecord> =
            records.iter().filter(|record| &record.lead_id == lead_id).cloned().collect();
        listed.sort_by_key(|record| record.changed_at);
        Ok(listed)
    }
}

#[derive(Default)]
pub struct InMemoryLostOpportunityRepository {
    records: RwLock<Vec<LostOpportunityRecord>>,
}

#[async_trait::async_trait]
impl LostOpportunityRepository for InMemoryLostOpportunityRepository {
    async fn insert(&self, record: LostOpportunityRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }

    async fn list_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<LostOpportunityRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| &record.lead_id == lead_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    records: RwLock<Vec<AppointmentRecord>>,
}

#[async_trait::async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn insert(&self, record: AppointmentRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }

    async fn find_by_external_id(
        &self,
        external_appointment_id: &str,
    ) -> Result<Vec<AppointmentRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|record| record.external_appointment_id == external_appointment_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use leadsync_core::domain::history::{HistorySource, StageHistoryId, StageHistoryRecord};
    use leadsync_core::domain::lead::{Lead, LeadId};
    use leadsync_core::domain::owner::OwnerId;
    use leadsync_core::domain::stage::StageCode;

    use crate::repositories::{
        HistoryInsert, InMemoryLeadRepository, InMemoryStageHistoryRepository, LeadRepository,
        StageHistoryRepository,
    };

    #[tokio::test]
    async fn in_memory_lead_lookups_prefer_newest_lead() {
        let repo = InMemoryLeadRepository::default();
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).single().expect("valid time");
        let stage = StageCode("PROSPECCION".to_string());
        repo.save(Lead::new(LeadId("L-old".to_string()), stage.clone(), base).with_phone("987654321"))
            .await
            .expect("save old");
        repo.save(
            Lead::new(LeadId("L-new".to_string()), stage, base + Duration::hours(1))
                .with_phone("51 987 654 321"),
        )
        .await
        .expect("save new");

        let found = repo.find_latest_by_phone("987654321").await.expect("lookup");

        assert_eq!(found.map(|lead| lead.id.0), Some("L-new".to_string()));
    }

    #[tokio::test]
    async fn in_memory_history_enforces_dedup_key_and_backfill() {
        let repo = InMemoryStageHistoryRepository::default();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).single().expect("valid time");
        let record = |id: &str| StageHistoryRecord {
            id: StageHistoryId(id.to_string()),
            lead_id: LeadId("L-1".to_string()),
            external_opportunity_id: None,
            from_stage: None,
            to_stage: StageCode("A".to_string()),
            changed_at: at,
            owner_id: None,
            source: HistorySource::Replay,
            dedup_key: "L-1:-:A".to_string(),
        };

        assert_eq!(repo.insert(record("H-1")).await.expect("insert"), HistoryInsert::Inserted);
        assert_eq!(repo.insert(record("H-2")).await.expect("insert"), HistoryInsert::Duplicate);

        let owner = OwnerId("A-1".to_string());
        let updated = repo.backfill_owner(&LeadId("L-1".to_string()), &owner).await.expect("backfill");
        let latest = repo.latest_for_lead(&LeadId("L-1".to_string())).await.expect("latest");

        assert_eq!(updated, 1);
        assert_eq!(latest.and_then(|record| record.owner_id), Some(owner));
    }
}
