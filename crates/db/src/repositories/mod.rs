use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use leadsync_core::domain::appointment::AppointmentRecord;
use leadsync_core::domain::history::{StageHistoryId, StageHistoryRecord};
use leadsync_core::domain::lead::{Lead, LeadId};
use leadsync_core::domain::lost::LostOpportunityRecord;
use leadsync_core::domain::owner::{Owner, OwnerId};
use leadsync_core::domain::stage::{StageCode, StageMapping};

pub mod appointment;
pub mod history;
pub mod lead;
pub mod lost;
pub mod memory;
pub mod owner;
pub mod stage_map;

pub use appointment::SqlAppointmentRepository;
pub use history::SqlStageHistoryRepository;
pub use lead::SqlLeadRepository;
pub use lost::SqlLostOpportunityRepository;
pub use memory::{
    InMemoryAppointmentRepository, InMemoryLeadRepository, InMemoryLostOpportunityRepository,
    InMemoryOwnerRepository, InMemoryStageHistoryRepository, InMemoryStageMapRepository,
};
pub use owner::SqlOwnerRepository;
pub use stage_map::SqlStageMapRepository;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result of appending a stage history row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryInsert {
    Inserted,
    /// Another row already holds the same dedup key.
    Duplicate,
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    async fn find_by_external_opportunity_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Lead>, RepositoryError>;
    /// Most recently created lead with this normalized phone.
    async fn find_latest_by_phone(&self, phone: &str) -> Result<Option<Lead>, RepositoryError>;
    /// Most recently created lead with this normalized email.
    async fn find_latest_by_email(&self, email: &str) -> Result<Option<Lead>, RepositoryError>;
    async fn save(&self, lead: Lead) -> Result<(), RepositoryError>;
    /// Sets the external opportunity id only when the lead has none yet.
    async fn attach_opportunity(
        &self,
        id: &LeadId,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn update_stage(
        &self,
        id: &LeadId,
        stage: &StageCode,
        changed_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn update_owner(
        &self,
        id: &LeadId,
        owner_id: &OwnerId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OwnerRepository: Send + Sync {
    async fn find_by_id(&self, id: &OwnerId) -> Result<Option<Owner>, RepositoryError>;
    async fn find_by_external_user_id(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Owner>, RepositoryError>;
    async fn save(&self, owner: Owner) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait StageMapRepository: Send + Sync {
    /// All canonical stages ordered by position.
    async fn list(&self) -> Result<Vec<StageMapping>, RepositoryError>;
    async fn save(&self, mapping: StageMapping) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait StageHistoryRepository: Send + Sync {
    async fn latest_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<StageHistoryRecord>, RepositoryError>;
    async fn insert(&self, record: StageHistoryRecord) -> Result<HistoryInsert, RepositoryError>;
    /// Stamps `owner_id` on one record if it has none. Returns whether a row changed.
    async fn set_owner_if_missing(
        &self,
        id: &StageHistoryId,
        owner_id: &OwnerId,
    ) -> Result<bool, RepositoryError>;
    /// Stamps `owner_id` on every ownerless record of the lead. Returns the row count.
    async fn backfill_owner(
        &self,
        lead_id: &LeadId,
        owner_id: &OwnerId,
    ) -> Result<u64, RepositoryError>;
    /// Oldest first.
    async fn list_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<StageHistoryRecord>, RepositoryError>;
}

#[async_trait]
pub trait LostOpportunityRepository: Send + Sync {
    async fn insert(&self, record: LostOpportunityRecord) -> Result<(), RepositoryError>;
    async fn list_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<LostOpportunityRecord>, RepositoryError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn insert(&self, record: AppointmentRecord) -> Result<(), RepositoryError>;
    async fn find_by_external_id(
        &self,
        external_appointment_id: &str,
    ) -> Result<Vec<AppointmentRecord>, RepositoryError>;
}

/// The full set of repositories the reconciliation paths need, as shared trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub leads: Arc<dyn LeadRepository>,
    pub owners: Arc<dyn OwnerRepository>,
    pub stages: Arc<dyn StageMapRepository>,
    pub history: Arc<dyn StageHistoryRepository>,
    pub lost: Arc<dyn LostOpportunityRepository>,
    pub appointments: Arc<dyn AppointmentRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            leads: Arc::new(SqlLeadRepository::new(pool.clone())),
            owners: Arc::new(SqlOwnerRepository::new(pool.clone())),
            stages: Arc::new(SqlStageMapRepository::new(pool.clone())),
            history: Arc::new(SqlStageHistoryRepository::new(pool.clone())),
            lost: Arc::new(SqlLostOpportunityRepository::new(pool.clone())),
            appointments: Arc::new(SqlAppointmentRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            leads: Arc::new(InMemoryLeadRepository::default()),
            owners: Arc::new(InMemoryOwnerRepository::default()),
            stages: Arc::new(InMemoryStageMapRepository::default()),
            history: Arc::new(InMemoryStageHistoryRepository::default()),
            lost: Arc::new(InMemoryLostOpportunityRepository::default()),
            appointments: Arc::new(InMemoryAppointmentRepository::default()),
        }
    }
}

/// Fixed microsecond precision keeps lexical order equal to chronological order.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| decode_timestamp(column, &value)).transpose()
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
