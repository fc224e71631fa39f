use sqlx::Row;

use leadsync_core::domain::lead::LeadId;
use leadsync_core::domain::lost::{LostOpportunityId, LostOpportunityRecord, LostSource};
use leadsync_core::domain::owner::OwnerId;

use super::{
    decode_error, decode_timestamp, encode_timestamp, LostOpportunityRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlLostOpportunityRepository {
    pool: DbPool,
}

impl SqlLostOpportunityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<LostOpportunityRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let lead_id: String = row.try_get("lead_id").map_err(decode_error)?;
    let owner_id: String = row.try_get("owner_id").map_err(decode_error)?;
    let external_opportunity_id: Option<String> =
        row.try_get("external_opportunity_id").map_err(decode_error)?;
    let external_pipeline_id: Option<String> =
        row.try_get("external_pipeline_id").map_err(decode_error)?;
    let external_stage_id: Option<String> =
        row.try_get("external_stage_id").map_err(decode_error)?;
    let capture_channel: Option<String> = row.try_get("capture_channel").map_err(decode_error)?;
    let source: String = row.try_get("source").map_err(decode_error)?;
    let reason: String = row.try_get("reason").map_err(decode_error)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(decode_error)?;
    let raw_payload: String = row.try_get("raw_payload").map_err(decode_error)?;

    let source = LostSource::parse(&source)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lost source `{source}`")))?;
    let raw_payload = serde_json::from_str(&raw_payload)
        .map_err(|error| RepositoryError::Decode(format!("raw_payload: {error}")))?;

    Ok(LostOpportunityRecord {
        id: LostOpportunityId(id),
        lead_id: LeadId(lead_id),
        owner_id: OwnerId(owner_id),
        external_opportunity_id,
        external_pipeline_id,
        external_stage_id,
        capture_channel,
        source,
        reason,
        recorded_at: decode_timestamp("recorded_at", &recorded_at)?,
        raw_payload,
    })
}

#[async_trait::async_trait]
impl LostOpportunityRepository for SqlLostOpportunityRepository {
    async fn insert(&self, record: LostOpportunityRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lost_opportunity (id, lead_id, owner_id, external_opportunity_id,
                                           external_pipeline_id, external_stage_id,
                                           capture_channel, source, reason, recorded_at,
                                           raw_payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.lead_id.0)
        .bind(&record.owner_id.0)
        .bind(&record.external_opportunity_id)
        .bind(&record.external_pipeline_id)
        .bind(&record.external_stage_id)
        .bind(&record.capture_channel)
        .bind(record.source.as_str())
        .bind(&record.reason)
        .bind(encode_timestamp(record.recorded_at))
        .bind(record.raw_payload.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<LostOpportunityRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, lead_id, owner_id, external_opportunity_id, external_pipeline_id,
                    external_stage_id, capture_channel, source, reason, recorded_at,
                    raw_payload
             FROM lost_opportunity WHERE lead_id = ? ORDER BY recorded_at ASC, rowid ASC",
        )
        .bind(&lead_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
