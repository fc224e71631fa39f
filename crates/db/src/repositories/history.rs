use sqlx::Row;

use leadsync_core::domain::history::{HistorySource, StageHistoryId, StageHistoryRecord};
use leadsync_core::domain::lead::LeadId;
use leadsync_core::domain::owner::OwnerId;
use leadsync_core::domain::stage::StageCode;

use super::{
    decode_error, decode_timestamp, encode_timestamp, HistoryInsert, RepositoryError,
    StageHistoryRepository,
};
use crate::DbPool;

const HISTORY_COLUMNS: &str = "id, lead_id, external_opportunity_id, from_stage, to_stage,
    changed_at, owner_id, source, dedup_key";

pub struct SqlStageHistoryRepository {
    pool: DbPool,
}

impl SqlStageHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<StageHistoryRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let lead_id: String = row.try_get("lead_id").map_err(decode_error)?;
    let external_opportunity_id: Option<String> =
        row.try_get("external_opportunity_id").map_err(decode_error)?;
    let from_stage: Option<String> = row.try_get("from_stage").map_err(decode_error)?;
    let to_stage: String = row.try_get("to_stage").map_err(decode_error)?;
    let changed_at: String = row.try_get("changed_at").map_err(decode_error)?;
    let owner_id: Option<String> = row.try_get("owner_id").map_err(decode_error)?;
    let source: String = row.try_get("source").map_err(decode_error)?;
    let dedup_key: String = row.try_get("dedup_key").map_err(decode_error)?;

    let source = HistorySource::parse(&source)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown history source `{source}`")))?;

    Ok(StageHistoryRecord {
        id: StageHistoryId(id),
        lead_id: LeadId(lead_id),
        external_opportunity_id,
        from_stage: from_stage.map(StageCode),
        to_stage: StageCode(to_stage),
        changed_at: decode_timestamp("changed_at", &changed_at)?,
        owner_id: owner_id.map(OwnerId),
        source,
        dedup_key,
    })
}

#[async_trait::async_trait]
impl StageHistoryRepository for SqlStageHistoryRepository {
    async fn latest_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<StageHistoryRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM stage_history WHERE lead_id = ?
             ORDER BY changed_at DESC, rowid DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(&lead_id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, record: StageHistoryRecord) -> Result<HistoryInsert, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO stage_history (id, lead_id, external_opportunity_id, from_stage, to_stage,
                                        changed_at, owner_id, source, dedup_key)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(dedup_key) DO NOTHING",
        )
        .bind(&record.id.0)
        .bind(&record.lead_id.0)
        .bind(&record.external_opportunity_id)
        .bind(record.from_stage.as_ref().map(StageCode::as_str))
        .bind(record.to_stage.as_str())
        .bind(encode_timestamp(record.changed_at))
        .bind(record.owner_id.as_ref().map(|owner| owner.0.as_str()))
        .bind(record.source.as_str())
        .bind(&record.dedup_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(HistoryInsert::Duplicate)
        } else {
            Ok(HistoryInsert::Inserted)
        }
    }

    async fn set_owner_if_missing(
        &self,
        id: &StageHistoryId,
        owner_id: &OwnerId,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE stage_history SET owner_id = ? WHERE id = ? AND owner_id IS NULL")
                .bind(&owner_id.0)
                .bind(&id.0)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn backfill_owner(
        &self,
        lead_id: &LeadId,
        owner_id: &OwnerId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE stage_history SET owner_id = ? WHERE lead_id = ? AND owner_id IS NULL",
        )
        .bind(&owner_id.0)
        .bind(&lead_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<StageHistoryRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM stage_history WHERE lead_id = ?
             ORDER BY changed_at ASC, rowid ASC"
        );
        let rows = sqlx::query(&sql).bind(&lead_id.0).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}
