use chrono::{DateTime, Utc};
use sqlx::Row;

use leadsync_core::domain::lead::{Lead, LeadId};
use leadsync_core::domain::owner::OwnerId;
use leadsync_core::domain::stage::StageCode;

use super::{
    decode_error, decode_optional_timestamp, decode_timestamp, encode_timestamp, LeadRepository,
    RepositoryError,
};
use crate::DbPool;

const LEAD_COLUMNS: &str = "id, external_opportunity_id, phone_normalized, email_normalized,
    current_stage, owner_id, capture_channel, stage_changed_at, created_at, updated_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM lead WHERE {predicate}
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_lead).transpose()
    }
}

fn row_to_lead(row: &sqlx::sqlite::SqliteRow) -> Result<Lead, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let external_opportunity_id: Option<String> =
        row.try_get("external_opportunity_id").map_err(decode_error)?;
    let phone_normalized: Option<String> = row.try_get("phone_normalized").map_err(decode_error)?;
    let email_normalized: Option<String> = row.try_get("email_normalized").map_err(decode_error)?;
    let current_stage: String = row.try_get("current_stage").map_err(decode_error)?;
    let owner_id: Option<String> = row.try_get("owner_id").map_err(decode_error)?;
    let capture_channel: Option<String> = row.try_get("capture_channel").map_err(decode_error)?;
    let stage_changed_at: Option<String> = row.try_get("stage_changed_at").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(Lead {
        id: LeadId(id),
        external_opportunity_id,
        phone_normalized,
        email_normalized,
        current_stage: StageCode(current_stage),
        owner_id: owner_id.map(OwnerId),
        capture_channel,
        stage_changed_at: decode_optional_timestamp("stage_changed_at", stage_changed_at)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        self.fetch_one_where("id = ?", &id.0).await
    }

    async fn find_by_external_opportunity_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        self.fetch_one_where("external_opportunity_id = ?", external_id).await
    }

    async fn find_latest_by_phone(&self, phone: &str) -> Result<Option<Lead>, RepositoryError> {
        self.fetch_one_where("phone_normalized = ?", phone).await
    }

    async fn find_latest_by_email(&self, email: &str) -> Result<Option<Lead>, RepositoryError> {
        self.fetch_one_where("email_normalized = ?", email).await
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lead (id, external_opportunity_id, phone_normalized, email_normalized,
                               current_stage, owner_id, capture_channel, stage_changed_at,
                               created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 external_opportunity_id = excluded.external_opportunity_id,
                 phone_normalized = excluded.phone_normalized,
                 email_normalized = excluded.email_normalized,
                 current_stage = excluded.current_stage,
                 owner_id = excluded.owner_id,
                 capture_channel = excluded.capture_channel,
                 stage_changed_at = excluded.stage_changed_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&lead.id.0)
        .bind(&lead.external_opportunity_id)
        .bind(&lead.phone_normalized)
        .bind(&lead.email_normalized)
        .bind(lead.current_stage.as_str())
        .bind(lead.owner_id.as_ref().map(|owner| owner.0.as_str()))
        .bind(&lead.capture_channel)
        .bind(lead.stage_changed_at.map(encode_timestamp))
        .bind(encode_timestamp(lead.created_at))
        .bind(encode_timestamp(lead.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attach_opportunity(
        &self,
        id: &LeadId,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE lead SET external_opportunity_id = ?, updated_at = ?
             WHERE id = ? AND external_opportunity_id IS NULL",
        )
        .bind(external_id)
        .bind(encode_timestamp(at))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_stage(
        &self,
        id: &LeadId,
        stage: &StageCode,
        changed_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let changed_at = encode_timestamp(changed_at);
        sqlx::query(
            "UPDATE lead SET current_stage = ?, stage_changed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(stage.as_str())
        .bind(&changed_at)
        .bind(&changed_at)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_owner(
        &self,
        id: &LeadId,
        owner_id: &OwnerId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE lead SET owner_id = ?, updated_at = ? WHERE id = ?")
            .bind(&owner_id.0)
            .bind(encode_timestamp(at))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
