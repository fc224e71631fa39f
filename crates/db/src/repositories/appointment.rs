use sqlx::Row;

use leadsync_core::domain::appointment::{AppointmentId, AppointmentRecord, ContactSnapshot};
use leadsync_core::domain::lead::LeadId;
use leadsync_core::domain::owner::OwnerId;

use super::{
    decode_error, decode_optional_timestamp, decode_timestamp, encode_timestamp,
    AppointmentRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlAppointmentRepository {
    pool: DbPool,
}

impl SqlAppointmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_appointment(row: &sqlx::sqlite::SqliteRow) -> Result<AppointmentRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let external_appointment_id: String =
        row.try_get("external_appointment_id").map_err(decode_error)?;
    let external_opportunity_id: Option<String> =
        row.try_get("external_opportunity_id").map_err(decode_error)?;
    let external_calendar_id: Option<String> =
        row.try_get("external_calendar_id").map_err(decode_error)?;
    let calendar_key: String = row.try_get("calendar_key").map_err(decode_error)?;
    let calendar_name: Option<String> = row.try_get("calendar_name").map_err(decode_error)?;
    let starts_at: String = row.try_get("starts_at").map_err(decode_error)?;
    let ends_at: Option<String> = row.try_get("ends_at").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let location: Option<String> = row.try_get("location").map_err(decode_error)?;
    let meeting_url: Option<String> = row.try_get("meeting_url").map_err(decode_error)?;
    let lead_id: Option<String> = row.try_get("lead_id").map_err(decode_error)?;
    let owner_id: Option<String> = row.try_get("owner_id").map_err(decode_error)?;
    let contact_json: String = row.try_get("contact_json").map_err(decode_error)?;
    let raw_payload: String = row.try_get("raw_payload").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    let contact: ContactSnapshot = serde_json::from_str(&contact_json)
        .map_err(|error| RepositoryError::Decode(format!("contact_json: {error}")))?;
    let raw_payload = serde_json::from_str(&raw_payload)
        .map_err(|error| RepositoryError::Decode(format!("raw_payload: {error}")))?;

    Ok(AppointmentRecord {
        id: AppointmentId(id),
        external_appointment_id,
        external_opportunity_id,
        external_calendar_id,
        calendar_key,
        calendar_name,
        starts_at: decode_timestamp("starts_at", &starts_at)?,
        ends_at: decode_optional_timestamp("ends_at", ends_at)?,
        status,
        location,
        meeting_url,
        lead_id: lead_id.map(LeadId),
        owner_id: owner_id.map(OwnerId),
        contact,
        raw_payload,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl AppointmentRepository for SqlAppointmentRepository {
    async fn insert(&self, record: AppointmentRecord) -> Result<(), RepositoryError> {
        let contact_json = serde_json::to_string(&record.contact)
            .map_err(|error| RepositoryError::Decode(format!("contact_json: {error}")))?;

        sqlx::query(
            "INSERT INTO appointment (id, external_appointment_id, external_opportunity_id,
                                      external_calendar_id, calendar_key, calendar_name,
                                      starts_at, ends_at, status, location, meeting_url,
                                      lead_id, owner_id, contact_json, raw_payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.external_appointment_id)
        .bind(&record.external_opportunity_id)
        .bind(&record.external_calendar_id)
        .bind(&record.calendar_key)
        .bind(&record.calendar_name)
        .bind(encode_timestamp(record.starts_at))
        .bind(record.ends_at.map(encode_timestamp))
        .bind(&record.status)
        .bind(&record.location)
        .bind(&record.meeting_url)
        .bind(record.lead_id.as_ref().map(|lead| lead.0.as_str()))
        .bind(record.owner_id.as_ref().map(|owner| owner.0.as_str()))
        .bind(contact_json)
        .bind(record.raw_payload.to_string())
        .bind(encode_timestamp(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_external_id(
        &self,
        external_appointment_id: &str,
    ) -> Result<Vec<AppointmentRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, external_appointment_id, external_opportunity_id, external_calendar_id,
                    calendar_key, calendar_name, starts_at, ends_at, status, location,
                    meeting_url, lead_id, owner_id, contact_json, raw_payload, created_at
             FROM appointment WHERE external_appointment_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(external_appointment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_appointment).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use leadsync_core::domain::appointment::{AppointmentId, AppointmentRecord, ContactSnapshot};

    use super::SqlAppointmentRepository;
    use crate::repositories::AppointmentRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn appointment_without_resolved_lead_is_stored() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlAppointmentRepository::new(pool);
        let starts_at = Utc.with_ymd_and_hms(2026, 3, 9, 15, 0, 0).single().expect("valid time");

        let record = AppointmentRecord {
            id: AppointmentId("AP-1".to_string()),
            external_appointment_id: "appt-1".to_string(),
            external_opportunity_id: None,
            external_calendar_id: Some("cal-1".to_string()),
            calendar_key: "visitas".to_string(),
            calendar_name: Some("Visitas a obra".to_string()),
            starts_at,
            ends_at: Some(starts_at + Duration::minutes(45)),
            status: "booked".to_string(),
            location: None,
            meeting_url: None,
            lead_id: None,
            owner_id: None,
            contact: ContactSnapshot {
                first_name: Some("Ana".to_string()),
                phone: Some("+51 987 654 321".to_string()),
                ..ContactSnapshot::default()
            },
            raw_payload: json!({ "appointment": { "id": "appt-1" } }),
            created_at: starts_at - Duration::days(2),
        };
        repo.insert(record.clone()).await.expect("insert appointment");

        let found = repo.find_by_external_id("appt-1").await.expect("find appointment");
        assert_eq!(found, vec![record]);
    }
}
