use sqlx::Row;

use leadsync_core::domain::stage::{StageCode, StageMapping};

use super::{decode_error, RepositoryError, StageMapRepository};
use crate::DbPool;

pub struct SqlStageMapRepository {
    pool: DbPool,
}

impl SqlStageMapRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_mapping(row: &sqlx::sqlite::SqliteRow) -> Result<StageMapping, RepositoryError> {
    let code: String = row.try_get("code").map_err(decode_error)?;
    let label: String = row.try_get("label").map_err(decode_error)?;
    let external_stage_id: Option<String> =
        row.try_get("external_stage_id").map_err(decode_error)?;
    let position: i64 = row.try_get("position").map_err(decode_error)?;

    Ok(StageMapping { code: StageCode(code), label, external_stage_id, position })
}

#[async_trait::async_trait]
impl StageMapRepository for SqlStageMapRepository {
    async fn list(&self) -> Result<Vec<StageMapping>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT code, label, external_stage_id, position
             FROM canonical_stage ORDER BY position ASC, code ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect()
    }

    async fn save(&self, mapping: StageMapping) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO canonical_stage (code, label, external_stage_id, position)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
                 label = excluded.label,
                 external_stage_id = excluded.external_stage_id,
                 position = excluded.position",
        )
        .bind(mapping.code.as_str())
        .bind(&mapping.label)
        .bind(&mapping.external_stage_id)
        .bind(mapping.position)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use leadsync_core::domain::stage::{StageCode, StageMapping};

    use super::SqlStageMapRepository;
    use crate::repositories::StageMapRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn stages_are_listed_by_position_and_upserted_by_code() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlStageMapRepository::new(pool);

        let mapping = |code: &str, label: &str, position: i64| StageMapping {
            code: StageCode(code.to_string()),
            label: label.to_string(),
            external_stage_id: None,
            position,
        };
        repo.save(mapping("VISITA", "Visita", 3)).await.expect("save visita");
        repo.save(mapping("PROSPECCION", "Prospección", 1)).await.expect("save prospeccion");
        repo.save(StageMapping {
            external_stage_id: Some("stg-3".to_string()),
            ..mapping("VISITA", "Visita programada", 3)
        })
        .await
        .expect("update visita");

        let stages = repo.list().await.expect("list stages");

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].code, StageCode("PROSPECCION".to_string()));
        assert_eq!(stages[1].label, "Visita programada");
        assert_eq!(stages[1].external_stage_id.as_deref(), Some("stg-3"));
    }
}
