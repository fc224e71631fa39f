use sqlx::Row;

use leadsync_core::domain::owner::{Owner, OwnerId};

use super::{decode_error, decode_timestamp, encode_timestamp, OwnerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOwnerRepository {
    pool: DbPool,
}

impl SqlOwnerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_owner(row: &sqlx::sqlite::SqliteRow) -> Result<Owner, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let external_user_id: String = row.try_get("external_user_id").map_err(decode_error)?;
    let display_name: Option<String> = row.try_get("display_name").map_err(decode_error)?;
    let active: i64 = row.try_get("active").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    Ok(Owner {
        id: OwnerId(id),
        external_user_id,
        display_name,
        active: active != 0,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl OwnerRepository for SqlOwnerRepository {
    async fn find_by_id(&self, id: &OwnerId) -> Result<Option<Owner>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, external_user_id, display_name, active, created_at FROM owner WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_owner).transpose()
    }

    async fn find_by_external_user_id(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Owner>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, external_user_id, display_name, active, created_at
             FROM owner WHERE external_user_id = ?",
        )
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_owner).transpose()
    }

    async fn save(&self, owner: Owner) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO owner (id, external_user_id, display_name, active, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 external_user_id = excluded.external_user_id,
                 display_name = excluded.display_name,
                 active = excluded.active",
        )
        .bind(&owner.id.0)
        .bind(&owner.external_user_id)
        .bind(&owner.display_name)
        .bind(i64::from(owner.active))
        .bind(encode_timestamp(owner.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use leadsync_core::domain::owner::{Owner, OwnerId};

    use super::SqlOwnerRepository;
    use crate::repositories::OwnerRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn owner_is_found_by_external_user_id() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlOwnerRepository::new(pool);

        let owner = Owner {
            id: OwnerId("A-1".to_string()),
            external_user_id: "ghl-user-1".to_string(),
            display_name: Some("Rosa Quispe".to_string()),
            active: false,
            created_at: Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).single().expect("valid time"),
        };
        repo.save(owner.clone()).await.expect("save owner");

        let found = repo.find_by_external_user_id("ghl-user-1").await.expect("lookup");
        let missing = repo.find_by_external_user_id("ghl-user-2").await.expect("lookup");

        assert_eq!(found, Some(owner));
        assert_eq!(missing, None);
    }
}
