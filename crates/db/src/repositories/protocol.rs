use sqlx::{sqlite::SqliteRow, Row};

use carepath_core::domain::protocol::{
    ConditionCode, EducationTier, EpisodeId, ProtocolAssignment, ProtocolAssignmentId,
};

use super::rows::{parse_label, parse_timestamp};
use super::{ProtocolRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProtocolRepository {
    pool: DbPool,
}

impl SqlProtocolRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProtocolRepository for SqlProtocolRepository {
    async fn find_active(
        &self,
        episode_id: &EpisodeId,
    ) -> Result<Option<ProtocolAssignment>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, episode_id, condition_code, education_tier, rules_json, active, created_at
             FROM protocol_assignment
             WHERE episode_id = ? AND active = 1",
        )
        .bind(&episode_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(assignment_from_row).transpose()
    }

    async fn create_if_absent(
        &self,
        assignment: ProtocolAssignment,
    ) -> Result<ProtocolAssignment, RepositoryError> {
        // The partial unique index on active episodes turns a racing second
        // insert into a no-op.
        sqlx::query(
            "INSERT INTO protocol_assignment (
                id, episode_id, condition_code, education_tier, rules_json, active, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&assignment.id.0)
        .bind(&assignment.episode_id.0)
        .bind(assignment.condition_code.as_str())
        .bind(assignment.education_tier.as_str())
        .bind(&assignment.rules_json)
        .bind(assignment.active)
        .bind(assignment.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_active(&assignment.episode_id).await?.ok_or_else(|| {
            RepositoryError::NotFound(format!(
                "active protocol assignment for episode `{}`",
                assignment.episode_id.0
            ))
        })
    }
}

fn assignment_from_row(row: SqliteRow) -> Result<ProtocolAssignment, RepositoryError> {
    Ok(ProtocolAssignment {
        id: ProtocolAssignmentId(row.try_get("id")?),
        episode_id: EpisodeId(row.try_get("episode_id")?),
        condition_code: parse_label("condition_code", row.try_get("condition_code")?, |value| {
            ConditionCode::parse(value)
        })?,
        education_tier: parse_label("education_tier", row.try_get("education_tier")?, |value| {
            EducationTier::parse(value)
        })?,
        rules_json: row.try_get("rules_json")?,
        active: row.try_get("active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use carepath_core::domain::protocol::{
        ConditionCode, EducationTier, EpisodeId, ProtocolAssignment, ProtocolAssignmentId,
    };

    use super::SqlProtocolRepository;
    use crate::repositories::ProtocolRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn assignment(id: &str, episode: &str, condition: ConditionCode) -> ProtocolAssignment {
        ProtocolAssignment {
            id: ProtocolAssignmentId(id.to_string()),
            episode_id: EpisodeId(episode.to_string()),
            condition_code: condition,
            education_tier: EducationTier::High,
            rules_json: r#"{"red_flags":[]}"#.to_string(),
            active: true,
            created_at: DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
                .expect("valid rfc3339")
                .with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn second_create_returns_existing_assignment() {
        let pool = setup_pool().await;
        let repo = SqlProtocolRepository::new(pool.clone());

        let first = repo
            .create_if_absent(assignment("PA-1", "EP-1", ConditionCode::Hf))
            .await
            .expect("create");
        let second = repo
            .create_if_absent(assignment("PA-2", "EP-1", ConditionCode::Copd))
            .await
            .expect("second create");

        assert_eq!(first, second);
        assert_eq!(second.condition_code, ConditionCode::Hf);
        assert_eq!(repo.find_active(&EpisodeId("EP-1".to_string())).await.expect("find"), Some(first));

        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_episode_has_no_assignment() {
        let pool = setup_pool().await;
        let repo = SqlProtocolRepository::new(pool.clone());

        assert_eq!(repo.find_active(&EpisodeId("EP-404".to_string())).await.expect("find"), None);
        pool.close().await;
    }
}
