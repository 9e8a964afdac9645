use std::str::FromStr;
use std::time::Duration;

use carepath_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_from_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens a pool with foreign keys enforced, WAL journaling and a busy timeout so
/// concurrent writers queue instead of failing. File databases are created on
/// first use.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::connect_with_settings;

    #[tokio::test]
    async fn file_database_is_created_with_foreign_keys_on() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("carepath.db").display());
        let pool = connect_with_settings(&url, 2, 5).await.expect("connect");

        let enabled = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma")
            .get::<i64, _>(0);
        assert_eq!(enabled, 1);

        let mode = sqlx::query("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("pragma")
            .get::<String, _>(0);
        assert_eq!(mode.to_ascii_lowercase(), "wal");

        pool.close().await;
    }
}
