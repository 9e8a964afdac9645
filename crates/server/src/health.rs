use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use carepath_db::DbPool;
use chrono::Utc;
use serde::Serialize;

const REQUIRED_TABLES: &[&str] =
    &["protocol_assignment", "agent_interaction", "agent_message", "escalation_task"];

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub status: &'static str,
    pub detail: String,
}

impl Probe {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: Probe,
    pub schema: Probe,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let database = match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => Probe::ready("database query succeeded"),
        Err(error) => Probe::degraded(format!("database query failed: {error}")),
    };
    let schema = if database.status == "ready" {
        schema_probe(&state.db_pool).await
    } else {
        Probe::degraded("skipped: database unreachable")
    };

    let ready = database.status == "ready" && schema.status == "ready";
    let report = HealthReport {
        status: if ready { "ready" } else { "degraded" },
        database,
        schema,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(report))
}

async fn schema_probe(pool: &DbPool) -> Probe {
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await;
        match found {
            Ok(1) => {}
            Ok(_) => missing.push(*table),
            Err(error) => return Probe::degraded(format!("schema lookup failed: {error}")),
        }
    }

    if missing.is_empty() {
        Probe::ready("migrations applied")
    } else {
        Probe::degraded(format!("missing tables: {}", missing.join(", ")))
    }
}
