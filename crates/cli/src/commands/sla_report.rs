use std::sync::Arc;

use carepath_agent::escalation::{EscalationManager, SlaView};
use carepath_db::repositories::SqlEscalationRepository;
use chrono::Utc;
use serde_json::json;

use crate::commands::{connect, exit, load_config, runtime, CommandResult};

const COMMAND: &str = "sla-report";

pub fn run(breached_only: bool) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match connect(COMMAND, &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let manager = EscalationManager::new(Arc::new(SqlEscalationRepository::new(pool.clone())));
        let now = Utc::now();
        let report = manager.sla_report(now).await;
        pool.close().await;

        let mut views: Vec<SlaView> = match report {
            Ok(views) => views,
            Err(error) => {
                return CommandResult::failure(COMMAND, "persistence", error.to_string(), exit::DATABASE)
            }
        };
        if breached_only {
            views.retain(|view| view.breached);
        }
        // Most overdue first.
        views.sort_by_key(|view| view.minutes_remaining);

        let breached = views.iter().filter(|view| view.breached).count();
        CommandResult::success_with(
            COMMAND,
            format!("{} unresolved task(s), {breached} past deadline", views.len()),
            Some(json!({ "generated_at": now.to_rfc3339(), "tasks": views })),
        )
    })
}
