use std::collections::BTreeSet;

use carepath_db::migrations::{self, MIGRATOR};
use serde_json::json;

use crate::commands::{connect, exit, load_config, runtime, CommandResult};

const COMMAND: &str = "migrate";

pub fn run() -> CommandResult {
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
        let applied = migrations::run_pending(&pool).await;
        pool.close().await;

        match applied {
            Ok(()) => {
                // Reversible migrations list their up and down halves separately.
                let versions: BTreeSet<i64> =
                    MIGRATOR.iter().map(|migration| migration.version).collect();
                CommandResult::success_with(
                    COMMAND,
                    format!("schema is at {} migration(s)", versions.len()),
                    Some(json!({ "database_url": config.database.url, "versions": versions })),
                )
            }
            Err(error) => {
                CommandResult::failure(COMMAND, "migration", error.to_string(), exit::MIGRATION)
            }
        }
    })
}
