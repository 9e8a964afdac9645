use std::env;
use std::sync::{Arc, Mutex, OnceLock};

use carepath_agent::escalation::EscalationManager;
use carepath_cli::commands::{config, migrate, sla_report};
use carepath_core::domain::decision::Severity;
use carepath_core::domain::escalation::NewEscalation;
use carepath_core::domain::protocol::{EpisodeId, PatientId};
use carepath_db::repositories::SqlEscalationRepository;
use carepath_db::connect_with_settings;
use chrono::{Duration, Utc};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("CAREPATH_DATABASE_URL", url.as_str())], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["versions"][0], 1);
    });
}

#[test]
fn migrate_returns_config_failure_for_openai_without_key() {
    with_env(&[("CAREPATH_LLM_PROVIDER", "openai")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().is_some_and(|message| message.contains("llm.api_key")));
    });
}

#[test]
fn config_reports_env_sources_and_redacts_keys() {
    with_env(
        &[
            ("CAREPATH_DATABASE_URL", "sqlite://from-env.db"),
            ("CAREPATH_LLM_PROVIDER", "openai"),
            ("CAREPATH_LLM_API_KEY", "sk-very-secret"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);
            assert!(result
                .output
                .contains("- database.url = sqlite://from-env.db (source: env (CAREPATH_DATABASE_URL))"));
            assert!(result.output.contains("- llm.api_key = sk-***"));
            assert!(!result.output.contains("very-secret"));
            assert!(result.output.contains("- engine.history_window = "));
        },
    );
}

#[test]
fn sla_report_lists_overdue_escalations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    with_env(&[("CAREPATH_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let pool = connect_with_settings(&url, 1, 5).await.expect("pool");
            let manager = EscalationManager::new(Arc::new(SqlEscalationRepository::new(pool.clone())));
            for (episode, severity, age_minutes) in
                [("EP-1", Severity::Critical, 45), ("EP-2", Severity::Low, 10)]
            {
                manager
                    .open(
                        NewEscalation {
                            episode_id: EpisodeId(episode.to_string()),
                            patient_id: PatientId(format!("PT-{episode}")),
                            interaction_id: None,
                            severity,
                            reason_codes: vec!["TEST".to_string()],
                            summary: "seeded for report".to_string(),
                            idempotency_key: None,
                        },
                        "test",
                        Utc::now() - Duration::minutes(age_minutes),
                    )
                    .await
                    .expect("open task");
            }
            pool.close().await;
        });

        let all = parse_payload(&sla_report::run(false).output);
        assert_eq!(all["status"], "ok");
        assert_eq!(all["details"]["tasks"].as_array().map(Vec::len), Some(2));
        assert_eq!(all["details"]["tasks"][0]["breached"], true);
        assert_eq!(all["details"]["tasks"][0]["severity"], "critical");

        let breached = parse_payload(&sla_report::run(true).output);
        assert_eq!(breached["details"]["tasks"].as_array().map(Vec::len), Some(1));
        assert_eq!(breached["message"], "1 unresolved task(s), 1 past deadline");
    });
}

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("carepath.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CAREPATH_DATABASE_URL",
        "CAREPATH_DATABASE_MAX_CONNECTIONS",
        "CAREPATH_DATABASE_TIMEOUT_SECS",
        "CAREPATH_LLM_PROVIDER",
        "CAREPATH_LLM_API_KEY",
        "CAREPATH_LLM_BASE_URL",
        "CAREPATH_LLM_MODEL",
        "CAREPATH_LLM_TEMPERATURE",
        "CAREPATH_LLM_TIMEOUT_SECS",
        "CAREPATH_LLM_MAX_RETRIES",
        "CAREPATH_ENGINE_HISTORY_WINDOW",
        "CAREPATH_SERVER_BIND_ADDRESS",
        "CAREPATH_SERVER_PORT",
        "CAREPATH_LOGGING_LEVEL",
        "CAREPATH_LOGGING_FORMAT",
        "CAREPATH_LOG_LEVEL",
        "CAREPATH_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
