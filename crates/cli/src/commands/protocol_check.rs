use std::fs;
use std::path::Path;

use carepath_core::rules::ProtocolRules;
use serde_json::json;

use crate::commands::CommandResult;

const COMMAND: &str = "protocol-check";

/// Validates a rule document the way the engine loads it, but reports every
/// rule the engine would drop instead of silently skipping it.
pub fn run(path: &Path) -> CommandResult {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "file_read",
                format!("could not read `{}`: {error}", path.display()),
                2,
            );
        }
    };

    let (rules, issues) = ProtocolRules::parse_lenient(&raw);
    if !issues.is_empty() {
        let messages: Vec<String> = issues.iter().map(ToString::to_string).collect();
        return CommandResult::failure(
            COMMAND,
            "rule_validation",
            format!("{} issue(s): {}", messages.len(), messages.join("; ")),
            3,
        );
    }

    CommandResult::success_with(
        COMMAND,
        format!("`{}` is a valid protocol document", path.display()),
        Some(json!({
            "red_flags": rules.red_flags.len(),
            "closures": rules.closures.len(),
            "patterns": rules.patterns.len(),
            "ask_more_questions": rules.ask_more_questions.len(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use carepath_core::domain::protocol::{ConditionCode, EducationTier};
    use carepath_core::rules::template_for;
    use serde_json::Value;

    use super::run;

    fn payload(output: &str) -> Value {
        serde_json::from_str(output).expect("json output")
    }

    #[test]
    fn built_in_template_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hf.json");
        fs::write(&path, template_for(ConditionCode::Hf, EducationTier::Medium)).expect("write");

        let result = run(&path);

        assert_eq!(result.exit_code, 0);
        let body = payload(&result.output);
        assert_eq!(body["status"], "ok");
        assert!(body["details"]["red_flags"].as_u64().is_some_and(|count| count >= 3));
    }

    #[test]
    fn rule_without_flag_type_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(
            &path,
            r#"{"red_flags": [{"if": {"any_text": ["chest pain"]}, "flag": {"severity": "high"}}], "closures": []}"#,
        )
        .expect("write");

        let result = run(&path);

        assert_eq!(result.exit_code, 3);
        let body = payload(&result.output);
        assert_eq!(body["error_class"], "rule_validation");
        assert!(body["message"].as_str().is_some_and(|message| message.contains("flag.type")));
    }

    #[test]
    fn malformed_json_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").expect("write");

        let result = run(&path);

        assert_eq!(result.exit_code, 3);
        assert!(payload(&result.output)["message"].as_str().is_some_and(|m| m.contains("not valid JSON")));
    }

    #[test]
    fn missing_file_is_a_read_failure() {
        let result = run(std::path::Path::new("/nonexistent/protocol.json"));
        assert_eq!(result.exit_code, 2);
        assert_eq!(payload(&result.output)["error_class"], "file_read");
    }
}
