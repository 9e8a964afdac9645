use std::sync::Arc;

use carepath_core::domain::protocol::{
    ConditionCode, EducationTier, EpisodeId, ProtocolAssignment, ProtocolAssignmentId,
};
use carepath_core::errors::{ApplicationError, DomainError};
use carepath_core::rules::{template_for, ProtocolRules};
use carepath_db::repositories::ProtocolRepository;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// An assignment together with its parsed rules.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedProtocol {
    pub assignment: ProtocolAssignment,
    pub rules: ProtocolRules,
}

/// Finds the episode's active protocol, creating one from the built-in template
/// the first time an episode is seen.
pub struct ProtocolAccessor {
    repository: Arc<dyn ProtocolRepository>,
    default_tier: EducationTier,
}

impl ProtocolAccessor {
    pub fn new(repository: Arc<dyn ProtocolRepository>, default_tier: EducationTier) -> Self {
        Self { repository, default_tier }
    }

    pub async fn load_or_create(
        &self,
        episode_id: &EpisodeId,
        condition: Option<ConditionCode>,
        now: DateTime<Utc>,
    ) -> Result<LoadedProtocol, ApplicationError> {
        if let Some(existing) = self.repository.find_active(episode_id).await? {
            return Ok(load(existing));
        }

        let condition = condition
            .ok_or_else(|| DomainError::MissingProtocol { episode_id: episode_id.0.clone() })?;

        let candidate = ProtocolAssignment {
            id: ProtocolAssignmentId(format!("PA-{}", Uuid::new_v4())),
            episode_id: episode_id.clone(),
            condition_code: condition,
            education_tier: self.default_tier,
            rules_json: template_for(condition, self.default_tier),
            active: true,
            created_at: now,
        };
        let candidate_id = candidate.id.clone();
        let stored = self.repository.create_if_absent(candidate).await?;

        if stored.id == candidate_id {
            info!(
                event_name = "agent.protocol.assigned",
                episode_id = %episode_id.0,
                condition = condition.as_str(),
                education_tier = self.default_tier.as_str(),
                "protocol assigned from template"
            );
        }
        Ok(load(stored))
    }
}

fn load(assignment: ProtocolAssignment) -> LoadedProtocol {
    let (rules, issues) = ProtocolRules::parse_lenient(&assignment.rules_json);
    for issue in &issues {
        warn!(
            event_name = "agent.protocol.rule_dropped",
            episode_id = %assignment.episode_id.0,
            assignment_id = %assignment.id.0,
            error = %issue,
            "protocol rule ignored"
        );
    }
    LoadedProtocol { assignment, rules }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use carepath_core::domain::protocol::{
        ConditionCode, EducationTier, EpisodeId, ProtocolAssignment, ProtocolAssignmentId,
    };
    use carepath_core::errors::{ApplicationError, DomainError};
    use carepath_db::repositories::{InMemoryProtocolRepository, ProtocolRepository};
    use chrono::Utc;

    use super::ProtocolAccessor;

    #[tokio::test]
    async fn first_turn_creates_assignment_from_template() {
        let repository = Arc::new(InMemoryProtocolRepository::default());
        let accessor = ProtocolAccessor::new(repository.clone(), EducationTier::Low);
        let episode = EpisodeId("EP-1".to_string());

        let loaded = accessor
            .load_or_create(&episode, Some(ConditionCode::Hf), Utc::now())
            .await
            .expect("load");
        assert_eq!(loaded.assignment.condition_code, ConditionCode::Hf);
        assert_eq!(loaded.assignment.education_tier, EducationTier::Low);
        assert!(!loaded.rules.red_flags.is_empty());

        // A later turn with a different code keeps the original assignment.
        let again = accessor
            .load_or_create(&episode, Some(ConditionCode::Copd), Utc::now())
            .await
            .expect("reload");
        assert_eq!(again.assignment.id, loaded.assignment.id);
        assert_eq!(again.assignment.condition_code, ConditionCode::Hf);
    }

    #[tokio::test]
    async fn unknown_episode_without_condition_is_rejected() {
        let accessor =
            ProtocolAccessor::new(Arc::new(InMemoryProtocolRepository::default()), EducationTier::Medium);

        let error = accessor
            .load_or_create(&EpisodeId("EP-404".to_string()), None, Utc::now())
            .await
            .expect_err("missing protocol");
        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::MissingProtocol { episode_id: "EP-404".to_string() })
        );
    }

    #[tokio::test]
    async fn malformed_stored_rules_load_as_empty() {
        let repository = Arc::new(InMemoryProtocolRepository::default());
        repository
            .create_if_absent(ProtocolAssignment {
                id: ProtocolAssignmentId("PA-broken".to_string()),
                episode_id: EpisodeId("EP-2".to_string()),
                condition_code: ConditionCode::Other,
                education_tier: EducationTier::Medium,
                rules_json: "{not json".to_string(),
                active: true,
                created_at: Utc::now(),
            })
            .await
            .expect("seed");
        let accessor = ProtocolAccessor::new(repository, EducationTier::Medium);

        let loaded = accessor
            .load_or_create(&EpisodeId("EP-2".to_string()), None, Utc::now())
            .await
            .expect("load");
        assert!(loaded.rules.red_flags.is_empty());
        assert!(loaded.rules.closures.is_empty());
    }
}
