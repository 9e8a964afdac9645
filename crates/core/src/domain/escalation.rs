use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::decision::Severity;
use crate::domain::interaction::InteractionId;
use crate::domain::protocol::{EpisodeId, PatientId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscalationTaskId(pub String);

impl EscalationTaskId {
    pub fn generate() -> Self {
        Self(format!("ESC-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Open,
    InProgress,
    Resolved,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::Urgent,
            Severity::High => Self::High,
            Severity::Moderate => Self::Normal,
            Severity::Low => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "urgent" => Some(Self::Urgent),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    EducationOnly,
    MedicationAdjustment,
    TelevisitScheduled,
    SentToEd,
    NoContact,
    FalsePositive,
}

impl ResolutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EducationOnly => "education_only",
            Self::MedicationAdjustment => "medication_adjustment",
            Self::TelevisitScheduled => "televisit_scheduled",
            Self::SentToEd => "sent_to_ed",
            Self::NoContact => "no_contact",
            Self::FalsePositive => "false_positive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "education_only" => Some(Self::EducationOnly),
            "medication_adjustment" => Some(Self::MedicationAdjustment),
            "televisit_scheduled" => Some(Self::TelevisitScheduled),
            "sent_to_ed" => Some(Self::SentToEd),
            "no_contact" => Some(Self::NoContact),
            "false_positive" => Some(Self::FalsePositive),
            _ => None,
        }
    }
}

/// Minutes allowed between task creation and resolution.
pub fn sla_minutes(severity: Severity) -> i64 {
    match severity {
        Severity::Critical => 30,
        Severity::High => 120,
        Severity::Moderate => 240,
        Severity::Low => 480,
    }
}

/// Same table keyed on a free-form label; labels outside the table get the
/// longest window.
pub fn sla_minutes_for_label(label: &str) -> i64 {
    Severity::parse(label).map(sla_minutes).unwrap_or(480)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEscalation {
    pub episode_id: EpisodeId,
    pub patient_id: PatientId,
    pub interaction_id: Option<InteractionId>,
    pub severity: Severity,
    pub reason_codes: Vec<String>,
    pub summary: String,
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTask {
    pub id: EscalationTaskId,
    pub episode_id: EpisodeId,
    pub patient_id: PatientId,
    pub interaction_id: Option<InteractionId>,
    pub severity: Severity,
    pub priority: Priority,
    pub reason_codes: Vec<String>,
    pub summary: String,
    pub status: EscalationStatus,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    /// Fixed at creation. No transition rewrites it.
    pub sla_due_at: DateTime<Utc>,
    pub resolution_outcome: Option<ResolutionOutcome>,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Assigned,
    AlreadyAssigned { assignee: String },
}

impl EscalationTask {
    pub fn open(new: NewEscalation, now: DateTime<Utc>) -> Self {
        Self {
            id: EscalationTaskId::generate(),
            episode_id: new.episode_id,
            patient_id: new.patient_id,
            interaction_id: new.interaction_id,
            severity: new.severity,
            priority: Priority::for_severity(new.severity),
            reason_codes: new.reason_codes,
            summary: new.summary,
            status: EscalationStatus::Open,
            assigned_to: None,
            assigned_at: None,
            sla_due_at: now + Duration::minutes(sla_minutes(new.severity)),
            resolution_outcome: None,
            resolution_notes: None,
            resolved_by: None,
            resolved_at: None,
            idempotency_key: new.idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }

    /// OPEN -> IN_PROGRESS. A task that already has an assignee is left untouched.
    pub fn assign(
        &mut self,
        operator: &str,
        now: DateTime<Utc>,
    ) -> Result<AssignmentOutcome, DomainError> {
        if self.status == EscalationStatus::Resolved {
            return Err(DomainError::InvalidEscalationTransition {
                from: self.status,
                to: EscalationStatus::InProgress,
            });
        }
        if let Some(assignee) = &self.assigned_to {
            return Ok(AssignmentOutcome::AlreadyAssigned { assignee: assignee.clone() });
        }
        if operator.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "assignment requires an operator id".to_string(),
            ));
        }

        self.status = EscalationStatus::InProgress;
        self.assigned_to = Some(operator.trim().to_string());
        self.assigned_at = Some(now);
        self.updated_at = now;
        Ok(AssignmentOutcome::Assigned)
    }

    /// OPEN | IN_PROGRESS -> RESOLVED.
    pub fn resolve(
        &mut self,
        outcome: Option<ResolutionOutcome>,
        notes: impl Into<String>,
        resolver: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status == EscalationStatus::Resolved {
            return Err(DomainError::InvalidEscalationTransition {
                from: self.status,
                to: EscalationStatus::Resolved,
            });
        }
        let outcome = outcome.ok_or(DomainError::MissingResolutionOutcome)?;
        if resolver.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "resolution requires a resolver id".to_string(),
            ));
        }

        self.status = EscalationStatus::Resolved;
        self.resolution_outcome = Some(outcome);
        self.resolution_notes = Some(notes.into());
        self.resolved_by = Some(resolver.trim().to_string());
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Recomputed on every read from the stored deadline. There is no stored
    /// breach flag, so the answer always agrees with the wall clock.
    pub fn is_sla_breached(&self, now: DateTime<Utc>) -> bool {
        self.status != EscalationStatus::Resolved && now > self.sla_due_at
    }

    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.sla_due_at - now).num_minutes()
    }
}

/// One row of the append-only transition history kept for each task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTransition {
    pub id: String,
    pub task_id: EscalationTaskId,
    pub from_status: Option<EscalationStatus>,
    pub to_status: EscalationStatus,
    pub actor: String,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl EscalationTransition {
    pub fn record(
        task_id: &EscalationTaskId,
        from_status: Option<EscalationStatus>,
        to_status: EscalationStatus,
        actor: impl Into<String>,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("ETR-{}", Uuid::new_v4()),
            task_id: task_id.clone(),
            from_status,
            to_status,
            actor: actor.into(),
            note,
            occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        sla_minutes_for_label, AssignmentOutcome, EscalationStatus, EscalationTask,
        NewEscalation, Priority, ResolutionOutcome,
    };
    use crate::domain::decision::Severity;
    use crate::domain::protocol::{EpisodeId, PatientId};
    use crate::errors::DomainError;

    fn task(severity: Severity) -> EscalationTask {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp");
        EscalationTask::open(
            NewEscalation {
                episode_id: EpisodeId("EP-1".to_string()),
                patient_id: PatientId("PT-1".to_string()),
                interaction_id: None,
                severity,
                reason_codes: vec!["HF_WEIGHT_GAIN".to_string()],
                summary: "weight up".to_string(),
                idempotency_key: None,
            },
            now,
        )
    }

    #[test]
    fn sla_window_follows_severity() {
        for (severity, minutes) in [
            (Severity::Critical, 30),
            (Severity::High, 120),
            (Severity::Moderate, 240),
            (Severity::Low, 480),
        ] {
            let task = task(severity);
            assert_eq!(task.sla_due_at - task.created_at, Duration::minutes(minutes));
            assert_eq!(task.status, EscalationStatus::Open);
        }
        assert_eq!(sla_minutes_for_label("emergent"), 480);
        assert_eq!(task(Severity::Critical).priority, Priority::Urgent);
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut task = task(Severity::High);
        let due = task.sla_due_at;
        let later = task.created_at + Duration::minutes(10);

        assert_eq!(task.assign("nurse-7", later).expect("assign"), AssignmentOutcome::Assigned);
        assert_eq!(task.status, EscalationStatus::InProgress);

        task.resolve(Some(ResolutionOutcome::EducationOnly), "reviewed diet", "nurse-7", later)
            .expect("resolve");
        assert_eq!(task.status, EscalationStatus::Resolved);
        assert_eq!(task.sla_due_at, due);

        let error = task
            .resolve(Some(ResolutionOutcome::FalsePositive), "again", "nurse-7", later)
            .expect_err("resolved is terminal");
        assert!(matches!(error, DomainError::InvalidEscalationTransition { .. }));
        assert!(task.assign("nurse-8", later).is_err());
    }

    #[test]
    fn reassignment_is_a_no_op() {
        let mut task = task(Severity::Moderate);
        let now = task.created_at;
        task.assign("nurse-1", now).expect("first claim");
        let second = task.assign("nurse-2", now + Duration::minutes(1)).expect("second claim");

        assert_eq!(second, AssignmentOutcome::AlreadyAssigned { assignee: "nurse-1".to_string() });
        assert_eq!(task.assigned_to.as_deref(), Some("nurse-1"));
        assert_eq!(task.assigned_at, Some(now));
    }

    #[test]
    fn resolving_without_outcome_fails() {
        let mut task = task(Severity::Low);
        let error =
            task.resolve(None, "notes", "nurse-1", task.created_at).expect_err("needs outcome");
        assert_eq!(error, DomainError::MissingResolutionOutcome);
        assert_eq!(task.status, EscalationStatus::Open);
    }

    #[test]
    fn breach_is_derived_from_clock() {
        let mut task = task(Severity::Critical);
        let due = task.sla_due_at;

        assert!(!task.is_sla_breached(due));
        assert!(task.is_sla_breached(due + Duration::seconds(1)));
        assert_eq!(task.minutes_remaining(due - Duration::minutes(12)), 12);

        task.resolve(Some(ResolutionOutcome::SentToEd), "ED", "nurse-1", due).expect("resolve");
        assert!(!task.is_sla_breached(due + Duration::hours(5)));
    }

    #[test]
    fn outcome_labels_round_trip() {
        assert_eq!(ResolutionOutcome::parse("sent-to-ed"), Some(ResolutionOutcome::SentToEd));
        assert_eq!(
            ResolutionOutcome::parse(ResolutionOutcome::TelevisitScheduled.as_str()),
            Some(ResolutionOutcome::TelevisitScheduled)
        );
        assert_eq!(ResolutionOutcome::parse("fixed"), None);
    }
}
