//! Domain model: tasks, learned profiles, energy readings, context
//! events, disruptions, and delegation drafts.
//!
//! The buffer owns [`Task`] records; every other component holds ids
//! and looks them up on demand rather than caching references.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const BUCKET_COUNT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    P0Urgent = 0,
    P1Important = 1,
    P2Normal = 2,
    P3Background = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::P2Normal
    }
}

impl Priority {
    pub fn score(self) -> f64 {
        match self {
            Priority::P0Urgent => 10.0,
            Priority::P1Important => 7.0,
            Priority::P2Normal => 4.0,
            Priority::P3Background => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Active,
    InProgress,
    SwappedOut,
    Completed,
    Delegated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    pub energy_cost: u8,
    pub estimated_duration: u32,
    pub deadline: Option<DateTime<Utc>>,
    pub preferred_start: Option<DateTime<Utc>>,
    pub cognitive_load: u8,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub progress_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_task_type() -> String {
    "general".to_string()
}

/// Task types whose execution can be handed to the delegation worker.
pub const AUTOMATABLE_TYPES: &[&str] = &[
    "email_reply",
    "slack_message",
    "linkedin_post",
    "meeting_reschedule",
    "cancel_appointment",
    "doc_update",
];

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            energy_cost: 3,
            estimated_duration: 30,
            deadline: None,
            preferred_start: None,
            cognitive_load: 3,
            task_type: default_task_type(),
            status: TaskStatus::Backlog,
            tags: Vec::new(),
            progress_notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_automatable(&self) -> bool {
        AUTOMATABLE_TYPES.contains(&self.task_type.as_str())
    }

    fn hours_until(&self, instant: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        (instant - now).num_seconds() as f64 / 3600.0
    }

    /// `min(10, 10 / max(hours_to_deadline, 0.1))`; `0` absent a deadline.
    pub fn deadline_urgency_at(&self, now: DateTime<Utc>) -> f64 {
        match self.deadline {
            None => 0.0,
            Some(deadline) => {
                let hours_remaining = self.hours_until(deadline, now).max(0.1);
                (10.0_f64 / hours_remaining).min(10.0)
            }
        }
    }

    pub fn deadline_urgency(&self) -> f64 {
        self.deadline_urgency_at(Utc::now())
    }

    /// `min(10, 100 / max(estimated_duration, 1))`.
    pub fn execution_time_score(&self) -> f64 {
        let duration = self.estimated_duration.max(1) as f64;
        (100.0 / duration).min(10.0)
    }

    /// Neutral 5 absent a preferred start; 10 if it has already passed;
    /// otherwise the same inverse-hour curve used for deadline urgency.
    pub fn preferred_start_score_at(&self, now: DateTime<Utc>) -> f64 {
        match self.preferred_start {
            None => 5.0,
            Some(start) => {
                let hours_until = self.hours_until(start, now);
                if hours_until <= 0.0 {
                    10.0
                } else {
                    (10.0_f64 / hours_until.max(0.1)).min(10.0)
                }
            }
        }
    }

    pub fn preferred_start_score(&self) -> f64 {
        self.preferred_start_score_at(Utc::now())
    }

    /// `floor(0.45*urgency + 0.30*exec_score + 0.25*preferred_score) mod 16`.
    pub fn bucket_at(&self, now: DateTime<Utc>) -> u32 {
        let composite = 0.45 * self.deadline_urgency_at(now)
            + 0.30 * self.execution_time_score()
            + 0.25 * self.preferred_start_score_at(now);
        (composite.floor() as i64).rem_euclid(BUCKET_COUNT as i64) as u32
    }

    pub fn bucket(&self) -> u32 {
        self.bucket_at(Utc::now())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub peak_hours: Vec<u8>,
    pub avg_task_durations: HashMap<String, f64>,
    pub energy_curve: [u8; 24],
    pub adherence_score: f64,
    pub estimation_bias: f64,
    pub distraction_patterns: HashMap<String, f64>,
    pub automation_comfort: HashMap<String, f64>,
    pub archetype: Archetype,
}

/// Circadian baseline blended with observed activity in the profiler.
pub const DEFAULT_ENERGY_CURVE: [u8; 24] = [
    1, 1, 1, 1, 1, 1, 2, 3, 4, 4, 5, 4, 3, 3, 4, 5, 4, 3, 3, 2, 2, 2, 1, 1,
];

pub const DEFAULT_PEAK_HOURS: [u8; 4] = [9, 10, 14, 15];

impl Default for UserProfile {
    fn default() -> Self {
        let mut automation_comfort = HashMap::new();
        automation_comfort.insert("email".to_string(), 0.9);
        automation_comfort.insert("slack".to_string(), 0.8);
        automation_comfort.insert("booking".to_string(), 0.5);

        let mut avg_task_durations = HashMap::new();
        avg_task_durations.insert("email".to_string(), 5.0);
        avg_task_durations.insert("deep_work".to_string(), 52.0);
        avg_task_durations.insert("admin".to_string(), 15.0);
        avg_task_durations.insert("meeting".to_string(), 30.0);

        Self {
            peak_hours: DEFAULT_PEAK_HOURS.to_vec(),
            avg_task_durations,
            energy_curve: DEFAULT_ENERGY_CURVE,
            adherence_score: 0.7,
            estimation_bias: 1.2,
            distraction_patterns: HashMap::new(),
            automation_comfort,
            archetype: Archetype::AtRisk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    CompoundingBuilder,
    ReliableOperator,
    EmergingTalent,
    AtRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergySource {
    UserReported,
    Inferred,
    TimeBased,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyLevel {
    pub level: u8,
    pub confidence: f64,
    pub source: EnergySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEventType {
    MeetingEndedEarly,
    MeetingOverrun,
    CancelledMeeting,
    ScheduleConflict,
    NewEmail,
    SlackUrgentMessage,
    TaskCompleted,
    NewCalendarEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChangeEvent {
    pub event_type: ContextEventType,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub affected_task_ids: Vec<Uuid>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn escalate(self) -> Self {
        match self {
            Severity::Minor => Severity::Major,
            Severity::Major => Severity::Critical,
            Severity::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    SwapIn,
    SwapOut,
    RescheduleAll,
    Delegate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisruptionEvent {
    pub severity: Severity,
    pub affected_task_ids: Vec<Uuid>,
    pub freed_minutes: i64,
    pub recommended_action: RecommendedAction,
    pub context_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Executed,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub task_id: Uuid,
    pub task_type: String,
    pub recipient: Option<String>,
    pub channel: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub status: DraftStatus,
    pub cost_units: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationTask {
    pub id: Uuid,
    pub task_id: Uuid,
    pub task_type: String,
    pub context: HashMap<String, serde_json::Value>,
    pub approval_required: bool,
    pub max_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Executed,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: Uuid,
    pub status: CompletionStatus,
    pub result: Option<String>,
    pub cost_units: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn deadline_urgency_is_zero_without_a_deadline() {
        let task = Task::new("no deadline");
        assert_eq!(task.deadline_urgency(), 0.0);
    }

    #[test]
    fn deadline_urgency_caps_at_ten_when_imminent() {
        let mut task = Task::new("urgent");
        let now = Utc::now();
        task.deadline = Some(now + Duration::minutes(1));
        assert_eq!(task.deadline_urgency_at(now), 10.0);
    }

    #[test]
    fn execution_time_score_shrinks_with_duration() {
        let mut task = Task::new("long");
        task.estimated_duration = 200;
        assert!(task.execution_time_score() < 1.0);
    }

    #[test]
    fn preferred_start_score_is_neutral_when_absent() {
        let task = Task::new("no preference");
        assert_eq!(task.preferred_start_score(), 5.0);
    }

    #[test]
    fn preferred_start_score_is_ten_when_past() {
        let mut task = Task::new("overdue preference");
        let now = Utc::now();
        task.preferred_start = Some(now - Duration::hours(1));
        assert_eq!(task.preferred_start_score_at(now), 10.0);
    }

    #[test]
    fn bucket_is_within_range() {
        let task = Task::new("bucketed");
        assert!(task.bucket() < BUCKET_COUNT);
    }

    #[test]
    fn automatable_types_recognized() {
        let mut task = Task::new("reply");
        task.task_type = "email_reply".to_string();
        assert!(task.is_automatable());
        task.task_type = "deep_work".to_string();
        assert!(!task.is_automatable());
    }
}
