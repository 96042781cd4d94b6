//! Disruption Classifier: pure functions mapping a context event to a
//! severity and a recommended scheduling action.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{ContextEventType, RecommendedAction, Severity};

struct Rule {
    base: Severity,
    escalate_if_tasks_affected: Option<usize>,
    escalate_if_urgent: bool,
}

fn rule_for(event_type: ContextEventType) -> Rule {
    use ContextEventType::*;
    match event_type {
        MeetingEndedEarly => Rule {
            base: Severity::Minor,
            escalate_if_tasks_affected: Some(3),
            escalate_if_urgent: false,
        },
        CancelledMeeting => Rule {
            base: Severity::Minor,
            escalate_if_tasks_affected: None,
            escalate_if_urgent: false,
        },
        ScheduleConflict => Rule {
            base: Severity::Major,
            escalate_if_tasks_affected: Some(4),
            escalate_if_urgent: false,
        },
        MeetingOverrun => Rule {
            base: Severity::Major,
            escalate_if_tasks_affected: Some(3),
            escalate_if_urgent: false,
        },
        NewEmail => Rule {
            base: Severity::Minor,
            escalate_if_tasks_affected: None,
            escalate_if_urgent: true,
        },
        TaskCompleted => Rule {
            base: Severity::Minor,
            escalate_if_tasks_affected: None,
            escalate_if_urgent: false,
        },
        SlackUrgentMessage => Rule {
            base: Severity::Minor,
            escalate_if_tasks_affected: None,
            escalate_if_urgent: true,
        },
        NewCalendarEvent => Rule {
            base: Severity::Minor,
            escalate_if_tasks_affected: None,
            escalate_if_urgent: false,
        },
    }
}

/// Base severity from the rules table, escalated one level per
/// matching trigger (affected-task threshold, then an urgent flag).
pub fn classify_severity(
    event_type: ContextEventType,
    affected_task_ids: &[uuid::Uuid],
    metadata: &HashMap<String, Value>,
) -> Severity {
    let rule = rule_for(event_type);
    let mut severity = rule.base;

    if let Some(threshold) = rule.escalate_if_tasks_affected {
        if affected_task_ids.len() >= threshold {
            severity = severity.escalate();
        }
    }

    if rule.escalate_if_urgent && metadata.get("urgent").and_then(Value::as_bool).unwrap_or(false) {
        severity = severity.escalate();
    }

    severity
}

fn metadata_int(metadata: &HashMap<String, Value>, key: &str, default: i64) -> i64 {
    metadata.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn metadata_bool(metadata: &HashMap<String, Value>, key: &str) -> bool {
    metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Signed minutes of time impact, per the rules table.
pub fn calculate_freed_minutes(event_type: ContextEventType, metadata: &HashMap<String, Value>) -> i64 {
    use ContextEventType::*;
    match event_type {
        MeetingEndedEarly | CancelledMeeting => metadata_int(metadata, "freed_minutes", 15).max(0),
        MeetingOverrun | ScheduleConflict => -metadata_int(metadata, "lost_minutes", 30).abs(),
        TaskCompleted => metadata_int(metadata, "saved_minutes", 0).max(0),
        NewEmail => {
            if metadata_bool(metadata, "urgent") {
                -15
            } else {
                0
            }
        }
        SlackUrgentMessage | NewCalendarEvent => 0,
    }
}

/// `critical` always reschedules everything; otherwise the sign of
/// `freed_minutes` picks swap-in, swap-out, or (on major with a time
/// loss) delegation.
pub fn determine_action(severity: Severity, freed_minutes: i64) -> RecommendedAction {
    if severity == Severity::Critical {
        return RecommendedAction::RescheduleAll;
    }
    if freed_minutes > 0 {
        return RecommendedAction::SwapIn;
    }
    if freed_minutes < 0 {
        return if severity == Severity::Major {
            RecommendedAction::SwapOut
        } else {
            RecommendedAction::Delegate
        };
    }
    RecommendedAction::SwapIn
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meeting_ended_early_escalates_at_three_affected() {
        let ids = vec![uuid::Uuid::new_v4(); 3];
        let severity = classify_severity(ContextEventType::MeetingEndedEarly, &ids, &HashMap::new());
        assert_eq!(severity, Severity::Major);
    }

    #[test]
    fn meeting_ended_early_stays_minor_below_threshold() {
        let ids = vec![uuid::Uuid::new_v4()];
        let severity = classify_severity(ContextEventType::MeetingEndedEarly, &ids, &HashMap::new());
        assert_eq!(severity, Severity::Minor);
    }

    #[test]
    fn urgent_email_escalates_to_major() {
        let mut metadata = HashMap::new();
        metadata.insert("urgent".to_string(), json!(true));
        let severity = classify_severity(ContextEventType::NewEmail, &[], &metadata);
        assert_eq!(severity, Severity::Major);
    }

    #[test]
    fn meeting_overrun_escalates_to_critical_at_threshold() {
        let ids = vec![uuid::Uuid::new_v4(); 3];
        let severity = classify_severity(ContextEventType::MeetingOverrun, &ids, &HashMap::new());
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn freed_minutes_default_when_metadata_missing() {
        let freed = calculate_freed_minutes(ContextEventType::MeetingEndedEarly, &HashMap::new());
        assert_eq!(freed, 15);
    }

    #[test]
    fn schedule_conflict_is_negative() {
        let mut metadata = HashMap::new();
        metadata.insert("lost_minutes".to_string(), json!(45));
        let freed = calculate_freed_minutes(ContextEventType::ScheduleConflict, &metadata);
        assert_eq!(freed, -45);
    }

    #[test]
    fn determine_action_critical_always_reschedules() {
        assert_eq!(
            determine_action(Severity::Critical, 20),
            RecommendedAction::RescheduleAll
        );
    }

    #[test]
    fn determine_action_negative_major_swaps_out() {
        assert_eq!(determine_action(Severity::Major, -10), RecommendedAction::SwapOut);
    }

    #[test]
    fn determine_action_negative_minor_delegates() {
        assert_eq!(determine_action(Severity::Minor, -10), RecommendedAction::Delegate);
    }
}
