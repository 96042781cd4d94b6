//! Context Poller: one single-writer poller per external source
//! (calendar, mail, chat), diffing against a last-observed snapshot
//! kept in the KV substrate and emitting `ContextChangeEvent`s.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{KvStore, Result};
use uuid::Uuid;

use crate::buffer::TaskBuffer;
use crate::types::{ContextChangeEvent, ContextEventType};

const URGENT_KEYWORDS: &[&str] = &["urgent", "asap", "deadline", "blocked", "critical", "p0", "hotfix"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub snippet: String,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub channel: String,
    pub user: String,
    pub text: String,
}

/// The opaque pollable upstream (calendar/mail/chat OAuth broker). Out
/// of scope for this crate; callers provide an adapter.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch_events(&self) -> Result<Vec<CalendarEvent>>;
}

#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_messages(&self) -> Result<Vec<MailMessage>>;
}

#[async_trait]
pub trait ChatSource: Send + Sync {
    async fn fetch_messages(&self) -> Result<Vec<ChatMessage>>;
}

fn snapshot_key(source: &str) -> String {
    format!("sentinel:{source}")
}

async fn load_snapshot<K: KvStore, T: for<'de> Deserialize<'de>>(
    kv: &K,
    source: &str,
) -> Result<Option<Vec<T>>> {
    match kv.string_get(&snapshot_key(source)).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

async fn store_snapshot<K: KvStore, T: Serialize>(kv: &K, source: &str, events: &[T]) -> Result<()> {
    kv.string_set(&snapshot_key(source), &serde_json::to_string(events)?).await
}

/// Polls the calendar source once. Seed poll (no cache) populates the
/// snapshot and emits nothing. Subsequent polls diff by event id.
pub async fn poll_calendar<K: KvStore, S: CalendarSource>(
    kv: &K,
    buffer: &TaskBuffer<K>,
    source: &S,
) -> Result<Vec<ContextChangeEvent>> {
    let current = source.fetch_events().await?;
    let cached: Option<Vec<CalendarEvent>> = load_snapshot(kv, "calendar").await?;
    let now = Utc::now();

    let events = match cached {
        None => Vec::new(),
        Some(cached) => diff_calendar(&current, &cached, buffer, now).await?,
    };

    store_snapshot(kv, "calendar", &current).await?;
    Ok(events)
}

async fn diff_calendar<K: KvStore>(
    current: &[CalendarEvent],
    cached: &[CalendarEvent],
    buffer: &TaskBuffer<K>,
    now: DateTime<Utc>,
) -> Result<Vec<ContextChangeEvent>> {
    let mut events = Vec::new();

    for ev in current {
        match cached.iter().find(|c| c.id == ev.id) {
            None => events.push(ContextChangeEvent {
                event_type: ContextEventType::NewCalendarEvent,
                source: "calendar".to_string(),
                timestamp: now,
                affected_task_ids: Vec::new(),
                metadata: HashMap::new(),
            }),
            Some(prev) => {
                if prev.start != ev.start || prev.end != ev.end {
                    let event_type = if ev.end < prev.end {
                        ContextEventType::MeetingEndedEarly
                    } else {
                        ContextEventType::ScheduleConflict
                    };
                    let affected = find_affected_tasks(buffer, ev.start, ev.end).await?;
                    events.push(ContextChangeEvent {
                        event_type,
                        source: "calendar".to_string(),
                        timestamp: now,
                        affected_task_ids: affected,
                        metadata: HashMap::new(),
                    });
                }
            }
        }
    }

    for prev in cached {
        if !current.iter().any(|c| c.id == prev.id) {
            let affected = find_affected_tasks(buffer, prev.start, prev.end).await?;
            events.push(ContextChangeEvent {
                event_type: ContextEventType::CancelledMeeting,
                source: "calendar".to_string(),
                timestamp: now,
                affected_task_ids: affected,
                metadata: HashMap::new(),
            });
        }
    }

    Ok(events)
}

/// Active tasks whose preferred start falls within the event interval.
async fn find_affected_tasks<K: KvStore>(
    buffer: &TaskBuffer<K>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let active = buffer.list_active().await?;
    Ok(active
        .into_iter()
        .filter(|t| t.preferred_start.map(|ps| ps >= start && ps <= end).unwrap_or(false))
        .map(|t| t.id)
        .collect())
}

pub async fn poll_mail<K: KvStore, S: MailSource>(kv: &K, source: &S) -> Result<Vec<ContextChangeEvent>> {
    let current = source.fetch_messages().await?;
    let cached: Option<Vec<MailMessage>> = load_snapshot(kv, "mail").await?;
    let now = Utc::now();

    let events = match cached {
        None => Vec::new(),
        Some(cached) => current
            .iter()
            .filter(|m| !cached.iter().any(|c| c.id == m.id))
            .map(|m| ContextChangeEvent {
                event_type: ContextEventType::NewEmail,
                source: "mail".to_string(),
                timestamp: now,
                affected_task_ids: Vec::new(),
                metadata: HashMap::from([
                    ("message_id".to_string(), json!(m.id)),
                    ("subject".to_string(), json!(m.subject)),
                    ("from".to_string(), json!(m.from)),
                    ("urgent".to_string(), json!(m.urgent)),
                ]),
            })
            .collect(),
    };

    store_snapshot(kv, "mail", &current).await?;
    Ok(events)
}

fn is_urgent_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    URGENT_KEYWORDS.iter().any(|kw| lower.contains(kw)) || text.contains('@')
}

pub async fn poll_chat<K: KvStore, S: ChatSource>(kv: &K, source: &S) -> Result<Vec<ContextChangeEvent>> {
    let current = source.fetch_messages().await?;
    let cached: Option<Vec<ChatMessage>> = load_snapshot(kv, "chat").await?;
    let now = Utc::now();

    let events = match cached {
        None => Vec::new(),
        Some(cached) => current
            .iter()
            .filter(|m| !cached.iter().any(|c| c.id == m.id) && is_urgent_text(&m.text))
            .map(|m| ContextChangeEvent {
                event_type: ContextEventType::SlackUrgentMessage,
                source: "chat".to_string(),
                timestamp: now,
                affected_task_ids: Vec::new(),
                metadata: HashMap::from([
                    ("message_id".to_string(), json!(m.id)),
                    ("channel".to_string(), json!(m.channel)),
                    ("user".to_string(), json!(m.user)),
                    ("text".to_string(), json!(m.text)),
                    ("urgent".to_string(), json!(true)),
                ]),
            })
            .collect(),
    };

    store_snapshot(kv, "chat", &current).await?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MemoryKv;

    struct FixedCalendar(Vec<CalendarEvent>);

    #[async_trait]
    impl CalendarSource for FixedCalendar {
        async fn fetch_events(&self) -> Result<Vec<CalendarEvent>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn first_poll_emits_nothing_and_seeds_cache() {
        let kv = MemoryKv::new();
        let buffer = TaskBuffer::new(kv.clone());
        let now = Utc::now();
        let source = FixedCalendar(vec![CalendarEvent {
            id: "e1".to_string(),
            start: now,
            end: now + chrono::Duration::hours(1),
        }]);

        let events = poll_calendar(&kv, &buffer, &source).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn second_poll_with_earlier_end_emits_meeting_ended_early() {
        let kv = MemoryKv::new();
        let buffer = TaskBuffer::new(kv.clone());
        let now = Utc::now();
        let original_end = now + chrono::Duration::hours(1);
        let first = FixedCalendar(vec![CalendarEvent {
            id: "e1".to_string(),
            start: now,
            end: original_end,
        }]);
        poll_calendar(&kv, &buffer, &first).await.unwrap();

        let second = FixedCalendar(vec![CalendarEvent {
            id: "e1".to_string(),
            start: now,
            end: original_end - chrono::Duration::minutes(20),
        }]);
        let events = poll_calendar(&kv, &buffer, &second).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ContextEventType::MeetingEndedEarly);
    }

    #[tokio::test]
    async fn missing_event_id_is_treated_as_cancelled_meeting() {
        let kv = MemoryKv::new();
        let buffer = TaskBuffer::new(kv.clone());
        let now = Utc::now();
        let first = FixedCalendar(vec![CalendarEvent {
            id: "e1".to_string(),
            start: now,
            end: now + chrono::Duration::hours(1),
        }]);
        poll_calendar(&kv, &buffer, &first).await.unwrap();

        let second = FixedCalendar(vec![]);
        let events = poll_calendar(&kv, &buffer, &second).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ContextEventType::CancelledMeeting);
    }

    #[test]
    fn urgent_detection_matches_keywords_and_mentions() {
        assert!(is_urgent_text("this is ASAP please"));
        assert!(is_urgent_text("cc @bob"));
        assert!(!is_urgent_text("just a regular update"));
    }
}
