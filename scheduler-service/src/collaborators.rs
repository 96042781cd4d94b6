//! Default delegation collaborators.
//!
//! The content generator and task executor are meant to be backed by
//! an LLM and a token-mediated action API respectively — both out of
//! scope for this crate. These defaults keep the draft/approve/execute
//! lifecycle fully exercisable without either: the generator renders a
//! template string, the executor just logs and reports success.

use std::collections::HashMap;

use async_trait::async_trait;
use scheduler_core::delegation::{ContentGenerator, TaskExecutor};
use scheduler_core::Draft;
use serde_json::Value;
use shared::Result;

pub struct TemplateContentGenerator;

#[async_trait]
impl ContentGenerator for TemplateContentGenerator {
    async fn generate(&self, task_type: &str, context: &HashMap<String, Value>) -> Result<String> {
        let subject = context
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("(no subject)");
        Ok(format!("[{task_type}] drafted reply regarding: {subject}"))
    }
}

pub struct LoggingTaskExecutor;

#[async_trait]
impl TaskExecutor for LoggingTaskExecutor {
    async fn execute(&self, draft: &Draft) -> Result<String> {
        tracing::info!(draft_id = %draft.id, task_type = %draft.task_type, "executing delegated task");
        Ok(format!("executed {}", draft.task_type))
    }
}

/// Calendar/mail/chat OAuth brokers are out of scope; these sources
/// report an empty world until a real adapter is wired in for a given
/// deployment. The pollers still seed their snapshots and run safely
/// against them.
pub struct EmptyCalendarSource;

#[async_trait]
impl scheduler_core::poller::CalendarSource for EmptyCalendarSource {
    async fn fetch_events(&self) -> Result<Vec<scheduler_core::poller::CalendarEvent>> {
        Ok(Vec::new())
    }
}

pub struct EmptyMailSource;

#[async_trait]
impl scheduler_core::poller::MailSource for EmptyMailSource {
    async fn fetch_messages(&self) -> Result<Vec<scheduler_core::poller::MailMessage>> {
        Ok(Vec::new())
    }
}

pub struct EmptyChatSource;

#[async_trait]
impl scheduler_core::poller::ChatSource for EmptyChatSource {
    async fn fetch_messages(&self) -> Result<Vec<scheduler_core::poller::ChatMessage>> {
        Ok(Vec::new())
    }
}

/// No LinkedIn/social OAuth broker ships with this crate; the profiler
/// runs with no posting-hours signal until a deployment wires one in.
pub struct EmptySocialSignalSource;

#[async_trait]
impl scheduler_core::profiler::SocialSignalSource for EmptySocialSignalSource {
    async fn fetch_posting_hours(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}
