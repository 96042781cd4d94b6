//! Application state: the scheduling kernel, the KV/pub-sub handle,
//! and the broadcast channel that fans schedule/disruption/energy
//! events out to connected WebSocket clients.

use std::sync::Arc;

use chrono::Utc;
use scheduler_core::delegation::{ContentGenerator, TaskExecutor};
use scheduler_core::profiler::SocialSignalSource;
use scheduler_core::{EnergyMonitor, SchedulerKernel, Task, TaskStatus};
use serde::Serialize;
use serde_json::json;
use shared::keys::EVENTS_CHANNEL;
use shared::{AppConfig, KvStore, MetricsRegistry, RedisKv, Result, SchedulerError};
use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::collaborators::{EmptySocialSignalSource, LoggingTaskExecutor, TemplateContentGenerator};

pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

pub struct AppState {
    pub kernel: Arc<SchedulerKernel<RedisKv>>,
    pub kv: RedisKv,
    pub config: AppConfig,
    pub energy_level: RwLock<u8>,
    pub outbound: broadcast::Sender<String>,
    pub content_generator: Arc<dyn ContentGenerator>,
    pub task_executor: Arc<dyn TaskExecutor>,
    pub social_signal_source: Arc<dyn SocialSignalSource>,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let kv = RedisKv::connect(&config.kv.url).await?;
        let kernel = Arc::new(SchedulerKernel::new(kv.clone()));
        kernel.hydrate_profile().await?;
        let (outbound, _rx) = broadcast::channel(OUTBOUND_CHANNEL_CAPACITY);
        let energy_level = RwLock::new(config.scheduling.default_energy_level);
        let metrics = MetricsRegistry::install()?;

        Ok(Self {
            kernel,
            kv,
            config,
            energy_level,
            outbound,
            content_generator: Arc::new(TemplateContentGenerator),
            task_executor: Arc::new(LoggingTaskExecutor),
            social_signal_source: Arc::new(EmptySocialSignalSource),
            metrics,
        })
    }

    pub async fn is_ready(&self) -> bool {
        self.kv.health_check().await.is_ok()
    }

    /// Publishes a `{type, payload, timestamp}` envelope to both the
    /// in-process WebSocket fan-out and the shared events channel, so
    /// the api-gateway relay and any same-process clients agree.
    pub async fn broadcast<T: Serialize>(&self, event_type: &str, payload: T) -> Result<()> {
        let envelope = json!({
            "type": event_type,
            "payload": payload,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let text = envelope.to_string();
        let _ = self.outbound.send(text.clone());
        self.kv.publish(EVENTS_CHANNEL, &text).await
    }

    pub async fn agent_activity(&self, agent: &str, message: &str, activity_type: &str) -> Result<()> {
        self.broadcast(
            "agent_activity",
            json!({ "agent": agent, "message": message, "type": activity_type }),
        )
        .await
    }

    pub async fn peak_hours(&self) -> Vec<u8> {
        self.kernel.peak_hours.read().await.clone()
    }

    /// Pulls the social-signal collaborator and rebuilds/persists the
    /// profile. Delegation outcomes aren't tracked as a rolling log yet
    /// (automation comfort starts from `UserProfile::default()` and
    /// adjusts per-approval instead), so this always recomputes with an
    /// empty outcomes slice.
    pub async fn recompute_profile(&self) -> Result<scheduler_core::profiler::ArchetypeClassification> {
        let social_posting_hours = self.social_signal_source.fetch_posting_hours().await?;
        self.kernel
            .recompute_profile(
                &social_posting_hours,
                scheduler_core::profiler::DEFAULT_SELF_AWARENESS,
                &[],
                Utc::now(),
            )
            .await
    }

    pub async fn energy_level(&self) -> u8 {
        *self.energy_level.read().await
    }

    pub async fn set_energy_level(&self, level: u8) {
        *self.energy_level.write().await = level.clamp(1, 5);
    }

    /// Transitions a task from `Active` to `InProgress`. Shared by the
    /// `POST .../start` handler and the websocket `start_task` voice
    /// command so both paths apply the same invariant.
    pub async fn start_task(&self, id: Uuid) -> Result<Task> {
        let mut task = self
            .kernel
            .buffer
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("task", id.to_string()))?;
        if !matches!(task.status, TaskStatus::Active) {
            return Err(SchedulerError::conflict(format!("task {id} is not active")));
        }
        task.status = TaskStatus::InProgress;
        task.touch();
        self.kernel.buffer.put(&task).await?;
        metrics::counter!("scheduler_tasks_started_total").increment(1);
        Ok(task)
    }

    /// Marks a task completed, records the actual-vs-estimated duration
    /// for the Energy Monitor and the Profiler, and triggers a profile
    /// recompute. Shared by the REST handler and the websocket
    /// `complete_task` voice command.
    pub async fn complete_task(&self, id: Uuid) -> Result<Task> {
        let mut task = self
            .kernel
            .buffer
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("task", id.to_string()))?;

        let now = Utc::now();
        let actual_minutes = (now - task.updated_at).num_minutes().max(1) as u32;
        task.status = TaskStatus::Completed;
        task.touch();
        self.kernel.buffer.put(&task).await?;

        EnergyMonitor::record_completion(&self.kv, &task.id.to_string(), actual_minutes, task.estimated_duration, now)
            .await?;
        scheduler_core::profiler::record_task_completion(
            &self.kv,
            &scheduler_core::profiler::TaskCompletionRecord {
                actual_minutes: actual_minutes as f64,
                estimated_minutes: task.estimated_duration as f64,
                completed_at: now,
            },
            now,
        )
        .await?;
        if let Err(err) = self.recompute_profile().await {
            warn!(error = %err, task_id = %id, "profile recompute after task completion failed");
        }

        self.broadcast("agent_activity", json!({ "agent": "sts", "message": "task completed", "type": "info" }))
            .await?;
        metrics::counter!("scheduler_tasks_completed_total").increment(1);
        Ok(task)
    }

    /// Pushes a task's `preferred_start` back by `minutes`, the one
    /// time-shaped field this domain model has for "when work on this
    /// should start" (there is no standalone `Reminder` type — spec's
    /// WS `reminder` event and `snooze_reminder` voice command both key
    /// off task timing, not a separate entity). Broadcasts a `reminder`
    /// event so connected clients update without a full schedule poll.
    pub async fn snooze_task(&self, id: Uuid, minutes: u32) -> Result<Task> {
        let mut task = self
            .kernel
            .buffer
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("task", id.to_string()))?;
        let base = task.preferred_start.unwrap_or(Utc::now());
        task.preferred_start = Some(base + chrono::Duration::minutes(minutes as i64));
        task.touch();
        self.kernel.buffer.put(&task).await?;

        self.broadcast(
            "reminder",
            json!({ "task_id": id, "snoozed_minutes": minutes, "next_reminder_at": task.preferred_start }),
        )
        .await?;
        Ok(task)
    }
}

/// A lightweight, frontend-facing projection of a [`Task`].
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: uuid::Uuid,
    pub title: String,
    pub status: String,
    pub priority: scheduler_core::Priority,
    pub estimated_duration: u32,
    pub delegatable: bool,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            status: format!("{:?}", task.status),
            priority: task.priority,
            estimated_duration: task.estimated_duration,
            delegatable: task.is_automatable(),
        }
    }
}
