//! REST surface: health, schedule, plan-day, disruption pipeline,
//! energy, task CRUD, and delegation drafts.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use scheduler_core::{
    calculate_freed_minutes, classify_severity, determine_action, ContextEventType, Draft, DraftStatus,
    EnergyMonitor, Priority, Task,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{Result, SchedulerError};
use uuid::Uuid;
use validator::Validate;

use crate::state::{AppState, TaskView};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn readiness(State(state): State<Arc<AppState>>) -> (axum::http::StatusCode, Json<Value>) {
    if state.is_ready().await {
        (axum::http::StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready" })),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub tasks: Vec<TaskView>,
    pub backlog_count: usize,
    pub energy: scheduler_core::EnergyLevel,
    pub queue_counts: scheduler_core::sts::QueueCounts,
}

pub async fn get_schedule(State(state): State<Arc<AppState>>) -> Result<Json<ScheduleResponse>> {
    let energy = state.energy_level().await;
    let schedule = state.kernel.ordered_schedule(energy).await;
    let backlog = state.kernel.buffer.list_backlog().await?;
    let queue_counts = state.kernel.sts.read().await.queue_counts();
    let current_energy = EnergyMonitor::cached(&state.kv).await?;

    Ok(Json(ScheduleResponse {
        tasks: schedule.iter().map(TaskView::from).collect(),
        backlog_count: backlog.len(),
        energy: current_energy,
        queue_counts,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlanDayRequest {
    #[serde(default = "default_available_hours")]
    #[validate(range(min = 0.1, max = 24.0))]
    pub available_hours: f64,
}

fn default_available_hours() -> f64 {
    8.0
}

pub async fn plan_day(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlanDayRequest>,
) -> Result<Json<Vec<TaskView>>> {
    req.validate().map_err(|e| SchedulerError::invalid_input(e.to_string()))?;
    let bias = state.kernel.estimation_bias().await;
    let selected = state.kernel.plan_day(req.available_hours, bias).await?;
    state
        .broadcast(
            "updated_schedule",
            json!({ "tasks": selected.iter().map(TaskView::from).collect::<Vec<_>>() }),
        )
        .await?;
    Ok(Json(selected.iter().map(TaskView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct DisruptionRequest {
    pub event_type: ContextEventType,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub affected_task_ids: Vec<Uuid>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct DisruptionResponse {
    pub severity: scheduler_core::Severity,
    pub recommended_action: scheduler_core::RecommendedAction,
    pub freed_minutes: i64,
    pub swapped_in: Vec<TaskView>,
    pub swapped_out: Vec<TaskView>,
    pub delegated: Vec<TaskView>,
}

/// The disruption pipeline: classify severity and time impact, decide
/// an action, apply it, then broadcast both the disruption and the
/// resulting schedule.
pub async fn post_disruption(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DisruptionRequest>,
) -> Result<Json<DisruptionResponse>> {
    let severity = classify_severity(req.event_type, &req.affected_task_ids, &req.metadata);
    let freed_minutes = calculate_freed_minutes(req.event_type, &req.metadata);
    let action = determine_action(severity, freed_minutes);
    let energy = state.energy_level().await;
    metrics::counter!("scheduler_disruptions_total", "severity" => format!("{severity:?}")).increment(1);

    state
        .broadcast(
            "disruption_event",
            json!({
                "severity": severity,
                "affected_task_ids": req.affected_task_ids,
                "freed_minutes": freed_minutes,
                "recommended_action": action,
                "context_summary": format!("{:?} from {}", req.event_type, req.source),
            }),
        )
        .await?;

    let result = if action == scheduler_core::RecommendedAction::RescheduleAll {
        let bias = state.kernel.estimation_bias().await;
        let selected = state.kernel.plan_day(state.config.scheduling.default_available_hours, bias).await?;
        let mut sts = state.kernel.sts.write().await;
        let delegated = sts.auto_delegate_p3(energy);
        drop(sts);
        for task in &delegated {
            state.kernel.buffer.put(task).await?;
        }
        scheduler_core::SwapResult {
            swapped_in: selected,
            delegated,
            summary: "Rescheduled the day".to_string(),
            ..Default::default()
        }
    } else {
        state.kernel.apply_disruption(freed_minutes, energy).await?
    };

    state
        .agent_activity(
            "mts",
            &result.summary,
            "info",
        )
        .await?;

    let schedule = state.kernel.ordered_schedule(energy).await;
    state
        .broadcast(
            "updated_schedule",
            json!({ "tasks": schedule.iter().map(TaskView::from).collect::<Vec<_>>() }),
        )
        .await?;

    Ok(Json(DisruptionResponse {
        severity,
        recommended_action: action,
        freed_minutes,
        swapped_in: result.swapped_in.iter().map(TaskView::from).collect(),
        swapped_out: result.swapped_out.iter().map(TaskView::from).collect(),
        delegated: result.delegated.iter().map(TaskView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct EnergyRequest {
    pub level: u8,
}

pub async fn post_energy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnergyRequest>,
) -> Result<Json<scheduler_core::EnergyLevel>> {
    if !(1..=5).contains(&req.level) {
        return Err(SchedulerError::invalid_input("energy level must be between 1 and 5"));
    }
    let now = Utc::now();
    EnergyMonitor::record_user_reported(&state.kv, req.level, now).await?;
    state.set_energy_level(req.level).await;

    if req.level <= 2 {
        let mut sts = state.kernel.sts.write().await;
        let delegated = sts.auto_delegate_p3(req.level);
        drop(sts);
        for task in &delegated {
            state.kernel.buffer.put(task).await?;
        }
    }

    let level = EnergyMonitor::compute(&state.kv, None, now).await?;
    state
        .broadcast(
            "energy_update",
            json!({ "level": level.level, "confidence": level.confidence, "source": level.source }),
        )
        .await?;
    Ok(Json(level))
}

pub async fn get_energy_status(State(state): State<Arc<AppState>>) -> Result<Json<scheduler_core::EnergyLevel>> {
    Ok(Json(EnergyMonitor::cached(&state.kv).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_energy_cost")]
    pub energy_cost: u8,
    #[serde(default = "default_duration")]
    pub estimated_duration: u32,
    pub deadline: Option<chrono::DateTime<Utc>>,
    pub preferred_start: Option<chrono::DateTime<Utc>>,
    #[serde(default = "default_cognitive_load")]
    pub cognitive_load: u8,
    #[serde(default)]
    pub task_type: String,
}

fn default_energy_cost() -> u8 {
    3
}
fn default_duration() -> u32 {
    30
}
fn default_cognitive_load() -> u8 {
    3
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<TaskView>> {
    req.validate().map_err(|e| SchedulerError::invalid_input(e.to_string()))?;
    let mut task = Task::new(req.title);
    task.description = req.description;
    task.priority = req.priority;
    task.energy_cost = req.energy_cost.clamp(1, 5);
    task.estimated_duration = req.estimated_duration.max(1);
    task.deadline = req.deadline;
    task.preferred_start = req.preferred_start;
    task.cognitive_load = req.cognitive_load.clamp(1, 5);
    if !req.task_type.is_empty() {
        task.task_type = req.task_type;
    }
    state.kernel.buffer.put(&task).await?;
    metrics::counter!("scheduler_tasks_created_total").increment(1);
    Ok(Json(TaskView::from(&task)))
}

pub async fn start_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<TaskView>> {
    let task = state.start_task(id).await?;
    Ok(Json(TaskView::from(&task)))
}

pub async fn complete_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<TaskView>> {
    let task = state.complete_task(id).await?;
    Ok(Json(TaskView::from(&task)))
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub profile: scheduler_core::UserProfile,
    pub archetype: scheduler_core::Archetype,
}

/// Full learned profile (§6 "Profile endpoints (full profile, ...)"):
/// the same `UserProfile` `plan_day`/the Energy Monitor read, served
/// back for a client to inspect.
pub async fn get_profile(State(state): State<Arc<AppState>>) -> Result<Json<ProfileResponse>> {
    let profile = state.kernel.profile_snapshot().await;
    Ok(Json(ProfileResponse {
        archetype: profile.archetype,
        profile,
    }))
}

#[derive(Debug, Serialize)]
pub struct LinkedinProfileResponse {
    pub posting_hours: Vec<u8>,
    pub peak_hours: Vec<u8>,
}

/// The LinkedIn/social-activity slice of the profile (§6 "... linkedin
/// profile"): the posting-hours signal the profiler folds into peak
/// hours and the energy curve. Empty absent a real social OAuth
/// collaborator (see [`crate::collaborators::EmptySocialSignalSource`]).
pub async fn get_linkedin_profile(State(state): State<Arc<AppState>>) -> Result<Json<LinkedinProfileResponse>> {
    let posting_hours = state.social_signal_source.fetch_posting_hours().await?;
    let peak_hours = state.peak_hours().await;
    Ok(Json(LinkedinProfileResponse { posting_hours, peak_hours }))
}

#[derive(Debug, Serialize)]
pub struct ScheduleIntelligenceResponse {
    pub peak_hours: Vec<u8>,
    pub bucket_count: u32,
    pub estimation_bias: f64,
    pub adherence_score: f64,
    pub queue_counts: scheduler_core::sts::QueueCounts,
    pub bucket_distribution: HashMap<u32, usize>,
}

/// LTS/STS config plus bucket distribution (§6 "schedule intelligence
/// (LTS/STS config + bucket distribution)").
pub async fn get_schedule_intelligence(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScheduleIntelligenceResponse>> {
    let profile = state.kernel.profile_snapshot().await;
    let queue_counts = state.kernel.sts.read().await.queue_counts();
    let bucket_distribution = state.kernel.buffer.bucket_distribution().await?;
    Ok(Json(ScheduleIntelligenceResponse {
        peak_hours: profile.peak_hours,
        bucket_count: scheduler_core::BUCKET_COUNT,
        estimation_bias: profile.estimation_bias,
        adherence_score: profile.adherence_score,
        queue_counts,
        bucket_distribution,
    }))
}

pub async fn delete_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    state.kernel.buffer.delete(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn get_backlog(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TaskView>>> {
    let backlog = state.kernel.buffer.list_backlog().await?;
    Ok(Json(backlog.iter().map(TaskView::from).collect()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDraftRequest {
    pub task_id: Uuid,
    #[validate(length(min = 1))]
    pub task_type: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default = "default_max_cost")]
    pub max_cost: f64,
}

fn default_max_cost() -> f64 {
    0.05
}

pub async fn create_draft(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDraftRequest>,
) -> Result<Json<Draft>> {
    req.validate().map_err(|e| SchedulerError::invalid_input(e.to_string()))?;
    let task = scheduler_core::DelegationTask {
        id: Uuid::new_v4(),
        task_id: req.task_id,
        task_type: req.task_type,
        context: req.context,
        approval_required: req.approval_required,
        max_cost: req.max_cost,
    };
    let (draft, _completion) = scheduler_core::delegation::DelegationWorker::create_draft(
        &state.kv,
        state.content_generator.as_ref(),
        state.task_executor.as_ref(),
        task,
    )
    .await?;
    state
        .broadcast("draft_created", json!({ "draft_id": draft.id, "task_id": draft.task_id }))
        .await?;
    metrics::counter!("scheduler_drafts_created_total").increment(1);
    Ok(Json(draft))
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub approve: bool,
    pub edited_body: Option<String>,
}

pub async fn approve_draft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApprovalRequest>,
) -> Result<Json<scheduler_core::TaskCompletion>> {
    let completion = scheduler_core::delegation::DelegationWorker::handle_approval(
        &state.kv,
        state.task_executor.as_ref(),
        id,
        req.approve,
        req.edited_body,
    )
    .await?;
    state
        .broadcast("ghost_worker_status", json!({ "draft_id": id, "completion": &completion }))
        .await?;
    metrics::counter!("scheduler_drafts_resolved_total", "approved" => req.approve.to_string()).increment(1);
    Ok(Json(completion))
}

pub async fn get_draft(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<Json<Draft>> {
    let draft = scheduler_core::delegation::DelegationWorker::get(&state.kv, id)
        .await?
        .ok_or_else(|| SchedulerError::not_found("draft", id.to_string()))?;
    if draft.status != DraftStatus::Pending {
        tracing::debug!(draft_id = %id, "draft already resolved");
    }
    Ok(Json(draft))
}
