//! Periodic background work: context polling per source, energy
//! recompute, and the approvals pub/sub listener that lets an external
//! client (voice assistant, chat bot) resolve a pending draft.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use scheduler_core::delegation::DelegationWorker;
use scheduler_core::poller::{poll_calendar, poll_chat, poll_mail};
use scheduler_core::EnergyMonitor;
use serde::Deserialize;
use serde_json::json;
use shared::keys::APPROVALS_CHANNEL;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::collaborators::{EmptyCalendarSource, EmptyChatSource, EmptyMailSource};
use crate::state::AppState;

const CONTEXT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const ENERGY_RECOMPUTE_INTERVAL: Duration = Duration::from_secs(300);
const PROFILE_RECOMPUTE_INTERVAL: Duration = Duration::from_secs(600);

pub fn spawn_background_tasks(state: Arc<AppState>) {
    tokio::spawn(run_context_poller(state.clone()));
    tokio::spawn(run_energy_recompute(state.clone()));
    tokio::spawn(run_profile_recompute(state.clone()));
    tokio::spawn(run_approval_listener(state));
}

async fn run_context_poller(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(CONTEXT_POLL_INTERVAL);
    loop {
        ticker.tick().await;

        let calendar = poll_calendar(&state.kv, &state.kernel.buffer, &EmptyCalendarSource).await;
        let mail = poll_mail(&state.kv, &EmptyMailSource).await;
        let chat = poll_chat(&state.kv, &EmptyChatSource).await;

        for events in [calendar, mail, chat] {
            match events {
                Ok(events) => {
                    for event in events {
                        if let Err(err) = state
                            .broadcast(
                                "context_change",
                                json!({
                                    "event_type": event.event_type,
                                    "source": event.source,
                                    "affected_task_ids": event.affected_task_ids,
                                    "metadata": event.metadata,
                                }),
                            )
                            .await
                        {
                            warn!(error = %err, "failed to broadcast context change event");
                        }
                    }
                }
                Err(err) => warn!(error = %err, "context poll failed"),
            }
        }
    }
}

async fn run_energy_recompute(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(ENERGY_RECOMPUTE_INTERVAL);
    loop {
        ticker.tick().await;
        let curve = state.kernel.profile_snapshot().await.energy_curve;

        match EnergyMonitor::compute(&state.kv, Some(curve), chrono::Utc::now()).await {
            Ok(level) => {
                state.set_energy_level(level.level).await;
                if let Err(err) = state
                    .broadcast(
                        "energy_update",
                        json!({ "level": level.level, "confidence": level.confidence, "source": level.source }),
                    )
                    .await
                {
                    warn!(error = %err, "failed to broadcast recomputed energy level");
                }
            }
            Err(err) => warn!(error = %err, "energy recompute failed"),
        }
    }
}

/// Rebuilds the Profiler's `UserProfile` from the accumulated
/// observation window. The Energy Monitor's recompute consumes the
/// resulting `energy_curve` on its own timer; `plan_day` reads
/// `estimation_bias` straight off the kernel on every call.
async fn run_profile_recompute(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(PROFILE_RECOMPUTE_INTERVAL);
    loop {
        ticker.tick().await;
        match state.recompute_profile().await {
            Ok(classification) => {
                if let Err(err) = state
                    .broadcast(
                        "agent_activity",
                        json!({
                            "agent": "profiler",
                            "message": format!("archetype: {:?}", classification.archetype),
                            "type": "info",
                        }),
                    )
                    .await
                {
                    warn!(error = %err, "failed to broadcast profile recompute");
                }
            }
            Err(err) => warn!(error = %err, "profile recompute failed"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ApprovalAction {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
struct ApprovalMessage {
    action: ApprovalAction,
    draft_id: Uuid,
    #[serde(default)]
    edited_body: Option<String>,
}

/// Subscribes to the shared approvals channel so an external relay
/// (api-gateway, voice assistant) can publish `{action: approve|reject,
/// draft_id, edited_body?}` without a direct HTTP round trip to this
/// instance, resolving the draft the same way `POST .../approval` does.
async fn run_approval_listener(state: Arc<AppState>) {
    let mut pubsub = match state.kv.pubsub_connection().await {
        Ok(pubsub) => pubsub,
        Err(err) => {
            error!(error = %err, "could not open approvals pubsub connection");
            return;
        }
    };

    if let Err(err) = pubsub.subscribe(APPROVALS_CHANNEL).await {
        error!(error = %err, "could not subscribe to approvals channel");
        return;
    }

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "malformed approvals payload");
                continue;
            }
        };

        let message: ApprovalMessage = match serde_json::from_str(&payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, payload = %payload, "malformed approval resolution message");
                continue;
            }
        };

        let approve = matches!(message.action, ApprovalAction::Approve);
        info!(draft_id = %message.draft_id, approve, "approval resolution observed");

        match DelegationWorker::handle_approval(
            &state.kv,
            state.task_executor.as_ref(),
            message.draft_id,
            approve,
            message.edited_body,
        )
        .await
        {
            Ok(completion) => {
                if let Err(err) = state
                    .broadcast(
                        "ghost_worker_status",
                        json!({ "draft_id": message.draft_id, "completion": completion }),
                    )
                    .await
                {
                    warn!(error = %err, "failed to broadcast approval resolution");
                }
            }
            Err(err) => warn!(error = %err, draft_id = %message.draft_id, "failed to resolve approval from external relay"),
        }
    }
}
