//! Delegation Worker: the draft/approve/execute lifecycle for
//! automatable tasks. The LLM copy-generation and token-mediated
//! execution collaborators are opaque externals behind
//! [`ContentGenerator`] and [`TaskExecutor`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use shared::keys::DRAFT_PREFIX;
use shared::{KvStore, Result, SchedulerError};
use uuid::Uuid;

use crate::types::{CompletionStatus, DelegationTask, Draft, DraftStatus, TaskCompletion};

/// Per-task-type prompt/system-message pair and flat per-call cost.
struct TaskTemplate {
    cost_units: f64,
}

fn template_for(task_type: &str) -> TaskTemplate {
    match task_type {
        "meeting_reschedule" | "cancel_appointment" => TaskTemplate { cost_units: 0.01 },
        _ => TaskTemplate { cost_units: 0.001 },
    }
}

/// The external content-generation collaborator (LLM), treated as
/// opaque: given a task type and context, produces draft body text.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, task_type: &str, context: &HashMap<String, Value>) -> Result<String>;
}

/// The token-mediated executor that actually performs the delegated
/// action once a draft is approved.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, draft: &Draft) -> Result<String>;
}

fn draft_key(id: Uuid) -> String {
    format!("{DRAFT_PREFIX}{id}")
}

pub struct DelegationWorker;

impl DelegationWorker {
    /// Generates a draft for the delegation task. If approval isn't
    /// required, executes immediately; otherwise stores as pending.
    pub async fn create_draft<K: KvStore, G: ContentGenerator + ?Sized, E: TaskExecutor + ?Sized>(
        kv: &K,
        generator: &G,
        executor: &E,
        task: DelegationTask,
    ) -> Result<(Draft, Option<TaskCompletion>)> {
        let template = template_for(&task.task_type);
        if template.cost_units > task.max_cost {
            return Err(SchedulerError::capacity(format!(
                "draft cost {} exceeds max_cost {}",
                template.cost_units, task.max_cost
            )));
        }

        let body = generator.generate(&task.task_type, &task.context).await?;
        let mut draft = Draft {
            id: Uuid::new_v4(),
            task_id: task.task_id,
            task_type: task.task_type.clone(),
            recipient: None,
            channel: None,
            subject: None,
            body,
            status: DraftStatus::Pending,
            cost_units: template.cost_units,
        };

        if !task.approval_required {
            let completion = Self::execute(kv, executor, &mut draft).await?;
            Self::store(kv, &draft).await?;
            return Ok((draft, Some(completion)));
        }

        Self::store(kv, &draft).await?;
        Ok((draft, None))
    }

    pub async fn store<K: KvStore>(kv: &K, draft: &Draft) -> Result<()> {
        let value = serde_json::to_string(draft)?;
        kv.string_set(&draft_key(draft.id), &value).await
    }

    pub async fn get<K: KvStore>(kv: &K, id: Uuid) -> Result<Option<Draft>> {
        match kv.string_get(&draft_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn execute<K: KvStore, E: TaskExecutor + ?Sized>(
        _kv: &K,
        executor: &E,
        draft: &mut Draft,
    ) -> Result<TaskCompletion> {
        match executor.execute(draft).await {
            Ok(result) => {
                draft.status = DraftStatus::Executed;
                Ok(TaskCompletion {
                    task_id: draft.task_id,
                    status: CompletionStatus::Executed,
                    result: Some(result),
                    cost_units: draft.cost_units,
                })
            }
            Err(err) => {
                draft.status = DraftStatus::Failed;
                Ok(TaskCompletion {
                    task_id: draft.task_id,
                    status: CompletionStatus::Failed,
                    result: Some(err.to_string()),
                    cost_units: 0.0,
                })
            }
        }
    }

    /// Handles an inbound approval message: `{action: approve|reject,
    /// draft_id, edited_body?}`. On approve, executes; on reject, marks
    /// rejected. Always emits a terminal `TaskCompletion`.
    pub async fn handle_approval<K: KvStore, E: TaskExecutor + ?Sized>(
        kv: &K,
        executor: &E,
        draft_id: Uuid,
        approve: bool,
        edited_body: Option<String>,
    ) -> Result<TaskCompletion> {
        let mut draft = Self::get(kv, draft_id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("draft", draft_id.to_string()))?;

        if draft.status != DraftStatus::Pending {
            return Err(SchedulerError::conflict(format!(
                "draft {draft_id} is not pending (status: {:?})",
                draft.status
            )));
        }

        if let Some(body) = edited_body {
            draft.body = body;
        }

        let completion = if approve {
            Self::execute(kv, executor, &mut draft).await?
        } else {
            draft.status = DraftStatus::Rejected;
            TaskCompletion {
                task_id: draft.task_id,
                status: CompletionStatus::Rejected,
                result: None,
                cost_units: 0.0,
            }
        };

        Self::store(kv, &draft).await?;
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MemoryKv;

    struct EchoGenerator;
    #[async_trait]
    impl ContentGenerator for EchoGenerator {
        async fn generate(&self, task_type: &str, _context: &HashMap<String, Value>) -> Result<String> {
            Ok(format!("draft for {task_type}"))
        }
    }

    struct NoopExecutor;
    #[async_trait]
    impl TaskExecutor for NoopExecutor {
        async fn execute(&self, _draft: &Draft) -> Result<String> {
            Ok("done".to_string())
        }
    }

    fn delegation_task(task_type: &str, approval_required: bool) -> DelegationTask {
        DelegationTask {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            task_type: task_type.to_string(),
            context: HashMap::new(),
            approval_required,
            max_cost: 1.0,
        }
    }

    #[tokio::test]
    async fn no_approval_required_executes_immediately() {
        let kv = MemoryKv::new();
        let (draft, completion) =
            DelegationWorker::create_draft(&kv, &EchoGenerator, &NoopExecutor, delegation_task("email_reply", false))
                .await
                .unwrap();
        assert_eq!(draft.status, DraftStatus::Executed);
        assert!(completion.is_some());
    }

    #[tokio::test]
    async fn approval_required_stores_pending_draft() {
        let kv = MemoryKv::new();
        let (draft, completion) =
            DelegationWorker::create_draft(&kv, &EchoGenerator, &NoopExecutor, delegation_task("email_reply", true))
                .await
                .unwrap();
        assert_eq!(draft.status, DraftStatus::Pending);
        assert!(completion.is_none());
    }

    #[tokio::test]
    async fn approval_executes_pending_draft() {
        let kv = MemoryKv::new();
        let (draft, _) =
            DelegationWorker::create_draft(&kv, &EchoGenerator, &NoopExecutor, delegation_task("email_reply", true))
                .await
                .unwrap();
        let completion = DelegationWorker::handle_approval(&kv, &NoopExecutor, draft.id, true, None)
            .await
            .unwrap();
        assert_eq!(completion.status, CompletionStatus::Executed);
    }

    #[tokio::test]
    async fn rejection_marks_draft_rejected() {
        let kv = MemoryKv::new();
        let (draft, _) =
            DelegationWorker::create_draft(&kv, &EchoGenerator, &NoopExecutor, delegation_task("email_reply", true))
                .await
                .unwrap();
        let completion = DelegationWorker::handle_approval(&kv, &NoopExecutor, draft.id, false, None)
            .await
            .unwrap();
        assert_eq!(completion.status, CompletionStatus::Rejected);
        let stored = DelegationWorker::get(&kv, draft.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DraftStatus::Rejected);
    }

    #[tokio::test]
    async fn approving_a_non_pending_draft_conflicts() {
        let kv = MemoryKv::new();
        let (draft, _) =
            DelegationWorker::create_draft(&kv, &EchoGenerator, &NoopExecutor, delegation_task("email_reply", true))
                .await
                .unwrap();
        DelegationWorker::handle_approval(&kv, &NoopExecutor, draft.id, false, None).await.unwrap();
        let result = DelegationWorker::handle_approval(&kv, &NoopExecutor, draft.id, true, None).await;
        assert!(matches!(result, Err(SchedulerError::Conflict { .. })));
    }
}
