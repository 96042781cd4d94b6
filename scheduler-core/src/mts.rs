//! Medium-Term Scheduler: stateless disruption-recovery operators over
//! the Task Buffer and an STS handle. Idempotent per task id within a
//! single call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{KvStore, Result};

use crate::buffer::TaskBuffer;
use crate::sts::ShortTermScheduler;
use crate::types::{Task, TaskStatus};

#[derive(Debug, Default, Serialize)]
pub struct SwapResult {
    pub swapped_in: Vec<Task>,
    pub swapped_out: Vec<Task>,
    pub delegated: Vec<Task>,
    pub summary: String,
}

pub struct MediumTermScheduler;

impl MediumTermScheduler {
    /// Greedily activates swap-in candidates whose duration fits the
    /// remaining budget, skipping (not stopping on) ones that don't.
    pub async fn handle_swap_in<K: KvStore>(
        buffer: &TaskBuffer<K>,
        sts: &mut ShortTermScheduler,
        freed_minutes: u32,
        energy_level: u8,
        peak_hours: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SwapResult> {
        let candidates = buffer
            .find_swap_in_candidates(freed_minutes, energy_level, now, peak_hours)
            .await?;

        let mut remaining = freed_minutes as i64;
        let mut swapped_in = Vec::new();
        for mut task in candidates {
            if remaining < task.estimated_duration as i64 {
                continue;
            }
            task.status = TaskStatus::Active;
            task.touch();
            buffer.put(&task).await?;
            sts.enqueue(task.clone());
            remaining -= task.estimated_duration as i64;
            swapped_in.push(task);
            if remaining <= 0 {
                break;
            }
        }

        let summary = format!("Swapped in {} task(s), freed {} min", swapped_in.len(), freed_minutes);
        Ok(SwapResult {
            swapped_in,
            summary,
            ..Default::default()
        })
    }

    /// Marks swap-out candidates as swapped out; under low energy also
    /// drains P3 via auto-delegation.
    pub async fn handle_swap_out<K: KvStore>(
        buffer: &TaskBuffer<K>,
        sts: &mut ShortTermScheduler,
        lost_minutes: u32,
        energy_level: u8,
    ) -> Result<SwapResult> {
        let candidates = buffer.find_swap_out_candidates(lost_minutes).await?;
        let mut swapped_out = Vec::new();
        for mut task in candidates {
            task.status = TaskStatus::SwappedOut;
            task.touch();
            buffer.put(&task).await?;
            swapped_out.push(task);
        }

        let mut delegated = Vec::new();
        if energy_level <= 2 {
            delegated = sts.auto_delegate_p3(energy_level);
            for task in &delegated {
                buffer.put(task).await?;
            }
        }

        let summary = format!(
            "Swapped out {} task(s), delegated {} P3 task(s)",
            swapped_out.len(),
            delegated.len()
        );
        Ok(SwapResult {
            swapped_out,
            delegated,
            summary,
            ..Default::default()
        })
    }

    /// Dispatches on the sign of `freed_minutes`. Zero reorders the
    /// active set in place without moving anything between backlog and
    /// active.
    pub async fn handle_disruption<K: KvStore>(
        buffer: &TaskBuffer<K>,
        sts: &mut ShortTermScheduler,
        freed_minutes: i64,
        energy_level: u8,
        peak_hours: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SwapResult> {
        use std::cmp::Ordering;
        match freed_minutes.cmp(&0) {
            Ordering::Greater => {
                Self::handle_swap_in(buffer, sts, freed_minutes as u32, energy_level, peak_hours, now).await
            }
            Ordering::Less => {
                Self::handle_swap_out(buffer, sts, freed_minutes.unsigned_abs() as u32, energy_level).await
            }
            Ordering::Equal => {
                let active = buffer.list_active().await?;
                sts.reorder(active);
                Ok(SwapResult {
                    summary: "No time change. Reordered active schedule.".to_string(),
                    ..Default::default()
                })
            }
        }
    }

    /// Activates `urgent_task` and asks the STS to preempt the current
    /// task for it; returns the preempted task, if any.
    pub async fn handle_preemption<K: KvStore>(
        buffer: &TaskBuffer<K>,
        sts: &mut ShortTermScheduler,
        mut urgent_task: Task,
        energy_level: u8,
    ) -> Result<SwapResult> {
        urgent_task.status = TaskStatus::Active;
        urgent_task.touch();
        buffer.put(&urgent_task).await?;
        let preempted = sts.preempt(urgent_task.clone(), energy_level);

        let swapped_out = if let Some(task) = &preempted {
            buffer.put(task).await?;
            vec![task.clone()]
        } else {
            Vec::new()
        };

        Ok(SwapResult {
            swapped_in: vec![urgent_task],
            swapped_out,
            summary: "Preempted current task".to_string(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MemoryKv;

    fn buffer() -> TaskBuffer<MemoryKv> {
        TaskBuffer::new(MemoryKv::new())
    }

    #[tokio::test]
    async fn swap_in_only_activates_tasks_that_fit_budget() {
        let buf = buffer();
        let mut sts = ShortTermScheduler::new();
        let mut small = Task::new("small");
        small.estimated_duration = 10;
        small.energy_cost = 2;
        let mut big = Task::new("big");
        big.estimated_duration = 25;
        big.energy_cost = 2;
        buf.put(&small).await.unwrap();
        buf.put(&big).await.unwrap();

        let result = MediumTermScheduler::handle_swap_in(&buf, &mut sts, 20, 3, &[9, 10], Utc::now())
            .await
            .unwrap();
        assert_eq!(result.swapped_in.len(), 1);
        assert_eq!(result.swapped_in[0].id, small.id);
    }

    #[tokio::test]
    async fn swap_out_delegates_p3_only_under_low_energy() {
        let buf = buffer();
        let mut sts = ShortTermScheduler::new();
        let mut active = Task::new("active");
        active.status = TaskStatus::Active;
        active.estimated_duration = 30;
        buf.put(&active).await.unwrap();
        sts.enqueue(Task::new("p3 filler"));

        let result = MediumTermScheduler::handle_swap_out(&buf, &mut sts, 30, 1).await.unwrap();
        assert_eq!(result.swapped_out.len(), 1);
        assert!(!result.delegated.is_empty() || sts.queue_counts().p3_background == 0);
    }

    #[tokio::test]
    async fn disruption_with_zero_freed_minutes_only_reorders() {
        let buf = buffer();
        let mut sts = ShortTermScheduler::new();
        let result = MediumTermScheduler::handle_disruption(&buf, &mut sts, 0, 3, &[9], Utc::now())
            .await
            .unwrap();
        assert!(result.swapped_in.is_empty());
        assert!(result.swapped_out.is_empty());
    }
}
