//! Long-Term Scheduler: the daily planner that scores, bin-packs, and
//! activates tasks from backlog.

use chrono::{DateTime, Timelike, Utc};
use shared::{KvStore, Result};

use crate::buffer::TaskBuffer;
use crate::sts::ShortTermScheduler;
use crate::types::{Task, TaskStatus};

pub struct LongTermScheduler;

impl LongTermScheduler {
    fn score(task: &Task, peak_hours: &[u8], now: DateTime<Utc>) -> f64 {
        let urgency = task.deadline_urgency_at(now);
        let priority_score = task.priority.score();
        let in_peak = peak_hours.contains(&(now.hour() as u8));
        let peak_alignment = if in_peak && task.cognitive_load >= 4 {
            8.0
        } else if in_peak && task.cognitive_load <= 2 {
            3.0
        } else {
            5.0
        };
        let duration_score = task.execution_time_score();

        0.40 * urgency + 0.30 * priority_score + 0.15 * peak_alignment + 0.15 * duration_score
    }

    /// Pulls the backlog, inflates durations by `estimation_bias`,
    /// scores and sorts descending, then greedily bin-packs into the
    /// available budget — skipping (not stopping at) overflowing
    /// tasks so smaller later ones can still fit. Activates the
    /// selected set and returns a fresh STS populated with them.
    pub async fn plan_day<K: KvStore>(
        buffer: &TaskBuffer<K>,
        available_hours: f64,
        peak_hours: &[u8],
        estimation_bias: f64,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Task>, ShortTermScheduler)> {
        let mut backlog = buffer.list_backlog().await?;
        if backlog.is_empty() {
            return Ok((Vec::new(), ShortTermScheduler::new()));
        }

        for task in &mut backlog {
            let inflated = (task.estimated_duration as f64 * estimation_bias).floor() as u32;
            task.estimated_duration = inflated.max(1);
        }

        let mut scored: Vec<(Task, f64)> = backlog
            .into_iter()
            .map(|t| {
                let s = Self::score(&t, peak_hours, now);
                (t, s)
            })
            .collect();
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.estimated_duration.cmp(&b.estimated_duration))
                .then_with(|| a.id.cmp(&b.id))
        });

        let available_minutes = (available_hours * 60.0).round() as u32;
        let mut used_minutes = 0u32;
        let mut selected = Vec::new();
        for (mut task, _score) in scored {
            if used_minutes + task.estimated_duration > available_minutes {
                continue;
            }
            task.status = TaskStatus::Active;
            task.touch();
            buffer.put(&task).await?;
            used_minutes += task.estimated_duration;
            selected.push(task);
        }

        let mut sts = ShortTermScheduler::new();
        sts.enqueue_batch(selected.clone());
        Ok((selected, sts))
    }

    /// Re-reads the active set from the buffer and hands it to the STS
    /// to reorder; does not change backlog/active membership.
    pub async fn replan_remaining<K: KvStore>(
        buffer: &TaskBuffer<K>,
        sts: &mut ShortTermScheduler,
        energy_level: u8,
    ) -> Result<Vec<Task>> {
        let active = buffer.list_active().await?;
        sts.reorder(active);
        Ok(sts.get_ordered_schedule(energy_level))
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
    async fn plan_day_never_exceeds_the_time_budget() {
        let buf = buffer();
        for i in 0..4 {
            let mut task = Task::new(format!("task {i}"));
            task.estimated_duration = 30;
            buf.put(&task).await.unwrap();
        }
        let (selected, _sts) = LongTermScheduler::plan_day(&buf, 2.0, &[9, 10, 14, 15], 1.0, Utc::now())
            .await
            .unwrap();
        let total: u32 = selected.iter().map(|t| t.estimated_duration).sum();
        assert!(total <= 120);
        assert!(selected.len() <= 4);
    }

    #[tokio::test]
    async fn plan_day_with_empty_backlog_returns_empty() {
        let buf = buffer();
        let (selected, sts) = LongTermScheduler::plan_day(&buf, 8.0, &[9], 1.0, Utc::now()).await.unwrap();
        assert!(selected.is_empty());
        assert_eq!(sts.total_count(), 0);
    }

    #[tokio::test]
    async fn plan_day_skips_overflow_instead_of_stopping() {
        let buf = buffer();
        let mut big = Task::new("big");
        big.estimated_duration = 90;
        big.priority = crate::types::Priority::P0Urgent;
        let mut small = Task::new("small");
        small.estimated_duration = 20;
        buf.put(&big).await.unwrap();
        buf.put(&small).await.unwrap();

        let (selected, _sts) = LongTermScheduler::plan_day(&buf, 1.0, &[9], 1.0, Utc::now()).await.unwrap();
        assert!(selected.iter().any(|t| t.id == small.id));
    }

    #[tokio::test]
    async fn estimation_bias_inflates_durations() {
        let buf = buffer();
        let mut task = Task::new("estimate me");
        task.estimated_duration = 10;
        buf.put(&task).await.unwrap();
        let (selected, _sts) = LongTermScheduler::plan_day(&buf, 8.0, &[9], 2.0, Utc::now()).await.unwrap();
        assert_eq!(selected[0].estimated_duration, 20);
    }
}
