//! Task Buffer: the bucketed store every scheduler component reads
//! swap candidates from. Owns `Task` records exclusively; every other
//! component holds ids and looks up through here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{KvStore, Result};
use uuid::Uuid;

use crate::types::{Task, TaskStatus, BUCKET_COUNT};

const TASK_PREFIX: &str = "task:";
const BUCKET_PREFIX: &str = "bucket:";
const BACKLOG_KEY: &str = "task:backlog";
const ACTIVE_KEY: &str = "task:active";

fn task_key(id: Uuid) -> String {
    format!("{TASK_PREFIX}{id}")
}

fn bucket_key(bucket: u32) -> String {
    format!("{BUCKET_PREFIX}{bucket}")
}

pub struct TaskBuffer<K: KvStore> {
    kv: K,
}

impl<K: KvStore> TaskBuffer<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Exposes the underlying store for sibling subsystems (profiler,
    /// energy monitor) that persist their own keys rather than task
    /// records.
    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// Task counts per bucket (`0..BUCKET_COUNT`), for the schedule
    /// intelligence view.
    pub async fn bucket_distribution(&self) -> Result<HashMap<u32, usize>> {
        let mut distribution = HashMap::with_capacity(BUCKET_COUNT as usize);
        for bucket in 0..BUCKET_COUNT {
            let count = self.kv.set_members(&bucket_key(bucket)).await?.len();
            distribution.insert(bucket, count);
        }
        Ok(distribution)
    }

    /// Persists fields and keeps bucket/status indices in sync. If the
    /// task already existed under a different bucket or status, the
    /// stale index entries are removed first.
    pub async fn put(&self, task: &Task) -> Result<()> {
        if let Some(existing) = self.try_get(task.id).await? {
            if existing.bucket() != task.bucket() {
                self.kv.set_remove(&bucket_key(existing.bucket()), &task.id.to_string()).await?;
            }
            if existing.status != task.status {
                self.unindex_status(existing.id, existing.status).await?;
            }
        }

        let fields = encode(task)?;
        self.kv.hash_set_all(&task_key(task.id), fields).await?;
        self.kv.set_add(&bucket_key(task.bucket()), &task.id.to_string()).await?;
        self.index_status(task.id, task.status).await?;
        Ok(())
    }

    async fn index_status(&self, id: Uuid, status: TaskStatus) -> Result<()> {
        match status {
            TaskStatus::Backlog => self.kv.set_add(BACKLOG_KEY, &id.to_string()).await,
            TaskStatus::Active | TaskStatus::InProgress => {
                self.kv.set_add(ACTIVE_KEY, &id.to_string()).await
            }
            _ => Ok(()),
        }
    }

    async fn unindex_status(&self, id: Uuid, status: TaskStatus) -> Result<()> {
        match status {
            TaskStatus::Backlog => self.kv.set_remove(BACKLOG_KEY, &id.to_string()).await,
            TaskStatus::Active | TaskStatus::InProgress => {
                self.kv.set_remove(ACTIVE_KEY, &id.to_string()).await
            }
            _ => Ok(()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        self.try_get(id).await
    }

    async fn try_get(&self, id: Uuid) -> Result<Option<Task>> {
        let fields = self.kv.hash_get_all(&task_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode(&fields)?))
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if let Some(task) = self.try_get(id).await? {
            self.kv.set_remove(&bucket_key(task.bucket()), &id.to_string()).await?;
            self.unindex_status(id, task.status).await?;
        }
        self.kv.delete(&task_key(id)).await
    }

    pub async fn get_bucket_tasks(&self, bucket: u32) -> Result<Vec<Task>> {
        let ids = self.kv.set_members(&bucket_key(bucket)).await?;
        self.resolve(ids).await
    }

    /// Filtered by current status to tolerate stale index entries.
    pub async fn list_backlog(&self) -> Result<Vec<Task>> {
        let ids = self.kv.set_members(BACKLOG_KEY).await?;
        let tasks = self.resolve(ids).await?;
        Ok(tasks.into_iter().filter(|t| t.status == TaskStatus::Backlog).collect())
    }

    pub async fn list_active(&self) -> Result<Vec<Task>> {
        let ids = self.kv.set_members(ACTIVE_KEY).await?;
        let tasks = self.resolve(ids).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::Active | TaskStatus::InProgress))
            .collect())
    }

    async fn resolve(&self, ids: Vec<String>) -> Result<Vec<Task>> {
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(uuid) = Uuid::parse_str(&id) {
                if let Some(task) = self.try_get(uuid).await? {
                    tasks.push(task);
                }
            }
        }
        Ok(tasks)
    }

    /// Scans every bucket (N is small and fixed) for backlog tasks
    /// whose duration and energy cost fit the available budget, ranked
    /// by the peak-hours rule, shorter-duration then id as tiebreak.
    pub async fn find_swap_in_candidates(
        &self,
        available_minutes: u32,
        energy_level: u8,
        now: DateTime<Utc>,
        peak_hours: &[u8],
    ) -> Result<Vec<Task>> {
        let mut candidates = Vec::new();
        for bucket in 0..BUCKET_COUNT {
            for task in self.get_bucket_tasks(bucket).await? {
                if task.status == TaskStatus::Backlog
                    && task.estimated_duration <= available_minutes
                    && task.energy_cost <= energy_level
                {
                    candidates.push(task);
                }
            }
        }

        let in_peak = peak_hours.contains(&(now.hour_as_u8()));
        candidates.sort_by(|a, b| {
            let primary = if in_peak {
                b.cognitive_load
                    .cmp(&a.cognitive_load)
                    .then_with(|| b.deadline_urgency_at(now).partial_cmp(&a.deadline_urgency_at(now)).unwrap())
            } else {
                match b.deadline_urgency_at(now).partial_cmp(&a.deadline_urgency_at(now)) {
                    Some(ord) => ord,
                    None => std::cmp::Ordering::Equal,
                }
            };
            primary
                .then_with(|| a.estimated_duration.cmp(&b.estimated_duration))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(candidates)
    }

    /// From active (excluding in-progress), ranked by (priority desc
    /// where P3 outranks P0, urgency asc), accumulated until the
    /// running total reaches `minutes_needed`.
    pub async fn find_swap_out_candidates(&self, minutes_needed: u32) -> Result<Vec<Task>> {
        let mut eligible: Vec<Task> = self
            .list_active()
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Active)
            .collect();

        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| {
                    a.deadline_urgency()
                        .partial_cmp(&b.deadline_urgency())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut result = Vec::new();
        let mut freed = 0u32;
        for task in eligible {
            if freed >= minutes_needed {
                break;
            }
            freed += task.estimated_duration;
            result.push(task);
        }
        Ok(result)
    }
}

trait HourOfDay {
    fn hour_as_u8(&self) -> u8;
}

impl HourOfDay for DateTime<Utc> {
    fn hour_as_u8(&self) -> u8 {
        use chrono::Timelike;
        self.hour() as u8
    }
}

fn encode(task: &Task) -> Result<HashMap<String, String>> {
    let value = serde_json::to_value(task)?;
    let mut fields = HashMap::new();
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            let s = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            fields.insert(k, s);
        }
    }
    Ok(fields)
}

fn decode(fields: &HashMap<String, String>) -> Result<Task> {
    let mut map = serde_json::Map::new();
    for (k, v) in fields {
        let value = serde_json::from_str(v).unwrap_or_else(|_| serde_json::Value::String(v.clone()));
        map.insert(k.clone(), value);
    }
    Ok(serde_json::from_value(serde_json::Value::Object(map))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MemoryKv;

    fn buffer() -> TaskBuffer<MemoryKv> {
        TaskBuffer::new(MemoryKv::new())
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_fields() {
        let buf = buffer();
        let task = Task::new("write report");
        buf.put(&task).await.unwrap();
        let back = buf.get(task.id).await.unwrap().unwrap();
        assert_eq!(back.title, "write report");
        assert_eq!(back.id, task.id);
    }

    #[tokio::test]
    async fn backlog_listing_is_filtered_by_status() {
        let buf = buffer();
        let mut task = Task::new("stale");
        buf.put(&task).await.unwrap();
        task.status = TaskStatus::Active;
        buf.put(&task).await.unwrap();
        let backlog = buf.list_backlog().await.unwrap();
        assert!(backlog.is_empty());
        let active = buf.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_from_every_index() {
        let buf = buffer();
        let task = Task::new("temp");
        buf.put(&task).await.unwrap();
        buf.delete(task.id).await.unwrap();
        assert!(buf.get(task.id).await.unwrap().is_none());
        assert!(buf.list_backlog().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn swap_in_candidates_respect_duration_and_energy() {
        let buf = buffer();
        let mut fits = Task::new("fits");
        fits.estimated_duration = 10;
        fits.energy_cost = 2;
        let mut too_long = Task::new("too long");
        too_long.estimated_duration = 90;
        too_long.energy_cost = 2;
        let mut too_costly = Task::new("too costly");
        too_costly.estimated_duration = 10;
        too_costly.energy_cost = 5;
        buf.put(&fits).await.unwrap();
        buf.put(&too_long).await.unwrap();
        buf.put(&too_costly).await.unwrap();

        let candidates = buf
            .find_swap_in_candidates(30, 3, Utc::now(), &[9, 10, 14, 15])
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, fits.id);
    }

    #[tokio::test]
    async fn bucket_distribution_counts_every_bucket() {
        let buf = buffer();
        let task = Task::new("counted");
        let bucket = task.bucket();
        buf.put(&task).await.unwrap();
        let distribution = buf.bucket_distribution().await.unwrap();
        assert_eq!(distribution.len(), BUCKET_COUNT as usize);
        assert_eq!(distribution[&bucket], 1);
    }

    #[tokio::test]
    async fn swap_out_candidates_accumulate_until_minutes_needed() {
        let buf = buffer();
        for i in 0..3 {
            let mut task = Task::new(format!("active {i}"));
            task.status = TaskStatus::Active;
            task.estimated_duration = 20;
            buf.put(&task).await.unwrap();
        }
        let candidates = buf.find_swap_out_candidates(30).await.unwrap();
        assert!(candidates.len() >= 2);
        let freed: u32 = candidates.iter().map(|t| t.estimated_duration).sum();
        assert!(freed >= 30);
    }
}
