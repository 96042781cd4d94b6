//! The scheduling kernel: Task Buffer, STS, MTS, LTS, the disruption
//! classifier, the context pollers, the profiler, the energy monitor,
//! and the delegation worker.
//!
//! [`SchedulerKernel`] composes these the way the rest of the platform
//! composes subsystems — one `Arc<RwLock<_>>` per single-writer piece
//! of state, orchestrated by a sequential pipeline method rather than
//! any shared mutable global.

pub mod buffer;
pub mod delegation;
pub mod disruption;
pub mod energy;
pub mod lts;
pub mod mts;
pub mod poller;
pub mod profiler;
pub mod sts;
pub mod types;

pub use buffer::TaskBuffer;
pub use disruption::{calculate_freed_minutes, classify_severity, determine_action};
pub use energy::EnergyMonitor;
pub use lts::LongTermScheduler;
pub use mts::{MediumTermScheduler, SwapResult};
pub use sts::ShortTermScheduler;
pub use types::*;

use std::sync::Arc;

use chrono::Utc;
use shared::{KvStore, Result};
use tokio::sync::RwLock;

use profiler::{ArchetypeClassification, DelegationOutcome};

/// Owns the active STS and mediates every scheduling-affecting
/// operation against the shared Task Buffer. The orchestrator/relay
/// crate wraps this with HTTP/WebSocket plumbing; this kernel carries
/// no transport concerns.
pub struct SchedulerKernel<K: KvStore> {
    pub buffer: Arc<TaskBuffer<K>>,
    pub sts: Arc<RwLock<ShortTermScheduler>>,
    pub peak_hours: Arc<RwLock<Vec<u8>>>,
    /// Learned parameters the Profiler derives from observed history;
    /// feeds `estimation_bias` into `plan_day` and `energy_curve` into
    /// the Energy Monitor. Starts at `UserProfile::default()` until the
    /// first recompute loads or produces a real one.
    pub profile: Arc<RwLock<UserProfile>>,
}

impl<K: KvStore> SchedulerKernel<K> {
    pub fn new(kv: K) -> Self {
        Self {
            buffer: Arc::new(TaskBuffer::new(kv)),
            sts: Arc::new(RwLock::new(ShortTermScheduler::new())),
            peak_hours: Arc::new(RwLock::new(DEFAULT_PEAK_HOURS.to_vec())),
            profile: Arc::new(RwLock::new(UserProfile::default())),
        }
    }

    pub async fn plan_day(&self, available_hours: f64, estimation_bias: f64) -> Result<Vec<Task>> {
        let peak_hours = self.peak_hours.read().await.clone();
        let (selected, new_sts) =
            LongTermScheduler::plan_day(&self.buffer, available_hours, &peak_hours, estimation_bias, Utc::now())
                .await?;
        *self.sts.write().await = new_sts;
        Ok(selected)
    }

    /// A clone of the current learned profile, cheap enough to call per
    /// request (handlers read `estimation_bias`/`energy_curve` off it).
    pub async fn profile_snapshot(&self) -> UserProfile {
        self.profile.read().await.clone()
    }

    pub async fn estimation_bias(&self) -> f64 {
        self.profile.read().await.estimation_bias
    }

    /// Loads the last persisted profile from the KV substrate (if any)
    /// so a freshly started process doesn't fall back to defaults while
    /// waiting for the next recompute.
    pub async fn hydrate_profile(&self) -> Result<()> {
        let profile = profiler::cached(self.buffer.kv()).await?;
        *self.peak_hours.write().await = profile.peak_hours.clone();
        *self.profile.write().await = profile;
        Ok(())
    }

    /// Rebuilds the profile from the observation window stored in the
    /// KV substrate and persists it, updating both `profile` and
    /// `peak_hours` so `plan_day` and the Energy Monitor see the result
    /// on their next call.
    pub async fn recompute_profile(
        &self,
        social_posting_hours: &[u8],
        reflection_self_awareness: f64,
        delegation_outcomes: &[(String, DelegationOutcome)],
        now: chrono::DateTime<Utc>,
    ) -> Result<ArchetypeClassification> {
        let (profile, classification) = profiler::recompute_and_store(
            self.buffer.kv(),
            social_posting_hours,
            reflection_self_awareness,
            delegation_outcomes,
            now,
        )
        .await?;
        *self.peak_hours.write().await = profile.peak_hours.clone();
        *self.profile.write().await = profile;
        Ok(classification)
    }

    /// Routes a disruption's signed time impact through MTS, mutating
    /// the shared STS in place.
    pub async fn apply_disruption(&self, freed_minutes: i64, energy_level: u8) -> Result<SwapResult> {
        let peak_hours = self.peak_hours.read().await.clone();
        let mut sts = self.sts.write().await;
        MediumTermScheduler::handle_disruption(&self.buffer, &mut sts, freed_minutes, energy_level, &peak_hours, Utc::now())
            .await
    }

    pub async fn ordered_schedule(&self, energy_level: u8) -> Vec<Task> {
        self.sts.read().await.get_ordered_schedule(energy_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MemoryKv;

    #[tokio::test]
    async fn kernel_plans_a_day_and_exposes_an_ordered_schedule() {
        let kernel = SchedulerKernel::new(MemoryKv::new());
        let task = Task::new("write the quarterly review");
        kernel.buffer.put(&task).await.unwrap();

        let selected = kernel.plan_day(8.0, 1.0).await.unwrap();
        assert_eq!(selected.len(), 1);

        let schedule = kernel.ordered_schedule(5).await;
        assert_eq!(schedule.len(), 1);
    }

    #[tokio::test]
    async fn zero_freed_minutes_reorders_without_changing_membership() {
        let kernel = SchedulerKernel::new(MemoryKv::new());
        let mut task = Task::new("active task");
        task.status = TaskStatus::Active;
        kernel.buffer.put(&task).await.unwrap();

        let result = kernel.apply_disruption(0, 3).await.unwrap();
        assert!(result.swapped_in.is_empty());
        assert!(result.swapped_out.is_empty());
    }
}
