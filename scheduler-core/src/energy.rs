//! Energy Monitor: infers the current energy level from circadian
//! baseline, completion velocity, and user self-reports, recomputed on
//! query, on completion, on profile update, and on a 5-minute timer.

use chrono::{DateTime, Timelike, Utc};
use shared::{KvStore, Result};
use shared::keys::{ENERGY_CURRENT_KEY, ENERGY_COMPLETIONS_KEY, ENERGY_USER_REPORTED_KEY, ENERGY_USER_REPORTED_TS_KEY};

use crate::types::{EnergyLevel, EnergySource, DEFAULT_ENERGY_CURVE};

const VELOCITY_WINDOW_SECONDS: f64 = 7_200.0;
const USER_REPORTED_DECAY_SECONDS: f64 = 7_200.0;
const INACTIVITY_THRESHOLD_SECONDS: f64 = 1_800.0;

pub struct EnergyMonitor;

impl EnergyMonitor {
    /// Records a completion for velocity tracking and trims entries
    /// outside the rolling window.
    pub async fn record_completion<K: KvStore>(
        kv: &K,
        task_id: &str,
        actual_minutes: u32,
        estimated_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let member = format!("{task_id}:{actual_minutes}:{estimated_minutes}");
        let score = now.timestamp() as f64;
        kv.zset_add(ENERGY_COMPLETIONS_KEY, &member, score).await?;
        kv.zset_remove_range_by_score(ENERGY_COMPLETIONS_KEY, 0.0, score - VELOCITY_WINDOW_SECONDS)
            .await?;
        Ok(())
    }

    pub async fn record_user_reported<K: KvStore>(kv: &K, level: u8, now: DateTime<Utc>) -> Result<()> {
        kv.string_set(ENERGY_USER_REPORTED_KEY, &level.to_string()).await?;
        kv.string_set(ENERGY_USER_REPORTED_TS_KEY, &now.timestamp().to_string()).await?;
        Ok(())
    }

    async fn user_reported<K: KvStore>(kv: &K, now: DateTime<Utc>) -> Result<Option<(u8, f64)>> {
        let level = match kv.string_get(ENERGY_USER_REPORTED_KEY).await? {
            Some(raw) => raw.parse::<u8>().ok(),
            None => None,
        };
        let ts = match kv.string_get(ENERGY_USER_REPORTED_TS_KEY).await? {
            Some(raw) => raw.parse::<i64>().ok(),
            None => None,
        };
        match (level, ts) {
            (Some(level), Some(ts)) => {
                let age = (now.timestamp() - ts) as f64;
                if age > USER_REPORTED_DECAY_SECONDS {
                    Ok(None)
                } else {
                    Ok(Some((level, age)))
                }
            }
            _ => Ok(None),
        }
    }

    /// `(adjustment, completion_count)` from completions within the
    /// last two hours; a stall (no recent activity but inactivity past
    /// the threshold) also signals a drop.
    async fn velocity_adjustment<K: KvStore>(kv: &K, now: DateTime<Utc>) -> Result<(i8, usize)> {
        let score = now.timestamp() as f64;
        let window = kv
            .zset_range_by_score(ENERGY_COMPLETIONS_KEY, score - VELOCITY_WINDOW_SECONDS, score)
            .await?;

        if window.is_empty() {
            let total = kv.zset_card(ENERGY_COMPLETIONS_KEY).await?;
            if total > 0 {
                if let Some(latest) = kv.zset_latest(ENERGY_COMPLETIONS_KEY).await? {
                    if score - latest.score > INACTIVITY_THRESHOLD_SECONDS {
                        return Ok((-1, 0));
                    }
                }
            }
            return Ok((0, 0));
        }

        let mut total_actual = 0.0;
        let mut total_estimated = 0.0;
        for entry in &window {
            let parts: Vec<&str> = entry.member.splitn(3, ':').collect();
            if parts.len() == 3 {
                total_actual += parts[1].parse::<f64>().unwrap_or(0.0);
                total_estimated += parts[2].parse::<f64>().unwrap_or(0.0);
            }
        }

        let adjustment = if total_estimated <= 0.0 {
            0
        } else {
            let ratio = total_actual / total_estimated;
            if ratio < 0.8 {
                1
            } else if ratio > 1.3 {
                -1
            } else {
                0
            }
        };

        Ok((adjustment, window.len()))
    }

    pub async fn compute<K: KvStore>(
        kv: &K,
        energy_curve: Option<[u8; 24]>,
        now: DateTime<Utc>,
    ) -> Result<EnergyLevel> {
        if let Some((level, age)) = Self::user_reported(kv, now).await? {
            let confidence = 0.9 - 0.4 * (age / USER_REPORTED_DECAY_SECONDS);
            let level = EnergyLevel {
                level: level.clamp(1, 5),
                confidence: confidence.clamp(0.5, 0.9),
                source: EnergySource::UserReported,
            };
            kv.string_set(ENERGY_CURRENT_KEY, &serde_json::to_string(&level)?).await?;
            return Ok(level);
        }

        let curve = energy_curve.unwrap_or(DEFAULT_ENERGY_CURVE);
        let has_profiler_curve = energy_curve.is_some();
        let baseline = curve[now.hour() as usize % 24] as i64;
        let (adjustment, count) = Self::velocity_adjustment(kv, now).await?;
        let level = (baseline + adjustment as i64).clamp(1, 5) as u8;

        let confidence = match (has_profiler_curve, count >= 3) {
            (true, true) => 0.8,
            (true, false) => 0.7,
            (false, true) => 0.6,
            (false, false) => 0.4,
        };
        let source = if has_profiler_curve || count > 0 {
            EnergySource::Inferred
        } else {
            EnergySource::TimeBased
        };

        let level = EnergyLevel { level, confidence, source };
        kv.string_set(ENERGY_CURRENT_KEY, &serde_json::to_string(&level)?).await?;
        Ok(level)
    }

    /// Cached value for readers without a live monitor, falling back
    /// to a neutral default on cache miss.
    pub async fn cached<K: KvStore>(kv: &K) -> Result<EnergyLevel> {
        match kv.string_get(ENERGY_CURRENT_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(EnergyLevel {
                level: 3,
                confidence: 0.3,
                source: EnergySource::Fallback,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MemoryKv;

    #[tokio::test]
    async fn user_reported_overrides_when_fresh() {
        let kv = MemoryKv::new();
        let now = Utc::now();
        EnergyMonitor::record_user_reported(&kv, 1, now).await.unwrap();
        let level = EnergyMonitor::compute(&kv, None, now).await.unwrap();
        assert_eq!(level.level, 1);
        assert_eq!(level.source, EnergySource::UserReported);
    }

    #[tokio::test]
    async fn stale_user_reported_is_ignored() {
        let kv = MemoryKv::new();
        let now = Utc::now();
        EnergyMonitor::record_user_reported(&kv, 1, now - chrono::Duration::hours(3))
            .await
            .unwrap();
        let level = EnergyMonitor::compute(&kv, None, now).await.unwrap();
        assert_ne!(level.source, EnergySource::UserReported);
    }

    #[tokio::test]
    async fn fast_completions_bump_energy_up() {
        let kv = MemoryKv::new();
        let now = Utc::now();
        for i in 0..3 {
            EnergyMonitor::record_completion(&kv, &format!("t{i}"), 5, 20, now).await.unwrap();
        }
        let level = EnergyMonitor::compute(&kv, None, now).await.unwrap();
        assert!(level.confidence >= 0.6);
    }

    #[tokio::test]
    async fn cached_falls_back_when_nothing_stored() {
        let kv = MemoryKv::new();
        let level = EnergyMonitor::cached(&kv).await.unwrap();
        assert_eq!(level.source, EnergySource::Fallback);
    }
}
