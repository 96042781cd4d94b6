//! Profiler: derives a [`UserProfile`] and execution/growth archetype
//! from observed history — daily goal entries, task completions,
//! social posting activity, and delegation outcomes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use shared::keys::{
    PROFILER_DAILY_GOALS_KEY, PROFILER_LAST_RESULT_KEY, PROFILER_TASK_COMPLETIONS_KEY,
};
use shared::{KvStore, Result};

use crate::types::{Archetype, UserProfile, DEFAULT_ENERGY_CURVE, DEFAULT_PEAK_HOURS};

const SLIDING_WINDOW_DAYS: f64 = 14.0;
const DECAY_FACTOR: f64 = 0.85;
const TEMPERATURE: f64 = 8.0;
/// Observations older than this no longer contribute to a recompute.
const RETENTION_DAYS: i64 = 30;
/// `reflection_self_awareness` default absent any journaling signal.
pub const DEFAULT_SELF_AWARENESS: f64 = 0.3;

/// The LinkedIn/social-activity signal is an opaque external collaborator
/// (no OAuth broker ships with this crate, per the platform's Non-goals) —
/// a deployment wires in a real adapter, and an empty default keeps the
/// profiler's derivation pipeline exercised without one.
#[async_trait]
pub trait SocialSignalSource: Send + Sync {
    async fn fetch_posting_hours(&self) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyGoalEntry {
    pub date: DateTime<Utc>,
    pub task_completed_flags: Vec<bool>,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletionRecord {
    pub actual_minutes: f64,
    pub estimated_minutes: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationOutcome {
    ApprovedQuickly,
    Edited,
    Rejected,
}

fn age_days(date: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - date).num_seconds() as f64 / 86_400.0).max(0.0)
}

fn decay_weight(age: f64) -> f64 {
    DECAY_FACTOR.powf(age.min(SLIDING_WINDOW_DAYS))
}

/// Decay-weighted mean: recent observations dominate, observations
/// past the sliding window barely register.
fn decay_weighted_mean(values: &[(f64, f64)]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let (mut total_weight, mut total) = (0.0, 0.0);
    for (value, age) in values {
        let w = decay_weight(*age);
        total += value * w;
        total_weight += w;
    }
    if total_weight == 0.0 {
        None
    } else {
        Some(total / total_weight)
    }
}

pub fn compute_peak_hours(
    completions: &[TaskCompletionRecord],
    social_posting_hours: &[u8],
    entries: &[DailyGoalEntry],
) -> Vec<u8> {
    let mut scores: HashMap<u8, f64> = HashMap::new();

    for hour in social_posting_hours {
        *scores.entry(*hour).or_insert(0.0) += 1.0;
    }
    for completion in completions {
        let hour = completion.completed_at.hour() as u8;
        *scores.entry(hour).or_insert(0.0) += 2.0;
    }
    for entry in entries {
        if entry.completion_rate > 0.7 {
            for hour in [9u8, 10, 11, 14, 15, 16] {
                *scores.entry(hour).or_insert(0.0) += entry.completion_rate;
            }
        }
    }

    if scores.is_empty() {
        return DEFAULT_PEAK_HOURS.to_vec();
    }

    let mut ranked: Vec<(u8, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    if ranked[0].1 == 0.0 {
        return DEFAULT_PEAK_HOURS.to_vec();
    }
    let mut top: Vec<u8> = ranked.into_iter().take(4).map(|(h, _)| h).collect();
    top.sort_unstable();
    top
}

pub fn compute_estimation_bias(completions: &[TaskCompletionRecord], now: DateTime<Utc>) -> f64 {
    let ratios: Vec<(f64, f64)> = completions
        .iter()
        .filter(|c| c.actual_minutes > 0.0 && c.estimated_minutes > 0.0)
        .map(|c| (c.actual_minutes / c.estimated_minutes, age_days(c.completed_at, now)))
        .collect();

    decay_weighted_mean(&ratios).map(|v| (v * 10_000.0).round() / 10_000.0).unwrap_or(1.2)
}

pub fn compute_adherence_score(entries: &[DailyGoalEntry], now: DateTime<Utc>) -> f64 {
    let values: Vec<(f64, f64)> = entries
        .iter()
        .map(|e| (e.completion_rate, age_days(e.date, now)))
        .collect();
    decay_weighted_mean(&values).unwrap_or(0.7)
}

pub fn compute_energy_curve(social_posting_hours: &[u8], entries: &[DailyGoalEntry]) -> [u8; 24] {
    let mut hour_activity = [0.0_f64; 24];
    for hour in social_posting_hours {
        hour_activity[*hour as usize % 24] += 1.0;
    }
    for entry in entries {
        if entry.completion_rate > 0.6 {
            for hour in [9usize, 10, 11, 14, 15, 16] {
                hour_activity[hour] += entry.completion_rate * 0.5;
            }
        }
    }

    let max_activity = hour_activity.iter().cloned().fold(0.0, f64::max);
    let mut curve = DEFAULT_ENERGY_CURVE;
    if max_activity > 0.0 {
        for hour in 0..24 {
            let observed_boost = (hour_activity[hour] / max_activity) * 2.0;
            let blended = curve[hour] as f64 * 0.6 + (curve[hour] as f64 + observed_boost) * 0.4;
            curve[hour] = blended.round().clamp(1.0, 5.0) as u8;
        }
    }
    curve
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftDirection {
    EveningFade,
    Distraction,
    Balanced,
}

pub fn compute_drift_direction(entries: &[DailyGoalEntry]) -> DriftDirection {
    let (mut end_incomplete, mut scattered_incomplete) = (0, 0);

    for entry in entries {
        let len = entry.task_completed_flags.len();
        if len < 2 {
            continue;
        }
        let incomplete_positions: Vec<f64> = entry
            .task_completed_flags
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(i, _)| i as f64 / (len - 1) as f64)
            .collect();
        if incomplete_positions.is_empty() {
            continue;
        }
        let avg_pos = incomplete_positions.iter().sum::<f64>() / incomplete_positions.len() as f64;
        if avg_pos > 0.65 {
            end_incomplete += 1;
        } else {
            scattered_incomplete += 1;
        }
    }

    if end_incomplete > scattered_incomplete {
        DriftDirection::EveningFade
    } else if scattered_incomplete > end_incomplete {
        DriftDirection::Distraction
    } else {
        DriftDirection::Balanced
    }
}

pub fn compute_automation_comfort(
    base: &HashMap<String, f64>,
    outcomes: &[(String, DelegationOutcome)],
) -> HashMap<String, f64> {
    let mut comfort = base.clone();
    for (label, outcome) in outcomes {
        let entry = comfort.entry(label.clone()).or_insert(0.5);
        *entry = match outcome {
            DelegationOutcome::ApprovedQuickly => (*entry + 0.05).min(1.0),
            DelegationOutcome::Edited => (*entry - 0.02).max(0.1),
            DelegationOutcome::Rejected => (*entry - 0.10).max(0.1),
        };
    }
    comfort
}

/// Clamped sigmoid centered at 0.5; crushes noise, amplifies signal.
fn sigmoid_normalize(x: f64) -> f64 {
    let exponent = (-TEMPERATURE * (x - 0.5)).clamp(-20.0, 20.0);
    1.0 / (1.0 + exponent.exp())
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchetypeVectors {
    pub completion_consistency: f64,
    pub execution_rate: f64,
    pub growth_velocity: f64,
    pub self_awareness: f64,
    pub ambition_calibration: f64,
    pub recovery_speed: f64,
}

fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn compute_raw_vectors(entries: &[DailyGoalEntry], reflection_self_awareness: f64) -> ArchetypeVectors {
    let rates: Vec<f64> = entries.iter().map(|e| e.completion_rate).collect();
    let execution_rate = if rates.is_empty() { 0.5 } else { rates.iter().sum::<f64>() / rates.len() as f64 };
    let completion_consistency = (1.0 - 3.0 * stddev(&rates)).clamp(0.0, 1.0);

    let growth_velocity = if rates.len() >= 2 {
        let mid = rates.len() / 2;
        let (first, second) = rates.split_at(mid);
        let first_mean = first.iter().sum::<f64>() / first.len() as f64;
        let second_mean = second.iter().sum::<f64>() / second.len() as f64;
        (0.5 + (second_mean - first_mean)).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let mean_completion_ratio = execution_rate;
    let ambition_calibration = (1.0 - 2.0 * (mean_completion_ratio - 0.8).abs()).clamp(0.0, 1.0);

    let mut bad_streaks = 0;
    let mut recoveries = 0;
    for window in rates.windows(2) {
        let (prev, curr) = (window[0], window[1]);
        if prev < 0.4 {
            bad_streaks += 1;
            if curr > prev + 0.2 {
                recoveries += 1;
            }
        }
    }
    let recovery_speed = if bad_streaks > 0 { recoveries as f64 / bad_streaks as f64 } else { 0.5 };

    ArchetypeVectors {
        completion_consistency,
        execution_rate,
        growth_velocity,
        self_awareness: reflection_self_awareness.clamp(0.0, 1.0),
        ambition_calibration,
        recovery_speed,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchetypeClassification {
    pub archetype: Archetype,
    pub execution_composite: f64,
    pub growth_composite: f64,
    pub confidence: f64,
}

/// Normalizes each raw vector, gates consistency by execution rate
/// when it's below 0.5, composites into execution/growth axes, then
/// matches against exclusive thresholds (default: at_risk).
pub fn classify_archetype(raw: &ArchetypeVectors, sample_size: usize) -> ArchetypeClassification {
    let execution = sigmoid_normalize(raw.execution_rate);
    let mut consistency = sigmoid_normalize(raw.completion_consistency);
    let growth = sigmoid_normalize(raw.growth_velocity);
    let self_awareness = sigmoid_normalize(raw.self_awareness);
    let ambition = sigmoid_normalize(raw.ambition_calibration);
    let recovery = sigmoid_normalize(raw.recovery_speed);

    if execution < 0.50 {
        consistency *= execution * 2.0;
    }

    let execution_composite = 0.40 * execution + 0.30 * consistency + 0.15 * ambition + 0.15 * recovery;
    let growth_composite = 0.40 * growth + 0.30 * self_awareness + 0.15 * recovery + 0.15 * ambition;

    let archetype = if execution_composite >= 0.85 && growth_composite >= 0.80 {
        Archetype::CompoundingBuilder
    } else if execution_composite >= 0.70 && growth_composite < 0.50 {
        Archetype::ReliableOperator
    } else if execution_composite < 0.50 && growth_composite >= 0.65 {
        Archetype::EmergingTalent
    } else {
        Archetype::AtRisk
    };

    ArchetypeClassification {
        archetype,
        execution_composite,
        growth_composite,
        confidence: (sample_size as f64 / 10.0).min(1.0),
    }
}

/// Tracks successive daily snapshots of the archetype axes, flagging
/// drift when any field moves by more than the threshold between two
/// consecutive snapshots.
#[derive(Debug, Default)]
pub struct TemporalTracker {
    snapshots: Vec<HashMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub changed_fields: Vec<String>,
    pub magnitude: f64,
    pub direction: HashMap<String, String>,
}

impl TemporalTracker {
    const DRIFT_THRESHOLD: f64 = 0.15;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, scores: HashMap<String, f64>) {
        self.snapshots.push(scores);
        if self.snapshots.len() > 30 {
            self.snapshots.remove(0);
        }
    }

    pub fn detect_drift(&self) -> Option<DriftReport> {
        if self.snapshots.len() < 2 {
            return None;
        }
        let prev = &self.snapshots[self.snapshots.len() - 2];
        let last = &self.snapshots[self.snapshots.len() - 1];

        let mut changed_fields = Vec::new();
        let mut direction = HashMap::new();
        let mut magnitude = 0.0_f64;

        for (field, last_value) in last {
            if let Some(prev_value) = prev.get(field) {
                let diff = last_value - prev_value;
                if diff.abs() > Self::DRIFT_THRESHOLD {
                    changed_fields.push(field.clone());
                    direction.insert(
                        field.clone(),
                        if diff > 0.0 { "improved".to_string() } else { "declined".to_string() },
                    );
                    magnitude = magnitude.max(diff.abs());
                }
            }
        }

        if changed_fields.is_empty() {
            None
        } else {
            Some(DriftReport {
                changed_fields,
                magnitude,
                direction,
            })
        }
    }
}

/// Runs the full derivation pipeline and produces a [`UserProfile`].
pub fn build_profile(
    entries: &[DailyGoalEntry],
    completions: &[TaskCompletionRecord],
    social_posting_hours: &[u8],
    reflection_self_awareness: f64,
    delegation_outcomes: &[(String, DelegationOutcome)],
    now: DateTime<Utc>,
) -> (UserProfile, ArchetypeClassification) {
    let mut profile = UserProfile::default();
    profile.peak_hours = compute_peak_hours(completions, social_posting_hours, entries);
    profile.estimation_bias = compute_estimation_bias(completions, now);
    profile.adherence_score = compute_adherence_score(entries, now);
    profile.energy_curve = compute_energy_curve(social_posting_hours, entries);
    profile.automation_comfort = compute_automation_comfort(&profile.automation_comfort, delegation_outcomes);

    let drift = compute_drift_direction(entries);
    if drift == DriftDirection::Distraction {
        let entry = profile.distraction_patterns.entry("context_switch".to_string()).or_insert(0.3);
        *entry = (*entry + 0.2).min(1.0);
    }

    let raw = compute_raw_vectors(entries, reflection_self_awareness);
    let classification = classify_archetype(&raw, entries.len());
    profile.archetype = classification.archetype;

    (profile, classification)
}

/// Appends a task completion observation for the next recompute and
/// trims anything older than [`RETENTION_DAYS`].
pub async fn record_task_completion<K: KvStore>(
    kv: &K,
    record: &TaskCompletionRecord,
    now: DateTime<Utc>,
) -> Result<()> {
    let member = serde_json::to_string(record)?;
    let score = record.completed_at.timestamp() as f64;
    kv.zset_add(PROFILER_TASK_COMPLETIONS_KEY, &member, score).await?;
    let cutoff = (now - chrono::Duration::days(RETENTION_DAYS)).timestamp() as f64;
    kv.zset_remove_range_by_score(PROFILER_TASK_COMPLETIONS_KEY, 0.0, cutoff).await
}

/// Appends a daily goal snapshot for the next recompute and trims
/// anything older than [`RETENTION_DAYS`].
pub async fn record_daily_goal<K: KvStore>(kv: &K, entry: &DailyGoalEntry, now: DateTime<Utc>) -> Result<()> {
    let member = serde_json::to_string(entry)?;
    let score = entry.date.timestamp() as f64;
    kv.zset_add(PROFILER_DAILY_GOALS_KEY, &member, score).await?;
    let cutoff = (now - chrono::Duration::days(RETENTION_DAYS)).timestamp() as f64;
    kv.zset_remove_range_by_score(PROFILER_DAILY_GOALS_KEY, 0.0, cutoff).await
}

async fn load_recent<K: KvStore>(
    kv: &K,
    now: DateTime<Utc>,
) -> Result<(Vec<DailyGoalEntry>, Vec<TaskCompletionRecord>)> {
    let cutoff = (now - chrono::Duration::days(RETENTION_DAYS)).timestamp() as f64;
    let window_end = now.timestamp() as f64;

    let entries = kv
        .zset_range_by_score(PROFILER_DAILY_GOALS_KEY, cutoff, window_end)
        .await?
        .into_iter()
        .filter_map(|m| serde_json::from_str::<DailyGoalEntry>(&m.member).ok())
        .collect();

    let completions = kv
        .zset_range_by_score(PROFILER_TASK_COMPLETIONS_KEY, cutoff, window_end)
        .await?
        .into_iter()
        .filter_map(|m| serde_json::from_str::<TaskCompletionRecord>(&m.member).ok())
        .collect();

    Ok((entries, completions))
}

/// Loads the observation window from the KV substrate, rebuilds the
/// profile, and persists the result under `profiler:last_result` for
/// [`cached`] to serve between recomputes.
pub async fn recompute_and_store<K: KvStore>(
    kv: &K,
    social_posting_hours: &[u8],
    reflection_self_awareness: f64,
    delegation_outcomes: &[(String, DelegationOutcome)],
    now: DateTime<Utc>,
) -> Result<(UserProfile, ArchetypeClassification)> {
    let (entries, completions) = load_recent(kv, now).await?;
    let (profile, classification) = build_profile(
        &entries,
        &completions,
        social_posting_hours,
        reflection_self_awareness,
        delegation_outcomes,
        now,
    );
    kv.string_set(PROFILER_LAST_RESULT_KEY, &serde_json::to_string(&profile)?).await?;
    Ok((profile, classification))
}

/// The last persisted profile, or a default one before any recompute
/// has run.
pub async fn cached<K: KvStore>(kv: &K) -> Result<UserProfile> {
    match kv.string_get(PROFILER_LAST_RESULT_KEY).await? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(UserProfile::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_hours_default_with_no_data() {
        let hours = compute_peak_hours(&[], &[], &[]);
        assert_eq!(hours, DEFAULT_PEAK_HOURS.to_vec());
    }

    #[test]
    fn estimation_bias_defaults_with_no_completions() {
        assert_eq!(compute_estimation_bias(&[], Utc::now()), 1.2);
    }

    #[test]
    fn adherence_score_defaults_with_no_entries() {
        assert_eq!(compute_adherence_score(&[], Utc::now()), 0.7);
    }

    #[test]
    fn automation_comfort_responds_to_outcomes() {
        let mut base = HashMap::new();
        base.insert("email".to_string(), 0.9);
        let comfort = compute_automation_comfort(
            &base,
            &[("email".to_string(), DelegationOutcome::Rejected)],
        );
        assert!((comfort["email"] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn default_archetype_with_no_signal_is_at_risk() {
        let raw = ArchetypeVectors {
            completion_consistency: 0.5,
            execution_rate: 0.5,
            growth_velocity: 0.5,
            self_awareness: 0.5,
            ambition_calibration: 0.5,
            recovery_speed: 0.5,
        };
        let classification = classify_archetype(&raw, 0);
        assert_eq!(classification.archetype, Archetype::AtRisk);
    }

    #[test]
    fn compounding_builder_requires_both_composites_high() {
        let raw = ArchetypeVectors {
            completion_consistency: 0.95,
            execution_rate: 0.97,
            growth_velocity: 0.95,
            self_awareness: 0.95,
            ambition_calibration: 0.9,
            recovery_speed: 0.9,
        };
        let classification = classify_archetype(&raw, 10);
        assert_eq!(classification.archetype, Archetype::CompoundingBuilder);
    }

    #[tokio::test]
    async fn recompute_and_store_persists_for_cached_to_read() {
        use shared::MemoryKv;

        let kv = MemoryKv::new();
        let now = Utc::now();
        assert_eq!(cached(&kv).await.unwrap().estimation_bias, UserProfile::default().estimation_bias);

        record_task_completion(
            &kv,
            &TaskCompletionRecord {
                actual_minutes: 20.0,
                estimated_minutes: 25.0,
                completed_at: now,
            },
            now,
        )
        .await
        .unwrap();
        record_daily_goal(
            &kv,
            &DailyGoalEntry {
                date: now,
                task_completed_flags: vec![true, true, false],
                completion_rate: 0.66,
            },
            now,
        )
        .await
        .unwrap();

        let (profile, classification) =
            recompute_and_store(&kv, &[], DEFAULT_SELF_AWARENESS, &[], now).await.unwrap();
        assert!(classification.confidence > 0.0);

        let reloaded = cached(&kv).await.unwrap();
        assert_eq!(reloaded.estimation_bias, profile.estimation_bias);
    }

    #[test]
    fn temporal_tracker_requires_two_snapshots() {
        let mut tracker = TemporalTracker::new();
        tracker.add_snapshot(HashMap::from([("execution".to_string(), 0.5)]));
        assert!(tracker.detect_drift().is_none());
    }

    #[test]
    fn temporal_tracker_flags_drift_above_threshold() {
        let mut tracker = TemporalTracker::new();
        tracker.add_snapshot(HashMap::from([("execution".to_string(), 0.5)]));
        tracker.add_snapshot(HashMap::from([("execution".to_string(), 0.8)]));
        let drift = tracker.detect_drift().unwrap();
        assert!(drift.changed_fields.contains(&"execution".to_string()));
    }
}
