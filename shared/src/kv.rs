//! The keyed KV/pub-sub substrate every subsystem stores through.
//!
//! Task hashes, bucket/backlog/active membership sets, and time-windowed
//! sorted sets (energy completions, profiler signals) all live behind
//! this trait so the scheduling engine never talks to `redis` directly.
//! A [`RedisKv`] backs production; an in-memory [`MemoryKv`] backs tests
//! without requiring a running Redis instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;

use crate::error::{Result, SchedulerError};

/// A single entry in a sorted set, as returned by range queries.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hash_set_all(&self, key: &str, fields: HashMap<String, String>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>>;
    async fn zset_remove_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<()>;
    async fn zset_latest(&self, key: &str) -> Result<Option<ScoredMember>>;
    async fn zset_card(&self, key: &str) -> Result<usize>;

    async fn string_get(&self, key: &str) -> Result<Option<String>>;
    async fn string_set(&self, key: &str, value: &str) -> Result<()>;

    /// Publishes a JSON payload to a pub/sub channel. Best-effort: the
    /// caller decides whether a publish failure should surface.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}

/// Production backing: a pooled Redis connection manager, mirroring the
/// platform's usual "pooled client with a health check" shape.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    client: redis::Client,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SchedulerError::invalid_input(format!("invalid redis url: {e}")))?;
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self { conn, client })
    }

    /// A fresh pub/sub connection for subscribing to a channel (the
    /// connection manager itself does not support subscription).
    pub async fn pubsub_connection(&self) -> Result<redis::aio::PubSub> {
        Ok(self.client.get_async_connection().await?.into_pubsub())
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hash_set_all(&self, key: &str, fields: HashMap<String, String>) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let pairs: Vec<(String, String)> = fields.into_iter().collect();
        conn.hset_multiple::<_, _, _, ()>(key, &pairs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>> {
        let mut conn = self.conn.clone();
        let raw: Vec<(String, f64)> = conn.zrangebyscore_withscores(key, min, max).await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    async fn zset_remove_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zrembyscore::<_, _, _, ()>(key, min, max).await?;
        Ok(())
    }

    async fn zset_latest(&self, key: &str) -> Result<Option<ScoredMember>> {
        let mut conn = self.conn.clone();
        let raw: Vec<(String, f64)> = conn.zrange_withscores(key, -1, -1).await?;
        Ok(raw
            .into_iter()
            .next()
            .map(|(member, score)| ScoredMember { member, score }))
    }

    async fn zset_card(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(key).await?)
    }

    async fn string_get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn string_set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-memory backing used by unit and integration tests, and usable as
/// a local single-process deployment without a Redis server.
#[derive(Clone, Default)]
pub struct MemoryKv {
    hashes: Arc<DashMap<String, HashMap<String, String>>>,
    sets: Arc<DashMap<String, std::collections::HashSet<String>>>,
    zsets: Arc<DashMap<String, RwLock<Vec<ScoredMember>>>>,
    strings: Arc<DashMap<String, String>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a channel for test assertions on published events.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.get(key).map(|v| v.clone()).unwrap_or_default())
    }

    async fn hash_set_all(&self, key: &str, fields: HashMap<String, String>) -> Result<()> {
        self.hashes.entry(key.to_string()).or_default().extend(fields);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.hashes.remove(key);
        self.sets.remove(key);
        self.zsets.remove(key);
        self.strings.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let entry = self.zsets.entry(key.to_string()).or_default();
        let mut guard = entry.write();
        guard.retain(|m| m.member != member);
        guard.push(ScoredMember {
            member: member.to_string(),
            score,
        });
        guard.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap());
        Ok(())
    }

    async fn zset_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>> {
        Ok(self
            .zsets
            .get(key)
            .map(|guard| {
                guard
                    .read()
                    .iter()
                    .filter(|m| m.score >= min && m.score <= max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zset_remove_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<()> {
        if let Some(entry) = self.zsets.get(key) {
            entry.write().retain(|m| m.score < min || m.score > max);
        }
        Ok(())
    }

    async fn zset_latest(&self, key: &str) -> Result<Option<ScoredMember>> {
        Ok(self.zsets.get(key).and_then(|guard| guard.read().last().cloned()))
    }

    async fn zset_card(&self, key: &str) -> Result<usize> {
        Ok(self.zsets.get(key).map(|guard| guard.read().len()).unwrap_or(0))
    }

    async fn string_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.strings.get(key).map(|v| v.clone()))
    }

    async fn string_set(&self, key: &str, value: &str) -> Result<()> {
        self.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        if let Some(sender) = self.channels.get(channel) {
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_roundtrip() {
        let kv = MemoryKv::new();
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), "write report".to_string());
        kv.hash_set_all("task:1", fields).await.unwrap();
        let back = kv.hash_get_all("task:1").await.unwrap();
        assert_eq!(back.get("title").unwrap(), "write report");
    }

    #[tokio::test]
    async fn set_membership() {
        let kv = MemoryKv::new();
        kv.set_add("task:backlog", "task:1").await.unwrap();
        kv.set_add("task:backlog", "task:2").await.unwrap();
        kv.set_remove("task:backlog", "task:1").await.unwrap();
        let members = kv.set_members("task:backlog").await.unwrap();
        assert_eq!(members, vec!["task:2".to_string()]);
    }

    #[tokio::test]
    async fn zset_windowing() {
        let kv = MemoryKv::new();
        kv.zset_add("energy:completions", "a:10:10", 100.0).await.unwrap();
        kv.zset_add("energy:completions", "b:20:10", 200.0).await.unwrap();
        let windowed = kv.zset_range_by_score("energy:completions", 150.0, 300.0).await.unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].member, "b:20:10");
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let kv = MemoryKv::new();
        let mut rx = kv.subscribe("events");
        kv.publish("events", "{\"type\":\"ping\"}").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, "{\"type\":\"ping\"}");
    }
}
