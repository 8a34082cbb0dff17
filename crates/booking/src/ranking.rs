//! Sold-out schedule ranking.
//!
//! Schedules are ranked by the instant they sold out, earliest first.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ScheduleId;
use redis::aio::ConnectionManager;
use redis::Client;

use crate::Result;

/// Redis sorted set holding sold-out schedules scored by epoch milliseconds.
pub const SOLD_OUT_RANKING_KEY: &str = "ranking:soldout:schedule";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoldOutEntry {
    pub schedule_id: ScheduleId,
    pub sold_out_at_ms: i64,
}

#[async_trait]
pub trait SoldOutRanking: Send + Sync {
    /// Records that `schedule_id` sold out at `at`. The first recorded
    /// instant wins, so redelivered events do not move a schedule down.
    async fn record_sold_out(&self, schedule_id: ScheduleId, at: DateTime<Utc>) -> Result<()>;

    /// Returns up to `limit` schedules, earliest sold out first.
    async fn top(&self, limit: usize) -> Result<Vec<SoldOutEntry>>;

    /// Returns the 1-based position of `schedule_id`, if it has sold out.
    async fn rank(&self, schedule_id: ScheduleId) -> Result<Option<u64>>;
}

#[async_trait]
impl<R: SoldOutRanking + ?Sized> SoldOutRanking for Arc<R> {
    async fn record_sold_out(&self, schedule_id: ScheduleId, at: DateTime<Utc>) -> Result<()> {
        (**self).record_sold_out(schedule_id, at).await
    }

    async fn top(&self, limit: usize) -> Result<Vec<SoldOutEntry>> {
        (**self).top(limit).await
    }

    async fn rank(&self, schedule_id: ScheduleId) -> Result<Option<u64>> {
        (**self).rank(schedule_id).await
    }
}

/// In-memory ranking for testing and single-node runs.
#[derive(Debug, Clone, Default)]
pub struct InMemorySoldOutRanking {
    scores: Arc<RwLock<HashMap<ScheduleId, i64>>>,
}

impl InMemorySoldOutRanking {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered(&self) -> Vec<SoldOutEntry> {
        let scores = self
            .scores
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries: Vec<SoldOutEntry> = scores
            .iter()
            .map(|(schedule_id, score)| SoldOutEntry {
                schedule_id: *schedule_id,
                sold_out_at_ms: *score,
            })
            .collect();
        // Same order as a Redis sorted set: score, then member.
        entries.sort_by_key(|e| (e.sold_out_at_ms, e.schedule_id.to_string()));
        entries
    }
}

#[async_trait]
impl SoldOutRanking for InMemorySoldOutRanking {
    async fn record_sold_out(&self, schedule_id: ScheduleId, at: DateTime<Utc>) -> Result<()> {
        self.scores
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(schedule_id)
            .or_insert(at.timestamp_millis());
        Ok(())
    }

    async fn top(&self, limit: usize) -> Result<Vec<SoldOutEntry>> {
        Ok(self.ordered().into_iter().take(limit).collect())
    }

    async fn rank(&self, schedule_id: ScheduleId) -> Result<Option<u64>> {
        Ok(self
            .ordered()
            .iter()
            .position(|e| e.schedule_id == schedule_id)
            .map(|index| index as u64 + 1))
    }
}

/// Ranking stored in a Redis sorted set.
#[derive(Clone)]
pub struct RedisSoldOutRanking {
    conn: ConnectionManager,
    key: String,
}

impl RedisSoldOutRanking {
    /// Connects to Redis at `url` using [`SOLD_OUT_RANKING_KEY`].
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            key: SOLD_OUT_RANKING_KEY.to_string(),
        }
    }

    /// Uses a different sorted set key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl SoldOutRanking for RedisSoldOutRanking {
    async fn record_sold_out(&self, schedule_id: ScheduleId, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg("NX")
            .arg(at.timestamp_millis())
            .arg(schedule_id.get())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn top(&self, limit: usize) -> Result<Vec<SoldOutEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let members: Vec<(i64, f64)> = redis::cmd("ZRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(limit - 1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        Ok(members
            .into_iter()
            .map(|(schedule_id, score)| SoldOutEntry {
                schedule_id: ScheduleId::new(schedule_id),
                sold_out_at_ms: score as i64,
            })
            .collect())
    }

    async fn rank(&self, schedule_id: ScheduleId) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let rank: Option<u64> = redis::cmd("ZRANK")
            .arg(&self.key)
            .arg(schedule_id.get())
            .query_async(&mut conn)
            .await?;
        Ok(rank.map(|r| r + 1))
    }
}
