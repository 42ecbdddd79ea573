use std::collections::HashMap;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::warn;

use crate::kv::{HEALTH_TTL_SECS, KvStore, POSITION_SNAPSHOT_TTL_SECS, TRADE_TTL_SECS};

/// Redis-backed [`KvStore`]. Keys are namespaced `{prefix}{kind}:{id}`, matching the layout the
/// original bot used so an operator migrating state between implementations doesn't need to
/// rewrite anything in Redis itself.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("prefix", &self.prefix).finish()
    }
}

impl RedisStore {
    /// Connect to `url`. Returns `Err` if the initial connection attempt fails; callers should
    /// fall back to [`crate::memory::MemoryStore`] rather than propagate this further, since a
    /// missing Redis must degrade the bot, not crash it.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn key(&self, kind: &str, id: &str) -> String {
        format!("{}{kind}:{id}", self.prefix)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    async fn set_trade_state(&self, trade_id: &str, json: &str) {
        let mut conn = self.conn.clone();
        let key = self.key("trade", trade_id);
        if let Err(err) = conn.set_ex::<_, _, ()>(&key, json, TRADE_TTL_SECS).await {
            warn!(%err, %key, "failed to persist trade state to redis");
        }
    }

    async fn get_trade_state(&self, trade_id: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        conn.get(self.key("trade", trade_id)).await.ok()
    }

    async fn get_all_trades(&self) -> HashMap<String, String> {
        let mut conn = self.conn.clone();
        let pattern = self.key("trade", "*");
        // `SCAN` rather than `KEYS` (§6): cursor-based iteration doesn't block the server while
        // walking the whole `trade:*` keyspace, which `KEYS` would on a long-lived instance.
        let mut iter: redis::AsyncIter<'_, String> = match conn.scan_match(&pattern).await {
            Ok(iter) => iter,
            Err(err) => {
                warn!(%err, "failed to scan trade keys from redis");
                return HashMap::new();
            }
        };
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        drop(iter);

        let mut out = HashMap::with_capacity(keys.len());
        let trade_prefix = self.key("trade", "");
        for key in keys {
            let Ok(Some(value)) = conn.get::<_, Option<String>>(&key).await else {
                continue;
            };
            let trade_id = key.trim_start_matches(&trade_prefix).to_string();
            out.insert(trade_id, value);
        }
        out
    }

    async fn delete_trade_state(&self, trade_id: &str) {
        let mut conn = self.conn.clone();
        let _: redis::RedisResult<()> = conn.del(self.key("trade", trade_id)).await;
    }

    async fn set_exchange_health(&self, exchange: &str, json: &str) {
        let mut conn = self.conn.clone();
        let key = self.key("health", exchange);
        let _: redis::RedisResult<()> = conn.set_ex(&key, json, HEALTH_TTL_SECS).await;
    }

    async fn get_exchange_health(&self, exchange: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        conn.get(self.key("health", exchange)).await.ok()
    }

    async fn set_position_snapshot(&self, exchange: &str, json: &str) {
        let mut conn = self.conn.clone();
        let key = self.key("positions", exchange);
        let _: redis::RedisResult<()> = conn.set_ex(&key, json, POSITION_SNAPSHOT_TTL_SECS).await;
    }

    async fn set_cooldown(&self, symbol: &str, seconds: u64) {
        let mut conn = self.conn.clone();
        let key = self.key("cooldown", symbol);
        let _: redis::RedisResult<()> = conn.set_ex(&key, "1", seconds).await;
    }

    async fn is_cooled_down(&self, symbol: &str) -> bool {
        let mut conn = self.conn.clone();
        conn.exists(self.key("cooldown", symbol)).await.unwrap_or(false)
    }

    async fn acquire_lock(&self, name: &str, timeout_secs: u64) -> bool {
        let mut conn = self.conn.clone();
        let key = self.key("lock", name);
        redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(timeout_secs)
            .query_async::<Option<String>>(&mut conn)
            .await
            .ok()
            .flatten()
            .is_some()
    }

    async fn release_lock(&self, name: &str) {
        let mut conn = self.conn.clone();
        let _: redis::RedisResult<()> = conn.del(self.key("lock", name)).await;
    }
}
