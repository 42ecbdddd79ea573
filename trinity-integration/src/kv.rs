use std::collections::HashMap;

use async_trait::async_trait;

/// Persistence contract the rest of the engine depends on. Implemented by [`RedisStore`] for
/// production and [`MemoryStore`] as the fallback used when Redis is unreachable at startup.
///
/// Every method returns `bool`/`Option` rather than a hard error on the read/availability paths:
/// a KV outage degrades the bot to "no crash recovery, no distributed lock" rather than
/// crashing it. Only [`KvStore::health_check`] is allowed to observe connectivity directly.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn health_check(&self) -> bool;

    /// Persist a trade's JSON blob, keyed by `trade_id`. TTL'd at 7 days: long enough to survive
    /// any reasonable downtime, short enough that abandoned keys don't accumulate forever.
    async fn set_trade_state(&self, trade_id: &str, json: &str);

    async fn get_trade_state(&self, trade_id: &str) -> Option<String>;

    /// All persisted trade blobs, keyed by trade_id. Used once, at startup, for crash recovery.
    async fn get_all_trades(&self) -> HashMap<String, String>;

    async fn delete_trade_state(&self, trade_id: &str);

    async fn set_exchange_health(&self, exchange: &str, json: &str);

    async fn get_exchange_health(&self, exchange: &str) -> Option<String>;

    async fn set_position_snapshot(&self, exchange: &str, json: &str);

    async fn set_cooldown(&self, symbol: &str, seconds: u64);

    async fn is_cooled_down(&self, symbol: &str) -> bool;

    /// Attempt to acquire a named distributed lock. Returns `true` iff this call won the lock.
    /// The sole cross-instance mutual-exclusion primitive the engine relies on.
    async fn acquire_lock(&self, name: &str, timeout_secs: u64) -> bool;

    async fn release_lock(&self, name: &str);
}

pub(crate) const TRADE_TTL_SECS: u64 = 86_400 * 7;
pub(crate) const HEALTH_TTL_SECS: u64 = 300;
pub(crate) const POSITION_SNAPSHOT_TTL_SECS: u64 = 120;
