use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::kv::{HEALTH_TTL_SECS, KvStore, POSITION_SNAPSHOT_TTL_SECS, TRADE_TTL_SECS};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn fresh(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// In-memory [`KvStore`] used when Redis is unreachable. Process-local and non-durable: crash
/// recovery and the distributed lock degrade to "best effort within this process" in fallback
/// mode, which is why connecting to the real store is logged loudly at startup.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: String, value: String, ttl: Option<Duration>) {
        self.entries.lock().insert(key, Entry::fresh(value, ttl));
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn health_check(&self) -> bool {
        true
    }

    async fn set_trade_state(&self, trade_id: &str, json: &str) {
        self.set(
            format!("trade:{trade_id}"),
            json.to_string(),
            Some(Duration::from_secs(TRADE_TTL_SECS)),
        );
    }

    async fn get_trade_state(&self, trade_id: &str) -> Option<String> {
        self.get(&format!("trade:{trade_id}"))
    }

    async fn get_all_trades(&self) -> HashMap<String, String> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|(k, v)| k.starts_with("trade:") && v.is_live())
            .map(|(k, v)| (k.trim_start_matches("trade:").to_string(), v.value.clone()))
            .collect()
    }

    async fn delete_trade_state(&self, trade_id: &str) {
        self.entries.lock().remove(&format!("trade:{trade_id}"));
    }

    async fn set_exchange_health(&self, exchange: &str, json: &str) {
        self.set(
            format!("health:{exchange}"),
            json.to_string(),
            Some(Duration::from_secs(HEALTH_TTL_SECS)),
        );
    }

    async fn get_exchange_health(&self, exchange: &str) -> Option<String> {
        self.get(&format!("health:{exchange}"))
    }

    async fn set_position_snapshot(&self, exchange: &str, json: &str) {
        self.set(
            format!("positions:{exchange}"),
            json.to_string(),
            Some(Duration::from_secs(POSITION_SNAPSHOT_TTL_SECS)),
        );
    }

    async fn set_cooldown(&self, symbol: &str, seconds: u64) {
        self.set(
            format!("cooldown:{symbol}"),
            "1".to_string(),
            Some(Duration::from_secs(seconds)),
        );
    }

    async fn is_cooled_down(&self, symbol: &str) -> bool {
        self.get(&format!("cooldown:{symbol}")).is_some()
    }

    async fn acquire_lock(&self, name: &str, timeout_secs: u64) -> bool {
        let key = format!("lock:{name}");
        let mut entries = self.entries.lock();
        if entries.get(&key).is_some_and(Entry::is_live) {
            return false;
        }
        entries.insert(key, Entry::fresh("1".to_string(), Some(Duration::from_secs(timeout_secs))));
        true
    }

    async fn release_lock(&self, name: &str) {
        self.entries.lock().remove(&format!("lock:{name}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        assert!(store.acquire_lock("trade:BTC-USDT", 10).await);
        assert!(!store.acquire_lock("trade:BTC-USDT", 10).await);
        store.release_lock("trade:BTC-USDT").await;
        assert!(store.acquire_lock("trade:BTC-USDT", 10).await);
    }

    #[tokio::test]
    async fn cooldown_round_trips() {
        let store = MemoryStore::new();
        assert!(!store.is_cooled_down("BTC-USDT").await);
        store.set_cooldown("BTC-USDT", 60).await;
        assert!(store.is_cooled_down("BTC-USDT").await);
    }

    #[tokio::test]
    async fn trade_state_survives_round_trip() {
        let store = MemoryStore::new();
        store.set_trade_state("abc", r#"{"state":"OPEN"}"#).await;
        assert_eq!(
            store.get_trade_state("abc").await.as_deref(),
            Some(r#"{"state":"OPEN"}"#)
        );
        store.delete_trade_state("abc").await;
        assert_eq!(store.get_trade_state("abc").await, None);
    }
}
