#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations
)]

//! # Trinity-Integration
//! KV persistence contract used for trade-state crash recovery, the cross-instance trade lock,
//! cooldowns and exchange health snapshots. Backed by Redis in production, with an in-memory
//! fallback so the engine still runs (minus crash recovery and cross-instance locking) when
//! Redis is unreachable at startup.

pub mod kv;
pub mod memory;
pub mod redis_store;

pub use kv::KvStore;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
