//! The `KvStore` abstraction the Bayesian learner (C4) trains and
//! classifies against (spec §4.4, §9 "Training-path coupling to a
//! concrete store implementation"). Two implementations satisfy it: an
//! in-memory store with real concurrency semantics for tests, and a
//! `redis`-backed store for production — one trait per storage concern
//! with a swappable backend crate, rather than a single hard-coded
//! client.

mod kv;
mod memory;
mod redis_store;

pub use kv::{KvStore, PipelineOp};
pub use memory::MemoryStore;
pub use redis_store::{RedisConfig, RedisStore};
