use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use zpam_trc::Error;
use zpam_trc::Result;

use crate::kv::{KvStore, PipelineOp};

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
}

/// Production `KvStore` backed by an external Redis-compatible
/// service, pooled per spec §5 ("pool sized for `MaxConcurrent` ×
/// average suspensions-in-flight; no user-level locking"). Training
/// writes use `redis::pipe()` for the "no single-key round-trip per
/// token" requirement of spec §4.4.
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn connect(config: RedisConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| Error::ConfigurationError(format!("invalid redis config: {e}")))?
            .max_size(config.pool_size.max(1))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("redis pool build failed: {e}")))?;
        Ok(RedisStore { pool })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("redis pool exhausted: {e}")))
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        conn.hget(key, field)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("redis HGET failed: {e}")))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        conn.hgetall(key)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("redis HGETALL failed: {e}")))
    }

    async fn hash_get_many(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(key);
        }
        pipe.query_async(&mut conn)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("redis HGETALL pipeline failed: {e}")))
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn().await?;
        conn.hincr(key, field, delta)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("redis HINCRBY failed: {e}")))
    }

    async fn key_delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("redis DEL failed: {e}")))?;
        Ok(())
    }

    async fn scan_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{prefix}*");
        let mut cursor = 0u64;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::DependencyUnavailable(format!("redis SCAN failed: {e}")))?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                PipelineOp::HashIncr { key, field, delta } => {
                    pipe.cmd("HINCRBY").arg(key).arg(field).arg(*delta);
                }
                PipelineOp::HashIncrWithExpire {
                    key,
                    field,
                    delta,
                    ttl,
                } => {
                    pipe.cmd("HINCRBY").arg(key).arg(field).arg(*delta);
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(*ttl));
                }
                PipelineOp::Delete(key) => {
                    pipe.cmd("DEL").arg(key);
                }
            }
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("redis pipeline failed: {e}")))?;
        Ok(())
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}
