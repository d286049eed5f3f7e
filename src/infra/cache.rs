use std::time::Duration;

use anyhow::Context as _;
use deadpool_redis::Pool;
use deadpool_redis::redis::AsyncCommands;

use crate::domain::repository::ResponseCache;
use crate::domain::types::CachedResponse;

#[derive(Clone)]
pub struct RedisResponseCache {
    pub pool: Pool,
    pub ttl: Duration,
}

fn response_key(scope: &str, key: &str) -> String {
    format!("idem:{}:{}", scope, key)
}

impl ResponseCache for RedisResponseCache {
    async fn get(&self, scope: &str, key: &str) -> anyhow::Result<Option<CachedResponse>> {
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let value: Option<String> = conn
            .get(response_key(scope, key))
            .await
            .context("read cached response")?;
        match value {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("decode cached response")?,
            )),
            None => Ok(None),
        }
    }

    async fn put(&self, scope: &str, key: &str, response: &CachedResponse) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let json = serde_json::to_string(response).context("encode cached response")?;
        let (): () = conn
            .set_ex(response_key(scope, key), json, self.ttl.as_secs())
            .await
            .context("write cached response")?;
        Ok(())
    }
}
