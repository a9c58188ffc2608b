use super::{new_token, validate_ttl, LeaseStore};
use crate::LeaseError;
use async_trait::async_trait;
use ::redis::{aio::ConnectionManager, cmd, Client, RedisError, Script};
use std::{sync::LazyLock, time::Duration};

const LEASE_KEY_PREFIX: &str = "lease:";

// GET and DEL must run as one command; split up, a lease that expired in between
// and was taken by another holder would be deleted under its feet.
static RELEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#,
    )
});

/// Lease store shared by every worker process pointed at the same Redis.
///
/// Acquisition is a single `SET key token NX PX ttl`, release a Lua
/// compare-and-delete, so no client-side locking is needed.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: ConnectionManager,
}

impl RedisLeaseStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Accepts either a `redis://` url or a bare `host:port`.
    pub async fn connect(addr: &str) -> Result<Self, LeaseError> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{addr}")
        };
        let client = Client::open(url).map_err(backend)?;
        let conn = ConnectionManager::new(client).await.map_err(backend)?;
        Ok(Self::new(conn))
    }
}

fn backend(err: RedisError) -> LeaseError {
    LeaseError::Backend(err.to_string())
}

fn redis_key(key: &str) -> String {
    format!("{LEASE_KEY_PREFIX}{key}")
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>, LeaseError> {
        validate_ttl(ttl)?;

        let token = new_token();
        // PX takes whole milliseconds, sub-millisecond ttls round up
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();
        let reply: Option<String> = cmd("SET")
            .arg(redis_key(key))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), LeaseError> {
        let mut conn = self.conn.clone();
        let _deleted: i64 = RELEASE_SCRIPT
            .key(redis_key(key))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
