//! Token-authenticated, time-bounded mutual exclusion on string keys.
//!
//! Several worker processes consuming the same queue use a shared
//! [`LeaseStore`] so that two copies of the same logical message are never
//! handled at the same time. A lease is proven only by its token: releasing with
//! any other token leaves the current holder alone, and a holder that dies simply
//! lets its lease run out.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::{LeaseError, Message};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Takes the lease on `key` if nobody holds it. Returns the fresh token, or
    /// `None` without touching anything when the lease is already held.
    ///
    /// Fails with [`LeaseError::InvalidTtl`] for a zero ttl.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>, LeaseError>;

    /// Drops the lease on `key` if `token` is the current one. Releasing a lease
    /// that is not held, or held under another token, is a no-op.
    async fn release(&self, key: &str, token: &str) -> Result<(), LeaseError>;
}

pub(crate) fn validate_ttl(ttl: Duration) -> Result<(), LeaseError> {
    if ttl.is_zero() {
        return Err(LeaseError::InvalidTtl(ttl));
    }
    Ok(())
}

// 122 random bits, collisions are not a practical concern
pub(crate) fn new_token() -> String {
    Uuid::new_v4().to_string()
}

pub type DedupKeyFn = Arc<dyn Fn(&Message) -> String + Send + Sync>;

/// How the runner guards a message with a lease: which store, for how long, and
/// which key identifies "the same work". The key defaults to the message id.
#[derive(Clone)]
pub struct LeaseGuard {
    store: Arc<dyn LeaseStore>,
    ttl: Duration,
    dedup_key: DedupKeyFn,
}

pub(crate) struct HeldLease {
    key: String,
    token: String,
}

impl HeldLease {
    pub(crate) fn key(&self) -> &str {
        &self.key
    }
}

impl LeaseGuard {
    /// `ttl` has to cover handling plus deleting a message, otherwise a slow
    /// message loses its lease while still being worked on.
    pub fn new(store: Arc<dyn LeaseStore>, ttl: Duration) -> Result<Self, LeaseError> {
        validate_ttl(ttl)?;
        Ok(Self {
            store,
            ttl,
            dedup_key: Arc::new(|message: &Message| message.id().to_string()),
        })
    }

    pub fn with_dedup_key(
        mut self,
        dedup_key: impl Fn(&Message) -> String + Send + Sync + 'static,
    ) -> Self {
        self.dedup_key = Arc::new(dedup_key);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) async fn try_hold(
        &self,
        message: &Message,
    ) -> Result<Option<HeldLease>, LeaseError> {
        let key = (self.dedup_key)(message);
        let token = self.store.acquire(&key, self.ttl).await?;
        Ok(token.map(|token| HeldLease { key, token }))
    }

    pub(crate) async fn release(&self, held: HeldLease) -> Result<(), LeaseError> {
        self.store.release(&held.key, &held.token).await
    }
}
