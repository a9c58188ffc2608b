use super::{new_token, validate_ttl, LeaseStore};
use crate::LeaseError;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Process-local lease store for single-instance setups and tests.
///
/// Leases never expire on their own here; tests simulate a ttl running out with
/// [`MemoryLeaseStore::expire`].
#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, String>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the lease on `key` to lapse, whoever holds it.
    pub fn expire(&self, key: &str) {
        self.leases().remove(key);
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.leases().contains_key(key)
    }

    // the map holds plain strings, a panic elsewhere cannot leave it half-written
    fn leases(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>, LeaseError> {
        validate_ttl(ttl)?;

        let mut leases = self.leases();
        if leases.contains_key(key) {
            return Ok(None);
        }
        let token = new_token();
        leases.insert(key.to_string(), token.clone());
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), LeaseError> {
        let mut leases = self.leases();
        if leases.get(key).is_some_and(|held| held == token) {
            leases.remove(key);
        }
        Ok(())
    }
}
