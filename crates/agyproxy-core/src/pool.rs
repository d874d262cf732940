use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use agyproxy_common::{CredentialId, Mode, ProxyError, ProxyResult};
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::credential::Credential;
use crate::store::CredentialStore;

/// Selects credentials for dispatch. Persisted eligibility comes from the
/// store on every call; transient health (cool-downs after upstream
/// failures) lives only here and never outlasts the process.
pub struct CredentialPool {
    store: Arc<dyn CredentialStore>,
    cooldowns: RwLock<HashMap<CredentialId, Instant>>,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            cooldowns: RwLock::new(HashMap::new()),
        }
    }

    /// Uniformly random pick among enabled credentials of `mode` that are
    /// neither excluded nor cooling down.
    pub async fn select(
        &self,
        mode: Mode,
        excluded: &HashSet<CredentialId>,
    ) -> ProxyResult<Credential> {
        let candidates = self.store.list(mode).await?;

        // Snapshot the cool-down map before filtering; the store call above
        // must not run under the lock.
        let now = Instant::now();
        let cooling: HashSet<CredentialId> = {
            let mut cooldowns = self.cooldowns.write().await;
            cooldowns.retain(|_, until| *until > now);
            cooldowns.keys().copied().collect()
        };

        let eligible: Vec<Credential> = candidates
            .into_iter()
            .filter(|cred| cred.enabled)
            .filter(|cred| !excluded.contains(&cred.id))
            .filter(|cred| !cooling.contains(&cred.id))
            .collect();

        if eligible.is_empty() {
            return Err(ProxyError::NoEligibleCredential(mode));
        }
        let index = rand::rng().random_range(0..eligible.len());
        Ok(eligible[index].clone())
    }

    /// Start or extend a cool-down. Safe to call repeatedly for the same
    /// failure.
    pub async fn mark_unhealthy(&self, id: CredentialId, duration: Duration) {
        let until = Instant::now() + duration;
        let mut cooldowns = self.cooldowns.write().await;
        let entry = cooldowns.entry(id).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    /// Eagerly clear a cool-down after a success.
    pub async fn mark_healthy(&self, id: CredentialId) {
        self.cooldowns.write().await.remove(&id);
    }

    pub async fn is_cooling(&self, id: CredentialId) -> bool {
        match self.cooldowns.read().await.get(&id) {
            Some(until) => *until > Instant::now(),
            None => false,
        }
    }
}
