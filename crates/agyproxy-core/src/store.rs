use std::collections::HashMap;

use agyproxy_common::{CredentialId, Mode, ProxyError, ProxyResult};
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::credential::Credential;

/// Persistence seam. The durable implementation lives outside this crate;
/// the proxy only reads records and writes back token state, project ids
/// and usage counters.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn list(&self, mode: Mode) -> ProxyResult<Vec<Credential>>;
    async fn get(&self, id: CredentialId) -> ProxyResult<Option<Credential>>;
    async fn update_token_state(
        &self,
        id: CredentialId,
        access_token: String,
        expires_at: OffsetDateTime,
    ) -> ProxyResult<()>;
    async fn update_project_id(&self, id: CredentialId, project_id: String) -> ProxyResult<()>;
    async fn increment_usage(&self, id: CredentialId) -> ProxyResult<()>;
}

/// In-memory store backing the file-seeded binary and the test suites.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<CredentialId, Credential>>,
    usage: RwLock<HashMap<CredentialId, u64>>,
}

impl MemoryStore {
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let records = credentials
            .into_iter()
            .map(|cred| (cred.id, cred))
            .collect();
        Self {
            records: RwLock::new(records),
            usage: RwLock::new(HashMap::new()),
        }
    }

    pub async fn usage_of(&self, id: CredentialId) -> u64 {
        self.usage.read().await.get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn list(&self, mode: Mode) -> ProxyResult<Vec<Credential>> {
        let records = self.records.read().await;
        let mut out: Vec<Credential> = records
            .values()
            .filter(|cred| cred.mode == mode)
            .cloned()
            .collect();
        out.sort_by_key(|cred| cred.id);
        Ok(out)
    }

    async fn get(&self, id: CredentialId) -> ProxyResult<Option<Credential>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update_token_state(
        &self,
        id: CredentialId,
        access_token: String,
        expires_at: OffsetDateTime,
    ) -> ProxyResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| ProxyError::Transport(format!("unknown credential {id}")))?;
        record.access_token = Some(access_token);
        record.expires_at = Some(expires_at);
        Ok(())
    }

    async fn update_project_id(&self, id: CredentialId, project_id: String) -> ProxyResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| ProxyError::Transport(format!("unknown credential {id}")))?;
        record.project_id = Some(project_id);
        Ok(())
    }

    async fn increment_usage(&self, id: CredentialId) -> ProxyResult<()> {
        *self.usage.write().await.entry(id).or_insert(0) += 1;
        Ok(())
    }
}
