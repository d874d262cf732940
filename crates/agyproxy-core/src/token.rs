use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agyproxy_common::{CredentialId, Mode, ProxyError, ProxyResult, GOOGLE_TOKEN_URL};
use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::store::CredentialStore;

/// Default grace window for sending an already-expired token when refresh
/// fails.
pub const DEFAULT_STALE_GRACE: time::Duration = time::Duration::minutes(15);

/// Successful `grant_type=refresh_token` exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
}

/// OAuth token endpoint seam. Tests substitute a counting fake.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, mode: Mode, refresh_token: &str) -> ProxyResult<TokenGrant>;
}

pub struct HttpTokenEndpoint {
    client: wreq::Client,
}

impl HttpTokenEndpoint {
    pub fn new(proxy: Option<&str>) -> ProxyResult<Self> {
        let mut builder = wreq::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30));
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                wreq::Proxy::all(proxy)
                    .map_err(|err| ProxyError::Transport(err.to_string()))?,
            );
        }
        let client = builder
            .build()
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn refresh(&self, mode: Mode, refresh_token: &str) -> ProxyResult<TokenGrant> {
        let profile = mode.profile();
        let form = [
            ("client_id", profile.oauth_client_id),
            ("client_secret", profile.oauth_client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&form)
            .send()
            .await
            .map_err(|err| ProxyError::TokenRefreshFailed(err.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::TokenRefreshFailed(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        response
            .json::<TokenGrant>()
            .await
            .map_err(|err| ProxyError::TokenRefreshFailed(err.to_string()))
    }
}

/// Keeps access tokens usable. Refreshes are single-flight per credential;
/// concurrent callers for the same id queue on a mutex and the late ones
/// reuse the winner's persisted token.
pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    locks: RwLock<HashMap<CredentialId, Arc<Mutex<()>>>>,
    stale_grace: time::Duration,
}

impl TokenLifecycleManager {
    pub fn new(store: Arc<dyn CredentialStore>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self::with_stale_grace(store, endpoint, DEFAULT_STALE_GRACE)
    }

    pub fn with_stale_grace(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        stale_grace: time::Duration,
    ) -> Self {
        Self {
            store,
            endpoint,
            locks: RwLock::new(HashMap::new()),
            stale_grace,
        }
    }

    /// Return a credential whose access token is good to send. The returned
    /// record reflects any refresh that happened.
    pub async fn ensure_token(&self, credential: &Credential) -> ProxyResult<Credential> {
        let now = OffsetDateTime::now_utc();
        if credential.token_fresh_at(now) {
            return Ok(credential.clone());
        }

        let lock = self.lock_for(credential.id).await;
        let _guard = lock.lock().await;

        // Re-read under the lock; another caller may have refreshed while
        // this one waited.
        let current = self
            .store
            .get(credential.id)
            .await?
            .ok_or_else(|| ProxyError::Transport(format!("credential {} vanished", credential.id)))?;
        let now = OffsetDateTime::now_utc();
        if current.token_fresh_at(now) {
            return Ok(current);
        }

        match self
            .endpoint
            .refresh(current.mode, &current.refresh_token)
            .await
        {
            Ok(grant) => {
                let expires_at = now + time::Duration::seconds(grant.expires_in);
                self.store
                    .update_token_state(current.id, grant.access_token.clone(), expires_at)
                    .await?;
                debug!(credential_id = current.id, mode = %current.mode, "access token refreshed");
                let mut refreshed = current;
                refreshed.access_token = Some(grant.access_token);
                refreshed.expires_at = Some(expires_at);
                Ok(refreshed)
            }
            Err(err) => {
                if current.token_stale_within(now, self.stale_grace) {
                    warn!(
                        credential_id = current.id,
                        error = %err,
                        "refresh failed, sending stale token within grace window"
                    );
                    return Ok(current);
                }
                Err(err)
            }
        }
    }

    async fn lock_for(&self, id: CredentialId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(&id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(id).or_default().clone()
    }
}
