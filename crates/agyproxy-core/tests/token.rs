use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agyproxy_common::{Mode, ProxyError, ProxyResult};
use agyproxy_core::token::TokenGrant;
use agyproxy_core::{Credential, CredentialStore, MemoryStore, TokenEndpoint, TokenLifecycleManager};
use async_trait::async_trait;

struct FakeEndpoint {
    calls: AtomicUsize,
    fail: bool,
    delay: Duration,
}

impl FakeEndpoint {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
            delay: Duration::ZERO,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for FakeEndpoint {
    async fn refresh(&self, _mode: Mode, refresh_token: &str) -> ProxyResult<TokenGrant> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ProxyError::TokenRefreshFailed("denied".into()));
        }
        Ok(TokenGrant {
            access_token: format!("fresh-for-{refresh_token}"),
            expires_in: 3600,
        })
    }
}

fn credential(expires_in: Option<time::Duration>) -> Credential {
    Credential {
        id: 7,
        user_id: 1,
        mode: Mode::Antigravity,
        refresh_token: "rt".into(),
        access_token: expires_in.map(|_| "old-token".to_string()),
        expires_at: expires_in.map(|d| time::OffsetDateTime::now_utc() + d),
        project_id: None,
        enabled: true,
        shared: false,
    }
}

#[tokio::test]
async fn fresh_token_is_returned_without_refreshing() {
    let store = Arc::new(MemoryStore::new(vec![credential(Some(
        time::Duration::hours(1),
    ))]));
    let endpoint = Arc::new(FakeEndpoint::new());
    let manager = TokenLifecycleManager::new(store, endpoint.clone());

    let out = manager
        .ensure_token(&credential(Some(time::Duration::hours(1))))
        .await
        .unwrap();
    assert_eq!(out.access_token.as_deref(), Some("old-token"));
    assert_eq!(endpoint.calls(), 0);
}

#[tokio::test]
async fn token_inside_skew_window_is_refreshed_and_persisted() {
    let store = Arc::new(MemoryStore::new(vec![credential(Some(
        time::Duration::minutes(2),
    ))]));
    let endpoint = Arc::new(FakeEndpoint::new());
    let manager = TokenLifecycleManager::new(store.clone(), endpoint.clone());

    let out = manager
        .ensure_token(&credential(Some(time::Duration::minutes(2))))
        .await
        .unwrap();
    assert_eq!(out.access_token.as_deref(), Some("fresh-for-rt"));
    assert_eq!(endpoint.calls(), 1);

    let persisted = store.get(7).await.unwrap().unwrap();
    assert_eq!(persisted.access_token.as_deref(), Some("fresh-for-rt"));
    assert!(persisted.expires_at.unwrap() > time::OffsetDateTime::now_utc());
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let store = Arc::new(MemoryStore::new(vec![credential(None)]));
    let endpoint = Arc::new(FakeEndpoint {
        delay: Duration::from_millis(30),
        ..FakeEndpoint::new()
    });
    let manager = Arc::new(TokenLifecycleManager::new(store, endpoint.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.ensure_token(&credential(None)).await
        }));
    }
    for handle in handles {
        let out = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(out.access_token.as_deref(), Some("fresh-for-rt"));
    }
    assert_eq!(endpoint.calls(), 1);
}

#[tokio::test]
async fn refresh_failure_falls_back_to_recently_stale_token() {
    let stale = credential(Some(time::Duration::minutes(-5)));
    let store = Arc::new(MemoryStore::new(vec![stale.clone()]));
    let manager = TokenLifecycleManager::new(store, Arc::new(FakeEndpoint::failing()));

    let out = manager.ensure_token(&stale).await.unwrap();
    assert_eq!(out.access_token.as_deref(), Some("old-token"));
}

#[tokio::test]
async fn refresh_failure_with_long_expired_token_errors() {
    let dead = credential(Some(time::Duration::hours(-2)));
    let store = Arc::new(MemoryStore::new(vec![dead.clone()]));
    let manager = TokenLifecycleManager::new(store, Arc::new(FakeEndpoint::failing()));

    let err = manager.ensure_token(&dead).await.unwrap_err();
    assert!(matches!(err, ProxyError::TokenRefreshFailed(_)));
}

#[tokio::test]
async fn grace_window_is_configurable() {
    let stale = credential(Some(time::Duration::minutes(-5)));
    let store = Arc::new(MemoryStore::new(vec![stale.clone()]));
    let manager = TokenLifecycleManager::with_stale_grace(
        store,
        Arc::new(FakeEndpoint::failing()),
        time::Duration::minutes(1),
    );

    let err = manager.ensure_token(&stale).await.unwrap_err();
    assert!(matches!(err, ProxyError::TokenRefreshFailed(_)));
}
