use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use agyproxy_common::{Mode, ProxyError};
use agyproxy_core::{Credential, CredentialPool, MemoryStore};

fn credential(id: i64, mode: Mode, enabled: bool) -> Credential {
    Credential {
        id,
        user_id: 1,
        mode,
        refresh_token: format!("rt-{id}"),
        access_token: Some(format!("at-{id}")),
        expires_at: Some(time::OffsetDateTime::now_utc() + time::Duration::hours(1)),
        project_id: Some(format!("proj-{id}")),
        enabled,
        shared: false,
    }
}

fn pool_with(credentials: Vec<Credential>) -> CredentialPool {
    CredentialPool::new(Arc::new(MemoryStore::new(credentials)))
}

#[tokio::test]
async fn selection_respects_mode_and_enabled() {
    let pool = pool_with(vec![
        credential(1, Mode::Antigravity, true),
        credential(2, Mode::Antigravity, false),
        credential(3, Mode::GeminiCli, true),
    ]);
    for _ in 0..100 {
        let picked = pool.select(Mode::Antigravity, &HashSet::new()).await.unwrap();
        assert_eq!(picked.id, 1);
    }
}

#[tokio::test]
async fn excluded_ids_are_never_picked() {
    let pool = pool_with(vec![
        credential(1, Mode::Antigravity, true),
        credential(2, Mode::Antigravity, true),
    ]);
    let excluded: HashSet<i64> = [1].into_iter().collect();
    for _ in 0..50 {
        let picked = pool.select(Mode::Antigravity, &excluded).await.unwrap();
        assert_eq!(picked.id, 2);
    }
}

#[tokio::test]
async fn empty_pool_reports_no_eligible_credential() {
    let pool = pool_with(vec![credential(1, Mode::GeminiCli, true)]);
    let err = pool
        .select(Mode::Antigravity, &HashSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::NoEligibleCredential(Mode::Antigravity)));
}

#[tokio::test]
async fn cooldown_excludes_until_cleared() {
    let pool = pool_with(vec![
        credential(1, Mode::Antigravity, true),
        credential(2, Mode::Antigravity, true),
    ]);
    pool.mark_unhealthy(1, Duration::from_secs(60)).await;
    assert!(pool.is_cooling(1).await);
    for _ in 0..50 {
        let picked = pool.select(Mode::Antigravity, &HashSet::new()).await.unwrap();
        assert_eq!(picked.id, 2);
    }

    pool.mark_healthy(1).await;
    assert!(!pool.is_cooling(1).await);
    let mut seen = HashSet::new();
    for _ in 0..100 {
        seen.insert(pool.select(Mode::Antigravity, &HashSet::new()).await.unwrap().id);
    }
    assert!(seen.contains(&1));
}

#[tokio::test]
async fn cooldown_expires_on_its_own() {
    let pool = pool_with(vec![
        credential(1, Mode::Antigravity, true),
        credential(2, Mode::Antigravity, true),
    ]);
    pool.mark_unhealthy(1, Duration::from_millis(20)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pool.is_cooling(1).await);
}

#[tokio::test]
async fn whole_pool_cooling_is_exhaustion() {
    let pool = pool_with(vec![credential(1, Mode::Antigravity, true)]);
    pool.mark_unhealthy(1, Duration::from_secs(60)).await;
    let err = pool
        .select(Mode::Antigravity, &HashSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::NoEligibleCredential(_)));
}
