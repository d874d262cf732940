use agyproxy_common::{CredentialId, Mode, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How long before nominal expiry a token is already treated as expired.
pub const EXPIRY_SKEW: time::Duration = time::Duration::minutes(5);

/// One pooled upstream account. `mode` is fixed at creation; token material
/// and `project_id` are the only fields the proxy ever writes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub user_id: UserId,
    pub mode: Mode,
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub shared: bool,
}

fn default_enabled() -> bool {
    true
}

impl Credential {
    /// Token usable right now, with the skew applied. A token without a
    /// recorded expiry is trusted as-is.
    pub fn token_fresh_at(&self, now: OffsetDateTime) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(_), Some(expires_at)) => now + EXPIRY_SKEW < expires_at,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Token expired, but recently enough to be worth sending when the
    /// refresh endpoint is down.
    pub fn token_stale_within(&self, now: OffsetDateTime, grace: time::Duration) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(_), Some(expires_at)) => now < expires_at + grace,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_in: time::Duration) -> Credential {
        Credential {
            id: 1,
            user_id: 1,
            mode: Mode::Antigravity,
            refresh_token: "rt".into(),
            access_token: Some("at".into()),
            expires_at: Some(OffsetDateTime::now_utc() + expires_in),
            project_id: None,
            enabled: true,
            shared: false,
        }
    }

    #[test]
    fn skew_treats_soon_to_expire_as_expired() {
        let now = OffsetDateTime::now_utc();
        assert!(credential(time::Duration::minutes(10)).token_fresh_at(now));
        assert!(!credential(time::Duration::minutes(4)).token_fresh_at(now));
        assert!(!credential(time::Duration::minutes(-1)).token_fresh_at(now));
    }

    #[test]
    fn stale_window_covers_recent_expiry_only() {
        let now = OffsetDateTime::now_utc();
        let grace = time::Duration::minutes(15);
        assert!(credential(time::Duration::minutes(-10)).token_stale_within(now, grace));
        assert!(!credential(time::Duration::minutes(-20)).token_stale_within(now, grace));
    }

    #[test]
    fn missing_token_is_neither_fresh_nor_stale() {
        let now = OffsetDateTime::now_utc();
        let mut cred = credential(time::Duration::minutes(10));
        cred.access_token = None;
        assert!(!cred.token_fresh_at(now));
        assert!(!cred.token_stale_within(now, time::Duration::minutes(15)));
    }

    #[test]
    fn token_without_expiry_is_trusted() {
        let now = OffsetDateTime::now_utc();
        let mut cred = credential(time::Duration::minutes(10));
        cred.expires_at = None;
        assert!(cred.token_fresh_at(now));
    }
}
