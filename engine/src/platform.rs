//! Chat-platform capability seam
//!
//! The engine never talks to the chat platform directly; everything
//! externally visible goes through this trait. Calls are one attempt each -
//! a failure is surfaced as an error and the caller compensates (refund,
//! skip) rather than retrying.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

use crumb_types::{CrumbError, CrumbResult, UserId};

/// External capabilities consumed by the economy engine
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Grant a platform role to a user. May be refused with a permission
    /// error, which the caller treats as a failed purchase.
    async fn grant_role(&self, user: &UserId, role_id: &str) -> CrumbResult<()>;

    /// Whether the user already holds a platform role
    async fn has_role(&self, user: &UserId, role_id: &str) -> CrumbResult<bool>;

    /// Set (`Some`) or clear (`None`) the user's display marker. How markers
    /// stack with permanent ones is the presentation layer's concern; the
    /// engine only ever states the desired marker.
    async fn set_display_marker(&self, user: &UserId, marker: Option<&str>) -> CrumbResult<()>;
}

/// In-memory connector for tests and local runs: records grants and markers,
/// and can be switched to refuse either capability.
#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    roles: BTreeMap<String, BTreeSet<String>>,
    markers: BTreeMap<String, String>,
    deny_grants: bool,
    deny_markers: bool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent role grants fail with a permission error
    pub fn deny_grants(&self, deny: bool) {
        self.state.lock().deny_grants = deny;
    }

    /// Make subsequent display-marker updates fail with a permission error
    pub fn deny_markers(&self, deny: bool) {
        self.state.lock().deny_markers = deny;
    }

    /// Roles currently granted to a user
    pub fn roles_of(&self, user: &UserId) -> Vec<String> {
        self.state
            .lock()
            .roles
            .get(user.as_str())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The user's current display marker, if any
    pub fn marker_of(&self, user: &UserId) -> Option<String> {
        self.state.lock().markers.get(user.as_str()).cloned()
    }
}

#[async_trait]
impl PlatformConnector for MockPlatform {
    async fn grant_role(&self, user: &UserId, role_id: &str) -> CrumbResult<()> {
        let mut state = self.state.lock();
        if state.deny_grants {
            return Err(CrumbError::Permission("role grant refused".to_string()));
        }
        state
            .roles
            .entry(user.as_str().to_string())
            .or_default()
            .insert(role_id.to_string());
        Ok(())
    }

    async fn has_role(&self, user: &UserId, role_id: &str) -> CrumbResult<bool> {
        let state = self.state.lock();
        Ok(state
            .roles
            .get(user.as_str())
            .map(|set| set.contains(role_id))
            .unwrap_or(false))
    }

    async fn set_display_marker(&self, user: &UserId, marker: Option<&str>) -> CrumbResult<()> {
        let mut state = self.state.lock();
        if state.deny_markers {
            return Err(CrumbError::Permission("display update refused".to_string()));
        }
        match marker {
            Some(marker) => {
                state.markers.insert(user.as_str().to_string(), marker.to_string());
            }
            None => {
                state.markers.remove(user.as_str());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_grant_and_check() {
        let platform = MockPlatform::new();
        let user = UserId::from(1u64);

        assert!(!platform.has_role(&user, "gold").await.unwrap());
        platform.grant_role(&user, "gold").await.unwrap();
        assert!(platform.has_role(&user, "gold").await.unwrap());
        assert_eq!(platform.roles_of(&user), vec!["gold"]);
    }

    #[tokio::test]
    async fn test_mock_denial() {
        let platform = MockPlatform::new();
        let user = UserId::from(1u64);

        platform.deny_grants(true);
        let err = platform.grant_role(&user, "gold").await.unwrap_err();
        assert!(matches!(err, CrumbError::Permission(_)));
        assert!(!platform.has_role(&user, "gold").await.unwrap());
    }

    #[tokio::test]
    async fn test_mock_marker_set_and_clear() {
        let platform = MockPlatform::new();
        let user = UserId::from(2u64);

        platform.set_display_marker(&user, Some("☕")).await.unwrap();
        assert_eq!(platform.marker_of(&user).as_deref(), Some("☕"));

        platform.set_display_marker(&user, None).await.unwrap();
        assert!(platform.marker_of(&user).is_none());
    }
}
