// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Who is signed in.
//!
//! The host owns the actual sign-in flow; this only records its outcome so
//! the repository and remote layers can decide whether to mirror writes
//! and which rate-limit bucket to charge.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::error::SyncError;

/// Shared authentication state. Clones observe the same session.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    user: Arc<RwLock<Option<String>>>,
}

impl AuthSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A session already signed in as `user_id`.
    #[must_use]
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(user_id);
        session
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        info!(user_len = user_id.len(), "Signed in");
        *self.user.write() = Some(user_id);
    }

    pub fn sign_out(&self) {
        if self.user.write().take().is_some() {
            info!("Signed out");
        }
    }

    #[must_use]
    pub fn current_user(&self) -> Option<String> {
        self.user.read().clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.read().is_some()
    }

    /// The signed-in user, or [`SyncError::Authentication`].
    pub fn require_user(&self) -> Result<String, SyncError> {
        self.current_user().ok_or(SyncError::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_out() {
        let session = AuthSession::new();
        assert!(!session.is_authenticated());
        assert!(matches!(session.require_user(), Err(SyncError::Authentication)));

        session.sign_in("user-1");
        assert_eq!(session.current_user().as_deref(), Some("user-1"));
        assert_eq!(session.require_user().unwrap(), "user-1");

        session.sign_out();
        session.sign_out();
        assert!(session.current_user().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let session = AuthSession::signed_in("a");
        let view = session.clone();
        session.sign_out();
        assert!(!view.is_authenticated());
    }
}
