// Authenticated-user accessor
//
// The pipeline never opens a stream for an anonymous session, and the HTTP
// collaborators attach the signed-in user's token to their requests.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Signed-in user as far as the pipeline cares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Bearer token sent to the stream endpoint and the store
    pub token: String,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            token: token.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Trait for reading the current authenticated user
pub trait SessionProvider: Send + Sync {
    /// `None` while nobody is signed in
    fn current_user(&self) -> Option<AuthUser>;

    fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }
}

/// Session held in memory, switched by login/logout
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<AuthUser>>,
}

impl StaticSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn login(&self, user: AuthUser) {
        *self.user.write() = Some(user);
    }

    pub fn logout(&self) {
        *self.user.write() = None;
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_logout() {
        let session = StaticSession::anonymous();
        assert!(!session.is_authenticated());

        session.login(AuthUser::new("u1", "tok").with_name("Ada"));
        let user = session.current_user().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.name.as_deref(), Some("Ada"));

        session.logout();
        assert!(session.current_user().is_none());
    }
}
