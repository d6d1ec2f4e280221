//! Connection authentication and the write policy.
//!
//! The hub only needs a verdict per token; where tokens come from (a
//! directory service, a session store) is the [`Authenticator`]'s business.

use std::collections::HashMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Result of checking a token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthVerdict {
    pub authenticated: bool,
    pub username: Option<String>,
    pub role: Option<String>,
}

impl AuthVerdict {
    pub fn granted(username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            username: Some(username.into()),
            role: Some(role.into()),
        }
    }

    pub fn denied() -> Self {
        Self::default()
    }
}

pub trait Authenticator: Send + Sync + Debug {
    fn authenticate(&self, token: &str) -> AuthVerdict;
}

/// A user entry in the static token table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUser {
    pub username: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "member".to_string()
}

/// Static token → user table, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, TokenUser>,
}

impl TokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(
        mut self,
        token: impl Into<String>,
        username: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        self.insert(
            token,
            TokenUser {
                username: username.into(),
                role: role.into(),
            },
        );
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, user: TokenUser) {
        self.tokens.insert(token.into(), user);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl FromIterator<(String, TokenUser)> for TokenAuthenticator {
    fn from_iter<I: IntoIterator<Item = (String, TokenUser)>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, token: &str) -> AuthVerdict {
        if token.is_empty() {
            return AuthVerdict::denied();
        }
        match self.tokens.get(token) {
            Some(user) => AuthVerdict::granted(&user.username, &user.role),
            None => AuthVerdict::denied(),
        }
    }
}

/// Which operations need an authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPolicy {
    pub require_auth_for_changes: bool,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            require_auth_for_changes: true,
        }
    }
}

impl AuthPolicy {
    pub fn open() -> Self {
        Self {
            require_auth_for_changes: false,
        }
    }

    pub fn allows_changes(&self, authenticated: bool) -> bool {
        authenticated || !self.require_auth_for_changes
    }
}
