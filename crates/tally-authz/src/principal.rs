//! Principal model.
//!
//! # Purpose
//! Represents the caller of a guarded action after the (external) identity
//! provider has authenticated it and roles have been expanded.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller attempting an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Principal {
    /// No identity was established; never authorized.
    #[default]
    Anonymous,
    Authenticated(ResolvedUser),
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Authenticated(_))
    }

    pub fn user(&self) -> Option<&ResolvedUser> {
        match self {
            Principal::Anonymous => None,
            Principal::Authenticated(user) => Some(user),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.user().and_then(|user| user.email.as_deref())
    }

    /// Expanded permissions; empty for anonymous callers.
    pub fn permissions(&self) -> &[String] {
        self.user()
            .map(|user| user.permissions.as_slice())
            .unwrap_or_default()
    }
}

/// Authenticated identity payload augmented with role expansion.
///
/// `profile` keeps every other field the identity provider supplied (display
/// name, picture, ...) so callers can render it unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl ResolvedUser {
    pub fn profile_field(&self, key: &str) -> Option<&Value> {
        self.profile.get(key)
    }
}
