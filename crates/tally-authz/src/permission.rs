//! Permission string grammar.
//!
//! # Purpose
//! Decodes `action:namespace.resource` strings into [`PermissionTriple`] values
//! consumed by the matcher.
//!
//! # Key invariants
//! - Exactly one `:` separates the action from the rest.
//! - The first `.` after the `:` separates namespace from resource.
//! - Each token is non-empty and made only of `a`-`z` and `*`.
//! - Segments after the resource (`view:database.students.student_id`) are
//!   dropped without validation.
//!
//! # Examples
//! ```rust
//! use tally_authz::PermissionTriple;
//!
//! let triple = PermissionTriple::parse("view:database.students").unwrap();
//! assert_eq!(triple.action, "view");
//! assert_eq!(triple.namespace, "database");
//! assert_eq!(triple.resource, "students");
//! ```
//!
//! # Common pitfalls
//! - `*` is a whole-token wildcard; `stu*` is syntactically valid but only
//!   ever matches itself or a `*` on the other side.
use crate::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

/// Literal token that matches any value in its position.
pub const WILDCARD: &str = "*";

/// Decoded permission with one token per position.
///
/// # Invariants
/// - Every field satisfies [`is_valid_token`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionTriple {
    pub action: String,
    pub namespace: String,
    pub resource: String,
}

impl PermissionTriple {
    /// Parse a permission string.
    ///
    /// # Errors
    /// - [`AuthzError::MalformedPermission`] when the `:` or the `.` is missing,
    ///   or when any of the three tokens is empty or holds characters outside
    ///   `[a-z*]`.
    pub fn parse(value: &str) -> AuthzResult<Self> {
        let malformed = || AuthzError::MalformedPermission(value.to_string());

        let (action, rest) = value.split_once(':').ok_or_else(malformed)?;
        let (namespace, tail) = rest.split_once('.').ok_or_else(malformed)?;
        // Anything after a second `.` is extra specificity we do not evaluate.
        let resource = tail.split('.').next().unwrap_or_default();

        if !(is_valid_token(action) && is_valid_token(namespace) && is_valid_token(resource)) {
            return Err(malformed());
        }

        Ok(Self {
            action: action.to_string(),
            namespace: namespace.to_string(),
            resource: resource.to_string(),
        })
    }

    /// Whether any position holds the wildcard token.
    pub fn has_wildcard(&self) -> bool {
        [&self.action, &self.namespace, &self.resource]
            .iter()
            .any(|token| token.as_str() == WILDCARD)
    }
}

impl std::str::FromStr for PermissionTriple {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl std::fmt::Display for PermissionTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}.{}", self.action, self.namespace, self.resource)
    }
}

/// A token is one or more lowercase ASCII letters or `*`.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_lowercase() || b == b'*')
}
