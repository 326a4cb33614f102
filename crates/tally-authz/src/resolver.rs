//! Role expansion for authenticated users.
//!
//! # Purpose
//! Turns a login email into the role names bound to it and the flat list of
//! permission strings those roles grant.
//!
//! # Key invariants
//! - Lookups are first-match-wins when the configuration repeats an email or
//!   role name.
//! - Unknown emails and undefined role names contribute nothing; they are not
//!   errors.
//! - `permissions_for_user` concatenates role permissions in role order and
//!   keeps duplicates.
//! - Nothing is cached; each call walks the current bindings.
//!
//! # Examples
//! ```rust
//! use tally_authz::{PermissionResolver, PermissionsConfig, RoleDefinition, UserBinding};
//!
//! let resolver = PermissionResolver::new(PermissionsConfig {
//!     users: vec![UserBinding {
//!         email: "viewer@example.com".into(),
//!         roles: vec!["viewer".into()],
//!     }],
//!     roles: vec![RoleDefinition {
//!         name: "viewer".into(),
//!         permissions: vec!["view:database.students".into()],
//!     }],
//! });
//! assert_eq!(
//!     resolver.permissions_for_user("viewer@example.com"),
//!     vec!["view:database.students".to_string()]
//! );
//! ```
use crate::{PermissionsConfig, Principal, ResolvedUser};
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct PermissionResolver {
    config: PermissionsConfig,
}

impl PermissionResolver {
    pub fn new(config: PermissionsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PermissionsConfig {
        &self.config
    }

    /// Swap in freshly loaded bindings (configuration reload).
    pub fn replace_config(&mut self, config: PermissionsConfig) {
        self.config = config;
    }

    pub fn roles_for_user(&self, email: &str) -> &[String] {
        self.config
            .users
            .iter()
            .find(|user| user.email == email)
            .map(|user| user.roles.as_slice())
            .unwrap_or_default()
    }

    pub fn permissions_for_role(&self, role_name: &str) -> &[String] {
        self.config
            .roles
            .iter()
            .find(|role| role.name == role_name)
            .map(|role| role.permissions.as_slice())
            .unwrap_or_default()
    }

    pub fn permissions_for_user(&self, email: &str) -> Vec<String> {
        self.roles_for_user(email)
            .iter()
            .flat_map(|role| self.permissions_for_role(role).iter().cloned())
            .collect()
    }

    /// Build a [`Principal`] from an identity-provider payload.
    ///
    /// Anything other than a non-empty JSON object is anonymous. Otherwise the
    /// payload's `email` drives role expansion and all remaining fields are
    /// kept as the user's profile. Incoming `roles`/`permissions` fields are
    /// overwritten by the expansion.
    pub fn user_from_principal_data(&self, raw: &Value) -> Principal {
        let Some(fields) = raw.as_object().filter(|fields| !fields.is_empty()) else {
            return Principal::Anonymous;
        };

        let mut profile = fields.clone();
        let email = match profile.remove("email") {
            Some(Value::String(email)) => Some(email),
            // Keep non-string emails visible to the caller; they match no user.
            Some(other) => {
                profile.insert("email".to_string(), other);
                None
            }
            None => None,
        };
        profile.remove("roles");
        profile.remove("permissions");

        let (roles, permissions) = match email.as_deref() {
            Some(email) => (
                self.roles_for_user(email).to_vec(),
                self.permissions_for_user(email),
            ),
            None => (Vec::new(), Vec::new()),
        };

        tracing::debug!(
            email = email.as_deref().unwrap_or_default(),
            roles = roles.len(),
            permissions = permissions.len(),
            "resolved principal"
        );

        Principal::Authenticated(ResolvedUser {
            email,
            roles,
            permissions,
            profile,
        })
    }
}
