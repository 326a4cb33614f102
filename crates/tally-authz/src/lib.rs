//! Tally authorization primitives.
//!
//! # Purpose
//! Decides whether a dashboard user may perform an action. Permissions are
//! `action:namespace.resource` strings where any position may be the `*`
//! wildcard; roles bundle permissions and users are bound to roles by email.
//!
//! # How it fits
//! The (external) HTTP layer authenticates a user, asks the
//! [`PermissionResolver`] to expand the payload into a [`Principal`], and calls
//! [`can_perform`] before every guarded screen or ledger operation.
//!
//! # Key invariants
//! - A wildcard on either the held or the requested side satisfies a position.
//! - Malformed permissions are errors, never silent denials.
//! - Anonymous principals are always denied.
//!
//! # Examples
//! ```rust
//! use tally_authz::{Principal, ResolvedUser, can_perform};
//!
//! let principal = Principal::Authenticated(ResolvedUser {
//!     permissions: vec!["view:database.*".into()],
//!     ..Default::default()
//! });
//! assert!(can_perform(&principal, "view:database.points").unwrap());
//! assert!(!can_perform(&Principal::Anonymous, "view:database.points").unwrap());
//! ```
//!
//! # Common pitfalls
//! - `edit` does not imply `view`; grant both or use `*:namespace.resource`.

mod config;
mod errors;
mod matcher;
mod permission;
mod principal;
mod resolver;

pub use config::{CONFIG_PATH_ENV, PermissionsConfig, RoleDefinition, UserBinding};
pub use errors::{AuthzError, AuthzResult};
pub use matcher::{PermissionMatcher, can_perform, matches, token_matches, triple_matches};
pub use permission::{PermissionTriple, WILDCARD, is_valid_token};
pub use principal::{Principal, ResolvedUser};
pub use resolver::PermissionResolver;
