use crate::{AuthzResult, PermissionTriple, Principal, WILDCARD};

/// Compare a single position of a held and a requested permission.
///
/// A wildcard on either side satisfies the position. The requested-side
/// wildcard lets settings screens ask "any `config` permission at all?"
/// without enumerating leaf keys.
pub fn token_matches(held: &str, requested: &str) -> bool {
    held == requested || held == WILDCARD || requested == WILDCARD
}

/// Whether a held triple satisfies a requested triple in all three positions.
pub fn triple_matches(held: &PermissionTriple, requested: &PermissionTriple) -> bool {
    token_matches(&held.action, &requested.action)
        && token_matches(&held.namespace, &requested.namespace)
        && token_matches(&held.resource, &requested.resource)
}

/// Parse both strings and report whether `candidate` grants `requested`.
///
/// # Errors
/// - [`crate::AuthzError::MalformedPermission`] if either string is malformed.
pub fn matches(candidate: &str, requested: &str) -> AuthzResult<bool> {
    let held = PermissionTriple::parse(candidate)?;
    let requested = PermissionTriple::parse(requested)?;
    Ok(triple_matches(&held, &requested))
}

/// Decide whether `principal` may perform `requested`.
///
/// Anonymous principals are denied without parsing anything. For an
/// authenticated principal the requested string and every held permission are
/// parsed before any comparison, so one malformed entry fails every check for
/// that principal.
///
/// # Errors
/// - [`crate::AuthzError::MalformedPermission`] for a malformed requested or
///   held permission.
pub fn can_perform(principal: &Principal, requested: &str) -> AuthzResult<bool> {
    let Principal::Authenticated(user) = principal else {
        return Ok(false);
    };

    let requested_triple = PermissionTriple::parse(requested).inspect_err(|err| {
        tracing::warn!(error = %err, "rejecting malformed requested permission");
    })?;
    let matcher = PermissionMatcher::from_strings(&user.permissions).inspect_err(|err| {
        tracing::warn!(
            email = user.email.as_deref().unwrap_or_default(),
            error = %err,
            "principal holds a malformed permission"
        );
    })?;

    let allowed = matcher.allows(&requested_triple);
    tracing::debug!(
        email = user.email.as_deref().unwrap_or_default(),
        permission = requested,
        requested_wildcard = requested_triple.has_wildcard(),
        allowed,
        "authorization decision"
    );
    Ok(allowed)
}

/// Pre-parsed permission list evaluated with existential semantics.
#[derive(Debug, Clone, Default)]
pub struct PermissionMatcher {
    patterns: Vec<PermissionTriple>,
}

impl PermissionMatcher {
    pub fn new(patterns: Vec<PermissionTriple>) -> Self {
        Self { patterns }
    }

    pub fn from_strings<S: AsRef<str>>(patterns: &[S]) -> AuthzResult<Self> {
        let mut parsed = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            parsed.push(PermissionTriple::parse(pattern.as_ref())?);
        }
        Ok(Self::new(parsed))
    }

    pub fn allows(&self, requested: &PermissionTriple) -> bool {
        self.patterns
            .iter()
            .any(|held| triple_matches(held, requested))
    }

    pub fn patterns(&self) -> &[PermissionTriple] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuthzError, ResolvedUser};

    fn principal_with(permissions: &[&str]) -> Principal {
        Principal::Authenticated(ResolvedUser {
            email: Some("admin@example.com".to_string()),
            roles: Vec::new(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            profile: serde_json::Map::new(),
        })
    }

    #[test]
    fn token_matches_rules() {
        assert!(token_matches("view", "view"));
        assert!(token_matches("*", "view"));
        assert!(token_matches("view", "*"));
        assert!(!token_matches("edit", "view"));
    }

    #[test]
    fn matches_exact_and_wildcards() {
        assert!(matches("view:database.students", "view:database.students").expect("exact"));
        assert!(matches("view:database.*", "view:database.points").expect("resource"));
        assert!(matches("*:database.students", "edit:database.students").expect("action"));
        assert!(matches("view:*.*", "view:config.server").expect("namespace"));
        assert!(matches("view:database.students", "view:database.*").expect("requested"));
        assert!(!matches("view:database.students", "view:database.points").expect("resource"));
    }

    #[test]
    fn matches_propagates_malformed_input() {
        let err = matches("view:database", "view:database.students").expect_err("held");
        assert_eq!(err, AuthzError::MalformedPermission("view:database".into()));
        let err = matches("view:database.students", "view:settings").expect_err("requested");
        assert_eq!(err, AuthzError::MalformedPermission("view:settings".into()));
    }

    #[test]
    fn anonymous_is_denied_without_parsing() {
        assert!(!can_perform(&Principal::Anonymous, "view:database.students").expect("anon"));
        assert!(!can_perform(&Principal::Anonymous, "not-a-permission").expect("anon"));
    }

    #[test]
    fn resource_wildcard_grants_sibling_resources() {
        let principal = principal_with(&["view:database.*"]);
        assert!(can_perform(&principal, "view:database.points").expect("decision"));

        let principal = principal_with(&["view:database.students"]);
        assert!(!can_perform(&principal, "view:database.points").expect("decision"));
    }

    #[test]
    fn edit_does_not_imply_view() {
        let principal = principal_with(&["edit:database.students"]);
        assert!(!can_perform(&principal, "view:database.students").expect("decision"));
        assert!(!can_perform(&principal, "view:database.points").expect("decision"));
        assert!(can_perform(&principal, "edit:database.students").expect("decision"));
    }

    #[test]
    fn super_wildcard_grants_everything() {
        let principal = principal_with(&["*:*.*"]);
        assert!(can_perform(&principal, "view:database.students").expect("decision"));
        assert!(can_perform(&principal, "edit:database.points").expect("decision"));
        assert!(can_perform(&principal, "*:*.*").expect("decision"));
    }

    #[test]
    fn each_position_can_deny() {
        let principal = principal_with(&["view:database.students"]);
        assert!(!can_perform(&principal, "edit:database.students").expect("action"));
        assert!(!can_perform(&principal, "view:config.students").expect("namespace"));
        assert!(!can_perform(&principal, "view:database.points").expect("resource"));
    }

    #[test]
    fn requested_wildcard_asks_for_any_leaf() {
        let any_config = PermissionTriple::parse("view:config.*").expect("any config");
        assert!(any_config.has_wildcard());

        let principal = principal_with(&["view:config.port"]);
        assert!(can_perform(&principal, "view:config.*").expect("any config"));
        assert!(!can_perform(&principal, "edit:config.*").expect("other action"));
        let other = principal_with(&["view:database.students"]);
        assert!(!can_perform(&other, "view:config.*").expect("other namespace"));
    }

    #[test]
    fn empty_permission_list_denies() {
        let principal = principal_with(&[]);
        assert!(!can_perform(&principal, "view:database.students").expect("decision"));
    }

    #[test]
    fn malformed_requested_permission_is_an_error() {
        let principal = principal_with(&["view:database.students"]);
        let err = can_perform(&principal, "view:settings").expect_err("malformed");
        assert_eq!(err, AuthzError::MalformedPermission("view:settings".into()));
    }

    #[test]
    fn malformed_held_permission_poisons_every_check() {
        let principal = principal_with(&["not-a-perm", "view:database.students"]);
        assert!(can_perform(&principal, "view:database.students").is_err());

        // Position in the list does not matter: a later bad entry still fails
        // a request the earlier entry would have granted.
        let principal = principal_with(&["view:database.students", "not-a-perm"]);
        let err = can_perform(&principal, "view:database.students").expect_err("poisoned");
        assert_eq!(err, AuthzError::MalformedPermission("not-a-perm".into()));
    }

    #[test]
    fn matcher_from_strings_and_patterns() {
        let matcher =
            PermissionMatcher::from_strings(&["view:database.students", "edit:config.*"])
                .expect("parse");
        assert_eq!(matcher.patterns().len(), 2);
        let request = PermissionTriple::parse("edit:config.port").expect("request");
        assert!(matcher.allows(&request));
        let request = PermissionTriple::parse("edit:database.students").expect("request");
        assert!(!matcher.allows(&request));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_token() -> impl Strategy<Value = String> {
        prop_oneof![
            1 => Just(WILDCARD.to_string()),
            4 => "[a-c]{1,2}",
        ]
    }

    fn arb_triple() -> impl Strategy<Value = PermissionTriple> {
        (arb_token(), arb_token(), arb_token()).prop_map(|(action, namespace, resource)| {
            PermissionTriple {
                action,
                namespace,
                resource,
            }
        })
    }

    proptest! {
        #[test]
        fn parse_inverts_construction(
            triple in arb_triple(),
            tail in proptest::collection::vec("[a-z_]{1,6}", 0..3),
        ) {
            let mut rendered = triple.to_string();
            for segment in &tail {
                rendered.push('.');
                rendered.push_str(segment);
            }
            prop_assert_eq!(PermissionTriple::parse(&rendered).unwrap(), triple);
        }

        #[test]
        fn matches_follows_positionwise_rule(held in arb_triple(), requested in arb_triple()) {
            let expected = [
                (&held.action, &requested.action),
                (&held.namespace, &requested.namespace),
                (&held.resource, &requested.resource),
            ]
            .iter()
            .all(|(h, r)| h == r || h.as_str() == "*" || r.as_str() == "*");
            let decided = matches(&held.to_string(), &requested.to_string()).unwrap();
            prop_assert_eq!(decided, expected);
        }

        #[test]
        fn wildcard_everything_matches_any_request(requested in arb_triple()) {
            prop_assert!(matches("*:*.*", &requested.to_string()).unwrap());
        }
    }
}
