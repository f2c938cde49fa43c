// tests/property/rbac_test.rs

//! Permission matching invariants: a `prefix.*` grant matches exactly the
//! sub-actions of that prefix.

use edgelink::core::auth::RoleSet;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_prefix_wildcard_matches_sub_actions(
        prefix in "[a-z]{1,10}",
        sub in "[a-z]{1,10}",
    ) {
        let mut roles = RoleSet::default();
        roles.define_role("scoped", vec![format!("{prefix}.*")]);

        // Any sub-action under the prefix is allowed.
        assert!(roles.permits("scoped", &format!("{prefix}.{sub}")));
        // The bare prefix itself is not a sub-action.
        assert!(!roles.permits("scoped", &prefix));
        // A different top-level segment never matches.
        assert!(!roles.permits("scoped", &format!("x{prefix}.{sub}")));
    }

    #[test]
    fn prop_exact_grant_matches_only_itself(
        action in "[a-z]{1,8}\\.[a-z]{1,8}",
        other in "[a-z]{1,8}\\.[a-z]{1,8}",
    ) {
        let mut roles = RoleSet::default();
        roles.define_role("narrow", vec![action.clone()]);

        assert!(roles.permits("narrow", &action));
        if other != action {
            assert!(!roles.permits("narrow", &other));
        }
    }
}
