// tests/property/token_test.rs

//! Token invariants: round-trips for any positive TTL, rejection for any
//! non-positive TTL.

use edgelink::core::auth::{TokenKind, TokenService};
use proptest::prelude::*;
use std::time::Duration;

fn service() -> TokenService {
    TokenService::new(
        b"property-test-secret",
        Duration::from_secs(900),
        Duration::from_secs(7 * 24 * 3600),
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_round_trip_for_any_positive_ttl(
        user_id in "[a-z0-9-]{1,24}",
        role in "(admin|operator|viewer)",
        ttl_secs in 2i64..1_000_000,
    ) {
        let tokens = service();
        let token = tokens
            .issue(&user_id, &role, TokenKind::Access, ttl_secs, None)
            .unwrap();
        let claims = tokens.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.role, role);
    }

    #[test]
    fn prop_non_positive_ttl_never_verifies(ttl_secs in -1_000_000i64..=-1) {
        let tokens = service();
        let token = tokens
            .issue("u1", "operator", TokenKind::Access, ttl_secs, None)
            .unwrap();
        assert!(tokens.verify(&token, TokenKind::Access).is_err());
    }
}
