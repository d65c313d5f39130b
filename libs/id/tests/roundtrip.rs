//! Property tests for server identity roundtrips.

use proptest::prelude::*;
use roost_id::{ServerUuid, Uuid, SHORT_LEN};

proptest! {
    #[test]
    fn format_then_parse_roundtrips(bytes in any::<[u8; 16]>()) {
        let id = ServerUuid::from_uuid(Uuid::from_bytes(bytes));
        let parsed = ServerUuid::parse(&id.full()).unwrap();
        prop_assert_eq!(id, parsed);
    }

    #[test]
    fn short_is_always_the_full_prefix(bytes in any::<[u8; 16]>()) {
        let id = ServerUuid::from_uuid(Uuid::from_bytes(bytes));
        prop_assert_eq!(id.short().len(), SHORT_LEN);
        prop_assert!(id.full().starts_with(&id.short()));
    }

    #[test]
    fn display_matches_full(bytes in any::<[u8; 16]>()) {
        let id = ServerUuid::from_uuid(Uuid::from_bytes(bytes));
        prop_assert_eq!(id.to_string(), id.full());
    }
}
