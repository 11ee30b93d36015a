use hyperstream_exchanges::prelude::*;
use proptest::prelude::*;

fn kind_strategy() -> impl Strategy<Value = SubscriptionKind> {
    prop::sample::select(SubscriptionKind::ALL.to_vec())
}

/// Unique keys in arbitrary order
fn params_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::hash_map("[a-z]{1,8}", "[A-Za-z0-9]{1,12}", 0..5)
        .prop_map(|map| map.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

proptest! {
    #[test]
    fn identity_ignores_parameter_order(kind in kind_strategy(), pairs in params_strategy()) {
        let mut forward = SubscriptionParams::new();
        for (key, value) in &pairs {
            forward.insert(key.clone(), value.clone());
        }
        let mut backward = SubscriptionParams::new();
        for (key, value) in pairs.iter().rev() {
            backward.insert(key.clone(), value.clone());
        }

        prop_assert_eq!(forward.clone(), backward.clone());
        prop_assert_eq!(SubscriptionId::derive(kind, &forward), SubscriptionId::derive(kind, &backward));
    }

    #[test]
    fn identity_is_prefixed_by_wire_type(kind in kind_strategy(), coin in "[A-Z]{2,6}") {
        let id = SubscriptionId::derive(kind, &SubscriptionParams::new().with("coin", coin));
        let prefix = format!("{}_", kind.as_str());
        prop_assert!(id.as_str().starts_with(&prefix));
        prop_assert_eq!(id.as_str().len(), prefix.len() + 16);
    }

    #[test]
    fn distinct_coins_get_distinct_identities(a in "[A-Z]{2,6}", b in "[A-Z]{2,6}") {
        prop_assume!(a != b);
        let id_a = SubscriptionId::derive(SubscriptionKind::Trades, &SubscriptionParams::new().with("coin", a));
        let id_b = SubscriptionId::derive(SubscriptionKind::Trades, &SubscriptionParams::new().with("coin", b));
        prop_assert_ne!(id_a, id_b);
    }

    #[test]
    fn channel_suffix_after_at_is_ignored(kind in kind_strategy(), suffix in "[A-Za-z0-9@]{0,10}", upper in any::<bool>()) {
        let tag = if upper { kind.as_str().to_uppercase() } else { kind.as_str().to_string() };
        let channel = format!("{tag}@{suffix}");
        prop_assert!(kind.matches_channel(&channel));

        for other in SubscriptionKind::ALL.iter().filter(|other| **other != kind) {
            prop_assert!(!other.matches_channel(&channel));
        }
    }
}
