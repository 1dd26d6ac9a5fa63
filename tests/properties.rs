//! Property tests for version ordering and identity parsing.

use std::cmp::Ordering;

use proptest::prelude::*;

use modlink::identity::ModuleIdentity;
use modlink::version::VersionKey;

fn version_strategy() -> impl Strategy<Value = String> {
    "[0-9a-zA-Z.\\-_]{0,16}"
}

fn numeric_version() -> impl Strategy<Value = Vec<u32>> {
    proptest::collection::vec(0u32..500, 1..5)
}

fn dotted(parts: &[u32]) -> String {
    parts
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

proptest! {
    #[test]
    fn ordering_is_reflexive(raw in version_strategy()) {
        let key = VersionKey::new(raw.clone());
        prop_assert_eq!(key.cmp(&VersionKey::new(raw)), Ordering::Equal);
    }

    #[test]
    fn ordering_is_antisymmetric(a in version_strategy(), b in version_strategy()) {
        let (ka, kb) = (VersionKey::new(a), VersionKey::new(b));
        prop_assert_eq!(ka.cmp(&kb), kb.cmp(&ka).reverse());
    }

    #[test]
    fn trailing_zeros_are_ignored(parts in numeric_version(), zeros in 1usize..4) {
        let base = dotted(&parts);
        let padded = format!("{base}{}", ".0".repeat(zeros));
        prop_assert_eq!(VersionKey::new(base), VersionKey::new(padded));
    }

    #[test]
    fn numeric_order_matches_integers(parts in numeric_version(), bump in 1u32..1000) {
        let mut newer = parts.clone();
        let last = newer.len() - 1;
        newer[last] += bump;
        prop_assert!(VersionKey::new(dotted(&newer)) > VersionKey::new(dotted(&parts)));
    }

    #[test]
    fn prerelease_sorts_before_release(parts in numeric_version(), tag in "(rc|beta|alpha|snapshot)[0-9]{0,2}") {
        let release = dotted(&parts);
        let prerelease = format!("{release}-{tag}");
        prop_assert!(VersionKey::new(prerelease) < VersionKey::new(release));
    }

    #[test]
    fn numeric_identity_round_trips(
        name in "[a-z][a-z0-9]{0,8}(-[a-z][a-z0-9]{0,5}){0,2}",
        major in "[1-9][0-9]{0,3}(\\.[0-9]{1,3}){0,2}",
    ) {
        let identity = ModuleIdentity::new(&name, Some(&major), None);
        let rendered = identity.to_string();
        prop_assert_eq!(&rendered, &format!("{name}-v{major}"));

        let parsed = ModuleIdentity::parse(&rendered).unwrap();
        prop_assert_eq!(parsed.name(), name.as_str());
        prop_assert_eq!(parsed.major(), Some(major.as_str()));
        prop_assert_eq!(parsed, identity);
    }

    #[test]
    fn identity_names_are_case_insensitive(name in "[a-z][a-z0-9]{0,8}", major in 1u32..100) {
        let lower = ModuleIdentity::parse(&format!("{name}-v{major}")).unwrap();
        let upper = ModuleIdentity::parse(&format!("{}-V{major}", name.to_uppercase())).unwrap();
        prop_assert_eq!(lower, upper);
    }
}
