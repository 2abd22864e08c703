//! Property tests for the policy compiler.
//!
//! Covers determinism, signature discrimination, and the shape every compiled
//! chain must have.

use std::collections::BTreeSet;

use fwa_core::{
    AppPolicy, Directive, NetworkPathCapability, PathGroup, Subject, compile, compile_spec,
    normalize_vendor_aliases,
};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn arb_capabilities() -> impl Strategy<Value = BTreeSet<NetworkPathCapability>> {
    proptest::collection::btree_set(
        proptest::sample::select(NetworkPathCapability::ALL.to_vec()),
        0..=NetworkPathCapability::ALL.len(),
    )
}

prop_compose! {
    fn arb_policy()(
        id in 10_000u32..10_100,
        allowed_paths in arb_capabilities(),
        upload_allowed in any::<bool>(),
        download_allowed in any::<bool>(),
    ) -> AppPolicy {
        AppPolicy {
            subject: Subject::new(id),
            allowed_paths,
            upload_allowed,
            download_allowed,
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn compilation_is_deterministic(policy in arb_policy()) {
        prop_assert_eq!(compile(&policy), compile(&policy.clone()));
    }

    #[test]
    fn signatures_differ_iff_policies_differ(a in arb_policy(), b in arb_policy()) {
        prop_assert_eq!(a == b, a.signature() == b.signature());
    }

    #[test]
    fn signature_round_trips(policy in arb_policy()) {
        prop_assert_eq!(policy.signature().to_policy().unwrap(), policy);
    }

    #[test]
    fn restricted_chains_end_with_reject(policy in arb_policy()) {
        let spec = compile_spec(&policy);
        if policy.is_unrestricted() {
            prop_assert!(spec.is_empty());
        } else {
            prop_assert_eq!(spec.directives().last(), Some(&Directive::RejectAll));
            let rejects = spec.iter().filter(|d| **d == Directive::RejectAll).count();
            prop_assert_eq!(rejects, 1);
        }
    }

    #[test]
    fn inbound_tag_only_when_download_blocked(policy in arb_policy()) {
        let spec = compile_spec(&policy);
        let expect_tag = !policy.is_unrestricted()
            && policy.upload_allowed
            && !policy.download_allowed;
        prop_assert_eq!(spec.tags_inbound(), expect_tag);
        if expect_tag {
            prop_assert_eq!(spec.directives().first(), Some(&Directive::TagForInboundReject));
        }
    }

    #[test]
    fn returns_cover_exactly_the_granted_groups(policy in arb_policy()) {
        prop_assume!(policy.upload_allowed && !policy.is_unrestricted());
        let spec = compile_spec(&policy);
        let mut granted: Vec<PathGroup> =
            policy.allowed_paths.iter().map(|cap| cap.group()).collect();
        granted.sort_unstable();
        granted.dedup();
        prop_assert_eq!(spec.groups(), granted);
        prop_assert!(normalize_vendor_aliases(&spec).is_none());
    }
}
