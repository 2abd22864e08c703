//! Policy compiler.
//!
//! Turns an [`AppPolicy`] into the ordered [`ChainSpec`] a backend installs for
//! the subject, plus the [`PolicySignature`] used to detect policy changes.
//! Compilation is pure: identical policies yield identical output.

use crate::{AppPolicy, ChainSpec, Directive, PathGroup, PolicySignature};

/// Compile a policy into its chain specification and signature.
///
/// An unrestricted policy compiles to an empty spec (no chain at all). A
/// policy that blocks upload compiles to a single reject. Otherwise the spec
/// is an optional inbound tag, one return per catalog pattern of every
/// allowed group in canonical order, and a terminal reject.
#[must_use]
pub fn compile(policy: &AppPolicy) -> (ChainSpec, PolicySignature) {
    (compile_spec(policy), policy.signature())
}

/// Chain specification half of [`compile`].
#[must_use]
pub fn compile_spec(policy: &AppPolicy) -> ChainSpec {
    if policy.is_unrestricted() {
        return ChainSpec::empty();
    }
    if !policy.upload_allowed {
        return ChainSpec::from(vec![Directive::RejectAll]);
    }

    let mut directives = Vec::new();
    if !policy.download_allowed {
        directives.push(Directive::TagForInboundReject);
    }
    for group in PathGroup::ORDER {
        if policy.allowed_paths.iter().any(|cap| cap.group() == group) {
            directives.extend(group.patterns().iter().cloned().map(Directive::return_if));
        }
    }
    directives.push(Directive::RejectAll);
    ChainSpec::from(directives)
}

/// Fill in vendor aliases missing from a live chain.
///
/// For each vendor-aliased group the chain returns on, every alias of the
/// group must be present. Missing ones are inserted at the front of the chain,
/// ahead of the terminal reject. Returns `None` when nothing is missing.
#[must_use]
pub fn normalize_vendor_aliases(spec: &ChainSpec) -> Option<ChainSpec> {
    let mut missing = Vec::new();
    for group in spec.groups() {
        if !group.is_vendor_aliased() {
            continue;
        }
        for alias in group.patterns() {
            let present = spec.iter().any(|d| d.pattern() == Some(alias));
            if !present {
                missing.push(Directive::return_if(alias.clone()));
            }
        }
    }
    if missing.is_empty() {
        return None;
    }
    missing.extend(spec.iter().cloned());
    Some(ChainSpec::from(missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NetworkPathCapability, PathPattern, Subject};
    use NetworkPathCapability::{BluetoothTethering, Cellular, Local, Roaming, Tor, Vpn, WiFi};

    fn subject() -> Subject {
        Subject::new(10_042)
    }

    #[test]
    fn wifi_only_returns_on_wlan_then_rejects() {
        let (spec, _) = compile(&AppPolicy::with_paths(subject(), [WiFi]));
        assert_eq!(
            spec.directives(),
            &[
                Directive::return_if(PathPattern::interface("wlan+")),
                Directive::RejectAll,
            ]
        );
    }

    #[test]
    fn blocked_upload_is_a_single_reject_regardless_of_paths() {
        let policy = AppPolicy::with_paths(subject(), [WiFi, Vpn, Local]).upload(false);
        assert_eq!(compile_spec(&policy).directives(), &[Directive::RejectAll]);

        let policy = AppPolicy::allow_all(subject()).upload(false);
        assert_eq!(compile_spec(&policy).directives(), &[Directive::RejectAll]);
    }

    #[test]
    fn unrestricted_policy_compiles_to_no_chain() {
        assert!(compile_spec(&AppPolicy::allow_all(subject())).is_empty());
    }

    #[test]
    fn blocked_download_tags_before_returns() {
        let policy = AppPolicy::with_paths(subject(), [BluetoothTethering]).download(false);
        assert_eq!(
            compile_spec(&policy).directives(),
            &[
                Directive::TagForInboundReject,
                Directive::return_if(PathPattern::interface("bnep+")),
                Directive::RejectAll,
            ]
        );
    }

    #[test]
    fn deny_all_compiles_to_single_reject() {
        assert_eq!(
            compile_spec(&AppPolicy::deny_all(subject())).directives(),
            &[Directive::RejectAll]
        );
    }

    #[test]
    fn cellular_and_roaming_emit_the_mobile_aliases_once() {
        let both = compile_spec(&AppPolicy::with_paths(subject(), [Cellular, Roaming]));
        let roaming = compile_spec(&AppPolicy::with_paths(subject(), [Roaming]));
        assert_eq!(both, roaming);
        assert_eq!(both.len(), PathGroup::Mobile.patterns().len() + 1);
    }

    #[test]
    fn groups_follow_canonical_order_not_grant_order() {
        let spec = compile_spec(&AppPolicy::with_paths(subject(), [Tor, WiFi, Local]));
        let rendered: Vec<String> = spec.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "return out:lo",
                "return dst:127.0.0.0/8",
                "return out:wlan+",
                "return dst:127.0.0.1/32:tcp/9040",
                "return dst:127.0.0.1/32:tcp/9050",
                "reject",
            ]
        );
    }

    #[test]
    fn compiled_chains_need_no_alias_normalization() {
        let spec = compile_spec(&AppPolicy::with_paths(subject(), [Cellular, WiFi]));
        assert_eq!(normalize_vendor_aliases(&spec), None);
    }

    #[test]
    fn partial_mobile_chain_gains_missing_aliases_up_front() {
        let live = ChainSpec::from(vec![
            Directive::return_if(PathPattern::interface("rmnet+")),
            Directive::RejectAll,
        ]);
        let fixed = normalize_vendor_aliases(&live).unwrap();
        assert_eq!(
            fixed.directives(),
            &[
                Directive::return_if(PathPattern::interface("ccmni+")),
                Directive::return_if(PathPattern::interface("pdp+")),
                Directive::return_if(PathPattern::interface("clat+")),
                Directive::return_if(PathPattern::interface("rmnet+")),
                Directive::RejectAll,
            ]
        );
    }

    #[test]
    fn chains_without_mobile_are_left_alone() {
        let live = ChainSpec::from(vec![
            Directive::return_if(PathPattern::interface("tun+")),
            Directive::RejectAll,
        ]);
        assert_eq!(normalize_vendor_aliases(&live), None);
        assert_eq!(normalize_vendor_aliases(&ChainSpec::empty()), None);
    }
}
