/// NIST 800-88 method mapping tests
///
/// Every sanitization level must resolve to its fixed pass count and level
/// label on every toolset, and unknown method names must never fall through.
use nullbytes_wipe::certificates::record::{compliance_flags, FLAG_DOD_5220_22_M, FLAG_NIST_800_88};
use nullbytes_wipe::methods::{DurationClass, MethodRegistry, Toolset};
use nullbytes_wipe::{WipeError, WipeMethod};

const TOOLSETS: [Toolset; 2] = [Toolset::Coreutils, Toolset::Diskutil];

// ==================== PASS COUNT TESTS ====================

#[test]
fn test_pass_counts_meet_nist_minimums_on_every_toolset() {
    for toolset in TOOLSETS {
        let registry = MethodRegistry::new(toolset);
        assert_eq!(registry.resolve(WipeMethod::Clear).pass_count, 1);
        assert_eq!(registry.resolve(WipeMethod::Purge).pass_count, 3);
        assert_eq!(registry.resolve(WipeMethod::Destroy).pass_count, 7);
    }
}

#[test]
fn test_levels_are_labelled() {
    let registry = MethodRegistry::new(Toolset::Coreutils);
    assert_eq!(registry.resolve(WipeMethod::Clear).nist_level, "NIST 800-88 Clear");
    assert_eq!(registry.resolve(WipeMethod::Purge).nist_level, "NIST 800-88 Purge");
    assert_eq!(registry.resolve(WipeMethod::Destroy).nist_level, "NIST 800-88 Destroy");
}

#[test]
fn test_duration_grows_with_rigor() {
    let registry = MethodRegistry::new(Toolset::Coreutils);
    assert_eq!(registry.resolve(WipeMethod::Clear).duration_class, DurationClass::Short);
    assert_eq!(registry.resolve(WipeMethod::Purge).duration_class, DurationClass::Long);
    assert_eq!(registry.resolve(WipeMethod::Destroy).duration_class, DurationClass::Extended);
}

#[test]
fn test_unknown_method_is_rejected() {
    for name in ["", "zero", "dod", "gutmann", "clear-fast", "purge7"] {
        assert!(
            matches!(name.parse::<WipeMethod>(), Err(WipeError::InvalidMethod(_))),
            "{:?} must not resolve to any method",
            name
        );
    }
}

// ==================== COMPLIANCE FLAG TESTS ====================

#[test]
fn test_nist_flag_set_for_every_method() {
    for method in WipeMethod::ALL {
        assert!(compliance_flags(method)[FLAG_NIST_800_88]);
    }
}

#[test]
fn test_dod_flag_requires_multi_pass() {
    assert!(!compliance_flags(WipeMethod::Clear)[FLAG_DOD_5220_22_M]);
    assert!(compliance_flags(WipeMethod::Purge)[FLAG_DOD_5220_22_M]);
    assert!(compliance_flags(WipeMethod::Destroy)[FLAG_DOD_5220_22_M]);
}
