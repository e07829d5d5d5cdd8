//! MAC, module-signing, and sanitizer integration tests

use basalt_kernel::error::{KasanError, KernelError, MacError};
use basalt_kernel::mm::kasan::{Kasan, KasanConfig};
use basalt_kernel::security::module_verify::{PublicKey, KEY_LEN};
use basalt_kernel::security::te::TeRule;
use basalt_kernel::security::{
    audit, AccessVector, ModuleSignature, ModuleVerifier, Name32, ObjectClass, Profile,
    ProfileMode, ProfileSet, SecurityContext, SigningPolicy, TypeEnforcement,
};

fn name(s: &str) -> Name32 {
    Name32::new(s).unwrap()
}

#[test]
fn type_enforcement_is_default_deny_with_cached_decisions() {
    let te = TypeEnforcement::new();
    te.add_rule(TeRule {
        source: name("init_t"),
        target: name("etc_t"),
        class: ObjectClass::File,
        allowed: AccessVector::READ | AccessVector::GETATTR,
    })
    .unwrap();

    let src = SecurityContext::parse("system_u:system_r:init_t").unwrap();
    let tgt = SecurityContext::parse("system_u:object_r:etc_t").unwrap();

    assert!(te.check_access(
        src.domain_name(),
        tgt.domain_name(),
        ObjectClass::File,
        AccessVector::READ
    ));
    assert!(!te.check_access(
        src.domain_name(),
        tgt.domain_name(),
        ObjectClass::File,
        AccessVector::WRITE
    ));

    // The second identical check is served from the AVC.
    let (hits, misses) = te.avc_stats();
    te.check_access(
        src.domain_name(),
        tgt.domain_name(),
        ObjectClass::File,
        AccessVector::READ,
    );
    let (hits_after, misses_after) = te.avc_stats();
    assert_eq!(hits_after, hits + 1);
    assert_eq!(misses_after, misses);
}

#[test]
fn denials_reach_the_audit_log() {
    let te = TypeEnforcement::new();
    let before = audit::denial_count();
    assert!(!te.check_access(
        name("nobody_t"),
        name("shadow_t"),
        ObjectClass::File,
        AccessVector::READ
    ));
    assert!(audit::denial_count() > before);
}

#[test]
fn profile_modes_differ_on_unmatched_access() {
    let set = ProfileSet::new();

    let mut enforce = Profile::new("nginx", ProfileMode::Enforce).unwrap();
    enforce.add_rule("/srv/site", AccessVector::READ).unwrap();
    set.load(enforce);

    let mut complain = Profile::new("backup", ProfileMode::Complain).unwrap();
    complain.add_rule("/data", AccessVector::READ).unwrap();
    set.load(complain);

    assert!(set.check("nginx", "/srv/site", AccessVector::READ));
    assert!(!set.check("nginx", "/etc/secret", AccessVector::READ));
    // Complain mode lets the access through while recording it.
    let before = audit::total_events();
    assert!(set.check("backup", "/etc/secret", AccessVector::WRITE));
    assert!(audit::total_events() > before);
}

#[test]
fn module_verification_policies_end_to_end() {
    let module = b"module body: init_module bytes";
    let verifier = ModuleVerifier::new(SigningPolicy::Required);

    let mut material = [0u8; KEY_LEN];
    material[..4].copy_from_slice(b"k3y!");
    let key = PublicKey {
        id: 11,
        key: material,
        name: name("release"),
        trusted: true,
        revoked: false,
    };
    verifier.keyring.add_key(key).unwrap();

    // Unsigned: refused under Required.
    assert_eq!(
        verifier.verify_module(module, None, true),
        Err(KernelError::Mac(MacError::SignatureRequired))
    );

    // Properly signed: accepted, counted.
    let sig = ModuleSignature::create(module, &key);
    verifier.verify_module(module, Some(&sig), false).unwrap();

    // Tampered body: hash mismatch.
    assert_eq!(
        verifier.verify_module(b"evil module body!", Some(&sig), false),
        Err(KernelError::Mac(MacError::HashMismatch))
    );

    let (verified, failed, unsigned) = verifier.stats();
    assert_eq!(verified, 1);
    assert_eq!(failed, 2);
    assert_eq!(unsigned, 1);
}

#[test]
fn kasan_use_after_free_scenario() {
    let kasan = Kasan::new(KasanConfig {
        base: 0,
        size: 0x10_000,
    });

    kasan.on_alloc(0x3000, 64);
    kasan.check_access(0x3000, 64).unwrap();
    kasan.on_free(0x3000, 64).unwrap();
    assert_eq!(
        kasan.check_access(0x3000, 8),
        Err(KernelError::Kasan(KasanError::UseAfterFree))
    );

    // The detection is non-fatal for the sanitizer's own state: tracking
    // continues to work afterwards.
    kasan.on_alloc(0x5000, 16);
    kasan.check_access(0x5000, 16).unwrap();
    assert_eq!(kasan.detections(), 1);
}

#[test]
fn kasan_reports_feed_the_audit_log() {
    let kasan = Kasan::new(KasanConfig {
        base: 0,
        size: 0x1000,
    });
    kasan.on_alloc(0x100, 32);
    kasan.on_free(0x100, 32).unwrap();

    let before = audit::total_events();
    assert!(kasan.check_access(0x100, 8).is_err());
    assert!(audit::total_events() > before);
}
