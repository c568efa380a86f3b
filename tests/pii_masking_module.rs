use agentwarden::policy::pii;
use agentwarden::policy::{Policy, PolicyEnforcer};

#[test]
fn detect_reports_every_kind_present() {
    let content = "mail a@b.com, ssn 123-45-6789, host 192.168.0.1";
    let kinds = pii::detect(content);
    assert_eq!(kinds, vec!["email", "ssn", "ipv4"]);
}

#[test]
fn mask_redacts_mixed_content_in_one_pass() {
    let content = "email a@b.com then call 555-867-5309 about card 4111 1111 1111 1111";
    let masked = pii::mask(content);
    assert_eq!(
        masked,
        "email ***@***.*** then call ***-***-**** about card **** **** **** ****"
    );
    assert!(pii::detect(&masked).is_empty());
}

#[test]
fn enforcer_mask_matches_module_mask() {
    let enforcer = PolicyEnforcer::new(Policy::default()).expect("policy");
    let content = "ping 10.1.2.3 and write someone@example.org";
    assert_eq!(enforcer.mask_pii(content), pii::mask(content));
}

#[test]
fn surrounding_text_is_preserved() {
    let masked = pii::mask("before a@b.com after");
    assert!(masked.starts_with("before "));
    assert!(masked.ends_with(" after"));
}
