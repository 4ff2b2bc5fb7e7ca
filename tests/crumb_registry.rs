//! Integration tests for the crumb registry file format and poll
//! resolution, exercised through the public API against a real directory.

use ducky::crumbs::{substitute_placeholders, Crumb, CrumbStore, PollDefaults};
use ducky::poll::PollMode;

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

// ==================== file format ====================

#[test]
fn registry_is_a_readable_json_map() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let store = CrumbStore::new(tmp.path());

    store
        .save("deploy", Crumb::new("docker build -t app:latest ."))
        .expect("save should succeed");

    let raw = std::fs::read_to_string(store.path()).expect("crumbs.json should exist");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(parsed["deploy"]["command"], "docker build -t app:latest .");
    assert!(parsed["deploy"]["created_at"].is_string());
}

#[test]
fn two_stores_over_the_same_dir_see_each_other() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let writer = CrumbStore::new(tmp.path());
    let reader = CrumbStore::new(tmp.path());

    writer.save("mem", Crumb::new("free -m")).unwrap();
    assert!(reader.has("mem"));

    reader.delete("mem").unwrap();
    assert!(!writer.has("mem"));
}

// ==================== poll resolution with overrides ====================

#[test]
fn stored_poll_defaults_survive_the_round_trip() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let store = CrumbStore::new(tmp.path());

    let mut crumb = Crumb::new("dmesg --follow");
    crumb.poll = Some(PollDefaults {
        interval_secs: Some(3),
        continuous: Some(true),
        prompt: Some("flag kernel errors".into()),
    });
    store.save("kernel", crumb).unwrap();

    let resolved = store.resolve_poll("kernel").unwrap();
    assert_eq!(resolved.interval_secs, 3);
    assert_eq!(resolved.mode(), PollMode::Continuous);
    assert_eq!(resolved.prompt, "flag kernel errors");
}

// ==================== invocation with placeholders ====================

#[test]
fn crumb_invocation_fills_placeholders_from_args() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let store = CrumbStore::new(tmp.path());
    store
        .save("ship", Crumb::new("scp ${FILE} ${HOST}:/srv/${FILE}"))
        .unwrap();

    let crumb = store.get("ship").unwrap();
    let command = substitute_placeholders(&crumb.command, &args(&["app.tar", "web1"]));
    assert_eq!(command, "scp app.tar web1:/srv/app.tar");
}
