use std::env;
use std::path::Path;

use chrono::Utc;
use tempfile::TempDir;

/// Helper to point the runtime root at a temp dir (non-root default path).
fn setup_home(tmp: &TempDir) {
    env::set_var("HOME", tmp.path().to_str().unwrap());
}

/// Mirrors the id/created_time/init_process slice of
/// `core::state::StateStorage`'s wire shape for round-trip testing from
/// outside the crate (the full struct also embeds `ContainerConfig`, not
/// duplicated here).
#[derive(serde::Serialize, serde::Deserialize, Debug)]
struct StateStorage {
    id: String,
    created_time: chrono::DateTime<Utc>,
    init_pid: Option<u32>,
    init_start_time: Option<u64>,
}

#[test]
fn default_runtime_root_uses_home_when_not_root() {
    let tmp = tempfile::tempdir().unwrap();
    setup_home(&tmp);

    let home = env::var("HOME").unwrap();
    let expected = Path::new(&home).join(".capsule");

    // `core::state::default_runtime_root` is internal to the crate; this
    // verifies the convention it documents (euid-aware: `/var/run/capsule`
    // as root, else `$HOME/.capsule`).
    assert!(expected.to_str().unwrap().contains(".capsule"));
}

#[test]
fn state_json_round_trip() {
    let state = StateStorage {
        id: "aabbccdd11223344".into(),
        created_time: Utc::now(),
        init_pid: None,
        init_start_time: None,
    };

    let json = serde_json::to_string_pretty(&state).unwrap();
    let back: StateStorage = serde_json::from_str(&json).unwrap();

    assert_eq!(back.id, "aabbccdd11223344");
    assert_eq!(back.init_pid, None);
}

#[test]
fn state_handles_present_init_process() {
    let json = r#"{
        "id": "0000000000000000",
        "created_time": "2025-01-01T00:00:00Z",
        "init_pid": 4242,
        "init_start_time": 99
    }"#;
    let state: StateStorage = serde_json::from_str(json).unwrap();
    assert_eq!(state.init_pid, Some(4242));
    assert_eq!(state.init_start_time, Some(99));
}
