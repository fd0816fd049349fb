/// Tests for CLI argument parsing against the capsule-spec based surface.
use std::process::Command;

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_capsulerun")
}

/// Verify the binary can print help without error.
#[test]
fn cli_help_works() {
    let output = Command::new(bin())
        .arg("--help")
        .output()
        .expect("failed to execute capsulerun --help");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("capsulerun"),
        "help output should mention capsulerun, got: {stdout}"
    );
}

/// `spec` writes an example config to `capsule-spec.json` in the cwd and
/// refuses to overwrite one that already exists.
#[test]
fn cli_spec_writes_example_file() {
    let tmp = tempfile::tempdir().unwrap();

    let output = Command::new(bin())
        .arg("spec")
        .current_dir(tmp.path())
        .output()
        .expect("failed to execute capsulerun spec");
    assert!(
        output.status.success(),
        "spec should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let spec_path = tmp.path().join("capsule-spec.json");
    let contents = std::fs::read_to_string(&spec_path).expect("capsule-spec.json should exist");
    let parsed: serde_json::Value =
        serde_json::from_str(&contents).expect("spec file should be valid JSON");
    assert!(parsed.get("id").is_some());
    assert!(parsed.get("rootfs_path").is_some());

    let second = Command::new(bin())
        .arg("spec")
        .current_dir(tmp.path())
        .output()
        .expect("failed to execute capsulerun spec a second time");
    assert!(
        !second.status.success(),
        "spec should refuse to overwrite an existing capsule-spec.json"
    );
}

/// `create` requires a spec file argument.
#[test]
fn cli_create_requires_spec_path() {
    let output = Command::new(bin())
        .args(["create"])
        .output()
        .expect("failed to execute capsulerun create");

    assert!(!output.status.success(), "create without a spec path should fail");
}

/// `create` with a nonexistent spec file fails gracefully.
#[test]
fn cli_create_missing_spec_file() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(bin())
        .args(["create", "/nonexistent/spec.json"])
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute capsulerun create");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to read spec file"),
        "got: {stderr}"
    );
}

/// `ps` succeeds even with no containers, printing just the header.
#[test]
fn cli_ps_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(bin())
        .arg("ps")
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute capsulerun ps");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CONTAINER ID"), "ps should print a header");
}

/// `rm` with a non-existent ID fails gracefully.
#[test]
fn cli_rm_nonexistent() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(bin())
        .args(["rm", "deadbeef"])
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute capsulerun rm");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no container found"),
        "should report no container found, got: {stderr}"
    );
}

/// `logs` with a non-existent ID fails gracefully.
#[test]
fn cli_logs_nonexistent() {
    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(bin())
        .args(["logs", "deadbeef"])
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute capsulerun logs");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no container found"),
        "should report no container found, got: {stderr}"
    );
}

/// `create` followed by `ps` shows the container as stopped.
#[test]
fn cli_create_then_ps_shows_stopped() {
    let tmp = tempfile::tempdir().unwrap();
    let rootfs = tmp.path().join("rootfs");
    std::fs::create_dir_all(&rootfs).unwrap();

    let spec = serde_json::json!({
        "id": "feedfacecafebeef",
        "rootfs_path": rootfs.to_str().unwrap(),
        "hostname": "test",
        "process": {
            "args": ["/bin/true"],
            "env": [],
            "cwd": "/",
            "uid": null,
            "gid": null
        },
        "mounts": [],
        "namespaces": ["Mount", "Pid", "Uts", "Ipc", "Network"],
        "readonly_paths": [],
        "mask_paths": [],
        "resources": {
            "memory_bytes": null,
            "cpu_shares": null,
            "cpuset_cpus": null,
            "pids_limit": null,
            "devices": []
        },
        "networks": []
    });
    let spec_path = tmp.path().join("spec.json");
    std::fs::write(&spec_path, serde_json::to_string_pretty(&spec).unwrap()).unwrap();

    let create = Command::new(bin())
        .args(["create", spec_path.to_str().unwrap()])
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute capsulerun create");
    assert!(
        create.status.success(),
        "create should succeed, stderr: {}",
        String::from_utf8_lossy(&create.stderr)
    );

    let ps = Command::new(bin())
        .arg("ps")
        .env("HOME", tmp.path())
        .output()
        .expect("failed to execute capsulerun ps");
    let stdout = String::from_utf8_lossy(&ps.stdout);
    assert!(
        stdout.contains("stopped"),
        "ps should show the created container as stopped, got:\n{stdout}"
    );
}
