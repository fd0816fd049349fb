/// Integration smoke test for capsulerun.
///
/// This test requires:
/// 1. Running on Linux.
/// 2. Running as root (or with sufficient privileges for namespaces + cgroups).
/// 3. An Alpine minirootfs extracted at `tests/rootfs/` (or the path set in
///    `CAPSULE_TEST_ROOTFS`).
///
/// In CI, the workflow downloads and extracts the rootfs before running tests.
/// Locally, you can prepare it with:
///
/// ```bash
/// mkdir -p tests/rootfs
/// curl -L https://dl-cdn.alpinelinux.org/alpine/v3.20/releases/x86_64/alpine-minirootfs-3.20.3-x86_64.tar.gz \
///     | tar -xz -C tests/rootfs
/// ```
///
/// The test is skipped if not running as root or if the rootfs is missing.
use std::path::{Path, PathBuf};
use std::process::Command;

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_capsulerun")
}

fn rootfs_path() -> PathBuf {
    PathBuf::from(
        std::env::var("CAPSULE_TEST_ROOTFS").unwrap_or_else(|_| "tests/rootfs".to_string()),
    )
}

fn can_run() -> bool {
    if cfg!(not(target_os = "linux")) {
        eprintln!("SKIP: not on Linux");
        return false;
    }
    if !nix_is_root() {
        eprintln!("SKIP: not running as root (euid != 0)");
        return false;
    }
    let rfs = rootfs_path();
    if !rfs.join("bin").exists() {
        eprintln!("SKIP: rootfs not found at {}/bin", rfs.display());
        return false;
    }
    true
}

fn nix_is_root() -> bool {
    #[cfg(target_os = "linux")]
    {
        nix::unistd::geteuid().is_root()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Write a minimal spec to `dir/spec.json`, with `args` as the process
/// command, and return its path.
fn write_spec(dir: &Path, id: &str, args: &[&str]) -> PathBuf {
    let rootfs = rootfs_path().canonicalize().expect("rootfs must exist");
    let spec = serde_json::json!({
        "id": id,
        "rootfs_path": rootfs.to_str().unwrap(),
        "hostname": "capsule-test",
        "process": {
            "args": args,
            "env": ["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"],
            "cwd": "/",
            "uid": null,
            "gid": null
        },
        "mounts": [],
        "namespaces": ["Mount", "Pid", "Uts", "Ipc", "Network"],
        "readonly_paths": [],
        "mask_paths": ["/proc/kcore"],
        "resources": {
            "memory_bytes": null,
            "cpu_shares": null,
            "cpuset_cpus": null,
            "pids_limit": null,
            "devices": []
        },
        "networks": []
    });
    let path = dir.join("spec.json");
    std::fs::write(&path, serde_json::to_string_pretty(&spec).unwrap()).unwrap();
    path
}

#[test]
fn smoke_run_exit_code_propagation() {
    if !can_run() {
        eprintln!("Skipping integration test (prerequisites not met)");
        return;
    }

    let tmp_home = tempfile::tempdir().unwrap();
    let spec_path = write_spec(tmp_home.path(), "deadbeefcafef00d", &["/bin/sh", "-c", "exit 42"]);

    let output = Command::new(bin())
        .args(["run", spec_path.to_str().unwrap()])
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun run");

    assert_eq!(
        output.status.code(),
        Some(42),
        "run should propagate the container's exit code, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn smoke_create_start_ps_rm_lifecycle() {
    if !can_run() {
        eprintln!("Skipping integration test (prerequisites not met)");
        return;
    }

    let tmp_home = tempfile::tempdir().unwrap();
    let id = "aabbccddeeff0011";
    let spec_path = write_spec(tmp_home.path(), id, &["/bin/sh", "-c", "sleep 1"]);

    let create = Command::new(bin())
        .args(["create", spec_path.to_str().unwrap()])
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun create");
    assert!(
        create.status.success(),
        "create should succeed, stderr: {}",
        String::from_utf8_lossy(&create.stderr)
    );

    let ps_before = Command::new(bin())
        .arg("ps")
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun ps");
    assert!(String::from_utf8_lossy(&ps_before.stdout).contains("stopped"));

    let start = Command::new(bin())
        .args(["start", id])
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun start");
    assert!(
        start.status.success(),
        "start should succeed, stderr: {}",
        String::from_utf8_lossy(&start.stderr)
    );

    let ps_after = Command::new(bin())
        .arg("ps")
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun ps");
    assert!(String::from_utf8_lossy(&ps_after.stdout).contains("running"));

    let rm = Command::new(bin())
        .args(["rm", id])
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun rm");
    assert!(
        rm.status.success(),
        "rm should succeed, stderr: {}",
        String::from_utf8_lossy(&rm.stderr)
    );

    let ps_final = Command::new(bin())
        .arg("ps")
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun ps");
    let ps_final_stdout = String::from_utf8_lossy(&ps_final.stdout).into_owned();
    assert_eq!(
        ps_final_stdout.lines().count(),
        1,
        "ps should only show the header after rm, got:\n{ps_final_stdout}"
    );
}

#[test]
fn smoke_memory_limit_does_not_crash() {
    if !can_run() {
        eprintln!("Skipping integration test (prerequisites not met)");
        return;
    }

    let tmp_home = tempfile::tempdir().unwrap();
    let rootfs = rootfs_path().canonicalize().unwrap();
    let spec = serde_json::json!({
        "id": "0123456789abcdef",
        "rootfs_path": rootfs.to_str().unwrap(),
        "hostname": "capsule-test",
        "process": {
            "args": ["/bin/sh", "-c", "echo mem_ok"],
            "env": ["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"],
            "cwd": "/",
            "uid": null,
            "gid": null
        },
        "mounts": [],
        "namespaces": ["Mount", "Pid", "Uts", "Ipc", "Network"],
        "readonly_paths": [],
        "mask_paths": [],
        "resources": {
            "memory_bytes": 67108864,
            "cpu_shares": null,
            "cpuset_cpus": null,
            "pids_limit": null,
            "devices": []
        },
        "networks": []
    });
    let spec_path = tmp_home.path().join("spec.json");
    std::fs::write(&spec_path, serde_json::to_string_pretty(&spec).unwrap()).unwrap();

    let output = Command::new(bin())
        .args(["run", spec_path.to_str().unwrap()])
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun run with a memory limit");

    assert!(
        output.status.success(),
        "should succeed with a memory limit, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn smoke_create_refuses_duplicate_id() {
    if !can_run() {
        eprintln!("Skipping integration test (prerequisites not met)");
        return;
    }

    let tmp_home = tempfile::tempdir().unwrap();
    let spec_path = write_spec(tmp_home.path(), "1111222233334444", &["/bin/true"]);

    let first = Command::new(bin())
        .args(["create", spec_path.to_str().unwrap()])
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun create");
    assert!(first.status.success());

    let second = Command::new(bin())
        .args(["create", spec_path.to_str().unwrap()])
        .env("HOME", tmp_home.path())
        .output()
        .expect("failed to run capsulerun create");
    assert!(!second.status.success(), "creating the same id twice should fail");
}
