//! The Initializer (§4.4): runs as pid 1 inside the new namespaces, after
//! the Parent Process Driver has re-executed this binary as `capsulerun
//! init`. Reads `InitConfig` off configPipe, wires up the child's half of
//! networking, prepares the rootfs, drops to the configured uid/gid,
//! rendezvouses on the exec-fifo, and finally `execve`s the configured
//! command — this function never returns on success.

use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::unistd::{Gid, Uid};

use crate::core::config::ContainerConfig;
use crate::core::error::{CapsuleError, ErrContext, ErrorKind, Result};
use crate::core::network::Endpoint;
use crate::platform::linux::{mounts, namespaces, process};

fn run_ip(args: &[&str]) -> Result<()> {
    let output = Command::new("ip").args(args).output().err_kind(
        ErrorKind::NetworkError,
        format!("failed to spawn ip {args:?}"),
    )?;
    if !output.status.success() {
        return Err(CapsuleError::new(
            ErrorKind::NetworkError,
            format!(
                "ip {args:?} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}

/// §4.4 step 3: bring `lo` up unconditionally, and for any endpoint that
/// carries a veth pair, rename it to `eth0`, assign its address, bring it
/// up, and add a default route when the driver resolved a gateway.
fn setup_network(endpoints: &[Endpoint]) -> Result<()> {
    run_ip(&["link", "set", "lo", "up"])?;

    for endpoint in endpoints {
        let Some(container_veth) = &endpoint.container_veth_name else {
            continue;
        };
        run_ip(&["link", "set", container_veth, "name", "eth0"])?;
        if let Some(ip_cidr) = &endpoint.ip_address {
            run_ip(&["addr", "add", ip_cidr, "dev", "eth0"])?;
        }
        run_ip(&["link", "set", "eth0", "up"])?;
        if let Some(gateway) = &endpoint.gateway {
            run_ip(&["route", "add", "default", "via", gateway])?;
        }
    }
    Ok(())
}

fn prepare_rootfs(config: &ContainerConfig) -> Result<()> {
    mounts::make_mount_private()?;
    mounts::bind_mount_rootfs(&config.rootfs_path)?;
    mounts::apply_configured_mounts(&config.mounts, &config.rootfs_path)?;
    mounts::pivot_root(&config.rootfs_path)?;
    mounts::mount_proc_in_new_root()?;
    mounts::mount_dev_in_new_root()?;

    for path in &config.readonly_paths {
        mounts::remount_readonly(path)?;
    }
    for path in &config.mask_paths {
        mounts::mask_path(path)?;
    }
    Ok(())
}

/// Drop to the configured gid/uid, in that order. There is no capability
/// crate in the dependency stack, so this narrows the running identity but
/// does not trim the process's capability set — acceptable for the
/// single-user-namespace-or-root containers this engine targets, and noted
/// as a simplification rather than left silent.
fn drop_privileges(config: &ContainerConfig) -> Result<()> {
    if let Some(gid) = config.process.gid {
        nix::unistd::setgid(Gid::from_raw(gid))
            .err_kind(ErrorKind::SystemError, format!("setgid({gid}) failed"))?;
    }
    if let Some(uid) = config.process.uid {
        nix::unistd::setuid(Uid::from_raw(uid))
            .err_kind(ErrorKind::SystemError, format!("setuid({uid}) failed"))?;
    }
    Ok(())
}

/// Resolve `program` against `PATH` the way a shell would: used as-is if it
/// already contains a `/`, otherwise searched directory by directory.
fn resolve_executable(program: &str, path_env: Option<&str>) -> Result<PathBuf> {
    if program.contains('/') {
        let candidate = PathBuf::from(program);
        return if is_executable(&candidate) {
            Ok(candidate)
        } else {
            Err(CapsuleError::new(
                ErrorKind::ExecNotFound,
                format!("'{program}' is not an executable file"),
            ))
        };
    }

    let dirs = path_env.unwrap_or("/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin");
    for dir in dirs.split(':') {
        if dir.is_empty() {
            continue;
        }
        let candidate = Path::new(dir).join(program);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(CapsuleError::new(
        ErrorKind::ExecNotFound,
        format!("'{program}' not found in PATH"),
    ))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn path_from_env(env: &[String]) -> Option<&str> {
    env.iter()
        .find_map(|entry| entry.strip_prefix("PATH=").filter(|v| !v.is_empty()))
}

/// Open the exec-fifo via `/proc/self/fd/<n>` (a genuine blocking open —
/// the rendezvous with the parent's `start` call) and write the single
/// byte that wakes it up.
fn signal_exec_fifo(fifo_fd: i32) -> Result<()> {
    let path = format!("/proc/self/fd/{fifo_fd}");
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .err_kind(ErrorKind::PipeError, "failed to open exec-fifo for writing")?;
    let raw = file.as_raw_fd();
    let byte = [0u8];
    let n = unsafe { libc::write(raw, byte.as_ptr() as *const _, 1) };
    if n != 1 {
        return Err(CapsuleError::new(
            ErrorKind::PipeError,
            "failed to write to exec-fifo",
        ));
    }
    drop(file);
    unsafe {
        libc::close(fifo_fd);
    }
    Ok(())
}

/// Entry point for the `init` subcommand. Never returns on success.
pub fn run() -> Result<()> {
    let config_pipe_fd = process::env_fd(crate::core::constant::ENV_CONFIG_PIPE).ok_or_else(|| {
        CapsuleError::new(ErrorKind::PipeError, "missing configPipe fd in environment")
    })?;
    let fifo_fd = process::env_fd(crate::core::constant::ENV_EXEC_FIFO_FD).ok_or_else(|| {
        CapsuleError::new(ErrorKind::PipeError, "missing exec-fifo fd in environment")
    })?;

    let mut config_pipe = unsafe { process::file_from_raw(config_pipe_fd) };
    let init_config: process::InitConfig = {
        use std::io::Read;
        let mut buf = Vec::new();
        config_pipe
            .read_to_end(&mut buf)
            .err_kind(ErrorKind::PipeError, "failed to read configPipe")?;
        serde_json::from_slice(&buf)
            .err_kind(ErrorKind::PipeError, "failed to parse InitConfig")?
    };
    drop(config_pipe);

    let config = &init_config.config;

    if let Some(hostname) = &config.hostname {
        namespaces::set_hostname(hostname)?;
    }

    setup_network(&init_config.endpoints)?;
    prepare_rootfs(config)?;
    drop_privileges(config)?;

    let path_env = path_from_env(&config.process.env);
    let program_path = resolve_executable(&config.process.args[0], path_env)?;

    signal_exec_fifo(fifo_fd)?;

    exec_command(&program_path, config)
}

fn exec_command(program_path: &Path, config: &ContainerConfig) -> Result<()> {
    use std::ffi::CString;

    nix::unistd::chdir(&config.process.cwd)
        .err_kind(ErrorKind::SystemError, "failed to chdir into process.cwd")?;

    let program = CString::new(program_path.to_string_lossy().into_owned()).err_kind(
        ErrorKind::ExecNotFound,
        "executable path contains a NUL byte",
    )?;
    let mut argv: Vec<CString> = Vec::with_capacity(config.process.args.len());
    argv.push(program.clone());
    for arg in &config.process.args[1..] {
        argv.push(
            CString::new(arg.as_str())
                .err_kind(ErrorKind::ExecNotFound, "argument contains a NUL byte")?,
        );
    }
    let envp: Vec<CString> = config
        .process
        .env
        .iter()
        .filter_map(|entry| CString::new(entry.as_str()).ok())
        .collect();

    nix::unistd::execve(&program, &argv, &envp)
        .err_kind(
            ErrorKind::ExecNotFound,
            format!("execve '{}' failed", program_path.display()),
        )?;
    unreachable!("execve replaces the process image on success")
}
