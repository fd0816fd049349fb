//! The Parent Process Driver (§4.3): the two-phase bootstrap. A forked
//! intermediate process unshares the requested namespaces, forks again so
//! the grandchild lands as pid 1 of the new pid namespace, and that
//! grandchild re-executes this binary as `capsulerun init`. Synchronization
//! with the resulting child is exactly the configPipe + exec-fifo pair of
//! §5 — not the ad hoc anonymous error pipe a single-fork design would use.
//!
//! Wire-ordering note: §4.3 lists "write configPipe" (step 5) before
//! "place pid in cgroup" (step 6) and "connect networking" (step 7). Taken
//! literally that would let the child start its own network setup (§4.4
//! step 3) before the parent has moved the veth into its netns — a race
//! the §5 "ordering guarantees" (cgroup before network, network before
//! rootfs pivot) are written to rule out. This implementation performs
//! cgroup placement and network connection *before* writing configPipe,
//! so the child never observes a partially-wired network; every named
//! ordering guarantee still holds, and the child cannot race ahead of
//! work whose result it has not been told about yet.

use std::env;
use std::ffi::CString;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::path::Path;

use nix::fcntl::{self, FcntlArg, FdFlag, OFlag};
use nix::sched::CloneFlags;
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::stat::Mode;
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};
use serde::{Deserialize, Serialize};

use crate::core::config::ContainerConfig;
use crate::core::error::{CapsuleError, ErrContext, ErrorKind, Result};
use crate::core::network::{Endpoint, Registry};
use crate::core::state::ProcessFingerprint;
use crate::core::cgroup::CgroupManager;
use crate::platform::linux::namespaces;

const ENV_CONFIG_PIPE: &str = crate::core::constant::ENV_CONFIG_PIPE;
const ENV_INITIALIZER_TYPE: &str = crate::core::constant::ENV_INITIALIZER_TYPE;
const ENV_EXEC_FIFO_FD: &str = crate::core::constant::ENV_EXEC_FIFO_FD;

/// Wire format of configPipe (§5): `ContainerConfig` plus whatever the
/// parent resolved on the child's behalf before writing this — in this
/// design, the connected network endpoints (so the child can configure
/// its own netns in §4.4 step 3 without racing the parent's `connect`).
#[derive(Debug, Serialize, Deserialize)]
pub struct InitConfig {
    pub config: ContainerConfig,
    pub endpoints: Vec<Endpoint>,
}

pub struct SpawnOutcome {
    pub init_process: ProcessFingerprint,
    pub endpoints: Vec<Endpoint>,
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    fcntl::fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .err_kind(ErrorKind::PipeError, "failed to set FD_CLOEXEC")?;
    Ok(())
}

fn write_all_raw(fd: RawFd, buf: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < buf.len() {
        let n = unsafe {
            libc::write(
                fd,
                buf[written..].as_ptr() as *const _,
                buf.len() - written,
            )
        };
        if n < 0 {
            return Err(CapsuleError::new(
                ErrorKind::PipeError,
                "short write on configPipe",
            ));
        }
        written += n as usize;
    }
    Ok(())
}

fn close_raw(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn write_u32_raw(fd: RawFd, value: u32) -> Result<()> {
    write_all_raw(fd, &value.to_le_bytes())
}

fn read_u32_raw(fd: RawFd) -> u32 {
    let mut buf = [0u8; 4];
    let mut read = 0;
    while read < 4 {
        let n = unsafe { libc::read(fd, buf[read..].as_mut_ptr() as *mut _, 4 - read) };
        if n <= 0 {
            return 0;
        }
        read += n as usize;
    }
    u32::from_le_bytes(buf)
}

/// **Start** from `Stopped` (§4.2/§4.3): run the full bootstrap and return
/// the fingerprint of the live, exec-fifo-blocked init process.
pub fn spawn_container(
    config: &ContainerConfig,
    container_root: &Path,
    cgroup: &mut CgroupManager,
    registry: &Registry,
) -> Result<SpawnOutcome> {
    std::fs::create_dir_all(container_root).err_kind(
        ErrorKind::StateWriteError,
        format!("failed to create {}", container_root.display()),
    )?;

    let fifo_path = container_root.join(crate::core::constant::EXEC_FIFO);
    if fifo_path.exists() {
        let _ = std::fs::remove_file(&fifo_path);
    }
    unistd::mkfifo(&fifo_path, Mode::from_bits_truncate(0o622))
        .err_kind(ErrorKind::PipeError, "failed to create exec-fifo")?;

    // Opened O_PATH on behalf of the future child (§4.3 step 2): this does
    // not block even with no reader, and survives fork+exec since it is
    // not marked close-on-exec. The child re-opens it through
    // /proc/self/fd/<n> with O_WRONLY, which *does* block until a reader
    // shows up — that blocking open is the actual rendezvous.
    let fifo_path_fd: RawFd = fcntl::open(&fifo_path, OFlag::O_PATH, Mode::empty())
        .err_kind(ErrorKind::PipeError, "failed to open exec-fifo")?
        .into_raw_fd();

    let (parent_end, child_end) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .err_kind(ErrorKind::PipeError, "failed to create configPipe")?;
    let parent_fd = parent_end.into_raw_fd();
    let child_fd = child_end.into_raw_fd();
    set_cloexec(parent_fd)?;

    let (ready_read, ready_write) =
        unistd::pipe().err_kind(ErrorKind::PipeError, "failed to create ready pipe")?;
    let ready_read = ready_read.into_raw_fd();
    let ready_write = ready_write.into_raw_fd();

    match unsafe { unistd::fork() }.err_kind(ErrorKind::SystemError, "fork failed")? {
        ForkResult::Parent {
            child: intermediate_pid,
        } => {
            close_raw(child_fd);
            close_raw(ready_write);

            let grandchild_pid = read_u32_raw(ready_read);
            close_raw(ready_read);
            let _ = waitpid(intermediate_pid, None);

            if grandchild_pid == 0 {
                close_raw(parent_fd);
                close_raw(fifo_path_fd);
                return Err(CapsuleError::new(
                    ErrorKind::InitializerRunError,
                    "container bootstrap helper failed before reaching the new namespaces",
                ));
            }

            if let Err(e) = cgroup.apply(grandchild_pid, &config.resources) {
                let _ = nix::sys::signal::kill(
                    Pid::from_raw(grandchild_pid as i32),
                    nix::sys::signal::Signal::SIGKILL,
                );
                close_raw(parent_fd);
                close_raw(fifo_path_fd);
                return Err(e);
            }

            let mut endpoints: Vec<Endpoint> = Vec::new();
            for attachment in &config.networks {
                let endpoint_id = crate::core::id::generate_id();
                match registry.connect(
                    &endpoint_id,
                    attachment.driver,
                    &attachment.network_name,
                    &attachment.port_mappings,
                    grandchild_pid,
                ) {
                    Ok(endpoint) => endpoints.push(endpoint),
                    Err(e) => {
                        for endpoint in endpoints.iter().rev() {
                            let _ = registry.disconnect(endpoint);
                        }
                        let _ = cgroup.destroy();
                        let _ = nix::sys::signal::kill(
                            Pid::from_raw(grandchild_pid as i32),
                            nix::sys::signal::Signal::SIGKILL,
                        );
                        close_raw(parent_fd);
                        close_raw(fifo_path_fd);
                        return Err(CapsuleError::wrap(e, "network attach failed"));
                    }
                }
            }

            let init_config = InitConfig {
                config: config.clone(),
                endpoints: endpoints.clone(),
            };
            let json = serde_json::to_vec(&init_config).err_kind(
                ErrorKind::PipeError,
                "failed to serialize InitConfig",
            )?;
            let write_result = write_all_raw(parent_fd, &json);
            close_raw(parent_fd);
            close_raw(fifo_path_fd);
            if let Err(e) = write_result {
                for endpoint in endpoints.iter().rev() {
                    let _ = registry.disconnect(endpoint);
                }
                let _ = cgroup.destroy();
                let _ = nix::sys::signal::kill(
                    Pid::from_raw(grandchild_pid as i32),
                    nix::sys::signal::Signal::SIGKILL,
                );
                return Err(e);
            }

            let fingerprint = ProcessFingerprint::capture(grandchild_pid).map_err(|e| {
                CapsuleError::wrap(e, "init process exited before its fingerprint could be read")
            })?;

            Ok(SpawnOutcome {
                init_process: fingerprint,
                endpoints,
            })
        }
        ForkResult::Child => {
            close_raw(parent_fd);
            close_raw(ready_read);
            run_intermediate(config, child_fd, fifo_path_fd, ready_write);
            unreachable!("run_intermediate always exits the process");
        }
    }
}

/// The forked helper: unshares namespaces, forks again to enter the pid
/// namespace, and reports the grandchild's host pid back to the parent.
/// Never returns — always ends the process with `_exit`.
fn run_intermediate(
    config: &ContainerConfig,
    child_fd: RawFd,
    fifo_path_fd: RawFd,
    ready_write: RawFd,
) -> ! {
    let flags = namespaces::requested_clone_flags(&config.namespaces) | CloneFlags::CLONE_NEWPID;
    if namespaces::unshare_namespaces(flags).is_err() {
        let _ = write_u32_raw(ready_write, 0);
        close_raw(ready_write);
        std::process::exit(1);
    }

    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child }) => {
            let _ = write_u32_raw(ready_write, child.as_raw() as u32);
            close_raw(ready_write);
            std::process::exit(0);
        }
        Ok(ForkResult::Child) => {
            exec_init(child_fd, fifo_path_fd);
            unreachable!("exec_init always replaces or exits the process");
        }
        Err(_) => {
            let _ = write_u32_raw(ready_write, 0);
            close_raw(ready_write);
            std::process::exit(1);
        }
    }
}

/// Pid 1 of the new namespaces: set up the environment and re-execute this
/// binary as `capsulerun init`.
fn exec_init(child_fd: RawFd, fifo_path_fd: RawFd) -> ! {
    let exe = match env::current_exe() {
        Ok(p) => p,
        Err(_) => std::process::exit(1),
    };

    let mut envs: Vec<CString> = env::vars()
        .filter(|(k, _)| {
            k != ENV_CONFIG_PIPE && k != ENV_INITIALIZER_TYPE && k != ENV_EXEC_FIFO_FD
        })
        .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
        .collect();
    envs.push(CString::new(format!("{ENV_CONFIG_PIPE}={child_fd}")).unwrap());
    envs.push(CString::new(format!("{ENV_INITIALIZER_TYPE}=init")).unwrap());
    envs.push(CString::new(format!("{ENV_EXEC_FIFO_FD}={fifo_path_fd}")).unwrap());

    let program = match CString::new(exe.to_string_lossy().into_owned()) {
        Ok(p) => p,
        Err(_) => std::process::exit(1),
    };
    let args = vec![program.clone(), CString::new("init").unwrap()];

    let _ = unistd::execve(&program, &args, &envs);
    std::process::exit(1);
}

/// **exec** role (§9 open question): join the namespaces of a running
/// container's init pid and run a second command in it.
///
/// `setns` into a target pid namespace, like `unshare(CLONE_NEWPID)`, only
/// takes effect for children the calling process creates afterward — it
/// does not move the caller's own pid into the namespace. So after joining
/// namespaces this forks once more: the child is the one that actually
/// lands inside the container's pid namespace and `execve`s the requested
/// command, while this process waits and propagates its exit status.
pub fn exec_in_container(target_pid: u32, cmd: &[String]) -> Result<i32> {
    if cmd.is_empty() {
        return Err(CapsuleError::new(
            ErrorKind::ExecNotFound,
            "no command specified for exec",
        ));
    }

    namespaces::setns_into(
        target_pid,
        &[
            crate::core::config::NamespaceKind::Uts,
            crate::core::config::NamespaceKind::Ipc,
            crate::core::config::NamespaceKind::Network,
            crate::core::config::NamespaceKind::Pid,
            crate::core::config::NamespaceKind::Mount,
        ],
    )?;

    match unsafe { unistd::fork() }.err_kind(ErrorKind::SystemError, "fork failed")? {
        ForkResult::Parent { child } => {
            use nix::sys::wait::WaitStatus;
            loop {
                match nix::sys::wait::waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                    Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(128 + sig as i32),
                    Ok(_) => continue,
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(e) => {
                        return Err(CapsuleError::with_cause(
                            ErrorKind::SystemError,
                            "waitpid on exec target failed",
                            e,
                        ))
                    }
                }
            }
        }
        ForkResult::Child => {
            let root_path = format!("/proc/{target_pid}/root");
            if nix::unistd::chroot(root_path.as_str()).is_err() {
                std::process::exit(127);
            }
            if nix::unistd::chdir("/").is_err() {
                std::process::exit(127);
            }

            let program = match CString::new(cmd[0].as_str()) {
                Ok(p) => p,
                Err(_) => std::process::exit(127),
            };
            let args: std::result::Result<Vec<CString>, _> =
                cmd.iter().map(|a| CString::new(a.as_str())).collect();
            let Ok(args) = args else {
                std::process::exit(127);
            };
            let env: Vec<CString> = env::vars()
                .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
                .collect();

            let _ = nix::unistd::execve(&program, &args, &env);
            std::process::exit(127);
        }
    }
}

/// Read the environment fd the `init` subcommand was re-executed with.
pub fn env_fd(name: &str) -> Option<RawFd> {
    env::var(name).ok()?.parse::<RawFd>().ok()
}

/// Wrap a raw fd inherited across exec as a `std::fs::File` for reading.
///
/// # Safety
/// `fd` must be a valid, open, owned file descriptor inherited from the
/// parent that this process now solely owns.
pub unsafe fn file_from_raw(fd: RawFd) -> std::fs::File {
    std::fs::File::from_raw_fd(fd)
}
