//! Namespace unshare/setns helpers (§4.3 step 4, §4.4 `exec` role). Entry
//! order is fixed by `NamespaceKind::ENTRY_ORDER` — user, pid, network,
//! ipc, uts, mount, mount always last so `pivot_root` sees the final tree.

use std::fs::File;
use std::os::unix::io::AsFd;

use nix::sched::CloneFlags;

use crate::core::config::NamespaceKind;
use crate::core::error::{CapsuleError, ErrContext, ErrorKind, Result};

fn clone_flag(kind: NamespaceKind) -> CloneFlags {
    match kind {
        NamespaceKind::Mount => CloneFlags::CLONE_NEWNS,
        NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceKind::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceKind::Network => CloneFlags::CLONE_NEWNET,
        NamespaceKind::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        NamespaceKind::User => CloneFlags::CLONE_NEWUSER,
    }
}

/// Combine the requested namespace kinds, in `NamespaceKind::ENTRY_ORDER`,
/// into a single `CloneFlags` value for one `unshare(2)` call. The kernel
/// itself does not care about call-site ordering within a single unshare
/// — the fixed order matters for the later `setns` path and for mount
/// visibility, not for which bit is set first here.
pub fn requested_clone_flags(namespaces: &[NamespaceKind]) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    for kind in NamespaceKind::ENTRY_ORDER {
        if namespaces.contains(&kind) {
            flags |= clone_flag(kind);
        }
    }
    flags
}

/// Call `unshare(2)` with the given flags. `CLONE_NEWPID` only affects
/// children created after this call returns — the caller must fork again
/// to land a process inside the new pid namespace as its pid 1.
pub fn unshare_namespaces(flags: CloneFlags) -> Result<()> {
    nix::sched::unshare(flags).err_kind(
        ErrorKind::SystemError,
        "unshare failed — are you running as root?",
    )
}

/// Set the hostname inside a UTS namespace.
pub fn set_hostname(name: &str) -> Result<()> {
    nix::unistd::sethostname(name).err_kind(ErrorKind::SystemError, "sethostname failed")
}

/// `setns` into every namespace kind of `target_pid`, in entry order —
/// used by the `exec` initializer role to join an already-running
/// container (§9 open question on the `exec` subcommand).
pub fn setns_into(target_pid: u32, kinds: &[NamespaceKind]) -> Result<()> {
    for kind in NamespaceKind::ENTRY_ORDER {
        if !kinds.contains(&kind) {
            continue;
        }
        let path = format!("/proc/{target_pid}/ns/{}", kind.proc_ns_name());
        let file = File::open(&path).err_kind(
            ErrorKind::SystemError,
            format!("failed to open namespace handle {path}"),
        )?;
        nix::sched::setns(file.as_fd(), clone_flag(kind)).map_err(|e| {
            CapsuleError::with_cause(
                ErrorKind::SystemError,
                format!("setns into {} namespace of pid {target_pid} failed", kind.proc_ns_name()),
                e,
            )
        })?;
    }
    Ok(())
}

/// Whether `pid` has entered its own instance of `kind`, by comparing the
/// target of its `/proc/<pid>/ns/<kind>` link against the caller's own.
pub fn differs_from_self(pid: u32, kind: NamespaceKind) -> Result<bool> {
    let theirs = std::fs::read_link(format!("/proc/{pid}/ns/{}", kind.proc_ns_name()))
        .err_kind(ErrorKind::SystemError, "failed to read namespace link")?;
    let ours = std::fs::read_link(format!("/proc/self/ns/{}", kind.proc_ns_name()))
        .err_kind(ErrorKind::SystemError, "failed to read namespace link")?;
    Ok(theirs != ours)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_clone_flags_includes_mount_and_pid() {
        let flags = requested_clone_flags(&[NamespaceKind::Mount, NamespaceKind::Pid]);
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn requested_clone_flags_empty_for_no_namespaces() {
        assert_eq!(requested_clone_flags(&[]), CloneFlags::empty());
    }
}
