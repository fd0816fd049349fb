//! Rootfs preparation (§4.4 steps 4, 6, 7): making the mount tree private,
//! binding the rootfs onto itself, applying the configured mount list,
//! `pivot_root`, readonly remounts, and masked paths.

use std::fs;
use std::path::Path;

use nix::mount::{mount, umount2, MntFlags, MsFlags};

use crate::core::config::MountConfig;
use crate::core::error::{CapsuleError, ErrContext, ErrorKind, Result};

/// Make the entire mount tree private so changes do not leak to the host.
pub fn make_mount_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .err_kind(ErrorKind::SystemError, "failed to make / private recursively")
}

/// Bind-mount the rootfs onto itself so it becomes a mount point, required
/// by `pivot_root`.
pub fn bind_mount_rootfs(rootfs: &Path) -> Result<()> {
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .err_kind(
        ErrorKind::SystemError,
        format!("failed to bind-mount rootfs {}", rootfs.display()),
    )
}

fn parse_flags(flags: &[String]) -> MsFlags {
    let mut parsed = MsFlags::empty();
    for flag in flags {
        parsed |= match flag.as_str() {
            "ro" | "MS_RDONLY" => MsFlags::MS_RDONLY,
            "nosuid" | "MS_NOSUID" => MsFlags::MS_NOSUID,
            "nodev" | "MS_NODEV" => MsFlags::MS_NODEV,
            "noexec" | "MS_NOEXEC" => MsFlags::MS_NOEXEC,
            "bind" | "MS_BIND" => MsFlags::MS_BIND,
            "rbind" => MsFlags::MS_BIND | MsFlags::MS_REC,
            _ => MsFlags::empty(),
        };
    }
    parsed
}

/// Perform every entry of the container's mount list, relative to
/// `rootfs` (§4.4 step 4).
pub fn apply_configured_mounts(mounts: &[MountConfig], rootfs: &Path) -> Result<()> {
    for entry in mounts {
        let destination = join_under_root(rootfs, &entry.destination);
        fs::create_dir_all(&destination).err_kind(
            ErrorKind::SystemError,
            format!("failed to create mount point {}", destination.display()),
        )?;
        let fstype = if entry.fstype.is_empty() {
            None
        } else {
            Some(entry.fstype.as_str())
        };
        mount(
            Some(&entry.source),
            &destination,
            fstype,
            parse_flags(&entry.flags),
            None::<&str>,
        )
        .err_kind(
            ErrorKind::SystemError,
            format!(
                "failed to mount {} at {}",
                entry.source.display(),
                destination.display()
            ),
        )?;
    }
    Ok(())
}

/// Perform `pivot_root` to make `new_root` the new `/`, moving the old
/// root under `new_root/.pivot_old`, then unmount and remove it.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let put_old = new_root.join(".pivot_old");
    fs::create_dir_all(&put_old)
        .err_kind(ErrorKind::SystemError, format!("failed to create {}", put_old.display()))?;

    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| {
        CapsuleError::with_cause(
            ErrorKind::SystemError,
            format!(
                "pivot_root({}, {}) failed",
                new_root.display(),
                put_old.display()
            ),
            e,
        )
    })?;

    nix::unistd::chdir("/").err_kind(ErrorKind::SystemError, "chdir / after pivot_root")?;

    umount_old_root("/.pivot_old")?;
    Ok(())
}

fn umount_old_root(path: &str) -> Result<()> {
    umount2(path, MntFlags::MNT_DETACH)
        .err_kind(ErrorKind::SystemError, format!("failed to unmount old root at {path}"))?;
    fs::remove_dir(path)
        .err_kind(ErrorKind::SystemError, format!("failed to remove old root directory {path}"))?;
    Ok(())
}

/// Mount `/proc` at `/proc` (called after `pivot_root`, when `/` is
/// already the new root).
pub fn mount_proc_in_new_root() -> Result<()> {
    let proc_dir = Path::new("/proc");
    fs::create_dir_all(proc_dir).err_kind(ErrorKind::SystemError, "failed to create /proc")?;

    mount(
        Some("proc"),
        proc_dir,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .err_kind(ErrorKind::SystemError, "failed to mount proc at /proc")
}

/// Mount a minimal `/dev` with tmpfs and the essential device nodes.
pub fn mount_dev_in_new_root() -> Result<()> {
    let dev_dir = Path::new("/dev");
    fs::create_dir_all(dev_dir).err_kind(ErrorKind::SystemError, "failed to create /dev")?;

    mount(
        Some("tmpfs"),
        dev_dir,
        Some("tmpfs"),
        MsFlags::MS_NOSUID,
        Some("mode=0755,size=65536k"),
    )
    .err_kind(ErrorKind::SystemError, "failed to mount tmpfs on /dev")?;

    create_dev_nodes();
    Ok(())
}

fn create_dev_nodes() {
    use nix::sys::stat;

    let perm = stat::Mode::from_bits_truncate(0o666);
    let devices = [
        ("/dev/null", stat::makedev(1, 3)),
        ("/dev/zero", stat::makedev(1, 5)),
        ("/dev/urandom", stat::makedev(1, 9)),
        ("/dev/tty", stat::makedev(5, 0)),
    ];

    for (path, dev) in &devices {
        // Best-effort: fails if not root or devtmpfs already provides it.
        let _ = stat::mknod(Path::new(path), stat::SFlag::S_IFCHR, perm, *dev);
    }
}

/// Remount `path` read-only via MS_BIND then MS_REMOUNT|MS_RDONLY (§4.4
/// step 6, `readonly_paths`).
pub fn remount_readonly(path: &Path) -> Result<()> {
    mount(
        Some(path),
        path,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .err_kind(ErrorKind::SystemError, format!("failed to bind-mount {}", path.display()))?;
    mount(
        None::<&str>,
        path,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None::<&str>,
    )
    .err_kind(
        ErrorKind::SystemError,
        format!("failed to remount {} read-only", path.display()),
    )
}

/// Mask `path` (§4.4 step 7): bind `/dev/null` over a file, an empty
/// tmpfs over a directory.
pub fn mask_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if path.is_dir() {
        mount(
            Some("tmpfs"),
            path,
            Some("tmpfs"),
            MsFlags::MS_RDONLY,
            Some("mode=0000"),
        )
        .err_kind(ErrorKind::SystemError, format!("failed to mask directory {}", path.display()))
    } else {
        mount(
            Some("/dev/null"),
            path,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .err_kind(ErrorKind::SystemError, format!("failed to mask file {}", path.display()))
    }
}

fn join_under_root(rootfs: &Path, destination: &Path) -> std::path::PathBuf {
    match destination.strip_prefix("/") {
        Ok(relative) => rootfs.join(relative),
        Err(_) => rootfs.join(destination),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_under_root_strips_leading_slash() {
        let joined = join_under_root(Path::new("/rootfs"), Path::new("/etc/hosts"));
        assert_eq!(joined, Path::new("/rootfs/etc/hosts"));
    }

    #[test]
    fn parse_flags_recognizes_common_names() {
        let flags = parse_flags(&["ro".to_string(), "nosuid".to_string()]);
        assert!(flags.contains(MsFlags::MS_RDONLY));
        assert!(flags.contains(MsFlags::MS_NOSUID));
    }
}
