use crate::util::{check_path_length, mkdir_p, mount};
use anyhow::Result;
use log::warn;
use nix::mount::MsFlags;
use std::path::{Path, PathBuf};

/**
 * Stop mount events from propagating out of our mount namespace (and from
 * the host into it). This must happen before anything is mounted under the
 * new root; with a shared propagation root the overlay and bind mounts
 * would leak back to the host.
 */
pub fn make_mount_private() {
    if let Err(e) = mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    ) {
        warn!("mount --make-rprivate failed: {:#}", e);
    }
}

/**
 * Populate the system mounts a functional root needs: a recursive bind of
 * the host's /dev (keeps devpts and friends usable), a fresh procfs for the
 * new PID namespace, a read-only recursive bind of /sys (mounting sysfs
 * fresh is not generally permitted in an unprivileged user namespace), and
 * a fresh tmpfs on /tmp.
 *
 * Each individual mount is best-effort: the sandboxed command may not need
 * it, so a failure is reported and construction continues.
 */
pub fn setup_base_mounts(root: &Path) -> Result<()> {
    let dev_dir = rooted(root, "dev")?;
    let proc_dir = rooted(root, "proc")?;
    let sys_dir = rooted(root, "sys")?;
    let tmp_dir = rooted(root, "tmp")?;

    for dir in [&dev_dir, &proc_dir, &sys_dir, &tmp_dir] {
        if let Err(e) = mkdir_p(dir) {
            warn!("{:#}", e);
        }
    }

    if let Err(e) = mount(
        Some("/dev"),
        &dev_dir,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    ) {
        warn!("failed to bind /dev: {:#}", e);
    }

    if let Err(e) = mount(
        Some("proc"),
        &proc_dir,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    ) {
        warn!("failed to mount /proc: {:#}", e);
    }

    // A bind mount only turns read-only on remount.
    if let Err(e) = mount(
        Some("/sys"),
        &sys_dir,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    ) {
        warn!("failed to bind /sys: {:#}", e);
    } else if let Err(e) = mount(
        None::<&str>,
        &sys_dir,
        None::<&str>,
        MsFlags::MS_BIND
            | MsFlags::MS_REMOUNT
            | MsFlags::MS_RDONLY
            | MsFlags::MS_NOSUID,
        None::<&str>,
    ) {
        warn!("failed to remount /sys read-only: {:#}", e);
    }

    if let Err(e) = mount(
        Some("tmpfs"),
        &tmp_dir,
        Some("tmpfs"),
        MsFlags::empty(),
        None::<&str>,
    ) {
        warn!("failed to mount /tmp: {:#}", e);
    }

    Ok(())
}

/* Join a mount target under the new root. An overlong result could not be
 * handed to the kernel at all, so that is fatal rather than a degraded
 * mount. */
fn rooted(root: &Path, name: &str) -> Result<PathBuf> {
    let path = root.join(name);
    check_path_length(&path)?;
    Ok(path)
}
