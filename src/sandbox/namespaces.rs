use crate::types::Identity;
use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use nix::sched::{CloneFlags, unshare};
use nix::unistd::geteuid;
use std::io::Write;

/**
 * Create a user namespace mapping the caller to root inside it. Everything
 * privileged-looking that follows (mount, chroot, sethostname) is authorized
 * by this mapping, so failure to unshare the user namespace is fatal for an
 * unprivileged caller. Already-root callers skip it entirely.
 */
pub fn enter_user_namespace(identity: &Identity) -> Result<()> {
    if geteuid().is_root() {
        debug!("Already root, skipping user namespace");
        return Ok(());
    }

    unshare(CloneFlags::CLONE_NEWUSER)
        .context("unshare(CLONE_NEWUSER) failed")?;

    // Map our outer uid/gid to 0. Denying setgroups first is a kernel
    // precondition for an unprivileged gid_map write.
    write_proc_file("/proc/self/uid_map", &format!("0 {} 1\n", identity.uid));
    write_proc_file("/proc/self/setgroups", "deny\n");
    write_proc_file("/proc/self/gid_map", &format!("0 {} 1\n", identity.gid));

    Ok(())
}

/// Unshare the mount, PID, and UTS namespaces together. The next fork
/// produces PID 1 of the new PID namespace. Failure degrades isolation but
/// the sandbox can still run, so it only warns.
pub fn unshare_isolation() {
    let flags = CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWUTS;
    if let Err(e) = unshare(flags) {
        warn!("unshare of mount/pid/uts namespaces failed: {}", e);
    }
}

/// Give the new UTS namespace its own host and domain name. Best-effort.
pub fn set_uts_names(hostname: &str, domainname: &str) {
    if let Err(e) = nix::unistd::sethostname(hostname) {
        warn!("failed to set hostname to {}: {}", hostname, e);
    }
    let rc = unsafe {
        libc::setdomainname(
            domainname.as_ptr() as *const libc::c_char,
            domainname.len(),
        )
    };
    if rc != 0 {
        warn!(
            "failed to set domainname to {}: {}",
            domainname,
            nix::errno::Errno::last()
        );
    }
}

/// Ask the kernel to SIGKILL us when our parent dies, so an abruptly
/// terminated supervisor cannot strand the sandboxed process. The setting
/// does not survive fork, so this runs in the child, first thing.
pub fn set_parent_death_signal() {
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    if rc != 0 {
        warn!("PR_SET_PDEATHSIG failed: {}", nix::errno::Errno::last());
    }
}

/// Neutralize setuid/setgid binaries inside the sandbox.
pub fn set_no_new_privs() -> Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(anyhow!(
            "PR_SET_NO_NEW_PRIVS failed: {}",
            nix::errno::Errno::last()
        ));
    }
    Ok(())
}

/* The id-map files must be written with a single write(2); opening for
 * append or writing twice is rejected by the kernel. Failures here leave us
 * nobody inside the namespace, which surfaces soon enough as mount/chroot
 * errors, so they warn rather than abort. */
fn write_proc_file(path: &str, content: &str) {
    let result = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|mut file| file.write_all(content.as_bytes()));
    if let Err(e) = result {
        warn!("failed to write {}: {}", path, e);
    }
}
