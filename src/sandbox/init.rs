use super::namespaces;
use super::pty::ChildPty;
use anyhow::{Context, Result};
use log::trace;
use nix::unistd::{chdir, chroot, execvpe};
use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::path::Path;

/*
 * chroot/chdir/setsid/exec each mutate process-wide state that cannot be
 * taken back, and the kernel cares about their order (no pre-chroot path
 * may be touched after the root changes, the slave must be attached before
 * exec). The sequence below encodes that order in the types: each step
 * consumes the previous stage, so skipping or repeating one is a compile
 * error rather than a latent runtime bug.
 */

pub struct Unconfined(());
pub struct RootChanged(());
pub struct PtyAttached(());

pub struct InitSequence<Stage> {
    _stage: Stage,
}

impl InitSequence<Unconfined> {
    pub fn new() -> Self {
        Self {
            _stage: Unconfined(()),
        }
    }

    /// Enter the materialized root. From this point on every path is
    /// interpreted inside the sandbox.
    pub fn enter_root(
        self,
        root: &Path,
    ) -> Result<InitSequence<RootChanged>> {
        trace!("chroot into {}", root.display());
        chroot(root)
            .context(format!("chroot to {} failed", root.display()))?;
        chdir("/").context("chdir to / failed")?;
        Ok(InitSequence {
            _stage: RootChanged(()),
        })
    }
}

impl InitSequence<RootChanged> {
    /// Take over the PTY slave as our stdio and controlling terminal.
    pub fn attach_pty(
        self,
        pty: ChildPty,
    ) -> Result<InitSequence<PtyAttached>> {
        pty.attach()?;
        Ok(InitSequence {
            _stage: PtyAttached(()),
        })
    }
}

impl InitSequence<PtyAttached> {
    /// Harden and become the target command. Only returns on failure.
    pub fn exec(
        self,
        command: &str,
        args: &[String],
    ) -> Result<Infallible> {
        namespaces::set_no_new_privs()?;

        let command_cstr = CString::new(command)
            .context("command contains an interior NUL byte")?;
        let args_cstr: Vec<CString> = args
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<_, _>>()
            .context("argument contains an interior NUL byte")?;
        // The caller's environment, passed through verbatim.
        let environment: Vec<CString> = std::env::vars()
            .map(|(key, value)| CString::new(format!("{}={}", key, value)))
            .collect::<Result<_, _>>()
            .context("environment contains an interior NUL byte")?;

        let argv: Vec<&CStr> = std::iter::once(command_cstr.as_c_str())
            .chain(args_cstr.iter().map(|arg| arg.as_c_str()))
            .collect();
        let envp: Vec<&CStr> =
            environment.iter().map(|var| var.as_c_str()).collect();

        // Never returns on success.
        let Err(e) = execvpe(&command_cstr, &argv, &envp);
        Err(e).context(format!("failed to execute {}", command))
    }
}
