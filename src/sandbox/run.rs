use super::init::InitSequence;
use super::mounts;
use super::namespaces;
use super::overlay::OverlayMount;
use super::pty::{ChildPty, ParentPty, PtySession};
use super::request::{RootMode, SandboxRequest};
use crate::config::Config;
use crate::logger;
use crate::types::Identity;
use anyhow::{Context, Result};
use log::{error, trace, warn};
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use std::convert::Infallible;
use std::path::{Path, PathBuf};

/// One sandbox run: builds the isolated context, forks, supervises.
pub struct Sandbox {
    request: SandboxRequest,
    config: Config,
}

impl Sandbox {
    pub fn new(request: SandboxRequest, config: Config) -> Self {
        Self { request, config }
    }

    /**
     * Run the sandboxed command to completion and return the exit code this
     * process should finish with. The ordering here is load-bearing: the
     * caller's identity and terminal state are captured first, the PTY pair
     * exists before any namespace transition, the user namespace mapping is
     * written before the mount/PID/UTS unshare, mounts are private before
     * the overlay appears, and the overlay outlives the child so teardown
     * can run after `wait`.
     */
    pub fn run(self) -> Result<i32> {
        let identity = Identity::capture();

        let pty =
            PtySession::open().context("failed to create pty pair")?;

        namespaces::enter_user_namespace(&identity)
            .context("failed to create user namespace")?;
        namespaces::unshare_isolation();
        namespaces::set_uts_names(&self.uts_hostname(), &self.uts_domainname());

        // Both the overlay and the child's bind mounts must not propagate
        // back to the host, so the tree turns private before either exists.
        mounts::make_mount_private();

        let overlay = match self.request.mode {
            RootMode::OverlayRoot => Some(
                OverlayMount::setup(
                    &self.request.root_source,
                    self.request.persist_dir.as_deref(),
                    &self.config.scratch_dir,
                )
                .context("failed to set up overlay root")?,
            ),
            RootMode::DirectRoot => None,
        };
        // Fixed before the fork so supervisor and init agree on it.
        let root: PathBuf = match &overlay {
            Some(overlay) => overlay.merged().to_path_buf(),
            None => self.request.root_source.clone(),
        };

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                Ok(self.supervise(child, pty.into_parent(), overlay))
            }
            Ok(ForkResult::Child) => {
                let e = match self.sandbox_init(&root, pty.into_child()) {
                    Err(e) => e,
                    Ok(never) => match never {},
                };
                // The supervisor sees this as an abnormal/nonzero exit and
                // still runs its cleanup.
                error!("failed to start sandboxed command: {:#}", e);
                std::process::exit(1);
            }
            Err(e) => {
                if let Some(overlay) = &overlay {
                    OverlayMount::cleanup(overlay.merged());
                }
                Err(e).context("fork failed")
            }
        }
    }

    /**
     * Supervisor path: drive the relay until one side closes, reap the
     * child, then put the world back: terminal first, overlay last. Every
     * teardown step is best-effort -- by now the exit code is decided and
     * the caller must get their shell back.
     */
    fn supervise(
        &self,
        child: Pid,
        pty: ParentPty,
        overlay: Option<OverlayMount>,
    ) -> i32 {
        pty.set_raw();
        pty.relay();

        let exit_code = wait_for_exit(child);
        pty.restore();

        if let Some(overlay) = &overlay {
            OverlayMount::cleanup(overlay.merged());
        }

        exit_code
    }

    /**
     * Sandbox-init path, runs as PID 1 of the new PID namespace. Populates
     * the root, confines itself, and becomes the target command. Errors
     * propagate to `run`, which exits 1.
     */
    fn sandbox_init(
        &self,
        root: &Path,
        pty: ChildPty,
    ) -> Result<Infallible> {
        // The relay side may already hold the terminal in raw mode.
        logger::set_crlf_output(true);

        namespaces::set_parent_death_signal();

        mounts::setup_base_mounts(root)?;

        trace!(
            "executing {} {}",
            self.request.command,
            self.request.command_args.join(" ")
        );
        InitSequence::new()
            .enter_root(root)?
            .attach_pty(pty)?
            .exec(&self.request.command, &self.request.command_args)
    }

    fn uts_hostname(&self) -> String {
        self.config
            .hostname
            .clone()
            .unwrap_or_else(|| self.request.mode.default_uts_name().to_string())
    }

    fn uts_domainname(&self) -> String {
        self.config
            .domainname
            .clone()
            .unwrap_or_else(|| self.uts_hostname())
    }
}

/* Block until the child is gone. Interrupted waits are retried; the exit
 * code mirrors the child's for a normal exit and is 1 for anything else
 * (signal, wait failure). */
fn wait_for_exit(child: Pid) -> i32 {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, exit_code)) => return exit_code,
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                warn!("sandboxed command was killed by {}", signal);
                return 1;
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!("failed to wait for sandboxed command: {}", e);
                return 1;
            }
        }
    }
}
