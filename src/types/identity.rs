use nix::unistd::{Gid, Uid, getgid, getuid};

/// The caller's real uid/gid, captured before any namespace transition.
/// These are the values the single-line uid/gid maps of the new user
/// namespace point back at.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub uid: Uid,
    pub gid: Gid,
}

impl Identity {
    pub fn capture() -> Self {
        Self {
            uid: getuid(),
            gid: getgid(),
        }
    }
}
