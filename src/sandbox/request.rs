use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

/// How the sandbox root is materialized: chroot straight into the given
/// directory, or mount an overlay with the directory as the read-only lower
/// layer and chroot into the merged view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootMode {
    DirectRoot,
    OverlayRoot,
}

impl RootMode {
    /// The overlay-capable behavior is reached through a differently-named
    /// link to the same binary.
    pub fn from_program_name(program: &str) -> RootMode {
        if program.ends_with("-ofs") {
            RootMode::OverlayRoot
        } else {
            RootMode::DirectRoot
        }
    }

    /// Host and domain name given to the new UTS namespace unless the
    /// config overrides them.
    pub fn default_uts_name(&self) -> &'static str {
        match self {
            RootMode::DirectRoot => "isobox",
            RootMode::OverlayRoot => "isobox-ofs",
        }
    }
}

/// Everything one sandbox run needs, captured up front and read-only from
/// then on.
#[derive(Debug)]
pub struct SandboxRequest {
    /// Absolute path to the root directory (or the lower image in overlay
    /// mode).
    pub root_source: PathBuf,
    /// Caller-supplied upper layer, overlay mode only.
    pub persist_dir: Option<PathBuf>,
    pub command: String,
    pub command_args: Vec<String>,
    pub mode: RootMode,
}

impl SandboxRequest {
    pub fn new(
        mode: RootMode,
        root: &Path,
        persist_dir: Option<PathBuf>,
        command_line: Vec<String>,
    ) -> Result<Self> {
        // Resolve the root before any namespace or cwd transition so every
        // later step agrees on one absolute path.
        let root_source = root.canonicalize().context(format!(
            "failed to resolve root directory {}",
            root.display()
        ))?;
        if !root_source.is_dir() {
            return Err(anyhow!(
                "Root {} is not a directory",
                root_source.display()
            ));
        }

        let mut command_line = command_line;
        if command_line.is_empty() {
            return Err(anyhow!("No command specified"));
        }
        let command = command_line.remove(0);

        Ok(Self {
            root_source,
            persist_dir,
            command,
            command_args: command_line,
            mode,
        })
    }
}
