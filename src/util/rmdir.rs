use anyhow::{Context, Result, anyhow};
use std::path::Path;
use walkdir::WalkDir;

/**
 * Delete a directory tree. Symlinks are not followed, and the walk refuses
 * to cross onto a different device so a mount point that slipped inside the
 * tree (or a tree that is itself still a mount) is never deleted through.
 */
pub fn rmdir_recursive(path: &Path) -> Result<()> {
    let root_device = nix::sys::stat::lstat(path)
        .context(format!("Failed to stat {}", path.display()))?
        .st_dev;

    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry?;
        let entry_device = nix::sys::stat::lstat(entry.path())
            .context(format!("Failed to stat {}", entry.path().display()))?
            .st_dev;
        if entry_device != root_device {
            return Err(anyhow!(
                "Cannot remove {}: entry is on a different device",
                entry.path().display()
            ));
        }

        if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path()).context(format!(
                "Failed to remove directory {}",
                entry.path().display()
            ))?;
        } else {
            std::fs::remove_file(entry.path()).context(format!(
                "Failed to remove {}",
                entry.path().display()
            ))?;
        }
    }

    Ok(())
}
