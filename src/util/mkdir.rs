use anyhow::{Context, Result, anyhow};
use std::path::Path;

/* Idempotent `mkdir -p`. Errors if the path exists but is not a directory. */
pub fn mkdir_p(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(anyhow!(
                "Path {} already exists but is not a directory",
                path.display()
            ));
        }
        return Ok(());
    }

    std::fs::create_dir_all(path)
        .context(format!("Failed to create directory {}", path.display()))
}
