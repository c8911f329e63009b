use anyhow::{Result, anyhow};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/* Reject constructed paths that could not be handed to the kernel anyway.
 * The C library needs room for the trailing NUL, hence >=. */
pub fn check_path_length(path: &Path) -> Result<()> {
    if path.as_os_str().as_bytes().len() >= libc::PATH_MAX as usize {
        return Err(anyhow!(
            "Path too long ({} bytes, limit {})",
            path.as_os_str().as_bytes().len(),
            libc::PATH_MAX
        ));
    }
    Ok(())
}
