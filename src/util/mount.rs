use anyhow::{Context, Result, anyhow};
use nix::mount::MsFlags;
use std::ffi::{CStr, CString};
use std::path::Path;

/* Thin wrapper over mount(2) that accepts plain path/str arguments and
 * reports failures with the full set of arguments attached, so a warning
 * emitted halfway through sandbox construction tells the whole story. */
pub fn mount<S1, S2, S3, S4>(
    source: Option<S1>,
    target: S2,
    fstype: Option<S3>,
    flags: MsFlags,
    data: Option<S4>,
) -> Result<()>
where
    S1: AsRef<std::ffi::OsStr>,
    S2: AsRef<std::ffi::OsStr>,
    S3: AsRef<std::ffi::OsStr>,
    S4: AsRef<std::ffi::OsStr>,
{
    let source_cstr = match &source {
        Some(source) => {
            CString::new(source.as_ref().to_string_lossy().as_bytes())?
        }
        None => CString::new("")?,
    };
    let target_cstr =
        CString::new(target.as_ref().to_string_lossy().as_bytes())?;
    let fstype_cstr = match &fstype {
        Some(fstype) => {
            CString::new(fstype.as_ref().to_string_lossy().as_bytes())?
        }
        None => CString::new("")?,
    };
    let data_cstr = match &data {
        Some(data) => CString::new(data.as_ref().to_string_lossy().as_bytes())?,
        None => CString::new("")?,
    };

    let source = source.map(|_| source_cstr.as_c_str());
    let fstype = fstype.map(|_| fstype_cstr.as_c_str());
    let data = data.map(|_| data_cstr.as_c_str());

    let result = nix::mount::mount::<CStr, CStr, CStr, CStr>(
        source,
        target_cstr.as_c_str(),
        fstype,
        flags,
        data,
    );

    if let Err(e) = result {
        let err_context = format!(
            "failed to mount {} {} [type={}, flags={}, data={}]",
            source_cstr.to_string_lossy(),
            target_cstr.to_string_lossy(),
            fstype_cstr.to_string_lossy(),
            flags.bits(),
            data_cstr.to_string_lossy(),
        );

        // EINVAL from an overlay mount whose lower layer is itself an
        // overlay usually means the kernel's stacking limit was hit.
        if e == nix::errno::Errno::EINVAL
            && fstype_cstr.to_string_lossy() == "overlay"
        {
            return Err(anyhow!(
                "The kernel refused the overlay mount. If the lower directory \
                already lives on an overlay filesystem (e.g. inside a \
                container), the kernel's overlay stacking depth limit of two \
                levels may have been exceeded."
            ))
            .context(err_context);
        }

        return Err(e).context(err_context);
    }

    Ok(())
}

/**
 * Overlay mount options are a comma-separated string with no escaping, so a
 * layer path containing a comma (or other hostile characters) would silently
 * change the meaning of the options. Refuse such paths up front.
 */
pub fn check_path_for_mount_option_compatibility(path: &Path) -> Result<()> {
    if path.components().count() == 0 {
        return Err(anyhow!("Path {} is empty", path.display()));
    }

    path.components().try_for_each(|component| {
        let component_str = match component.as_os_str().to_str() {
            Some(s) => s,
            None => {
                return Err(anyhow!(
                    "Path {} contains invalid character",
                    path.display(),
                ));
            }
        };

        if !component_str.chars().all(|c| {
            c.is_alphanumeric()
                || c == '_'
                || c == '-'
                || c == '.'
                || c == '/'
                || c == '@'
                || c == '%'
        }) {
            Err(anyhow!(
                "Path {} contains invalid character {}",
                path.display(),
                component_str
            ))
        } else {
            Ok(())
        }
    })
}
