use crate::util::{
    check_path_for_mount_option_compatibility, check_path_length, mkdir_p,
    mount, rmdir_recursive,
};
use anyhow::{Context, Result};
use log::{debug, warn};
use nix::mount::{MntFlags, MsFlags, umount2};
use std::fs;
use std::path::{Path, PathBuf};

/// Fixed name of the record written inside the merged directory. It is the
/// only thing a later cleanup call (which receives just the merged path,
/// possibly in a different process) has to go on when deciding which
/// directories to remove.
pub const METADATA_FILE: &str = ".isobox-meta";

/// Who owns the writable upper layer. Ephemeral uppers are ours to delete
/// on teardown; persistent ones belong to the caller and must survive the
/// run no matter what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpperDir {
    Ephemeral(PathBuf),
    Persistent(PathBuf),
}

impl UpperDir {
    fn path(&self) -> &Path {
        match self {
            UpperDir::Ephemeral(path) => path,
            UpperDir::Persistent(path) => path,
        }
    }
}

/// A mounted overlay root. Exists only in the mounted state: `setup` either
/// returns a fully constructed mount or rolls back everything it created.
#[derive(Debug)]
pub struct OverlayMount {
    merged: PathBuf,
    work: PathBuf,
    upper: UpperDir,
}

impl OverlayMount {
    /**
     * Build the union root: allocate merged/work (and, without a persist
     * directory, a fresh upper) under `scratch_dir`, mount the overlay with
     * `image` as the read-only lower layer, and record the teardown paths
     * inside the mount. Directory names carry our pid and a timestamp;
     * that is collision avoidance between concurrent runs, nothing more.
     */
    pub fn setup(
        image: &Path,
        persist_dir: Option<&Path>,
        scratch_dir: &Path,
    ) -> Result<Self> {
        check_path_for_mount_option_compatibility(image)?;
        if let Some(persist_dir) = persist_dir {
            check_path_for_mount_option_compatibility(persist_dir)?;
        }

        let stem = format!(
            "isobox-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        );
        let merged = scratch_dir.join(format!("{}-merged", stem));
        let work = scratch_dir.join(format!("{}-work", stem));
        check_path_length(&merged)?;
        check_path_length(&work)?;
        check_path_for_mount_option_compatibility(&work)?;

        // Everything created by this call, in order, so any later failure
        // can unwind without leaving a partially built overlay behind.
        let mut created: Vec<PathBuf> = Vec::new();

        fs::create_dir(&merged).context(format!(
            "failed to create merged directory {}",
            merged.display()
        ))?;
        created.push(merged.clone());

        if let Err(e) = fs::create_dir(&work) {
            rollback(&created);
            return Err(e).context(format!(
                "failed to create work directory {}",
                work.display()
            ));
        }
        created.push(work.clone());

        let upper = match persist_dir {
            Some(persist_dir) => {
                // Caller-owned: create it if this is the first run, reuse
                // verbatim otherwise. Never added to `created`.
                if let Err(e) = mkdir_p(persist_dir) {
                    rollback(&created);
                    return Err(e).context(format!(
                        "failed to create persistence directory {}",
                        persist_dir.display()
                    ));
                }
                debug!("mounting overlay (persistent) at {}", merged.display());
                UpperDir::Persistent(persist_dir.to_path_buf())
            }
            None => {
                let upper = scratch_dir.join(format!("{}-upper", stem));
                if let Err(e) = check_path_length(&upper)
                    .and_then(|_| {
                        fs::create_dir(&upper).map_err(anyhow::Error::from)
                    })
                {
                    rollback(&created);
                    return Err(e).context(format!(
                        "failed to create upper directory {}",
                        upper.display()
                    ));
                }
                created.push(upper.clone());
                debug!("mounting overlay (ephemeral) at {}", merged.display());
                UpperDir::Ephemeral(upper)
            }
        };

        let options = format!(
            "lowerdir={},upperdir={},workdir={}",
            image.display(),
            upper.path().display(),
            work.display()
        );
        if let Err(e) = mount(
            Some("overlay"),
            &merged,
            Some("overlay"),
            MsFlags::empty(),
            Some(options),
        ) {
            rollback(&created);
            return Err(e).context("failed to mount overlay");
        }

        let overlay = Self {
            merged,
            work,
            upper,
        };
        overlay.write_metadata();
        Ok(overlay)
    }

    pub fn merged(&self) -> &Path {
        &self.merged
    }

    /**
     * Tear down an overlay previously built by `setup`, given only its
     * merged path. Runs after the sandboxed process has been waited on, so
     * nothing inside can still be using the directories; the unmount is
     * still lazy so descriptors held by the relay or a slow-exiting
     * process tree cannot wedge teardown. Everything here is best-effort:
     * the command's exit status is already decided, and failing to hand
     * control back to the caller over a cleanup problem would be worse
     * than leaking a directory.
     */
    pub fn cleanup(merged: &Path) {
        let metadata = match fs::read_to_string(merged.join(METADATA_FILE)) {
            Ok(contents) => parse_metadata(&contents),
            Err(e) => {
                warn!(
                    "failed to read overlay metadata in {}: {}",
                    merged.display(),
                    e
                );
                Metadata::default()
            }
        };

        if let Err(e) = umount2(merged, MntFlags::MNT_DETACH) {
            warn!("failed to unmount overlay {}: {}", merged.display(), e);
        }

        // UPPERDIR is only ever recorded for ephemeral uppers, so a
        // caller-owned persistence directory cannot be deleted here.
        if let Some(upper) = &metadata.upper_dir {
            if let Err(e) = rmdir_recursive(upper) {
                warn!(
                    "failed to remove upper directory {}: {:#}",
                    upper.display(),
                    e
                );
            }
        }
        if let Some(work) = &metadata.work_dir {
            if let Err(e) = rmdir_recursive(work) {
                warn!(
                    "failed to remove work directory {}: {:#}",
                    work.display(),
                    e
                );
            }
        }

        if let Err(e) = fs::remove_dir(merged) {
            warn!(
                "failed to remove merged directory {}: {}",
                merged.display(),
                e
            );
        }
    }

    /* The record lands in the upper layer, so for persistent uppers it also
     * survives across runs; it only ever names directories we own. A failed
     * write degrades teardown, not the run itself. */
    fn write_metadata(&self) {
        let mut record = format!("WORKDIR={}\n", self.work.display());
        if let UpperDir::Ephemeral(upper) = &self.upper {
            record.push_str(&format!("UPPERDIR={}\n", upper.display()));
        }
        if let Err(e) =
            fs::write(self.merged.join(METADATA_FILE), record)
        {
            warn!(
                "failed to write overlay metadata in {}: {}",
                self.merged.display(),
                e
            );
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Metadata {
    work_dir: Option<PathBuf>,
    upper_dir: Option<PathBuf>,
}

fn parse_metadata(contents: &str) -> Metadata {
    let mut metadata = Metadata::default();
    for line in contents.lines() {
        if let Some(work) = line.strip_prefix("WORKDIR=") {
            metadata.work_dir = Some(PathBuf::from(work));
        } else if let Some(upper) = line.strip_prefix("UPPERDIR=") {
            metadata.upper_dir = Some(PathBuf::from(upper));
        }
    }
    metadata
}

/* Undo a partial setup, newest directory first. */
fn rollback(created: &[PathBuf]) {
    for dir in created.iter().rev() {
        if let Err(e) = fs::remove_dir(dir) {
            warn!("failed to roll back {}: {}", dir.display(), e);
        }
    }
}
