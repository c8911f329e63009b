mod fixtures;

use anyhow::Result;
use fixtures::*;
use rstest::*;

#[rstest]
fn test_ephemeral_overlay_is_fully_cleaned_up(
    mut harness: BoxHarness,
) -> Result<()> {
    if !overlay_supported() {
        skip(
            "test_ephemeral_overlay_is_fully_cleaned_up",
            "overlay mounts unavailable",
        );
        return Ok(());
    }

    let scratch = harness.fresh_dir("scratch");
    let scratch_env = scratch.to_string_lossy().to_string();

    // Scribble over the (overlayed) root; the write lands in the ephemeral
    // upper layer and must evaporate with it.
    assert_eq!(
        harness.run(
            true,
            &["/", "--", "/bin/sh", "-c", "echo scribble > /scribble"],
            &[("ISOBOX_SCRATCH_DIR", scratch_env.as_str())],
        )?,
        0
    );

    assert!(
        BoxHarness::entries(&scratch).is_empty(),
        "merged/work/upper must all be removed: {:?}",
        BoxHarness::entries(&scratch)
    );
    Ok(())
}

#[rstest]
fn test_overlay_exit_code_is_propagated(mut harness: BoxHarness) -> Result<()> {
    if !overlay_supported() {
        skip(
            "test_overlay_exit_code_is_propagated",
            "overlay mounts unavailable",
        );
        return Ok(());
    }

    let scratch = harness.fresh_dir("scratch");
    let scratch_env = scratch.to_string_lossy().to_string();
    assert_eq!(
        harness.run(
            true,
            &["/", "--", "/bin/sh", "-c", "exit 41"],
            &[("ISOBOX_SCRATCH_DIR", scratch_env.as_str())],
        )?,
        41
    );
    Ok(())
}

#[rstest]
fn test_lower_image_is_never_modified(mut harness: BoxHarness) -> Result<()> {
    if !overlay_supported() {
        skip(
            "test_lower_image_is_never_modified",
            "overlay mounts unavailable",
        );
        return Ok(());
    }

    let scratch = harness.fresh_dir("scratch");
    let scratch_env = scratch.to_string_lossy().to_string();
    let probe = format!("isobox-lower-probe-{}", rid());

    // Writes into the union land in the upper layer only; the host's /etc
    // (the lower layer here) must not gain the file.
    assert_eq!(
        harness.run(
            true,
            &[
                "/",
                "--",
                "/bin/sh",
                "-c",
                &format!("echo x > /etc/{}", probe)
            ],
            &[("ISOBOX_SCRATCH_DIR", scratch_env.as_str())],
        )?,
        0
    );
    assert!(!std::path::Path::new("/etc").join(&probe).exists());
    Ok(())
}

#[rstest]
fn test_persistent_upper_carries_writes_across_runs(
    mut harness: BoxHarness,
) -> Result<()> {
    if !overlay_supported() {
        skip(
            "test_persistent_upper_carries_writes_across_runs",
            "overlay mounts unavailable",
        );
        return Ok(());
    }

    let scratch = harness.fresh_dir("scratch");
    let scratch_env = scratch.to_string_lossy().to_string();
    let persist = harness.base.join(format!("persist-{}", rid()));
    let persist_arg = persist.to_string_lossy().to_string();
    let marker = format!("marker-{}", rid());

    // First run: the persistence directory does not exist yet and is
    // created on demand; a write at / lands in it.
    assert_eq!(
        harness.run(
            true,
            &[
                "/",
                "-p",
                persist_arg.as_str(),
                "--",
                "/bin/sh",
                "-c",
                &format!("echo persisted > /{}", marker)
            ],
            &[("ISOBOX_SCRATCH_DIR", scratch_env.as_str())],
        )?,
        0
    );

    let on_host = persist.join(&marker);
    assert!(on_host.exists(), "write must survive in the upper layer");
    assert_eq!(std::fs::read_to_string(&on_host)?.trim(), "persisted");

    // Second run against the same directory: the file is part of the root.
    assert_eq!(
        harness.run(
            true,
            &[
                "/",
                "-p",
                persist_arg.as_str(),
                "--",
                "/bin/sh",
                "-c",
                &format!("test -f /{}", marker)
            ],
            &[("ISOBOX_SCRATCH_DIR", scratch_env.as_str())],
        )?,
        0
    );

    // Ephemeral state (merged/work) is still cleaned, the caller's upper
    // directory is still there.
    assert!(BoxHarness::entries(&scratch).is_empty());
    assert!(persist.exists());
    Ok(())
}
