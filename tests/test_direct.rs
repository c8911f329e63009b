mod fixtures;

use anyhow::Result;
use fixtures::*;
use rstest::*;

#[rstest]
fn test_exit_code_is_propagated(mut harness: BoxHarness) -> Result<()> {
    if !userns_supported() {
        skip("test_exit_code_is_propagated", "user namespaces unavailable");
        return Ok(());
    }

    assert_eq!(
        harness.run(false, &["/", "--", "/bin/sh", "-c", "true"], &[])?,
        0
    );
    assert_eq!(
        harness.run(false, &["/", "--", "/bin/sh", "-c", "exit 7"], &[])?,
        7
    );
    Ok(())
}

#[rstest]
fn test_environment_is_inherited_verbatim(
    mut harness: BoxHarness,
) -> Result<()> {
    if !userns_supported() {
        skip(
            "test_environment_is_inherited_verbatim",
            "user namespaces unavailable",
        );
        return Ok(());
    }

    assert_eq!(
        harness.run(
            false,
            &[
                "/",
                "--",
                "/bin/sh",
                "-c",
                "test \"$ISOBOX_TEST_MARKER\" = carried-through"
            ],
            &[("ISOBOX_TEST_MARKER", "carried-through")],
        )?,
        0
    );
    Ok(())
}

#[rstest]
fn test_direct_mode_allocates_no_overlay_directories(
    mut harness: BoxHarness,
) -> Result<()> {
    let scratch = harness.fresh_dir("scratch");
    let scratch_env = scratch.to_string_lossy().to_string();

    // Regardless of whether the run itself succeeds on this kernel, direct
    // mode must never touch the overlay scratch space.
    let _ = harness.run(
        false,
        &["/", "--", "/bin/sh", "-c", "true"],
        &[("ISOBOX_SCRATCH_DIR", scratch_env.as_str())],
    )?;

    assert!(BoxHarness::entries(&scratch).is_empty());
    Ok(())
}

#[rstest]
fn test_sandbox_sees_fresh_tmp(mut harness: BoxHarness) -> Result<()> {
    if !userns_supported() {
        skip("test_sandbox_sees_fresh_tmp", "user namespaces unavailable");
        return Ok(());
    }

    // The host /tmp is busy; the sandbox gets an empty tmpfs instead.
    let marker = harness.base.join("tmp-marker");
    if !marker.starts_with("/tmp") {
        skip("test_sandbox_sees_fresh_tmp", "test tmpdir is not under /tmp");
        return Ok(());
    }
    std::fs::write(&marker, "visible-on-host")?;
    assert_eq!(
        harness.run(
            false,
            &[
                "/",
                "--",
                "/bin/sh",
                "-c",
                &format!("test ! -e {}", marker.display())
            ],
            &[],
        )?,
        0
    );
    Ok(())
}
