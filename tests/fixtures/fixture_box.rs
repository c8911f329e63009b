use anyhow::{Context, Result, anyhow};
use rand::Rng;
use rstest::*;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

#[allow(dead_code)]
pub fn rid() -> String {
    let mut rng = rand::rng();
    let rid: String = (0..10)
        .map(|_| rng.sample(rand::distr::Alphanumeric) as char)
        .collect();
    rid
}

/// Drives the compiled binary for integration tests. Owns a per-test
/// scratch area and an `isobox-ofs` link so the overlay entry point can be
/// exercised too.
pub struct BoxHarness {
    pub base: PathBuf,
    pub bin: PathBuf,
    pub ofs_bin: PathBuf,
    pub last_status: i32,
    pub last_stdout: String,
    pub last_stderr: String,
}

#[fixture]
pub fn harness() -> BoxHarness {
    BoxHarness::new()
}

impl BoxHarness {
    pub fn new() -> Self {
        let base = std::env::temp_dir().join(format!("isobox-it-{}", rid()));
        std::fs::create_dir_all(&base)
            .expect("Failed to create harness base dir");

        let bin = PathBuf::from(env!("CARGO_BIN_EXE_isobox"));
        // Overlay mode is selected via argv[0].
        let ofs_bin = base.join("isobox-ofs");
        std::os::unix::fs::symlink(&bin, &ofs_bin)
            .expect("Failed to create isobox-ofs link");

        Self {
            base,
            bin,
            ofs_bin,
            last_status: -1,
            last_stdout: String::new(),
            last_stderr: String::new(),
        }
    }

    /// A fresh empty directory under the harness base.
    #[allow(dead_code)]
    pub fn fresh_dir(&self, name: &str) -> PathBuf {
        let dir = self.base.join(format!("{}-{}", name, rid()));
        std::fs::create_dir_all(&dir).expect("Failed to create test dir");
        dir
    }

    #[allow(dead_code)]
    pub fn entries(dir: &PathBuf) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run one invocation to completion, capturing status and output. Test
    /// commands produce little output, so reading the pipes after exit is
    /// fine here.
    pub fn run(
        &mut self,
        overlay: bool,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<i32> {
        let program = if overlay { &self.ofs_bin } else { &self.bin };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in envs {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .context(format!("failed to spawn {}", program.display()))?;
        let status =
            wait_with_deadline(&mut child, Duration::from_secs(60))?;

        self.last_stdout.clear();
        self.last_stderr.clear();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut self.last_stdout);
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut self.last_stderr);
        }
        self.last_status = status;
        Ok(status)
    }
}

impl Drop for BoxHarness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.base);
    }
}

/// Whether this kernel/runtime allows us to build the sandbox at all
/// (unprivileged user namespaces are often disabled in CI containers).
/// Probed once per test binary.
#[allow(dead_code)]
pub fn userns_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| {
        let mut harness = BoxHarness::new();
        harness
            .run(false, &["/", "--", "/bin/sh", "-c", "true"], &[])
            .map(|status| status == 0)
            .unwrap_or(false)
    })
}

/// Whether an overlay with the host root as lower layer can be mounted on
/// top of everything `userns_supported` needs (fails inside containers
/// whose rootfs already sits at the kernel's overlay stacking limit).
#[allow(dead_code)]
pub fn overlay_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| {
        let mut harness = BoxHarness::new();
        let scratch = harness.fresh_dir("probe-scratch");
        let scratch_env = scratch.to_string_lossy().to_string();
        harness
            .run(
                true,
                &["/", "--", "/bin/sh", "-c", "true"],
                &[("ISOBOX_SCRATCH_DIR", scratch_env.as_str())],
            )
            .map(|status| status == 0)
            .unwrap_or(false)
    })
}

#[allow(dead_code)]
pub fn skip(test: &str, reason: &str) {
    eprintln!("skipping {}: {}", test, reason);
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<i32> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            // Abnormal termination surfaces as a None code; map it to 1
            // the same way the supervisor itself does.
            return Ok(status.code().unwrap_or(1));
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("sandbox invocation timed out"));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
