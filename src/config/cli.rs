use crate::sandbox::RootMode;
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None,
    override_usage = "\n    isobox <ROOT_DIR> -- <COMMAND> [ARGS...]\n    isobox-ofs <IMAGE_DIR> [-p <PERSIST_DIR>] -- <COMMAND> [ARGS...]")]
pub struct Args {
    /// Set the log level to one of trace, debug, info, warn, or error.
    /// `-v` is shorthand for enabling verbose (trace) logging.
    #[arg(short = 'v',
        long,
        default_missing_value = "trace",
        num_args = 0..=1,
        require_equals = true,
        value_parser = parse_log_level
    )]
    pub log_level: Option<log::LevelFilter>,

    /// Do not load config files.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_config: bool,

    /// Reuse this directory as the overlay's writable upper layer so changes
    /// survive across runs. Only available under the overlay entry point.
    #[arg(
        short = 'p',
        long = "persist",
        value_name = "PERSIST_DIR",
        value_hint = clap::ValueHint::DirPath
    )]
    pub persist_dir: Option<PathBuf>,

    /// The directory to use as the sandbox root. Under the overlay entry
    /// point this is the read-only lower image instead.
    #[arg(value_name = "ROOT_DIR", value_hint = clap::ValueHint::DirPath)]
    pub root: PathBuf,

    /// The command to run inside the sandbox, separated from the options by
    /// a mandatory `--`.
    #[arg(
        last = true,
        required = true,
        num_args = 1..,
        value_name = "COMMAND",
        help_heading = "Sandboxed Command",
    )]
    pub command: Vec<String>,
}

/// Which entry point we were started through. `isobox-ofs` is a link to the
/// same binary, so this has to come from argv[0] rather than from clap.
pub fn invocation_mode() -> RootMode {
    let program = std::env::args().next().unwrap_or_default();
    let program = Path::new(&program)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    RootMode::from_program_name(&program)
}

fn parse_log_level(s: &str) -> Result<log::LevelFilter, String> {
    s.parse::<log::LevelFilter>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let args =
            Args::try_parse_from(["isobox", "/srv/root", "--", "sh"]).unwrap();
        assert_eq!(args.root, PathBuf::from("/srv/root"));
        assert_eq!(args.command, vec!["sh".to_string()]);
        assert!(args.persist_dir.is_none());
    }

    #[test]
    fn test_parse_command_args_may_contain_hyphens() {
        let args = Args::try_parse_from([
            "isobox", "/srv/root", "--", "ls", "-la", "--color",
        ])
        .unwrap();
        assert_eq!(args.command, vec!["ls", "-la", "--color"]);
    }

    #[test]
    fn test_parse_persist() {
        let args = Args::try_parse_from([
            "isobox-ofs",
            "/srv/image",
            "-p",
            "/srv/persist",
            "--",
            "sh",
        ])
        .unwrap();
        assert_eq!(args.persist_dir, Some(PathBuf::from("/srv/persist")));
    }

    #[test]
    fn test_missing_separator_is_an_error() {
        assert!(Args::try_parse_from(["isobox", "/srv/root", "sh"]).is_err());
    }

    #[test]
    fn test_missing_command_is_an_error() {
        assert!(Args::try_parse_from(["isobox", "/srv/root"]).is_err());
        assert!(Args::try_parse_from(["isobox", "/srv/root", "--"]).is_err());
        assert!(Args::try_parse_from(["isobox"]).is_err());
    }

    #[test]
    fn test_parse_log_level_values() {
        assert!(parse_log_level("debug").is_ok());
        assert!(parse_log_level("foobar").is_err());
    }
}
