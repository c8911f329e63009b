#![allow(clippy::collapsible_else_if, clippy::collapsible_if)]
#![deny(
    clippy::get_unwrap,
    clippy::panic,
    clippy::print_stdout,
    clippy::unwrap_used,
    clippy::use_debug
)]

mod config;
mod logger;
mod sandbox;
mod types;
mod util;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap::Parser;
use clap_complete::CompleteEnv;
use config::{cli, resolve_config};
use log::{Log, error};
use sandbox::{RootMode, Sandbox, SandboxRequest};

fn main() {
    let logger = match logger::BoxLogger::new(log::LevelFilter::Info).init() {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("isobox: failed to initialize logger: {}", e);
            std::process::exit(1);
        }
    };

    // Tab completion support. This never returns if completion was requested.
    if std::env::var("COMPLETE").is_ok() {
        CompleteEnv::with_factory(cli::Args::command).complete();
        return;
    }

    // The overlay-capable behavior is selected by the name the binary was
    // invoked under (`isobox-ofs` is a link to the same executable), so the
    // mode has to be read off argv[0] before clap consumes the rest.
    let mode = cli::invocation_mode();
    let args = cli::Args::parse();

    match run(mode, args, logger) {
        // The supervisor reports the sandboxed command's exit code as our own.
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            logger.flush();
            std::process::exit(1);
        }
    }
}

fn run(
    mode: RootMode,
    args: cli::Args,
    logger: &'static logger::BoxLogger,
) -> Result<i32> {
    if let Some(log_level) = args.log_level {
        logger.set_level(log_level);
    }

    if mode == RootMode::DirectRoot && args.persist_dir.is_some() {
        // Usage error, reported the same way clap reports its own (exit 2).
        cli::Args::command()
            .error(
                clap::error::ErrorKind::ArgumentConflict,
                "-p/--persist is only available under the overlay entry point (isobox-ofs)",
            )
            .exit();
    }

    let config = resolve_config(&args).context("Resolving config")?;

    // A -v flag beats the config file.
    if args.log_level.is_none() {
        logger.set_level(config.log_level);
    }

    let request = SandboxRequest::new(
        mode,
        &args.root,
        args.persist_dir.clone(),
        args.command.clone(),
    )
    .context("Building sandbox request")?;

    Sandbox::new(request, config).run()
}
