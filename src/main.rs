use std::fs::OpenOptions;
use std::process;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use log::{error, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config as LogConfig, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use rs_salvage::bundle;
use rs_salvage::cli::Args;
use rs_salvage::config::{find_config, Config};
use rs_salvage::constants::LOG_FILE_NAME;
use rs_salvage::exec;
use rs_salvage::orchestrator::{self, validate_for_run, RunOptions};
use rs_salvage::utils::ensure_dir;

fn main() {
    process::exit(run());
}

// Exit codes: 0 all ok, 1 volume failures, 2 orchestrator-level error,
// 3 invalid invocation.
fn run() -> i32 {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let help = matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion);
            let _ = e.print();
            return if help { 0 } else { 3 };
        }
    };
    if let Err(message) = args.validate() {
        eprintln!("{message}");
        return 3;
    }

    let opts = RunOptions {
        list_only: args.list,
        dry_run: args.dry_run,
        workers_override: args.workers,
        only: args.only_set(),
    };

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return 2;
        }
    };
    config
        .discovery
        .avoid_devices
        .extend(args.exclude_devices());

    if let Err(e) = validate_for_run(&config, &opts) {
        eprintln!("{e:#}");
        return 2;
    }
    // mounting block devices and reading them is root-only work
    if !opts.list_only && !opts.dry_run && unsafe { libc::geteuid() } != 0 {
        eprintln!("rs-salvage must run as root (sudo) to mount block devices read-only");
        return 2;
    }

    if let Err(e) = initialize_logging(args.verbose, &config, &opts) {
        eprintln!("{e:#}");
        return 2;
    }
    bundle::prepend_bin_to_path();
    exec::install_signal_handlers();

    match orchestrator::run(&config, &opts) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            2
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let path = find_config(args.config.as_deref())?;
    Config::load(&path)
}

/// Terminal logger always; a file logger in the run summary directory for
/// real runs.
fn initialize_logging(verbose: bool, config: &Config, opts: &RunOptions) -> Result<()> {
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if !opts.list_only && !opts.dry_run {
        ensure_dir(&config.output.run_summary_dir)?;
        let log_path = config.output.run_summary_dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .context(format!("Failed to open log file {}", log_path.display()))?;
        let file_level: LevelFilter = config
            .runtime
            .log_level
            .parse()
            .unwrap_or(LevelFilter::Info);
        loggers.push(WriteLogger::new(file_level, LogConfig::default(), file));
    }

    CombinedLogger::init(loggers).context("Failed to initialize logger")?;
    Ok(())
}
