mod app;
mod commands;
mod output;

use std::{
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Show unparanoid info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("unparanoid", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    // First Ctrl+C stops the run between files; a second one exits immediately
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nCancelled.");
            std::process::exit(130);
        }
        eprintln!("\nCancelling...");
    }) {
        log::warn!("failed to set Ctrl+C handler: {e}");
    }

    match run(&cli, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_cancelled(&e) || cancel.load(Ordering::SeqCst) => {
            eprintln!("Cancelled.");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, cancel: &Arc<AtomicBool>) -> anyhow::Result<()> {
    match &cli.command {
        Command::Deobfuscate {
            target,
            output,
            strict,
            prune,
            dry_run,
            threads,
            report,
            detailed,
        } => commands::deobfuscate::run(
            target,
            &commands::deobfuscate::DeobfuscateOptions {
                output: output.as_deref(),
                strict: *strict,
                prune: *prune,
                dry_run: *dry_run,
                threads: *threads,
                report: report.as_deref(),
                detailed: *detailed,
                global: &cli.global,
            },
            cancel,
        ),
        Command::ExtractChunks { target, output } => {
            commands::extract_chunks::run(target, output.as_deref(), &cli.global, cancel)
        }
        Command::ExtractStrings { target } => {
            commands::extract_strings::run(target, &cli.global, cancel)
        }
        Command::DeobfuscateString {
            key,
            chunks,
            chunks_file,
            table,
            scheme,
        } => commands::deobfuscate_string::run(
            key,
            chunks,
            chunks_file.as_deref(),
            table.as_deref(),
            scheme,
            &cli.global,
        ),
    }
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<unparanoid::Error>(),
        Some(unparanoid::Error::Cancelled)
    )
}
