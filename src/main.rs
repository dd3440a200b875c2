//! sign-batch - Batch Document Signing Client
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use sign_batch::config::{BatchConfig, CliArgs};
use sign_batch::credentials::{ConsolePrompt, Credentials, PasswordPrompt};
use sign_batch::progress::{print_header, print_summary, ProgressReporter};
use sign_batch::transfer::{worker_count, BatchRunner, BatchVerdict};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(verdict) => verdict.exit_code(),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<BatchVerdict> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = BatchConfig::from_args(args).context("Invalid configuration")?;

    let items = config
        .collect_items()
        .context("Failed to list input files")?;

    let credentials = initial_credentials(&config)?;

    if config.show_progress {
        print_header(
            &config.input_dir.display().to_string(),
            &config.output_dir.display().to_string(),
            worker_count(config.thread_count, items.len()),
            items.len(),
            config.one_first,
        );
    }

    let progress = if config.show_progress {
        Some(ProgressReporter::new(items.len() as u64))
    } else {
        None
    };

    let prompt: Arc<dyn PasswordPrompt> = match &progress {
        Some(p) => Arc::new(p.suspending(ConsolePrompt)),
        None => Arc::new(ConsolePrompt),
    };

    let runner = BatchRunner::new(
        items,
        credentials,
        config.batch_settings(),
        Arc::new(config.signer()),
        prompt,
    );

    // Setup signal handler for cooperative abort
    let coordinator = runner.coordinator();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, aborting batch...");
        coordinator.abort();
    })
    .context("Failed to set signal handler")?;

    if let Some(ref p) = progress {
        if config.one_first {
            p.set_status("Waiting for first request...");
        }
    }

    // Run the batch
    let result = runner
        .run_with(|event| {
            if let Some(ref p) = progress {
                p.update(event);
            }
        })
        .context("Batch failed")?;

    if let Some(ref p) = progress {
        p.finish(&result.verdict.to_string());
    }

    if config.show_progress {
        print_summary(&result, &config.output_dir.display().to_string());
    }

    match result.verdict {
        BatchVerdict::Completed => info!(signed = result.signed, "Batch completed"),
        BatchVerdict::PartialFailure => warn!(failed = result.failed, "At least one file failed"),
        BatchVerdict::Aborted => error!(remaining = result.remaining, "Aborted due to failure"),
    }

    Ok(result.verdict)
}

/// Credentials from the command line, prompting for a missing password
fn initial_credentials(config: &BatchConfig) -> Result<Credentials> {
    let Some(username) = config.username.clone() else {
        return Ok(Credentials::default());
    };

    let password = match &config.password {
        Some(password) => password.clone(),
        None => ConsolePrompt
            .initial_password(&username)
            .context("Failed to read password")?,
    };

    Ok(Credentials::new(username, password))
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("sign_batch=debug,warn")
    } else {
        EnvFilter::new("sign_batch=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(verbose)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
