//! Progress reporting for batch signing
//!
//! Provides a live progress bar using indicatif and the final summary.

use crate::credentials::PasswordPrompt;
use crate::error::CredentialError;
use crate::transfer::{BatchResult, BatchVerdict, TransferEvent, TransferOutcome};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays batch status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter for `total` files
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Invalid progress template")
                .progress_chars("=> ")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the display for one attempt
    ///
    /// Rejected credentials do not advance the bar; the file is retried.
    pub fn update(&self, event: &TransferEvent) {
        let item = event.outcome.item();

        match &event.outcome {
            TransferOutcome::Signed { .. } => {
                self.bar.inc(1);
                self.bar.set_message(format!("signed {}", item.file_name()));
            }
            TransferOutcome::SourceKept { .. } => {
                self.bar.inc(1);
                self.bar
                    .set_message(format!("signed {}, input kept", item.file_name()));
            }
            TransferOutcome::Failed { .. } => {
                self.bar.inc(1);
                self.bar.set_message(format!("failed {}", item.file_name()));
            }
            TransferOutcome::AuthRejected { .. } => {
                self.bar
                    .set_message(format!("credentials rejected for {}", item.file_name()));
            }
        }
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Wrap a prompt so the bar is hidden while it reads from the terminal
    pub fn suspending<P: PasswordPrompt>(&self, inner: P) -> SuspendingPrompt<P> {
        SuspendingPrompt {
            bar: self.bar.clone(),
            inner,
        }
    }
}

/// Password prompt that pauses a progress bar while asking
pub struct SuspendingPrompt<P> {
    bar: ProgressBar,
    inner: P,
}

impl<P: PasswordPrompt> PasswordPrompt for SuspendingPrompt<P> {
    fn prompt_for_password(&self, username: &str) -> Result<String, CredentialError> {
        self.bar
            .suspend(|| self.inner.prompt_for_password(username))
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the batch
pub fn print_summary(result: &BatchResult, output_dir: &str) {
    let duration_secs = result.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        result.signed as f64 / duration_secs
    } else {
        0.0
    };

    let title = match result.verdict {
        BatchVerdict::Completed => style(result.verdict.to_string()).green().bold(),
        BatchVerdict::PartialFailure => style(result.verdict.to_string()).yellow().bold(),
        BatchVerdict::Aborted => style(result.verdict.to_string()).red().bold(),
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Signed:").bold(), format_number(result.signed));
    println!(
        "  {} {} in, {} out",
        style("Size:").bold(),
        format_size(result.bytes_in, BINARY),
        format_size(result.bytes_out, BINARY)
    );
    println!(
        "  {} {:.1}s ({:.1} files/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if result.failed > 0 {
        println!(
            "  {} {}",
            style("Failed:").yellow().bold(),
            format_number(result.failed)
        );
    }
    if result.retries > 0 {
        println!(
            "  {} {} ({} rejected)",
            style("Password retries:").yellow().bold(),
            result.retries,
            format_number(result.auth_rejected)
        );
    }
    if result.remaining > 0 {
        println!(
            "  {} {}",
            style("Not attempted:").red().bold(),
            format_number(result.remaining as u64)
        );
    }
    println!("  {} {}", style("Output:").bold(), output_dir);
    println!();
}

/// Print a header at the start of the batch
pub fn print_header(input: &str, output: &str, workers: usize, files: usize, one_first: bool) {
    println!();
    println!(
        "{} {}",
        style("sign-batch").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Input:").bold(), input);
    println!("  {} {}", style("Output:").bold(), output);
    println!("  {} {}", style("Files:").bold(), format_number(files as u64));
    println!("  {} {}", style("Workers:").bold(), workers);
    if one_first {
        println!("  {} one request first", style("Mode:").bold());
    }
    println!();
}
