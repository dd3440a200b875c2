//! Configuration types for sign-batch
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Input directory enumeration

use crate::error::{BatchError, ConfigError};
use crate::signer::command::{CommandSigner, DEFAULT_AUTH_EXIT_CODE};
use crate::transfer::{BatchSettings, TransferOptions, WorkItem};
use clap::Parser;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum reasonable thread count
const MAX_THREADS: usize = 512;

/// Default thread count
const DEFAULT_THREADS: usize = 1;

/// Sign every file in a directory through an external signer
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sign-batch",
    version,
    about = "Sign every file in a directory through an external signer",
    long_about = "Sends each file in the input directory to a signer program and writes the \
                  signed result to the output directory, using a pool of worker threads.\n\n\
                  The signer program reads the document on stdin and writes the signed \
                  document on stdout. Credentials arrive in SIGN_BATCH_USERNAME and \
                  SIGN_BATCH_PASSWORD, request context in SIGN_BATCH_CTX_<KEY>.\n\n\
                  Exit status 0 means all files were signed, 2 means at least one file \
                  failed, 3 means the batch was aborted.",
    after_help = "EXAMPLES:\n    \
        sign-batch --indir ./input --outdir ./output --signer-command ./sign.sh\n    \
        sign-batch --indir ./input --outdir ./output -t 5 --one-first --remove-from-indir \\\n        \
            --username alice --signer-command curl-sign --signer-arg --worker --signer-arg PDFSigner\n    \
        sign-batch --indir ./input --outdir ./output --metadata profile=qualified --exclude '\\.tmp$' \\\n        \
            --signer-command ./sign.sh"
)]
pub struct CliArgs {
    /// Directory with the files to sign
    #[arg(long, value_name = "DIR")]
    pub indir: PathBuf,

    /// Directory to write signed files to
    #[arg(long, value_name = "DIR")]
    pub outdir: PathBuf,

    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = DEFAULT_THREADS, value_name = "NUM")]
    pub threads: usize,

    /// Send one request first and wait for it to succeed before starting the rest
    #[arg(long)]
    pub one_first: bool,

    /// Remove each input file once it was signed
    #[arg(long)]
    pub remove_from_indir: bool,

    /// Username for the signing service
    #[arg(short = 'u', long, value_name = "NAME")]
    pub username: Option<String>,

    /// Password (prompted for when a username is given without one)
    #[arg(long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Request metadata passed to the signer (can be repeated)
    #[arg(long = "metadata", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub metadata: Vec<String>,

    /// Skip input files whose name matches pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Signer program to run for each file
    #[arg(long, value_name = "PROGRAM")]
    pub signer_command: String,

    /// Argument for the signer program (can be repeated)
    #[arg(
        long = "signer-arg",
        value_name = "ARG",
        action = clap::ArgAction::Append,
        allow_hyphen_values = true
    )]
    pub signer_args: Vec<String>,

    /// Signer exit status meaning the credentials were rejected
    #[arg(long, default_value_t = DEFAULT_AUTH_EXIT_CODE, value_name = "CODE")]
    pub auth_exit_code: i32,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Input directory
    pub input_dir: PathBuf,

    /// Output directory
    pub output_dir: PathBuf,

    /// Number of worker threads (before capping at the file count)
    pub thread_count: usize,

    /// Start in probe mode
    pub one_first: bool,

    /// Remove inputs after signing
    pub remove_source: bool,

    /// Username, if any
    pub username: Option<String>,

    /// Password, if given on the command line
    pub password: Option<String>,

    /// Parsed metadata
    pub metadata: BTreeMap<String, String>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Signer program
    pub signer_program: String,

    /// Signer program arguments
    pub signer_args: Vec<String>,

    /// Signer exit status for rejected credentials
    pub auth_exit_code: i32,

    /// Show progress indicator
    pub show_progress: bool,
}

impl BatchConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if !args.indir.is_dir() {
            return Err(ConfigError::InvalidInputDir {
                path: args.indir.clone(),
                reason: "not an existing directory".into(),
            });
        }

        if !args.outdir.is_dir() {
            return Err(ConfigError::InvalidOutputDir {
                path: args.outdir.clone(),
                reason: "not an existing directory".into(),
            });
        }

        if same_directory(&args.indir, &args.outdir) {
            return Err(ConfigError::SameDirectory {
                path: args.indir.clone(),
            });
        }

        if args.threads == 0 || args.threads > MAX_THREADS {
            return Err(ConfigError::InvalidThreadCount {
                count: args.threads,
                max: MAX_THREADS,
            });
        }

        let metadata = parse_metadata(&args.metadata)?;

        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            input_dir: args.indir,
            output_dir: args.outdir,
            thread_count: args.threads,
            one_first: args.one_first,
            remove_source: args.remove_from_indir,
            username: args.username,
            password: args.password,
            metadata,
            exclude_patterns,
            signer_program: args.signer_command,
            signer_args: args.signer_args,
            auth_exit_code: args.auth_exit_code,
            show_progress: !args.quiet,
        })
    }

    /// Check if a file name should be skipped
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude_patterns.iter().any(|re| re.is_match(name))
    }

    /// List the regular files to sign, sorted by name
    pub fn collect_items(&self) -> Result<Vec<WorkItem>, BatchError> {
        let mut paths = Vec::new();

        for entry in fs::read_dir(&self.input_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = entry.file_name();
            if self.is_excluded(&name.to_string_lossy()) {
                continue;
            }

            paths.push(entry.path());
        }

        if paths.is_empty() {
            return Err(ConfigError::NoInputFiles {
                path: self.input_dir.clone(),
            }
            .into());
        }

        paths.sort();
        Ok(paths.into_iter().map(WorkItem::new).collect())
    }

    /// Settings for the batch runner
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            threads: self.thread_count,
            one_first: self.one_first,
            options: TransferOptions {
                output_dir: self.output_dir.clone(),
                remove_source: self.remove_source,
                metadata: self.metadata.clone(),
            },
        }
    }

    /// Signer described by the configuration
    pub fn signer(&self) -> CommandSigner {
        CommandSigner::new(self.signer_program.clone(), self.signer_args.clone())
            .auth_exit_code(self.auth_exit_code)
    }
}

/// Parse KEY=VALUE metadata entries
fn parse_metadata(entries: &[String]) -> Result<BTreeMap<String, String>, ConfigError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ConfigError::InvalidMetadata {
                entry: entry.clone(),
            }),
        })
        .collect()
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
