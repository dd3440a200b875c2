//! sign-batch - Batch Document Signing Client
//!
//! Signs every file in a directory by handing it to a signer, using a pool
//! of worker threads, without locking the account when the password is
//! wrong.
//!
//! # Features
//!
//! - **Parallel Signing**: A fixed pool of worker threads shares one work
//!   queue.
//!
//! - **Probe Mode**: With `--one-first` a single request must succeed
//!   before the remaining workers are released, so bad credentials are
//!   rejected once rather than once per thread.
//!
//! - **Credential Recovery**: On an authentication rejection the user is
//!   asked for a new password (at most three times) and the file is
//!   retried first, again as a single probe.
//!
//! - **Distinct Outcomes**: Completed, partially failed and aborted batches
//!   map to different exit statuses.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Input Directory                        │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ collect_items
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    TransferCoordinator                        │
//! │   WorkQueue ─ GateState ─ OutcomeTracker ─ Credentials        │
//! └──────┬──────────────────┬──────────────────────┬─────────────┘
//!        │                  │                      │
//! ┌──────▼─────┐     ┌──────▼─────┐         ┌──────▼─────┐
//! │  Worker 0  │     │  Worker 1  │   ...   │  Worker N  │
//! │   Signer   │     │   Signer   │         │   Signer   │
//! └──────┬─────┘     └──────┬─────┘         └──────┬─────┘
//!        └──────────────────┼──────────────────────┘
//!                           ▼
//!               ┌──────────────────────┐
//!               │   Output Directory   │
//!               └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Five threads, probe first, remove signed inputs
//! sign-batch --indir ./input --outdir ./output -t 5 --one-first \
//!     --remove-from-indir --username alice --signer-command ./sign.sh
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod progress;
pub mod signer;
pub mod transfer;

pub use config::{BatchConfig, CliArgs};
pub use credentials::{ConsolePrompt, Credentials, PasswordPrompt};
pub use error::{BatchError, Result, SignError, TransferError};
pub use signer::{CommandSigner, RequestContext, Signer};
pub use transfer::{BatchResult, BatchRunner, BatchVerdict, TransferCoordinator, WorkItem};
