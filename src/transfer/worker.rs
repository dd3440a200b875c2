//! Worker thread logic for parallel signing
//!
//! Each worker:
//! - Asks the coordinator for the next file (may block on the probe gate)
//! - Reads the file and sends it to the signer with the current credentials
//! - Writes the signed output and optionally removes the source
//! - Reports exactly one outcome per attempt back to the coordinator
//!
//! Workers never retry an item themselves.

use super::coordinator::TransferCoordinator;
use super::queue::WorkItem;
use crate::credentials::Credentials;
use crate::error::{TransferError, WorkerError};
use crate::signer::{RequestContext, Signer, CONTEXT_FILENAME};
use crossbeam_channel::Sender;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Per-file settings shared by all workers
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Directory receiving signed files (same file name as the input)
    pub output_dir: PathBuf,

    /// Delete each input file after it was signed
    pub remove_source: bool,

    /// Extra request context passed to the signer
    pub metadata: BTreeMap<String, String>,
}

/// Result of one attempt at one file
#[derive(Debug)]
pub enum TransferOutcome {
    /// Signed and written
    Signed {
        item: WorkItem,
        bytes_in: u64,
        bytes_out: u64,
        elapsed: Duration,
    },

    /// Signed and written, but the input could not be removed
    SourceKept {
        item: WorkItem,
        bytes_in: u64,
        bytes_out: u64,
        error: TransferError,
    },

    /// Credentials rejected; the coordinator decides what happens next
    AuthRejected { item: WorkItem, error: TransferError },

    /// Any other failure
    Failed { item: WorkItem, error: TransferError },
}

impl TransferOutcome {
    pub fn item(&self) -> &WorkItem {
        match self {
            TransferOutcome::Signed { item, .. } => item,
            TransferOutcome::SourceKept { item, .. } => item,
            TransferOutcome::AuthRejected { item, .. } => item,
            TransferOutcome::Failed { item, .. } => item,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Signed { .. })
    }
}

/// Outcome tagged with the worker that produced it
#[derive(Debug)]
pub struct TransferEvent {
    pub worker: usize,
    pub outcome: TransferOutcome,
}

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Files signed
    pub signed: AtomicU64,

    /// Attempts that failed for non-authentication reasons
    pub failed: AtomicU64,

    /// Attempts rejected for bad credentials
    pub auth_rejected: AtomicU64,

    /// Input bytes of signed files
    pub bytes_in: AtomicU64,

    /// Output bytes written
    pub bytes_out: AtomicU64,
}

impl WorkerStats {
    fn record(&self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Signed {
                bytes_in, bytes_out, ..
            } => {
                self.signed.fetch_add(1, Ordering::Relaxed);
                self.bytes_in.fetch_add(*bytes_in, Ordering::Relaxed);
                self.bytes_out.fetch_add(*bytes_out, Ordering::Relaxed);
            }
            TransferOutcome::SourceKept {
                bytes_in, bytes_out, ..
            } => {
                self.signed.fetch_add(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.bytes_in.fetch_add(*bytes_in, Ordering::Relaxed);
                self.bytes_out.fetch_add(*bytes_out, Ordering::Relaxed);
            }
            TransferOutcome::AuthRejected { .. } => {
                self.auth_rejected.fetch_add(1, Ordering::Relaxed);
            }
            TransferOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Summed statistics over all workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferTotals {
    pub signed: u64,
    pub failed: u64,
    pub auth_rejected: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// A worker thread that signs files
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<()>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        coordinator: Arc<TransferCoordinator>,
        signer: Arc<dyn Signer>,
        options: Arc<TransferOptions>,
        events: Option<Sender<TransferEvent>>,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("transfer-{}", id))
            .spawn(move || worker_loop(id, coordinator, signer, options, events, stats_clone))
            .map_err(|e| WorkerError::SpawnFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| WorkerError::Panicked {
                id: self.id,
                message: "Worker thread panicked".into(),
            })
        } else {
            Ok(())
        }
    }
}

/// Aborts the batch if the worker unwinds, so nobody waits on a dead probe
struct AbortOnPanic<'a>(&'a TransferCoordinator);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    coordinator: Arc<TransferCoordinator>,
    signer: Arc<dyn Signer>,
    options: Arc<TransferOptions>,
    events: Option<Sender<TransferEvent>>,
    stats: Arc<WorkerStats>,
) {
    trace!(worker = id, "Worker starting");
    let _guard = AbortOnPanic(&coordinator);

    while let Some(item) = coordinator.next_item() {
        info!(worker = id, file = %item, "Sending");

        let credentials = coordinator.credentials();
        let outcome = transfer_item(&item, signer.as_ref(), &options, &credentials);

        match &outcome {
            TransferOutcome::Signed {
                bytes_out, elapsed, ..
            } => {
                info!(
                    worker = id,
                    file = %item,
                    bytes = bytes_out,
                    millis = elapsed.as_millis() as u64,
                    "Signed"
                );
            }
            TransferOutcome::SourceKept { error, .. } => {
                error!(worker = id, file = %item, error = %error, "Signed but not removed");
            }
            TransferOutcome::AuthRejected { error, .. } => {
                warn!(worker = id, file = %item, error = %error, "Authentication rejected");
            }
            TransferOutcome::Failed { error, .. } => {
                error!(worker = id, file = %item, error = %error, "Failure");
            }
        }

        report_outcome(&coordinator, &outcome);
        stats.record(&outcome);

        if let Some(events) = &events {
            // The receiver only goes away when nobody is watching progress
            let _ = events.send(TransferEvent { worker: id, outcome });
        }
    }

    debug!(
        worker = id,
        signed = stats.signed.load(Ordering::Relaxed),
        failed = stats.failed.load(Ordering::Relaxed),
        "No more work"
    );
}

/// Hand one attempt's outcome to the coordinator
///
/// A file that was signed but could not be removed counts as a failure and
/// as a success: the login worked.
fn report_outcome(coordinator: &TransferCoordinator, outcome: &TransferOutcome) {
    match outcome {
        TransferOutcome::Signed { .. } => coordinator.report_success(),
        TransferOutcome::SourceKept { .. } => {
            coordinator.report_failure();
            coordinator.report_success();
        }
        TransferOutcome::AuthRejected { item, .. } => {
            coordinator.report_auth_failure(item.clone())
        }
        TransferOutcome::Failed { .. } => coordinator.report_failure(),
    }
}

/// Sign a single file and classify the result
pub fn transfer_item(
    item: &WorkItem,
    signer: &dyn Signer,
    options: &TransferOptions,
    credentials: &Credentials,
) -> TransferOutcome {
    let start = Instant::now();

    match sign_file(item, signer, options, credentials) {
        Ok((bytes_in, bytes_out)) => match remove_source(item, options) {
            Ok(()) => TransferOutcome::Signed {
                item: item.clone(),
                bytes_in,
                bytes_out,
                elapsed: start.elapsed(),
            },
            Err(error) => TransferOutcome::SourceKept {
                item: item.clone(),
                bytes_in,
                bytes_out,
                error,
            },
        },
        Err(error) if error.is_auth_failure() => TransferOutcome::AuthRejected {
            item: item.clone(),
            error,
        },
        Err(error) => TransferOutcome::Failed {
            item: item.clone(),
            error,
        },
    }
}

fn sign_file(
    item: &WorkItem,
    signer: &dyn Signer,
    options: &TransferOptions,
    credentials: &Credentials,
) -> Result<(u64, u64), TransferError> {
    let data = fs::read(item.path()).map_err(|source| TransferError::Read {
        path: item.path().to_path_buf(),
        source,
    })?;

    let mut context = RequestContext::with_metadata(&options.metadata);
    context.insert(CONTEXT_FILENAME, item.file_name());

    // Buffer the response so a failed request never leaves a partial file
    let mut signed = Vec::new();
    signer.sign(&data, &mut signed, &context, credentials)?;

    let out_path = options.output_dir.join(item.file_name());
    fs::write(&out_path, &signed).map_err(|source| TransferError::Write {
        path: out_path.clone(),
        source,
    })?;
    debug!(file = %out_path.display(), "Wrote");

    Ok((data.len() as u64, signed.len() as u64))
}

fn remove_source(item: &WorkItem, options: &TransferOptions) -> Result<(), TransferError> {
    if options.remove_source && item.path().exists() {
        fs::remove_file(item.path()).map_err(|source| TransferError::RemoveSource {
            path: item.path().to_path_buf(),
            source,
        })?;
        info!(file = %item, "Removed");
    }
    Ok(())
}

/// Aggregate statistics from multiple workers
pub fn aggregate_stats(workers: &[Worker]) -> TransferTotals {
    let mut totals = TransferTotals::default();

    for worker in workers {
        totals.signed += worker.stats.signed.load(Ordering::Relaxed);
        totals.failed += worker.stats.failed.load(Ordering::Relaxed);
        totals.auth_rejected += worker.stats.auth_rejected.load(Ordering::Relaxed);
        totals.bytes_in += worker.stats.bytes_in.load(Ordering::Relaxed);
        totals.bytes_out += worker.stats.bytes_out.load(Ordering::Relaxed);
    }

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::PasswordPrompt;
    use crate::transfer::BatchVerdict;
    use crate::error::{CredentialError, FailureKind, SignError};
    use std::io::{self, Write};
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingPrompt {
        calls: AtomicUsize,
    }

    impl PasswordPrompt for CountingPrompt {
        fn prompt_for_password(&self, _username: &str) -> Result<String, CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("again".into())
        }
    }

    fn removal_error(item: &WorkItem) -> TransferError {
        TransferError::RemoveSource {
            path: item.path().to_path_buf(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        }
    }

    /// Uppercases the input, or fails according to `mode`
    struct UpperSigner {
        mode: &'static str,
    }

    impl Signer for UpperSigner {
        fn sign(
            &self,
            data: &[u8],
            output: &mut dyn Write,
            context: &RequestContext,
            credentials: &Credentials,
        ) -> Result<(), SignError> {
            match self.mode {
                "auth" => Err(SignError::AuthenticationRequired {
                    detail: format!("user {}", credentials.username),
                }),
                "fail" => Err(SignError::Rejected {
                    kind: FailureKind::Server,
                    detail: "HTTP 500".into(),
                }),
                _ => {
                    output.write_all(&data.to_ascii_uppercase())?;
                    if let Some(name) = context.get(CONTEXT_FILENAME) {
                        write!(output, ":{}", name)?;
                    }
                    Ok(())
                }
            }
        }
    }

    fn setup(remove_source: bool) -> (tempfile::TempDir, WorkItem, TransferOptions) {
        let dir = tempdir().unwrap();
        let indir = dir.path().join("in");
        let outdir = dir.path().join("out");
        fs::create_dir_all(&indir).unwrap();
        fs::create_dir_all(&outdir).unwrap();

        let path = indir.join("doc.txt");
        fs::write(&path, b"hello").unwrap();

        let options = TransferOptions {
            output_dir: outdir,
            remove_source,
            metadata: BTreeMap::new(),
        };
        (dir, WorkItem::new(path), options)
    }

    #[test]
    fn test_transfer_writes_output() {
        let (_dir, item, options) = setup(false);
        let outcome = transfer_item(
            &item,
            &UpperSigner { mode: "ok" },
            &options,
            &Credentials::default(),
        );

        match outcome {
            TransferOutcome::Signed {
                bytes_in, bytes_out, ..
            } => {
                assert_eq!(bytes_in, 5);
                assert_eq!(bytes_out, "HELLO:doc.txt".len() as u64);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let written = fs::read(options.output_dir.join("doc.txt")).unwrap();
        assert_eq!(written, b"HELLO:doc.txt");
        assert!(item.path().exists());
    }

    #[test]
    fn test_transfer_removes_source() {
        let (_dir, item, options) = setup(true);
        let outcome = transfer_item(
            &item,
            &UpperSigner { mode: "ok" },
            &options,
            &Credentials::default(),
        );

        assert!(outcome.is_success());
        assert!(!item.path().exists());
    }

    #[test]
    fn test_transfer_classifies_auth_failure() {
        let (_dir, item, options) = setup(true);
        let outcome = transfer_item(
            &item,
            &UpperSigner { mode: "auth" },
            &options,
            &Credentials::new("alice", "x"),
        );

        assert!(matches!(outcome, TransferOutcome::AuthRejected { .. }));
        assert_eq!(outcome.item(), &item);
        // Nothing written, source kept for the retry
        assert!(!options.output_dir.join("doc.txt").exists());
        assert!(item.path().exists());
    }

    #[test]
    fn test_transfer_classifies_other_failure() {
        let (_dir, item, options) = setup(false);
        let outcome = transfer_item(
            &item,
            &UpperSigner { mode: "fail" },
            &options,
            &Credentials::default(),
        );
        assert!(matches!(outcome, TransferOutcome::Failed { .. }));
    }

    #[test]
    fn test_missing_input_is_failure() {
        let (_dir, _item, options) = setup(false);
        let missing = WorkItem::new(options.output_dir.join("nope.txt"));
        let outcome = transfer_item(
            &missing,
            &UpperSigner { mode: "ok" },
            &options,
            &Credentials::default(),
        );

        match outcome {
            TransferOutcome::Failed { error, .. } => {
                assert!(matches!(error, TransferError::Read { .. }))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::default();
        let item = WorkItem::new("/in/a");

        stats.record(&TransferOutcome::Signed {
            item: item.clone(),
            bytes_in: 10,
            bytes_out: 20,
            elapsed: Duration::from_millis(1),
        });
        stats.record(&TransferOutcome::Failed {
            item: item.clone(),
            error: SignError::Transport("down".into()).into(),
        });
        stats.record(&TransferOutcome::AuthRejected {
            item,
            error: SignError::AuthenticationRequired {
                detail: "401".into(),
            }
            .into(),
        });

        assert_eq!(stats.signed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.auth_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_in.load(Ordering::Relaxed), 10);
        assert_eq!(stats.bytes_out.load(Ordering::Relaxed), 20);

        let kept = WorkItem::new("/in/b");
        stats.record(&TransferOutcome::SourceKept {
            error: removal_error(&kept),
            item: kept,
            bytes_in: 1,
            bytes_out: 2,
        });
        assert_eq!(stats.signed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.bytes_out.load(Ordering::Relaxed), 22);
    }

    #[test]
    fn test_source_kept_reports_failure_and_login_success() {
        let prompt = Arc::new(CountingPrompt::default());
        let coord = TransferCoordinator::new(
            vec![WorkItem::new("/in/a"), WorkItem::new("/in/b")],
            Credentials::new("alice", "pw"),
            false,
            prompt.clone(),
        );

        let a = coord.next_item().unwrap();
        let b = coord.next_item().unwrap();

        report_outcome(
            &coord,
            &TransferOutcome::SourceKept {
                error: removal_error(&a),
                item: a,
                bytes_in: 1,
                bytes_out: 2,
            },
        );

        let snap = coord.snapshot();
        assert_eq!(snap.succeeded, 1);
        assert!(snap.failed);
        assert!(!snap.aborted);

        // The password already worked, so a later rejection is item-specific
        report_outcome(
            &coord,
            &TransferOutcome::AuthRejected {
                item: b.clone(),
                error: SignError::AuthenticationRequired {
                    detail: "401".into(),
                }
                .into(),
            },
        );
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
        assert_eq!(coord.snapshot().retries, 0);
        assert_eq!(coord.next_item(), Some(b));
    }

    #[test]
    fn test_source_kept_on_probe_aborts() {
        let coord = TransferCoordinator::new(
            vec![WorkItem::new("/in/a"), WorkItem::new("/in/b")],
            Credentials::default(),
            true,
            Arc::new(CountingPrompt::default()),
        );

        let a = coord.next_item().unwrap();
        report_outcome(
            &coord,
            &TransferOutcome::SourceKept {
                error: removal_error(&a),
                item: a,
                bytes_in: 1,
                bytes_out: 2,
            },
        );

        assert!(coord.is_aborted());
        assert_eq!(coord.verdict(), BatchVerdict::Aborted);
        assert_eq!(coord.next_item(), None);
    }
}
