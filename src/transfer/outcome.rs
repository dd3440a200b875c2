//! Batch-level success/failure bookkeeping

use std::fmt;
use std::process::ExitCode;

/// Number of times the password may be re-prompted before giving up
pub const MAX_CREDENTIAL_RETRIES: u32 = 3;

/// Aggregate counters for a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeTracker {
    success_count: u64,
    failed: bool,
    aborted: bool,
    retry_count: u32,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed = true;
    }

    /// Mark the batch aborted. Returns true only on the first call.
    pub fn abort(&mut self) -> bool {
        let first = !self.aborted;
        self.aborted = true;
        first
    }

    /// Use up one credential retry, or return false when the cap is reached
    pub fn try_consume_retry(&mut self) -> bool {
        if self.retry_count + 1 > MAX_CREDENTIAL_RETRIES {
            return false;
        }
        self.retry_count += 1;
        true
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn has_success(&self) -> bool {
        self.success_count > 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn verdict(&self) -> BatchVerdict {
        if self.aborted {
            BatchVerdict::Aborted
        } else if self.failed {
            BatchVerdict::PartialFailure
        } else {
            BatchVerdict::Completed
        }
    }
}

/// Final status of a batch, as seen by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchVerdict {
    /// Every dispatched file was signed
    Completed,

    /// The batch ran to the end but at least one file failed
    PartialFailure,

    /// The batch stopped early
    Aborted,
}

impl BatchVerdict {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchVerdict::Completed)
    }

    /// Process exit status; 1 is left for setup errors
    pub fn exit_status(&self) -> u8 {
        match self {
            BatchVerdict::Completed => 0,
            BatchVerdict::PartialFailure => 2,
            BatchVerdict::Aborted => 3,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

impl fmt::Display for BatchVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BatchVerdict::Completed => "All files signed",
            BatchVerdict::PartialFailure => "At least one file failed",
            BatchVerdict::Aborted => "Aborted due to failure",
        };
        f.write_str(msg)
    }
}
