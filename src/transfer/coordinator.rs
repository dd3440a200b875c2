//! Transfer coordinator - the single point of shared batch state
//!
//! The coordinator is a monitor: the work queue, the probe gate, the outcome
//! counters and the current password all sit behind one mutex, and a single
//! condition variable wakes workers blocked on the gate.
//!
//! ```text
//!   UNGATED ──(auth failure, eligible)──► GATED(not served)
//!      ▲                                      │ next_item
//!      │ report_success                       ▼
//!      └──────────────────────────────── GATED(served)
//!                                             │ failure / retries exhausted
//!                                             ▼
//!                                          ABORTED (terminal)
//! ```
//!
//! Workers never retry on their own. Every retry and re-authentication
//! decision is made here, under the lock.

use super::gate::GateState;
use super::outcome::{BatchVerdict, OutcomeTracker, MAX_CREDENTIAL_RETRIES};
use super::queue::{WorkItem, WorkQueue};
use crate::credentials::{Credentials, PasswordPrompt};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Everything guarded by the coordinator lock
struct CoordinatorState {
    queue: WorkQueue,
    gate: GateState,
    outcome: OutcomeTracker,
    credentials: Credentials,
    dispatched: u64,
}

/// Point-in-time view of the coordinator, for progress and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    /// Items still waiting in the queue
    pub remaining: usize,

    /// Items handed out by `next_item` (retries count again)
    pub dispatched: u64,

    /// Successful attempts
    pub succeeded: u64,

    /// Password re-prompts so far
    pub retries: u32,

    /// Any non-authentication failure recorded
    pub failed: bool,

    /// Batch has stopped issuing work
    pub aborted: bool,

    /// Probe gate armed
    pub probe_active: bool,

    /// Probe already dispatched
    pub probe_served: bool,
}

/// Shared monitor driving a batch of workers
pub struct TransferCoordinator {
    state: Mutex<CoordinatorState>,
    gate_changed: Condvar,
    prompt: Arc<dyn PasswordPrompt>,
}

impl TransferCoordinator {
    /// Create a coordinator over `items`
    ///
    /// With `start_in_probe_mode` only one request is let through until it
    /// proves the credentials work.
    pub fn new(
        items: impl IntoIterator<Item = WorkItem>,
        credentials: Credentials,
        start_in_probe_mode: bool,
        prompt: Arc<dyn PasswordPrompt>,
    ) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                queue: WorkQueue::new(items),
                gate: GateState::new(start_in_probe_mode),
                outcome: OutcomeTracker::new(),
                credentials,
                dispatched: 0,
            }),
            gate_changed: Condvar::new(),
            prompt,
        }
    }

    /// Get the next item to sign, or `None` when the batch is done
    ///
    /// Blocks while a credential probe is in flight. A caller that had to
    /// wait stays parked until the gate opens or the batch aborts, even if
    /// the gate is re-armed meanwhile; the new probe goes to a fresh caller.
    pub fn next_item(&self) -> Option<WorkItem> {
        let mut state = self.state.lock();

        if state.outcome.is_aborted() {
            return None;
        }

        if state.gate.is_blocking() {
            trace!("Waiting for credential probe");
            while state.gate.is_active() && !state.outcome.is_aborted() {
                self.gate_changed.wait(&mut state);
            }
            if state.outcome.is_aborted() {
                return None;
            }
            return Self::pop_locked(&mut state);
        }

        let item = Self::pop_locked(&mut state);

        if state.gate.is_active() {
            if let Some(probe) = &item {
                debug!(file = %probe, "Dispatching credential probe");
            }
            state.gate.serve(item.clone());
        }

        item
    }

    fn pop_locked(state: &mut CoordinatorState) -> Option<WorkItem> {
        let item = state.queue.pop_front();
        if item.is_some() {
            state.dispatched += 1;
        }
        item
    }

    /// An attempt completed without error
    pub fn report_success(&self) {
        let mut state = self.state.lock();
        state.outcome.record_success();

        if state.gate.is_blocking() {
            state.gate.open();
            info!("Credentials accepted, releasing all workers");
            self.gate_changed.notify_all();
        }
    }

    /// An attempt failed for a reason other than rejected credentials
    pub fn report_failure(&self) {
        let mut state = self.state.lock();
        state.outcome.record_failure();

        // Only the probe runs while gated, so this is the probe failing
        if state.gate.is_active() {
            warn!("Credential probe failed, aborting batch");
            self.abort_locked(&mut state);
        }
    }

    /// The signer rejected the credentials used for `item`
    ///
    /// If nothing has succeeded yet (and no probe cycle is running), or this
    /// is the current probe failing again, the user is asked for a new
    /// password and the gate is re-armed. Otherwise the rejection is treated
    /// as specific to this item. Either way the item goes back to the front
    /// of the queue.
    pub fn report_auth_failure(&self, item: WorkItem) {
        let mut state = self.state.lock();

        if state.outcome.is_aborted() {
            return;
        }

        let eligible = (!state.outcome.has_success() && !state.gate.is_active())
            || state.gate.is_probe(&item);

        if eligible {
            if !state.outcome.try_consume_retry() {
                warn!(
                    retries = MAX_CREDENTIAL_RETRIES,
                    "Too many authentication failures, aborting batch"
                );
                self.abort_locked(&mut state);
                return;
            }

            // Prompting under the lock keeps every other worker out until
            // the new password is in place
            let username = state.credentials.username.clone();
            match self.prompt.prompt_for_password(&username) {
                Ok(password) => {
                    state.credentials.password = password;
                    state.gate.rearm();
                    info!(
                        attempt = state.outcome.retry_count(),
                        file = %item,
                        "Retrying with new password, one request first"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Could not obtain a new password");
                    self.abort_locked(&mut state);
                    return;
                }
            }
        } else {
            debug!(file = %item, "Authentication failure not attributed to credentials");
        }

        state.queue.push_front(item);
        self.gate_changed.notify_all();
    }

    /// Stop issuing work and wake every blocked worker
    pub fn abort(&self) {
        let mut state = self.state.lock();
        self.abort_locked(&mut state);
    }

    fn abort_locked(&self, state: &mut CoordinatorState) {
        if state.outcome.abort() {
            info!(remaining = state.queue.len(), "Batch aborted");
        }
        self.gate_changed.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().outcome.is_aborted()
    }

    pub fn has_failures(&self) -> bool {
        self.state.lock().outcome.has_failures()
    }

    pub fn verdict(&self) -> BatchVerdict {
        self.state.lock().outcome.verdict()
    }

    /// Current credentials, read under the lock
    pub fn credentials(&self) -> Credentials {
        self.state.lock().credentials.clone()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let state = self.state.lock();
        CoordinatorSnapshot {
            remaining: state.queue.len(),
            dispatched: state.dispatched,
            succeeded: state.outcome.success_count(),
            retries: state.outcome.retry_count(),
            failed: state.outcome.has_failures(),
            aborted: state.outcome.is_aborted(),
            probe_active: state.gate.is_active(),
            probe_served: state.gate.is_served(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialError;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Prompt that answers "pw1", "pw2", ... and counts calls
    #[derive(Default)]
    struct CountingPrompt {
        calls: AtomicUsize,
    }

    impl PasswordPrompt for CountingPrompt {
        fn prompt_for_password(&self, _username: &str) -> Result<String, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("pw{}", n))
        }
    }

    struct FailingPrompt;

    impl PasswordPrompt for FailingPrompt {
        fn prompt_for_password(&self, username: &str) -> Result<String, CredentialError> {
            Err(CredentialError::PromptFailed {
                username: username.to_string(),
                reason: "not a terminal".into(),
            })
        }
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n).map(|i| WorkItem::new(format!("/in/{}.xml", i))).collect()
    }

    fn coordinator(n: usize, gated: bool) -> (Arc<TransferCoordinator>, Arc<CountingPrompt>) {
        let prompt = Arc::new(CountingPrompt::default());
        let coord = TransferCoordinator::new(
            items(n),
            Credentials::new("user", "pw0"),
            gated,
            prompt.clone(),
        );
        (Arc::new(coord), prompt)
    }

    #[test]
    fn test_all_success_ungated() {
        let (coord, prompt) = coordinator(3, false);

        while let Some(_item) = coord.next_item() {
            coord.report_success();
        }

        let snap = coord.snapshot();
        assert_eq!(snap.succeeded, 3);
        assert_eq!(snap.dispatched, 3);
        assert!(!snap.failed);
        assert!(!snap.aborted);
        assert_eq!(coord.verdict(), BatchVerdict::Completed);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_gate_blocks_second_caller_until_success() {
        let (coord, _) = coordinator(2, true);

        let probe = coord.next_item().unwrap();
        assert_eq!(probe, WorkItem::new("/in/0.xml"));
        assert!(coord.snapshot().probe_served);

        let (tx, rx) = bounded(1);
        let waiter = {
            let coord = Arc::clone(&coord);
            thread::spawn(move || tx.send(coord.next_item()).unwrap())
        };

        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

        coord.report_success();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second, Some(WorkItem::new("/in/1.xml")));
        waiter.join().unwrap();

        assert!(!coord.snapshot().probe_active);
    }

    /// Park a thread in `next_item` and hand back its result channel
    fn park_waiter(
        coord: &Arc<TransferCoordinator>,
    ) -> (
        crossbeam_channel::Receiver<Option<WorkItem>>,
        thread::JoinHandle<()>,
    ) {
        let (tx, rx) = bounded(1);
        let handle = {
            let coord = Arc::clone(coord);
            thread::spawn(move || tx.send(coord.next_item()).unwrap())
        };
        (rx, handle)
    }

    #[test]
    fn test_waiter_stays_parked_across_rearm() {
        let (coord, prompt) = coordinator(3, true);

        let probe = coord.next_item().unwrap();
        let (rx, waiter) = park_waiter(&coord);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

        // New password, gate re-armed: the parked caller must not take the retry
        coord.report_auth_failure(probe.clone());
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        // The reporting worker comes back and is handed the retry
        assert_eq!(coord.next_item(), Some(probe));
        assert!(coord.snapshot().probe_served);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

        coord.report_success();
        let released = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(released, Some(WorkItem::new("/in/1.xml")));
        waiter.join().unwrap();
    }

    #[test]
    fn test_waiter_parked_across_rearm_released_by_abort() {
        let (coord, _) = coordinator(3, true);

        let probe = coord.next_item().unwrap();
        let (rx, waiter) = park_waiter(&coord);

        coord.report_auth_failure(probe);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(coord.snapshot().remaining, 3);

        coord.abort();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
        waiter.join().unwrap();
    }

    #[test]
    fn test_single_item_in_flight_through_reprompt_cycles() {
        let (coord, prompt) = coordinator(6, true);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_gated = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let coord = Arc::clone(&coord);
                let in_flight = Arc::clone(&in_flight);
                let max_gated = Arc::clone(&max_gated);
                let attempts = Arc::clone(&attempts);
                thread::spawn(move || {
                    while let Some(item) = coord.next_item() {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        let gated = coord.snapshot().probe_active;
                        if gated {
                            max_gated.fetch_max(now, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(20));
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        in_flight.fetch_sub(1, Ordering::SeqCst);

                        // First two attempts are rejected, then the password works
                        if n < 2 {
                            coord.report_auth_failure(item);
                        } else {
                            coord.report_success();
                        }
                    }
                })
            })
            .collect();

        for w in workers {
            w.join().unwrap();
        }

        let snap = coord.snapshot();
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 2);
        assert_eq!(snap.succeeded, 6);
        assert!(!snap.aborted);
        assert_eq!(max_gated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_success_opens_gate_for_subsequent_calls() {
        let (coord, _) = coordinator(3, true);

        coord.next_item().unwrap();
        coord.report_success();

        // Would block forever if the gate were still closed
        assert!(coord.next_item().is_some());
        assert!(coord.next_item().is_some());
        assert!(coord.next_item().is_none());
    }

    #[test]
    fn test_abort_wakes_blocked_callers() {
        let (coord, _) = coordinator(3, true);
        coord.next_item().unwrap();

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let coord = Arc::clone(&coord);
                thread::spawn(move || coord.next_item())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        coord.abort();

        for w in waiters {
            assert_eq!(w.join().unwrap(), None);
        }
        assert!(coord.is_aborted());
    }

    #[test]
    fn test_abort_idempotent() {
        let (coord, _) = coordinator(2, false);
        coord.abort();
        let once = coord.snapshot();
        coord.abort();
        assert_eq!(coord.snapshot(), once);
        assert_eq!(coord.next_item(), None);
    }

    #[test]
    fn test_probe_failure_aborts() {
        let (coord, _) = coordinator(3, true);
        coord.next_item().unwrap();
        coord.report_failure();

        assert!(coord.is_aborted());
        assert!(coord.has_failures());
        assert_eq!(coord.verdict(), BatchVerdict::Aborted);
        assert_eq!(coord.next_item(), None);
    }

    #[test]
    fn test_failure_ungated_does_not_abort() {
        let (coord, _) = coordinator(2, false);
        coord.next_item().unwrap();
        coord.report_failure();
        coord.next_item().unwrap();
        coord.report_success();

        assert!(!coord.is_aborted());
        assert!(coord.has_failures());
        assert_eq!(coord.verdict(), BatchVerdict::PartialFailure);
    }

    #[test]
    fn test_auth_failure_prompts_and_requeues_probe() {
        let (coord, prompt) = coordinator(3, true);

        let probe = coord.next_item().unwrap();
        coord.report_auth_failure(probe.clone());

        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.credentials().password, "pw1");

        let snap = coord.snapshot();
        assert_eq!(snap.retries, 1);
        assert!(snap.probe_active);
        assert!(!snap.probe_served);

        // Same item comes back first, as the new probe
        assert_eq!(coord.next_item(), Some(probe));
        coord.report_success();
        assert!(!coord.snapshot().probe_active);
    }

    #[test]
    fn test_first_auth_failure_ungated_arms_gate() {
        let (coord, prompt) = coordinator(2, false);

        let first = coord.next_item().unwrap();
        coord.report_auth_failure(first.clone());

        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
        let snap = coord.snapshot();
        assert!(snap.probe_active);
        assert_eq!(snap.remaining, 2);
        assert_eq!(coord.next_item(), Some(first));
    }

    #[test]
    fn test_retries_exhausted_aborts() {
        let (coord, prompt) = coordinator(2, false);

        for _ in 0..MAX_CREDENTIAL_RETRIES {
            let item = coord.next_item().unwrap();
            coord.report_auth_failure(item);
            assert!(!coord.is_aborted());
        }

        let item = coord.next_item().unwrap();
        coord.report_auth_failure(item);

        assert!(coord.is_aborted());
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 3);
        assert_eq!(coord.snapshot().retries, 3);
        assert_eq!(coord.next_item(), None);
    }

    #[test]
    fn test_stale_auth_failure_after_success_is_not_eligible() {
        let (coord, prompt) = coordinator(3, false);

        let _a = coord.next_item().unwrap();
        let b = coord.next_item().unwrap();
        coord.report_success();
        coord.report_auth_failure(b.clone());

        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
        let snap = coord.snapshot();
        assert_eq!(snap.retries, 0);
        assert!(!snap.probe_active);
        assert_eq!(snap.remaining, 2);
        assert_eq!(coord.next_item(), Some(b));
    }

    #[test]
    fn test_stale_auth_failure_while_gated_is_not_eligible() {
        let (coord, prompt) = coordinator(3, false);

        let a = coord.next_item().unwrap();
        let b = coord.next_item().unwrap();

        coord.report_auth_failure(a.clone());
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);

        let probe = coord.next_item().unwrap();
        assert_eq!(probe, a);

        // b was sent with the old password before the gate re-armed
        coord.report_auth_failure(b.clone());
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.snapshot().retries, 1);
        assert_eq!(coord.snapshot().remaining, 2);
    }

    #[test]
    fn test_prompt_error_aborts() {
        let coord = TransferCoordinator::new(
            items(2),
            Credentials::new("user", "bad"),
            false,
            Arc::new(FailingPrompt),
        );

        let item = coord.next_item().unwrap();
        coord.report_auth_failure(item);

        assert!(coord.is_aborted());
        assert_eq!(coord.credentials().password, "bad");
    }

    #[test]
    fn test_auth_failure_after_abort_is_ignored() {
        let (coord, prompt) = coordinator(2, false);

        let item = coord.next_item().unwrap();
        coord.abort();
        coord.report_auth_failure(item);

        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
        assert_eq!(coord.snapshot().remaining, 1);
    }

    #[test]
    fn test_gated_empty_queue_returns_none() {
        let (coord, _) = coordinator(0, true);
        assert_eq!(coord.next_item(), None);
        assert!(coord.snapshot().probe_served);
    }
}
