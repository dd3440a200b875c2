//! Batch transfer core
//!
//! A pool of worker threads shares one [`TransferCoordinator`]. Workers pull
//! files, sign them and report back; the coordinator owns every retry and
//! re-authentication decision.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────────────────────┐
//!                │       TransferCoordinator        │
//!                │  Mutex { WorkQueue, GateState,   │
//!                │          OutcomeTracker,         │
//!                │          Credentials }           │
//!                │  Condvar (probe gate)            │
//!                └───────┬──────────▲───────────────┘
//!            next_item() │          │ report_*()
//!       ┌────────────────┼──────────┼───────────────┐
//! ┌─────▼─────┐    ┌─────▼─────┐    │         ┌─────────────┐
//! │ Worker 0  │    │ Worker 1  │ ...│         │  Worker N   │
//! │  Signer   │    │  Signer   │    │         │   Signer    │
//! └───────────┘    └───────────┘              └─────────────┘
//! ```
//!
//! In probe mode ("one first") only a single request is in flight until it
//! succeeds, so a wrong password costs one rejected login instead of one per
//! worker.

pub mod batch;
pub mod coordinator;
pub mod gate;
pub mod outcome;
pub mod queue;
pub mod worker;

pub use batch::{worker_count, BatchResult, BatchRunner, BatchSettings};
pub use coordinator::{CoordinatorSnapshot, TransferCoordinator};
pub use gate::GateState;
pub use outcome::{BatchVerdict, OutcomeTracker, MAX_CREDENTIAL_RETRIES};
pub use queue::{WorkItem, WorkQueue};
pub use worker::{TransferEvent, TransferOptions, TransferOutcome, TransferTotals, Worker};
