//! Probe gate
//!
//! While the gate is active only one item may be in flight. The first
//! dispatch after the gate is armed becomes the probe; everyone else waits
//! until the probe succeeds (gate opens) or the batch aborts.

use super::queue::WorkItem;

/// Gate flags plus the identity of the current probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateState {
    probe_active: bool,
    probe_served: bool,
    probe_item: Option<WorkItem>,
}

impl GateState {
    pub fn new(start_in_probe_mode: bool) -> Self {
        Self {
            probe_active: start_in_probe_mode,
            probe_served: false,
            probe_item: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.probe_active
    }

    pub fn is_served(&self) -> bool {
        self.probe_served
    }

    /// Active with the probe already out: further dispatch must wait
    pub fn is_blocking(&self) -> bool {
        self.probe_active && self.probe_served
    }

    pub fn probe_item(&self) -> Option<&WorkItem> {
        self.probe_item.as_ref()
    }

    /// Record that `item` was dispatched as the probe
    ///
    /// `item` may be `None` when the queue was already empty.
    pub fn serve(&mut self, item: Option<WorkItem>) {
        self.probe_served = true;
        self.probe_item = item;
    }

    /// Credentials proved good; release the pool
    pub fn open(&mut self) {
        self.probe_active = false;
    }

    /// Start a new probe cycle with fresh credentials
    pub fn rearm(&mut self) {
        self.probe_active = true;
        self.probe_served = false;
    }

    /// True if the gate is active and `item` is the probe
    pub fn is_probe(&self, item: &WorkItem) -> bool {
        self.probe_active && self.probe_item.as_ref() == Some(item)
    }
}
