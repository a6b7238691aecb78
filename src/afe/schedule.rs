//! Time-driven fault injection and clearing.
//!
//! Driven by simulated time supplied by the caller, never by the wall clock,
//! so a run with a fixed seed replays identically.

use super::AfeFaultKind;
use serde::{Deserialize, Serialize};

/// One pending fault event.
///
/// `inject_at_ms == None` means the fault is already active and the entry
/// only waits for its clear time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledFault {
    pub kind: AfeFaultKind,
    pub cell_mask: Option<u16>,
    pub inject_at_ms: Option<f64>,
    pub duration_ms: Option<f64>,
    pub clear_at_ms: Option<f64>,
}

/// Action the emulator must carry out for a due event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaultAction {
    Inject { kind: AfeFaultKind, cell_mask: Option<u16> },
    Clear { kind: AfeFaultKind, cell_mask: Option<u16> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultScheduler {
    entries: Vec<ScheduledFault>,
}

impl FaultScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault to be injected at `inject_at_ms` and, with a duration,
    /// cleared `duration_ms` later.
    pub fn schedule(
        &mut self,
        kind: AfeFaultKind,
        inject_at_ms: f64,
        cell_mask: Option<u16>,
        duration_ms: Option<f64>,
    ) {
        self.entries.push(ScheduledFault {
            kind,
            cell_mask,
            inject_at_ms: Some(inject_at_ms),
            duration_ms,
            clear_at_ms: None,
        });
    }

    /// Queue only the clear of a fault that is already active.
    pub fn schedule_clear(&mut self, kind: AfeFaultKind, cell_mask: Option<u16>, clear_at_ms: f64) {
        self.entries.push(ScheduledFault {
            kind,
            cell_mask,
            inject_at_ms: None,
            duration_ms: None,
            clear_at_ms: Some(clear_at_ms),
        });
    }

    /// Collect every action due at `now_ms`, in insertion order.
    ///
    /// An entry injected here gets its clear time set to inject time plus
    /// duration, and can clear in the same call if that has already passed.
    /// Entries drop out once nothing is left for them to do.
    pub fn advance(&mut self, now_ms: f64) -> Vec<FaultAction> {
        let mut actions = Vec::new();

        self.entries.retain_mut(|entry| {
            if let Some(inject_at) = entry.inject_at_ms {
                if now_ms < inject_at {
                    return true;
                }
                actions.push(FaultAction::Inject {
                    kind: entry.kind,
                    cell_mask: entry.cell_mask,
                });
                entry.inject_at_ms = None;
                match entry.duration_ms {
                    Some(duration) => entry.clear_at_ms = Some(inject_at + duration),
                    None => return false,
                }
            }

            match entry.clear_at_ms {
                Some(clear_at) if now_ms >= clear_at => {
                    actions.push(FaultAction::Clear {
                        kind: entry.kind,
                        cell_mask: entry.cell_mask,
                    });
                    false
                }
                _ => true,
            }
        });

        actions
    }

    pub fn pending(&self) -> &[ScheduledFault] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
