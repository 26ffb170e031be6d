//! When to save a selfie.
//!
//! Two policies exist. Edge-triggered capture fires once when a smile starts
//! and re-arms only after it ends. Cooldown capture fires whenever a smile is
//! present and at least the cooldown has passed since the previous capture.
//! A manual request fires on the next evaluation under either policy.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePolicy {
    EdgeTriggered,
    Cooldown(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureReason {
    Smile,
    Manual,
}

#[derive(Debug, Clone)]
pub struct CaptureTrigger {
    policy: CapturePolicy,
    was_smiling: bool,
    last_capture: Option<Instant>,
    previous_capture: Option<Instant>,
    manual_pending: bool,
}

impl CaptureTrigger {
    pub fn new(policy: CapturePolicy) -> Self {
        Self {
            policy,
            was_smiling: false,
            last_capture: None,
            previous_capture: None,
            manual_pending: false,
        }
    }

    pub fn policy(&self) -> CapturePolicy {
        self.policy
    }

    /// Queue a capture for the next evaluation. Repeated requests before
    /// then collapse into one.
    pub fn request_manual(&mut self) {
        self.manual_pending = true;
    }

    /// Decide whether the frame observed at `now` should be saved.
    pub fn evaluate(&mut self, smiling: bool, now: Instant) -> Option<CaptureReason> {
        let rising = smiling && !self.was_smiling;
        self.was_smiling = smiling;

        let reason = if std::mem::take(&mut self.manual_pending) {
            Some(CaptureReason::Manual)
        } else if smiling {
            match self.policy {
                CapturePolicy::EdgeTriggered => rising.then_some(CaptureReason::Smile),
                CapturePolicy::Cooldown(interval) => {
                    let ready = self
                        .last_capture
                        .map_or(true, |t| now.saturating_duration_since(t) >= interval);
                    ready.then_some(CaptureReason::Smile)
                }
            }
        } else {
            None
        };

        if reason.is_some() {
            self.previous_capture = self.last_capture.replace(now);
        }
        reason
    }

    /// Undo the last firing after the capture could not be written. A manual
    /// request is queued again and the cooldown clock is restored; an
    /// edge-triggered smile re-arms so the next smiling frame retries.
    pub fn cancel(&mut self, reason: CaptureReason) {
        self.last_capture = self.previous_capture.take();
        match reason {
            CaptureReason::Manual => self.manual_pending = true,
            CaptureReason::Smile => self.was_smiling = false,
        }
    }
}
