//! Decision and post-processing seams.
//!
//! Stream copy occasionally has to ask whether dropping a frame is
//! acceptable; the question goes through `ConfirmPolicy` so the engine
//! stays testable without a UI. Production wires a real prompt, tests a
//! scripted responder.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use splice_core::DecodedFrame;
use std::collections::VecDeque;

// ── User confirmation ───────────────────────────────────────────

/// Synchronous continue/abort decision point.
///
/// The call may take arbitrary wall-clock time (a user is thinking); the
/// engine holds no cache or decoder state across it.
pub trait ConfirmPolicy: Send + Sync {
    /// Ask whether to continue. `true` continues, `false` aborts.
    fn confirm(&self, message: &str) -> bool;
}

impl<T: ConfirmPolicy + ?Sized> ConfirmPolicy for std::sync::Arc<T> {
    fn confirm(&self, message: &str) -> bool {
        (**self).confirm(message)
    }
}

/// Always continues; the default for non-interactive use.
#[derive(Debug, Default)]
pub struct AlwaysContinue;

impl ConfirmPolicy for AlwaysContinue {
    fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// Scripted responder for tests: pops pre-seeded answers in order, then
/// falls back to a fixed default. Records every question asked.
pub struct ScriptedConfirm {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
    fallback: bool,
}

impl ScriptedConfirm {
    pub fn new(fallback: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            asked: Mutex::new(Vec::new()),
            fallback,
        }
    }

    /// Queue the answer for the next question.
    pub fn push(&self, answer: bool) {
        self.answers.lock().push_back(answer);
    }

    /// Questions asked so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().clone()
    }
}

impl ConfirmPolicy for ScriptedConfirm {
    fn confirm(&self, message: &str) -> bool {
        self.asked.lock().push(message.to_string());
        self.answers.lock().pop_front().unwrap_or(self.fallback)
    }
}

// ── Post-processing ─────────────────────────────────────────────

/// Post-processing filter applied to decoded frames before display.
pub trait PostProcessor: Send + Sync {
    fn process(&self, input: &DecodedFrame, out: &mut DecodedFrame);
}

/// Gate settings for the post-processing stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PostProcConfig {
    pub enabled: bool,
    /// Filter strength; 0 disables even when enabled.
    pub strength: u32,
}

impl Default for PostProcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 0,
        }
    }
}
