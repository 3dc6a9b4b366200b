//! Progress reporting.
//!
//! The download session reports through a [`ProgressSink`]; front ends
//! implement it to render a bar, a log line, or nothing at all.

use crate::session::SessionPhase;

/// Receiver of progress updates.
pub trait ProgressSink {
    /// Show a short status text.
    fn set_label(&mut self, text: &str);

    /// Report `current` out of `total`.
    ///
    /// Callers go through [`ProgressTracker`], so implementations only ever
    /// see `total > 0`, `current <= total` and non-decreasing values.
    fn set_progress(&mut self, current: u64, total: u64);

    /// Called on every session phase transition.
    fn phase_changed(&mut self, _phase: SessionPhase) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn set_label(&mut self, _text: &str) {}

    fn set_progress(&mut self, _current: u64, _total: u64) {}
}

impl<S: ProgressSink + ?Sized> ProgressSink for &mut S {
    fn set_label(&mut self, text: &str) {
        (**self).set_label(text);
    }

    fn set_progress(&mut self, current: u64, total: u64) {
        (**self).set_progress(current, total);
    }

    fn phase_changed(&mut self, phase: SessionPhase) {
        (**self).phase_changed(phase);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for Box<S> {
    fn set_label(&mut self, text: &str) {
        (**self).set_label(text);
    }

    fn set_progress(&mut self, current: u64, total: u64) {
        (**self).set_progress(current, total);
    }

    fn phase_changed(&mut self, phase: SessionPhase) {
        (**self).phase_changed(phase);
    }
}

/// Enforces the [`ProgressSink`] contract in front of a sink.
///
/// A zero `total` is ignored, `current` is clamped to `total`, and a value
/// whose ratio is below the last forwarded one is dropped.
pub struct ProgressTracker<'a> {
    sink: &'a mut dyn ProgressSink,
    last: Option<(u64, u64)>,
}

impl<'a> ProgressTracker<'a> {
    /// Wrap a sink.
    pub fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self { sink, last: None }
    }

    /// Forward a label.
    pub fn label(&mut self, text: &str) {
        self.sink.set_label(text);
    }

    /// Forward a phase transition.
    pub fn phase(&mut self, phase: SessionPhase) {
        self.sink.phase_changed(phase);
    }

    /// Forward a progress value if it keeps the sequence non-decreasing.
    pub fn set(&mut self, current: u64, total: u64) {
        if total == 0 {
            return;
        }
        let current = current.min(total);
        if let Some((last_current, last_total)) = self.last {
            // current/total < last_current/last_total, without division.
            if u128::from(current) * u128::from(last_total)
                < u128::from(last_current) * u128::from(total)
            {
                return;
            }
        }
        self.last = Some((current, total));
        self.sink.set_progress(current, total);
    }

    /// Shorthand for `set(percent, 100)`.
    pub fn percent(&mut self, percent: u64) {
        self.set(percent, 100);
    }
}
