//! Observer trait for widget lifecycle events.
//!
//! Inject an [`Arc<dyn WidgetObserver>`] via
//! [`crate::registry::Dispatcher::with_observer`] (or
//! [`crate::widget::Widget::with_observer`]) to receive events as a widget
//! moves through its states: a terminal spinner, a UI binding, a log sink.
//!
//! # Example
//!
//! ```rust
//! use fileconv::{WidgetObserver, WidgetState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     finished: AtomicUsize,
//! }
//!
//! impl WidgetObserver for CountingObserver {
//!     fn on_conversion_complete(&self, tool_id: &str, artifacts: usize, elapsed_ms: u64) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{tool_id}: {artifacts} file(s) in {elapsed_ms}ms");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { finished: AtomicUsize::new(0) });
//! observer.on_state_change("jpg-to-png", WidgetState::Idle, WidgetState::FileSelected);
//! ```

use crate::error::{ConversionError, ValidationError};
use crate::widget::WidgetState;
use std::sync::Arc;

/// Called by a widget as it changes state.
///
/// Implementations must be `Send + Sync`: conversions finish on tokio worker
/// threads. All methods default to no-ops so implementors override only what
/// they need. Callbacks run outside the widget's lock and may call back into
/// read-only widget accessors.
pub trait WidgetObserver: Send + Sync {
    /// Called after every state transition.
    fn on_state_change(&self, tool_id: &str, from: WidgetState, to: WidgetState) {
        let _ = (tool_id, from, to);
    }

    /// Called when a selection is rejected. The widget state is unchanged.
    fn on_validation_error(&self, tool_id: &str, error: &ValidationError) {
        let _ = (tool_id, error);
    }

    /// Called just before the adapter is invoked.
    ///
    /// # Arguments
    /// * `inputs`: number of source files handed to the adapter
    fn on_conversion_start(&self, tool_id: &str, inputs: usize) {
        let _ = (tool_id, inputs);
    }

    /// Called when the widget enters `Ready`.
    ///
    /// # Arguments
    /// * `artifacts` : number of output files
    /// * `elapsed_ms`: wall-clock time spent in the adapter
    fn on_conversion_complete(&self, tool_id: &str, artifacts: usize, elapsed_ms: u64) {
        let _ = (tool_id, artifacts, elapsed_ms);
    }

    /// Called when the widget enters `Failed`.
    fn on_conversion_error(&self, tool_id: &str, error: &ConversionError) {
        let _ = (tool_id, error);
    }
}

/// A no-op implementation for callers that don't need events.
pub struct NoopObserver;

impl WidgetObserver for NoopObserver {}

/// Convenience alias for the shared observer handle.
pub type ObserverHandle = Arc<dyn WidgetObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingObserver {
        transitions: AtomicUsize,
        rejects: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl WidgetObserver for TrackingObserver {
        fn on_state_change(&self, _tool_id: &str, _from: WidgetState, _to: WidgetState) {
            self.transitions.fetch_add(1, Ordering::SeqCst);
        }

        fn on_validation_error(&self, _tool_id: &str, _error: &ValidationError) {
            self.rejects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, _tool_id: &str, _artifacts: usize, _elapsed_ms: u64) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_error(&self, _tool_id: &str, _error: &ConversionError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_state_change("t", WidgetState::Idle, WidgetState::FileSelected);
        o.on_conversion_start("t", 1);
        o.on_conversion_complete("t", 1, 10);
        o.on_conversion_error("t", &ConversionError::Cancelled);
    }

    #[test]
    fn tracking_observer_receives_events() {
        let t = TrackingObserver::default();
        t.on_state_change("t", WidgetState::Idle, WidgetState::FileSelected);
        t.on_state_change("t", WidgetState::FileSelected, WidgetState::Converting);
        t.on_validation_error("t", &ValidationError::TooManyFiles { actual: 3, limit: 2 });
        t.on_conversion_complete("t", 2, 5);
        t.on_conversion_error("t", &ConversionError::Timeout { elapsed_ms: 1 });
        assert_eq!(t.transitions.load(Ordering::SeqCst), 2);
        assert_eq!(t.rejects.load(Ordering::SeqCst), 1);
        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let o: ObserverHandle = Arc::new(NoopObserver);
        o.on_conversion_start("merge-pdf", 3);
    }
}
