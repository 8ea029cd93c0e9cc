//! The conversion widget: one parameterized state machine per open tool.
//!
//! ```text
//!            select            convert             ok
//!   Idle ───────────▶ FileSelected ───────▶ Converting ───────▶ Ready
//!    ▲                    ▲  ▲                  │  err/timeout     │
//!    │                    │  └──── convert ─────┼──────────────────┤ (re-run)
//!    │                    │                     ▼                  │
//!    │                    └──── select ──── Failed ◀───────────────┘
//!    │
//!    └──────── reset (from any state; cancels an in-flight conversion)
//! ```
//!
//! ## Invariants
//!
//! * At most one conversion in flight. `convert()` while `Converting` returns
//!   [`WidgetError::Busy`] without invoking the adapter.
//! * At most one live result. Its object references are released when a new
//!   conversion starts, on select, reset, close and drop.
//! * A reset during a conversion wins: the late result is discarded without
//!   ever creating references, and the awaiting `convert()` returns
//!   [`WidgetError::Cancelled`].
//! * Dropping a `convert()` future before it settles cancels the adapter and
//!   leaves the widget in `Failed` with [`ConversionError::Cancelled`], so the
//!   slot is free for a retry.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`. The only suspension point is the adapter call inside
//! [`Widget::convert`]; a generation counter tells the resumed call whether
//! it still owns the widget.

use crate::adapter::ConversionContext;
use crate::error::{ConversionError, ValidationError, WidgetError};
use crate::export::{LiveResult, ResultExporter};
use crate::output::{ConversionResult, ResultSummary};
use crate::platform::Platform;
use crate::progress::{NoopObserver, ObserverHandle};
use crate::registry::{InputArity, ToolDescriptor};
use crate::upload::{validate, validate_all, FileCandidate, SourceFile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle state of a widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetState {
    Idle,
    FileSelected,
    Converting,
    Ready,
    Failed,
}

impl fmt::Display for WidgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WidgetState::Idle => "idle",
            WidgetState::FileSelected => "file selected",
            WidgetState::Converting => "converting",
            WidgetState::Ready => "ready",
            WidgetState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct Inner {
    state: WidgetState,
    sources: Vec<SourceFile>,
    live: Option<LiveResult>,
    error: Option<ConversionError>,
    generation: u64,
    cancel: Option<CancellationToken>,
    closed: bool,
}

impl Inner {
    /// Drop the live result, if any, releasing its references.
    fn release_live(&mut self, platform: &dyn Platform) {
        if let Some(live) = self.live.take() {
            live.release(platform);
        }
    }

    /// Cancel an in-flight conversion and invalidate its generation.
    fn abandon_conversion(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.generation += 1;
    }
}

/// Fails the widget with `Cancelled` when a `convert()` future is dropped
/// before the adapter settles.
struct ConversionGuard<'w> {
    widget: &'w Widget,
    generation: u64,
    token: CancellationToken,
    armed: bool,
}

impl ConversionGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConversionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.token.cancel();
        let w = self.widget;
        let mut inner = w.lock();
        if inner.closed || inner.generation != self.generation {
            return;
        }
        inner.abandon_conversion();
        inner.error = Some(ConversionError::Cancelled);
        inner.state = WidgetState::Failed;
        drop(inner);

        warn!("[{}] conversion dropped before completion", w.descriptor.id);
        w.observer.on_conversion_error(&w.descriptor.id, &ConversionError::Cancelled);
        w.notify(WidgetState::Converting, WidgetState::Failed);
    }
}

/// One tool's widget.
///
/// All operations take `&self`; share a widget across tasks with `Arc`.
pub struct Widget {
    descriptor: Arc<ToolDescriptor>,
    platform: Arc<dyn Platform>,
    exporter: ResultExporter,
    observer: ObserverHandle,
    default_timeout: Duration,
    inner: Mutex<Inner>,
}

impl Widget {
    /// A fresh widget in `Idle`. `default_timeout` applies when the
    /// descriptor has no override.
    pub fn new(descriptor: Arc<ToolDescriptor>, platform: Arc<dyn Platform>, default_timeout: Duration) -> Self {
        Self {
            exporter: ResultExporter::new(platform.clone()),
            descriptor,
            platform,
            observer: Arc::new(NoopObserver),
            default_timeout,
            inner: Mutex::new(Inner {
                state: WidgetState::Idle,
                sources: Vec::new(),
                live: None,
                error: None,
                generation: 0,
                cancel: None,
                closed: false,
            }),
        }
    }

    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.observer = observer;
        self
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub fn tool_id(&self) -> &str {
        &self.descriptor.id
    }

    /// The timeout this widget applies to each conversion.
    pub fn timeout(&self) -> Duration {
        self.descriptor.timeout.unwrap_or(self.default_timeout)
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn state(&self) -> WidgetState {
        self.lock().state
    }

    /// The stored failure while `Failed`.
    pub fn error(&self) -> Option<ConversionError> {
        self.lock().error.clone()
    }

    /// Pending sources, in order.
    pub fn sources(&self) -> Vec<SourceFile> {
        self.lock().sources.clone()
    }

    /// The live result while `Ready`. Payloads are shared, not copied.
    pub fn result(&self) -> Option<ConversionResult> {
        self.lock().live.as_ref().map(|l| l.result().clone())
    }

    pub fn summary(&self) -> Option<ResultSummary> {
        self.lock().live.as_ref().map(|l| ResultSummary::from(l.result()))
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Offer files to the widget.
    ///
    /// Single-input tools keep only the first candidate, replacing any
    /// pending file. Multi-input tools append the whole batch or nothing.
    /// A rejected selection leaves the widget exactly as it was. An empty
    /// selection is a no-op.
    pub fn select(&self, candidates: Vec<FileCandidate>) -> Result<WidgetState, WidgetError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(WidgetError::Closed);
        }
        if inner.state == WidgetState::Converting {
            return Err(WidgetError::Busy);
        }
        if candidates.is_empty() {
            return Ok(inner.state);
        }

        let d = &self.descriptor;
        let accepted = match d.arity {
            InputArity::Single => {
                let first = candidates.into_iter().next().map(|c| validate(c, &d.accepted, d.max_size_bytes));
                match first {
                    Some(Ok(source)) => Ok(vec![source]),
                    Some(Err(e)) => Err(e),
                    None => Ok(Vec::new()),
                }
            }
            InputArity::Multiple { max, .. } => {
                let incoming = candidates.len();
                let total = inner.sources.len() + incoming;
                if total > max {
                    Err(ValidationError::TooManyFiles { actual: total, limit: max })
                } else {
                    validate_all(candidates, &d.accepted, d.max_size_bytes)
                }
            }
        };

        let accepted = match accepted {
            Ok(a) => a,
            Err(e) => {
                drop(inner);
                debug!("[{}] selection rejected: {}", d.id, e);
                self.observer.on_validation_error(&d.id, &e);
                return Err(WidgetError::Validation(e));
            }
        };

        let from = inner.state;
        inner.release_live(self.platform.as_ref());
        inner.error = None;
        match d.arity {
            InputArity::Single => inner.sources = accepted,
            InputArity::Multiple { .. } => inner.sources.extend(accepted),
        }
        inner.state = WidgetState::FileSelected;
        let count = inner.sources.len();
        drop(inner);

        debug!("[{}] {} file(s) pending", d.id, count);
        self.notify(from, WidgetState::FileSelected);
        Ok(WidgetState::FileSelected)
    }

    /// Remove a pending source. An emptied list returns the widget to `Idle`.
    pub fn remove_source(&self, index: usize) -> Result<WidgetState, WidgetError> {
        self.edit_sources(|sources| {
            let len = sources.len();
            if index >= len {
                return Err(WidgetError::SourceIndex { index, len });
            }
            sources.remove(index);
            Ok(())
        })
    }

    /// Move a pending source from one position to another.
    pub fn move_source(&self, from: usize, to: usize) -> Result<WidgetState, WidgetError> {
        self.edit_sources(|sources| {
            let len = sources.len();
            for index in [from, to] {
                if index >= len {
                    return Err(WidgetError::SourceIndex { index, len });
                }
            }
            let item = sources.remove(from);
            sources.insert(to, item);
            Ok(())
        })
    }

    fn edit_sources(
        &self,
        edit: impl FnOnce(&mut Vec<SourceFile>) -> Result<(), WidgetError>,
    ) -> Result<WidgetState, WidgetError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(WidgetError::Closed);
        }
        if inner.state == WidgetState::Converting {
            return Err(WidgetError::Busy);
        }
        edit(&mut inner.sources)?;

        let from = inner.state;
        inner.release_live(self.platform.as_ref());
        inner.error = None;
        let to = if inner.sources.is_empty() {
            WidgetState::Idle
        } else {
            WidgetState::FileSelected
        };
        inner.state = to;
        drop(inner);

        self.notify(from, to);
        Ok(to)
    }

    /// Run the adapter over the pending sources.
    ///
    /// Returns the state the conversion ended in (`Ready` or `Failed`);
    /// conversion failures are stored in the widget, not returned. Errors are
    /// reserved for calls the widget refuses (`Busy`, `NothingSelected`,
    /// `TooFewFiles`, `Closed`) and for conversions abandoned by
    /// [`Widget::reset`] or [`Widget::close`] (`Cancelled`).
    pub async fn convert(&self) -> Result<WidgetState, WidgetError> {
        let d = self.descriptor.clone();

        let (from, sources, token, generation) = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(WidgetError::Closed);
            }
            match inner.state {
                WidgetState::Converting => return Err(WidgetError::Busy),
                WidgetState::Idle => return Err(WidgetError::NothingSelected),
                _ => {}
            }
            if let InputArity::Multiple { min, .. } = d.arity {
                if inner.sources.len() < min {
                    let e = ValidationError::TooFewFiles {
                        actual: inner.sources.len(),
                        required: min,
                    };
                    drop(inner);
                    self.observer.on_validation_error(&d.id, &e);
                    return Err(WidgetError::Validation(e));
                }
            }

            let from = inner.state;
            inner.release_live(self.platform.as_ref());
            inner.error = None;
            inner.generation += 1;
            let token = CancellationToken::new();
            inner.cancel = Some(token.clone());
            inner.state = WidgetState::Converting;
            (from, inner.sources.clone(), token, inner.generation)
        };

        self.notify(from, WidgetState::Converting);
        self.observer.on_conversion_start(&d.id, sources.len());
        info!("[{}] converting {} file(s)", d.id, sources.len());

        let timeout = self.timeout();
        let ctx = ConversionContext::new(token.clone());
        let started = Instant::now();
        let guard = ConversionGuard {
            widget: self,
            generation,
            token: token.clone(),
            armed: true,
        };
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ConversionError::Cancelled),
            r = tokio::time::timeout(timeout, d.adapter().convert(&sources, &ctx)) => match r {
                Ok(r) => r,
                Err(_) => {
                    token.cancel();
                    Err(ConversionError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    })
                }
            },
        };
        guard.disarm();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut inner = self.lock();
        if inner.closed || inner.generation != generation {
            debug!("[{}] discarding result of abandoned conversion", d.id);
            return Err(WidgetError::Cancelled);
        }
        inner.cancel = None;

        let outcome = outcome.and_then(|result| {
            LiveResult::register(result, self.platform.as_ref())
                .map_err(|e| ConversionError::downstream(format!("could not publish result: {e}")))
        });

        let to = match outcome {
            Ok(live) => {
                let artifacts = live.result().artifacts().len();
                inner.live = Some(live);
                inner.state = WidgetState::Ready;
                drop(inner);
                info!("[{}] ready: {} file(s) in {}ms", d.id, artifacts, elapsed_ms);
                self.observer.on_conversion_complete(&d.id, artifacts, elapsed_ms);
                WidgetState::Ready
            }
            Err(e) => {
                inner.error = Some(e.clone());
                inner.state = WidgetState::Failed;
                drop(inner);
                warn!("[{}] conversion failed: {}", d.id, e);
                self.observer.on_conversion_error(&d.id, &e);
                WidgetState::Failed
            }
        };
        self.notify(WidgetState::Converting, to);
        Ok(to)
    }

    /// Return to `Idle`: cancel any in-flight conversion, release the live
    /// result and clear sources and errors. A no-op on a fresh widget.
    pub fn reset(&self) -> Result<(), WidgetError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(WidgetError::Closed);
        }
        let from = inner.state;
        if from == WidgetState::Idle && inner.sources.is_empty() {
            return Ok(());
        }
        self.clear(&mut inner);
        drop(inner);

        debug!("[{}] reset from {}", self.descriptor.id, from);
        self.notify(from, WidgetState::Idle);
        Ok(())
    }

    /// Tear the widget down. Further calls fail with `Closed`. Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        let from = inner.state;
        self.clear(&mut inner);
        inner.closed = true;
        drop(inner);

        debug!("[{}] closed", self.descriptor.id);
        self.notify(from, WidgetState::Idle);
    }

    /// Save every artifact of the live result through the platform.
    pub fn export(&self) -> Result<usize, WidgetError> {
        let inner = self.lock();
        if inner.closed {
            return Err(WidgetError::Closed);
        }
        match (&inner.state, &inner.live) {
            (WidgetState::Ready, Some(live)) => Ok(self.exporter.export(live)?),
            _ => Err(WidgetError::NotReady),
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn clear(&self, inner: &mut Inner) {
        inner.abandon_conversion();
        inner.release_live(self.platform.as_ref());
        inner.sources.clear();
        inner.error = None;
        inner.state = WidgetState::Idle;
    }

    fn notify(&self, from: WidgetState, to: WidgetState) {
        if from != to {
            self.observer.on_state_change(&self.descriptor.id, from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Widget {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return;
        }
        inner.abandon_conversion();
        if let Some(live) = inner.live.take() {
            live.release(self.platform.as_ref());
        }
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Widget")
            .field("tool", &self.descriptor.id)
            .field("state", &inner.state)
            .field("sources", &inner.sources.len())
            .finish()
    }
}
