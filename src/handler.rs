//! Span lifecycle handlers.
//!
//! A [`SpanHandler`] observes spans as they move through their lifecycle:
//! once when allocated, and once when finished or abandoned. Handlers run
//! synchronously on the application thread that triggered the event, so they
//! must be fast, and they must never break the instrumented code — every
//! invocation made through a [`CompositeSpanHandler`] is individually
//! isolated: a panicking handler is caught and logged, and the remaining
//! handlers still run.
//!
//! Isolation uses [`std::panic::catch_unwind`], which intercepts unwinding
//! panics only. Process-fatal conditions (aborts, stack exhaustion, builds
//! with `panic = "abort"`) do not unwind and therefore propagate, which is
//! the intended behavior for unrecoverable errors.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::context::TraceContext;
use crate::span::MutableSpan;

/// Observes span lifecycle events.
///
/// All methods default to doing nothing, so implementations override only
/// the hooks they care about. The `context` passed to a hook compares equal
/// to the one used at creation, but on the orphan path it is a synthesized
/// value rebuilt from cached identity fields, so do not rely on pointer
/// identity across hooks.
pub trait SpanHandler: Send + Sync + 'static {
    /// Called when a span is allocated, before it is started.
    ///
    /// Every allocation is later reported through exactly one of
    /// [`on_finish`](SpanHandler::on_finish) or
    /// [`on_abandon`](SpanHandler::on_abandon). `parent` is `None` only for
    /// local roots.
    fn on_create(
        &self,
        parent: Option<&TraceContext>,
        context: &TraceContext,
        span: &mut MutableSpan,
    ) {
        let _ = (parent, context, span);
    }

    /// Called when a span is abandoned without finishing.
    ///
    /// Abandoned spans are not errors: instrumentation may speculatively
    /// allocate spans for outcomes such as retries.
    fn on_abandon(&self, context: &TraceContext, span: &mut MutableSpan) {
        let _ = (context, span);
    }

    /// Called when a span finishes, or when an orphan is reclaimed.
    ///
    /// Returning `false` vetoes the span: handlers later in the chain are
    /// not invoked and nothing is reported downstream.
    fn on_finish(&self, context: &TraceContext, span: &mut MutableSpan) -> bool {
        let _ = (context, span);
        true
    }

    /// True if this handler does nothing, letting callers skip dispatch
    /// entirely on hot paths.
    fn is_noop(&self) -> bool {
        false
    }
}

/// A [`SpanHandler`] that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSpanHandler;

impl SpanHandler for NoopSpanHandler {
    fn is_noop(&self) -> bool {
        true
    }
}

/// The shared no-op handler, used wherever no handler was configured.
pub fn noop() -> Arc<dyn SpanHandler> {
    static NOOP: Lazy<Arc<NoopSpanHandler>> = Lazy::new(|| Arc::new(NoopSpanHandler));
    let noop: Arc<dyn SpanHandler> = NOOP.clone();
    noop
}

/// An ordered chain of handlers behaving as one.
///
/// Create and abandon events reach every handler in list order, regardless
/// of panics or veto results. Finish events run in list order but stop at
/// the first veto; a panicking finish hook never counts as a veto.
///
/// The chain collapses at construction into one of three shapes — empty,
/// single, or fan-out — so the common zero-and-one-handler configurations
/// pay no iteration cost.
pub struct CompositeSpanHandler {
    chain: Chain,
}

enum Chain {
    Noop,
    Single(SafeHandler),
    Many(Box<[SafeHandler]>),
}

/// Wraps one handler so a panic inside it is caught and logged instead of
/// unwinding into instrumented application code.
struct SafeHandler {
    inner: Box<dyn SpanHandler>,
}

// === impl CompositeSpanHandler ===

impl CompositeSpanHandler {
    /// Collapses `handlers` into a single dispatcher.
    pub fn new(handlers: Vec<Box<dyn SpanHandler>>) -> Self {
        let mut safe: Vec<SafeHandler> = handlers
            .into_iter()
            .map(|inner| SafeHandler { inner })
            .collect();
        let chain = match safe.len() {
            0 => Chain::Noop,
            1 => Chain::Single(safe.pop().expect("len checked")),
            _ => Chain::Many(safe.into_boxed_slice()),
        };
        CompositeSpanHandler { chain }
    }

    /// Collapses `handlers` into one shared dispatcher, reusing the global
    /// no-op singleton when the list is empty.
    pub fn compose(handlers: Vec<Box<dyn SpanHandler>>) -> Arc<dyn SpanHandler> {
        if handlers.is_empty() {
            return noop();
        }
        Arc::new(CompositeSpanHandler::new(handlers))
    }
}

impl SpanHandler for CompositeSpanHandler {
    fn on_create(
        &self,
        parent: Option<&TraceContext>,
        context: &TraceContext,
        span: &mut MutableSpan,
    ) {
        match &self.chain {
            Chain::Noop => {}
            Chain::Single(handler) => handler.on_create(parent, context, span),
            Chain::Many(handlers) => {
                for handler in handlers.iter() {
                    handler.on_create(parent, context, span);
                }
            }
        }
    }

    fn on_abandon(&self, context: &TraceContext, span: &mut MutableSpan) {
        match &self.chain {
            Chain::Noop => {}
            Chain::Single(handler) => handler.on_abandon(context, span),
            Chain::Many(handlers) => {
                for handler in handlers.iter() {
                    handler.on_abandon(context, span);
                }
            }
        }
    }

    fn on_finish(&self, context: &TraceContext, span: &mut MutableSpan) -> bool {
        match &self.chain {
            Chain::Noop => true,
            Chain::Single(handler) => handler.on_finish(context, span),
            Chain::Many(handlers) => {
                for handler in handlers.iter() {
                    if !handler.on_finish(context, span) {
                        return false;
                    }
                }
                true
            }
        }
    }

    fn is_noop(&self) -> bool {
        matches!(self.chain, Chain::Noop)
    }
}

impl fmt::Debug for CompositeSpanHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match &self.chain {
            Chain::Noop => "Noop",
            Chain::Single(_) => "Single",
            Chain::Many(handlers) => return write!(f, "CompositeSpanHandler({})", handlers.len()),
        };
        write!(f, "CompositeSpanHandler({})", shape)
    }
}

// === impl SafeHandler ===

impl SafeHandler {
    fn on_create(
        &self,
        parent: Option<&TraceContext>,
        context: &TraceContext,
        span: &mut MutableSpan,
    ) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_create(parent, context, span)
        }));
        if let Err(payload) = result {
            log::warn!(
                "span handler panicked handling create for {}: {}",
                context,
                panic_message(&payload)
            );
        }
    }

    fn on_abandon(&self, context: &TraceContext, span: &mut MutableSpan) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_abandon(context, span)
        }));
        if let Err(payload) = result {
            log::warn!(
                "span handler panicked handling abandon for {}: {}",
                context,
                panic_message(&payload)
            );
        }
    }

    fn on_finish(&self, context: &TraceContext, span: &mut MutableSpan) -> bool {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_finish(context, span)
        }));
        match result {
            Ok(veto) => veto,
            Err(payload) => {
                log::warn!(
                    "span handler panicked handling finish for {}: {}",
                    context,
                    panic_message(&payload)
                );
                true
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
