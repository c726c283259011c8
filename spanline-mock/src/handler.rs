//! A [`SpanHandler`] that records every invocation.
//!
//! All handlers made from one [`Recorder`] share one ordered log, so tests
//! covering multi-handler chains can assert on cross-handler ordering, not
//! just per-handler counts.

use std::sync::Arc;

use parking_lot::Mutex;

use spanline::{MutableSpan, SpanHandler, TraceContext};

/// Which lifecycle hook an [`Event`] was recorded from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Hook {
    Create,
    Abandon,
    Finish,
}

/// One recorded handler invocation.
#[derive(Clone, Debug)]
pub struct Event {
    /// The label of the handler that recorded this event.
    pub label: &'static str,
    pub hook: Hook,
    pub parent: Option<TraceContext>,
    pub context: TraceContext,
    /// The span data as it looked at dispatch time.
    pub span: MutableSpan,
}

/// Creates and inspects [`RecordingHandler`]s sharing one event log.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

/// A [`SpanHandler`] that logs its invocations to its [`Recorder`].
pub struct RecordingHandler {
    label: &'static str,
    events: Arc<Mutex<Vec<Event>>>,
    veto_finish: bool,
    panic_on: Option<Hook>,
}

/// Returns a fresh recorder with an empty log.
pub fn recorder() -> Recorder {
    Recorder::default()
}

// === impl Recorder ===

impl Recorder {
    /// Makes a handler that records into this recorder's log as `label`.
    pub fn handler(&self, label: &'static str) -> RecordingHandler {
        RecordingHandler {
            label,
            events: self.events.clone(),
            veto_finish: false,
            panic_on: None,
        }
    }

    /// Everything recorded so far, in dispatch order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// The handler labels of the recorded events, in dispatch order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|event| event.label).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

// === impl RecordingHandler ===

impl RecordingHandler {
    /// Makes the finish hook veto after recording.
    pub fn veto_finish(mut self) -> Self {
        self.veto_finish = true;
        self
    }

    /// Makes the given hook panic after recording, for isolation tests.
    pub fn panic_on(mut self, hook: Hook) -> Self {
        self.panic_on = Some(hook);
        self
    }

    /// Boxes the handler for [`CompositeSpanHandler::compose`].
    ///
    /// [`CompositeSpanHandler::compose`]: spanline::CompositeSpanHandler::compose
    pub fn into_boxed(self) -> Box<dyn SpanHandler> {
        Box::new(self)
    }

    /// Wraps the handler for registry configuration.
    pub fn into_arc(self) -> Arc<dyn SpanHandler> {
        Arc::new(self)
    }

    fn record(
        &self,
        hook: Hook,
        parent: Option<&TraceContext>,
        context: &TraceContext,
        span: &MutableSpan,
    ) {
        self.events.lock().push(Event {
            label: self.label,
            hook,
            parent: parent.cloned(),
            context: context.clone(),
            span: span.clone(),
        });
        if self.panic_on == Some(hook) {
            panic!("mock handler {} panicked on {:?}", self.label, hook);
        }
    }
}

impl SpanHandler for RecordingHandler {
    fn on_create(
        &self,
        parent: Option<&TraceContext>,
        context: &TraceContext,
        span: &mut MutableSpan,
    ) {
        self.record(Hook::Create, parent, context, span);
    }

    fn on_abandon(&self, context: &TraceContext, span: &mut MutableSpan) {
        self.record(Hook::Abandon, None, context, span);
    }

    fn on_finish(&self, context: &TraceContext, span: &mut MutableSpan) -> bool {
        self.record(Hook::Finish, None, context, span);
        !self.veto_finish
    }
}
