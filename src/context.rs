//! Span identity.
//!
//! A [`TraceContext`] identifies one span within one trace. Contexts are
//! owned by the instrumentation layer and may be reconstructed at
//! propagation boundaries, so two separately-built values with the same
//! identity fields must behave as the same identity everywhere — equality
//! and hashing are defined over the value fields alone, never over object
//! identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

/// Identifies a span within a trace.
///
/// Equality and hashing cover `(trace_id_high, trace_id, span_id, shared)`:
/// the shared bit participates so that the client and server sides of a
/// joined span, which deliberately reuse one span id, still map to distinct
/// pending entries.
#[derive(Clone, Debug)]
pub struct TraceContext {
    trace_id_high: u64,
    trace_id: u64,
    span_id: u64,
    local_root_id: u64,
    parent_id: Option<u64>,
    sampled: Option<bool>,
    debug: bool,
    shared: bool,
}

/// Incrementally builds a [`TraceContext`].
#[derive(Clone, Debug, Default)]
pub struct Builder {
    trace_id_high: u64,
    trace_id: u64,
    span_id: u64,
    local_root_id: Option<u64>,
    parent_id: Option<u64>,
    sampled: Option<bool>,
    debug: bool,
    shared: bool,
}

/// Errors returned when a [`Builder`] describes an unusable identity.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum InvalidContext {
    /// Neither half of the 128-bit trace id was set.
    #[error("trace context requires a non-zero trace id")]
    MissingTraceId,
    /// The span id was zero.
    #[error("trace context requires a non-zero span id")]
    MissingSpanId,
}

// === impl TraceContext ===

impl TraceContext {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub(crate) fn from_parts(
        trace_id_high: u64,
        trace_id: u64,
        span_id: u64,
        local_root_id: u64,
        parent_id: Option<u64>,
        sampled: Option<bool>,
        debug: bool,
        shared: bool,
    ) -> Self {
        TraceContext {
            trace_id_high,
            trace_id,
            span_id,
            local_root_id,
            parent_id,
            sampled,
            debug,
            shared,
        }
    }

    /// The high 64 bits of the trace id, zero for 64-bit traces.
    pub fn trace_id_high(&self) -> u64 {
        self.trace_id_high
    }

    /// The low 64 bits of the trace id.
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// The span id of the first span in this process for this trace.
    pub fn local_root_id(&self) -> u64 {
        self.local_root_id
    }

    /// The parent span id, if the parent is known to this process.
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// True if this span began the trace inside this process.
    ///
    /// The trace itself may have started remotely; a local root only means
    /// no in-process parent exists.
    pub fn is_local_root(&self) -> bool {
        self.local_root_id == self.span_id
    }

    /// The sampling decision, if one was made upstream.
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// True if this trace was force-sampled for debugging.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// True if this span id is shared with a remote caller.
    pub fn shared(&self) -> bool {
        self.shared
    }
}

impl PartialEq for TraceContext {
    fn eq(&self, other: &Self) -> bool {
        self.trace_id_high == other.trace_id_high
            && self.trace_id == other.trace_id
            && self.span_id == other.span_id
            && self.shared == other.shared
    }
}

impl Eq for TraceContext {}

impl Hash for TraceContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.trace_id_high.hash(state);
        self.trace_id.hash(state);
        self.span_id.hash(state);
        self.shared.hash(state);
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trace_id_high != 0 {
            write!(f, "{:016x}", self.trace_id_high)?;
        }
        write!(f, "{:016x}/{:016x}", self.trace_id, self.span_id)
    }
}

// === impl Builder ===

impl Builder {
    pub fn trace_id_high(mut self, trace_id_high: u64) -> Self {
        self.trace_id_high = trace_id_high;
        self
    }

    pub fn trace_id(mut self, trace_id: u64) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn span_id(mut self, span_id: u64) -> Self {
        self.span_id = span_id;
        self
    }

    pub fn local_root_id(mut self, local_root_id: u64) -> Self {
        self.local_root_id = Some(local_root_id);
        self
    }

    pub fn parent_id(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Copies trace identity and local root from `parent` and parents the
    /// new span under it. The caller still assigns the span id.
    pub fn child_of(mut self, parent: &TraceContext) -> Self {
        self.trace_id_high = parent.trace_id_high;
        self.trace_id = parent.trace_id;
        self.local_root_id = Some(parent.local_root_id);
        self.parent_id = Some(parent.span_id);
        self
    }

    pub fn sampled(mut self, sampled: bool) -> Self {
        self.sampled = Some(sampled);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Validates the identity fields and builds the context.
    ///
    /// When no local root id was given, the span is treated as its own
    /// local root if parentless, and otherwise inherits nothing — pass
    /// [`child_of`](Builder::child_of) or an explicit id for children.
    pub fn build(self) -> Result<TraceContext, InvalidContext> {
        if self.trace_id_high == 0 && self.trace_id == 0 {
            return Err(InvalidContext::MissingTraceId);
        }
        if self.span_id == 0 {
            return Err(InvalidContext::MissingSpanId);
        }
        let local_root_id = self.local_root_id.unwrap_or(self.span_id);
        Ok(TraceContext {
            trace_id_high: self.trace_id_high,
            trace_id: self.trace_id,
            span_id: self.span_id,
            local_root_id,
            parent_id: self.parent_id,
            sampled: self.sampled,
            debug: self.debug,
            shared: self.shared,
        })
    }
}
