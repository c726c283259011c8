//! Span-lifecycle core for distributed-tracing instrumentation.
//!
//! `spanline` tracks spans from allocation through completion. It is the
//! layer an instrumentation front end builds on, not a complete tracer:
//! identity generation, propagation encoding, sampling, and transport all
//! live above or beside it. What lives here is the part that needs real
//! concurrency and lifetime reasoning:
//!
//! - **[`registry::PendingSpans`]** — a concurrent registry holding at most
//!   one live entry per span identity, with spans that were allocated but
//!   never closed detected through drop-driven reclamation instead of a
//!   polling thread.
//! - **[`clock::TickClock`]** — one wall-clock sample per local trace
//!   subtree, amortized into cheap monotonic timestamp queries for every
//!   descendant span.
//! - **[`handler::CompositeSpanHandler`]** — ordered fan-out of lifecycle
//!   events to observer chains, with each invocation isolated so a broken
//!   observer cannot crash instrumented application code.
//!
//! # Lifecycle
//!
//! Instrumentation calls [`PendingSpans::get_or_create`] with the span's
//! identity (a [`TraceContext`]) and, where known, its parent's. The
//! registry returns a [`PendingSpan`] handle whose [`MutableSpan`] data the
//! owner mutates directly. On finish or abandon, the caller detaches the
//! entry with [`PendingSpans::remove`] or [`PendingSpans::abandon`] and runs
//! its handler chain. If instead every handle for an entry is dropped
//! without either call — an instrumentation bug — the next registry
//! operation on any thread reclaims it: non-empty orphans are stamped with
//! a flush annotation and delivered to the configured orphan handler, empty
//! ones are dropped.
//!
//! All of this runs synchronously on application threads. There is no
//! background thread to schedule, and no work happens that is not
//! attributable to an instrumented call site.
//!
//! # Example
//!
//! ```
//! use spanline::{Clock, CompositeSpanHandler, PendingSpans, SpanHandler, TraceContext};
//!
//! let registry = PendingSpans::builder().build();
//! let handlers = CompositeSpanHandler::compose(Vec::new());
//!
//! let root = TraceContext::builder().trace_id(1).span_id(1).build()?;
//! let pending = registry.get_or_create(None, &root, true);
//! pending.with_span(|span| span.set_name("get /users"));
//!
//! if registry.remove(&root) {
//!     pending.with_span(|span| {
//!         span.set_finish_timestamp(pending.clock().current_time_micros());
//!         handlers.on_finish(&root, span)
//!     });
//! }
//! # Ok::<(), spanline::InvalidContext>(())
//! ```
//!
//! [`PendingSpans::get_or_create`]: registry::PendingSpans::get_or_create
//! [`PendingSpans::remove`]: registry::PendingSpans::remove
//! [`PendingSpans::abandon`]: registry::PendingSpans::abandon
//! [`PendingSpan`]: registry::PendingSpan
//! [`MutableSpan`]: span::MutableSpan
//! [`TraceContext`]: context::TraceContext

pub mod clock;
pub mod context;
pub mod handler;
pub mod registry;
pub mod span;

pub use self::clock::{Clock, SystemClock, TickClock};
pub use self::context::{InvalidContext, TraceContext};
pub use self::handler::{CompositeSpanHandler, NoopSpanHandler, SpanHandler};
pub use self::registry::{PendingSpan, PendingSpans};
pub use self::span::{Kind, MutableSpan};
