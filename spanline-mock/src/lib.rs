//! Utilities for testing [`spanline`] and crates that use it.
//!
//! This crate provides controllable stand-ins for the two interfaces
//! `spanline` consumes: [`clock::MockClock`], a wall clock that only moves
//! when told to, and [`handler::RecordingHandler`], a span handler that
//! appends every invocation to a shared, ordered log and can be configured
//! to veto or panic on chosen hooks.
//!
//! ```
//! use spanline::{PendingSpans, TraceContext};
//! use spanline_mock::handler;
//!
//! let recorder = handler::recorder();
//! let registry = PendingSpans::builder()
//!     .orphan_handler(recorder.handler("orphans").into_arc())
//!     .build();
//!
//! let context = TraceContext::builder().trace_id(1).span_id(1).build().unwrap();
//! let pending = registry.get_or_create(None, &context, true);
//! pending.with_span(|span| span.set_name("doomed"));
//! drop(pending);
//!
//! // The next registry operation drains the reclamation queue.
//! assert!(registry.get(&context).is_none());
//! assert_eq!(recorder.labels(), ["orphans"]);
//! ```

pub mod clock;
pub mod handler;
