//! The pending-span registry.
//!
//! [`PendingSpans`] tracks every span that was allocated but not yet
//! finished or abandoned. It is a concurrent map from span identity to the
//! span's data and derived clock, shared by all application threads; the
//! atomic insert-if-absent on that map is what guarantees at most one live
//! entry per identity even when two sides of a joined span race to
//! materialize it.
//!
//! Entries are weakly held: the map stores a [`Weak`] pointer while callers
//! own the strong [`PendingSpan`] handles. When the last handle is dropped
//! without an explicit finish or abandon, the entry's data moves onto a
//! reclamation queue. There is no cleanup thread — the queue is drained
//! lazily at the start of every registry operation, on whichever caller
//! thread happens to arrive next, so the cost of tracing stays attributable
//! to instrumented call sites. Reclaimed spans with recorded data are
//! stamped with a `"spanline.flush"` annotation and reported to the
//! configured orphan handler; empty ones are dropped silently.

use std::backtrace::Backtrace;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock, TickClock};
use crate::context::TraceContext;
use crate::handler::{self, SpanHandler};
use crate::span::MutableSpan;

/// Annotation value stamped on orphans when they are force-flushed.
pub const FLUSH_ANNOTATION: &str = "spanline.flush";

/// Registry of spans that are allocated but not yet reported.
///
/// Cheap to share behind an `Arc`; every operation takes `&self` and is safe
/// to call from any number of threads.
pub struct PendingSpans {
    spans: DashMap<ContextKey, Weak<PendingSpanInner>>,
    clock: Arc<dyn Clock>,
    orphan_handler: Arc<dyn SpanHandler>,
    track_orphans: bool,
    noop: Arc<AtomicBool>,
    reclaim_tx: Sender<ReclaimedSpan>,
    reclaim_rx: Receiver<ReclaimedSpan>,
}

/// Configures a [`PendingSpans`] registry.
pub struct Builder {
    clock: Arc<dyn Clock>,
    orphan_handler: Arc<dyn SpanHandler>,
    track_orphans: bool,
    noop: Arc<AtomicBool>,
}

/// A strong handle on one pending entry.
///
/// Handles are cheap clones of one shared entry: every caller that looked up
/// the same identity holds the same entry, and equality between handles is
/// entry identity, not data equality. Dropping the last handle for an entry
/// that was never finished or abandoned queues it for orphan reclamation.
#[derive(Clone)]
pub struct PendingSpan {
    inner: Arc<PendingSpanInner>,
}

struct PendingSpanInner {
    cached: CachedContext,
    clock: TickClock,
    state: Mutex<MutableSpan>,
    detached: AtomicBool,
    allocation: Option<AllocationSite>,
    reclaim: Sender<ReclaimedSpan>,
}

/// What survives an entry whose last handle was dropped: the cached identity
/// fields (the original context handle is gone), the recorded data, and the
/// allocation-site diagnostic if one was captured.
struct ReclaimedSpan {
    cached: CachedContext,
    data: MutableSpan,
    allocation: Option<AllocationSite>,
}

/// Map key copied out of a [`TraceContext`].
///
/// Holds exactly the fields the context's own equality covers, so lookup
/// equality is symmetric plain value comparison on both sides — liveness of
/// the weakly-held entry never participates in key comparison.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct ContextKey {
    trace_id_high: u64,
    trace_id: u64,
    span_id: u64,
    shared: bool,
}

/// Everything needed to synthesize a placeholder context for an orphan
/// report. Non-identity fields live here rather than in [`ContextKey`] so
/// they cannot perturb map equality.
#[derive(Clone, Copy, Debug)]
struct CachedContext {
    key: ContextKey,
    local_root_id: u64,
    sampled: Option<bool>,
    debug: bool,
}

struct AllocationSite {
    thread: String,
    backtrace: Backtrace,
}

// === impl PendingSpans ===

impl PendingSpans {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Gets the pending entry for `context`, if one is live.
    ///
    /// Looking up an existing entry first is what keeps an externalized but
    /// already-known identity from being mistaken for a new local root.
    pub fn get(&self, context: &TraceContext) -> Option<PendingSpan> {
        self.report_orphaned_spans();
        self.lookup(context)
    }

    /// Returns the pending entry for `context`, allocating one if absent.
    ///
    /// A freshly allocated entry derives its clock from the parent's entry
    /// when the parent is still pending (the usual case), so only the first
    /// span of a local subtree reads the wall clock. When `start` is set,
    /// the start timestamp is recorded from the derived clock.
    ///
    /// Two threads racing to create the same identity both receive the one
    /// entry that won publication; the loser's allocation is discarded
    /// before any caller could observe it.
    pub fn get_or_create(
        &self,
        parent: Option<&TraceContext>,
        context: &TraceContext,
        start: bool,
    ) -> PendingSpan {
        if let Some(existing) = self.get(context) {
            return existing;
        }

        let mut data = MutableSpan::new();
        if context.shared() {
            data.set_shared();
        }

        let parent_span = parent.and_then(|parent| self.get(parent));

        // Reusing the parent's clock saves the wall-clock read.
        let clock;
        match parent_span.as_ref() {
            Some(parent_span) => {
                clock = parent_span.inner.clock;
                if start {
                    data.set_start_timestamp(clock.current_time_micros());
                }
            }
            None => {
                let epoch_micros = self.clock.current_time_micros();
                clock = TickClock::new(epoch_micros, Instant::now());
                if start {
                    data.set_start_timestamp(epoch_micros);
                }
            }
        }

        let allocation = if self.track_orphans {
            Some(AllocationSite::capture())
        } else {
            None
        };
        let inner = Arc::new(PendingSpanInner {
            cached: CachedContext::new(context),
            clock,
            state: Mutex::new(data),
            detached: AtomicBool::new(false),
            allocation,
            reclaim: self.reclaim_tx.clone(),
        });

        match self.spans.entry(inner.cached.key) {
            Entry::Occupied(mut occupied) => {
                if let Some(existing) = occupied.get().upgrade() {
                    // Lost the race. The fresh entry was never visible to
                    // any caller, so it must never surface as an orphan.
                    inner.detached.store(true, Ordering::Release);
                    return PendingSpan { inner: existing };
                }
                // A dead entry still queued for reclamation; displace it.
                occupied.insert(Arc::downgrade(&inner));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::downgrade(&inner));
            }
        }

        // It is a caller bug to allocate a context with neither a parent
        // nor a local root.
        debug_assert!(
            parent.is_some() || context.is_local_root(),
            "span {} created with no parent, but it is not a local root",
            context
        );

        PendingSpan { inner }
    }

    /// Detaches the entry for `context` without reporting it.
    ///
    /// Returns the detached entry so the layer above can run its abandon
    /// hooks. A detached entry is never reclaimed as an orphan, no matter
    /// when its handles drop.
    pub fn abandon(&self, context: &TraceContext) -> Option<PendingSpan> {
        let detached = self.detach(context);
        self.report_orphaned_spans();
        detached
    }

    /// Detaches the entry for `context`, returning whether a live one
    /// existed. Used on the explicit finish path.
    pub fn remove(&self, context: &TraceContext) -> bool {
        let detached = self.detach(context);
        self.report_orphaned_spans();
        detached.is_some()
    }

    /// The number of map entries, counting any not yet reclaimed.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    fn lookup(&self, context: &TraceContext) -> Option<PendingSpan> {
        let key = ContextKey::new(context);
        // A dead weak pointer is an entry awaiting reclamation: absent.
        let inner = self.spans.get(&key)?.upgrade()?;
        Some(PendingSpan { inner })
    }

    fn detach(&self, context: &TraceContext) -> Option<PendingSpan> {
        let key = ContextKey::new(context);
        let (_, weak) = self.spans.remove(&key)?;
        let inner = weak.upgrade()?;
        inner.detached.store(true, Ordering::Release);
        Some(PendingSpan { inner })
    }

    /// Drains the reclamation queue, reporting spans orphaned by dropped
    /// handles.
    ///
    /// This runs on the critical path of unrelated traced operations, so an
    /// empty queue returns immediately, a disabled registry skips per-entry
    /// work entirely, and the flush time is read once per batch rather than
    /// once per orphan.
    fn report_orphaned_spans(&self) {
        let noop = self.orphan_handler.is_noop() || self.noop.load(Ordering::Relaxed);
        let mut flush_time = None;
        while let Ok(reclaimed) = self.reclaim_rx.try_recv() {
            // The identity may already have been reused by a new span;
            // evict the map entry only while it is still dead.
            let _ = self
                .spans
                .remove_if(&reclaimed.cached.key, |_, weak| weak.strong_count() == 0);
            if noop {
                continue;
            }

            let ReclaimedSpan {
                cached,
                mut data,
                allocation,
            } = reclaimed;
            let is_empty = data.is_empty();
            let context = cached.synthesize();

            if let Some(allocation) = allocation {
                if is_empty {
                    log::warn!(
                        "span {} was allocated but never used; allocated by thread {} at\n{}",
                        context,
                        allocation.thread,
                        allocation.backtrace
                    );
                } else {
                    log::warn!(
                        "span {} was neither finished nor flushed before reclamation; \
                         allocated by thread {} at\n{}",
                        context,
                        allocation.thread,
                        allocation.backtrace
                    );
                }
            }
            if is_empty {
                continue;
            }

            let flush_time =
                *flush_time.get_or_insert_with(|| self.clock.current_time_micros());
            data.annotate(flush_time, FLUSH_ANNOTATION);
            self.report_orphan(&context, &mut data);
        }
    }

    /// Reclamation-path dispatch follows the same isolation policy as the
    /// explicit chain: a broken orphan handler must not corrupt the
    /// registry or stop the drain.
    fn report_orphan(&self, context: &TraceContext, data: &mut MutableSpan) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.orphan_handler.on_finish(context, data);
        }));
        if let Err(payload) = result {
            log::warn!(
                "orphan handler panicked flushing {}: {}",
                context,
                handler::panic_message(&payload)
            );
        }
    }
}

impl Default for PendingSpans {
    fn default() -> Self {
        PendingSpans::builder().build()
    }
}

impl fmt::Debug for PendingSpans {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSpans")
            .field("len", &self.spans.len())
            .field("track_orphans", &self.track_orphans)
            .field("noop", &self.noop.load(Ordering::Relaxed))
            .finish()
    }
}

// === impl Builder ===

impl Default for Builder {
    fn default() -> Self {
        Builder {
            clock: Arc::new(SystemClock),
            orphan_handler: handler::noop(),
            track_orphans: false,
            noop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Builder {
    /// The wall-clock source sampled when a local root allocates its
    /// [`TickClock`], and for orphan flush times.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The handler invoked with reclaimed, non-empty orphans.
    pub fn orphan_handler(mut self, orphan_handler: Arc<dyn SpanHandler>) -> Self {
        self.orphan_handler = orphan_handler;
        self
    }

    /// Captures an allocation-site backtrace on every created entry, logged
    /// when the entry is reclaimed instead of finished. Costly; meant for
    /// debugging instrumentation, not steady-state production.
    pub fn track_orphans(mut self, track_orphans: bool) -> Self {
        self.track_orphans = track_orphans;
        self
    }

    /// A kill switch shared with the rest of the tracer: while set, the
    /// reclamation path reports nothing, regardless of configured handlers.
    pub fn noop_switch(mut self, noop: Arc<AtomicBool>) -> Self {
        self.noop = noop;
        self
    }

    pub fn build(self) -> PendingSpans {
        let (reclaim_tx, reclaim_rx) = crossbeam_channel::unbounded();
        PendingSpans {
            spans: DashMap::new(),
            clock: self.clock,
            orphan_handler: self.orphan_handler,
            track_orphans: self.track_orphans,
            noop: self.noop,
            reclaim_tx,
            reclaim_rx,
        }
    }
}

// === impl PendingSpan ===

impl PendingSpan {
    /// The clock shared by this span's local subtree.
    pub fn clock(&self) -> &TickClock {
        &self.inner.clock
    }

    /// Runs `f` with exclusive access to the span's data.
    ///
    /// Every handle for an entry sees the one container; handlers invoked
    /// with it observe exactly what instrumentation recorded. The lock only
    /// guards the container's memory — interleaving of logically concurrent
    /// mutations is the caller's discipline.
    pub fn with_span<T>(&self, f: impl FnOnce(&mut MutableSpan) -> T) -> T {
        let mut state = self.inner.state.lock();
        f(&mut state)
    }
}

impl PartialEq for PendingSpan {
    /// Entry identity: two handles are equal when they refer to the same
    /// pending entry.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PendingSpan {}

impl fmt::Debug for PendingSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSpan")
            .field("context", &self.inner.cached.key)
            .finish()
    }
}

impl Drop for PendingSpanInner {
    fn drop(&mut self) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        // Last handle dropped without finish or abandon: move what we have
        // to the reclamation queue. Send on a closed channel only happens
        // when the registry itself is gone, and there is nobody left to
        // report to.
        let data = mem::take(self.state.get_mut());
        let allocation = self.allocation.take();
        let _ = self.reclaim.send(ReclaimedSpan {
            cached: self.cached,
            data,
            allocation,
        });
    }
}

// === impl ContextKey / CachedContext ===

impl ContextKey {
    fn new(context: &TraceContext) -> Self {
        ContextKey {
            trace_id_high: context.trace_id_high(),
            trace_id: context.trace_id(),
            span_id: context.span_id(),
            shared: context.shared(),
        }
    }
}

impl CachedContext {
    fn new(context: &TraceContext) -> Self {
        CachedContext {
            key: ContextKey::new(context),
            local_root_id: context.local_root_id(),
            sampled: context.sampled(),
            debug: context.debug(),
        }
    }

    /// Rebuilds a placeholder context for reporting. The parent id is gone
    /// with the original context and is deliberately left unset.
    fn synthesize(&self) -> TraceContext {
        TraceContext::from_parts(
            self.key.trace_id_high,
            self.key.trace_id,
            self.key.span_id,
            self.local_root_id,
            None,
            self.sampled,
            self.debug,
            self.key.shared,
        )
    }
}

impl AllocationSite {
    fn capture() -> Self {
        AllocationSite {
            thread: thread::current().name().unwrap_or("unnamed").to_owned(),
            backtrace: Backtrace::force_capture(),
        }
    }
}
