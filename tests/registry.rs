use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use spanline::registry::FLUSH_ANNOTATION;
use spanline::{PendingSpans, TraceContext};
use spanline_mock::clock::MockClock;
use spanline_mock::handler::{self, Hook};

fn root_context(trace_id: u64) -> TraceContext {
    TraceContext::builder()
        .trace_id(trace_id)
        .span_id(trace_id)
        .build()
        .unwrap()
}

#[test]
fn racing_creators_share_one_entry() {
    let registry = Arc::new(PendingSpans::default());
    let context = root_context(1);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let context = context.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.get_or_create(None, &context, true)
            })
        })
        .collect();

    let spans: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(registry.len(), 1);
    for span in &spans[1..] {
        assert_eq!(*span, spans[0]);
    }
}

#[test]
fn race_losers_never_surface_as_orphans() {
    let recorder = handler::recorder();
    let registry = Arc::new(
        PendingSpans::builder()
            .orphan_handler(recorder.handler("orphans").into_arc())
            .build(),
    );
    let context = root_context(1);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let context = context.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let span = registry.get_or_create(None, &context, false);
                span.with_span(|span| span.tag("raced", "true"));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // All strong handles are gone; the single surviving entry is reclaimed,
    // and the discarded racer allocations must contribute nothing.
    assert!(registry.get(&context).is_none());
    assert_eq!(recorder.labels(), ["orphans"]);
}

#[test]
fn start_records_the_wall_sample_for_roots() {
    let clock = MockClock::at(1_000_000);
    let registry = PendingSpans::builder().clock(clock.clone()).build();

    let root = registry.get_or_create(None, &root_context(1), true);

    assert_eq!(
        root.with_span(|span| span.start_timestamp()),
        Some(1_000_000)
    );
    assert_eq!(clock.reads(), 1);
}

#[test]
fn child_reuses_the_parent_clock_without_a_wall_read() {
    let clock = MockClock::at(1_000_000);
    let registry = PendingSpans::builder().clock(clock.clone()).build();

    let parent = root_context(1);
    let _parent_span = registry.get_or_create(None, &parent, true);
    assert_eq!(clock.reads(), 1);

    let child = TraceContext::builder()
        .child_of(&parent)
        .span_id(2)
        .build()
        .unwrap();
    let child_span = registry.get_or_create(Some(&parent), &child, true);

    // The child started from the derived clock, not the wall clock.
    assert_eq!(clock.reads(), 1);
    assert!(child_span.with_span(|span| span.start_timestamp()).unwrap() >= 1_000_000);
}

#[test]
fn end_to_end_root_and_child() {
    let clock = MockClock::at(1_000_000);
    let recorder = handler::recorder();
    let chain = spanline::CompositeSpanHandler::compose(vec![recorder
        .handler("reporter")
        .into_boxed()]);
    let registry = PendingSpans::builder().clock(clock.clone()).build();

    let root = root_context(1);
    let root_span = registry.get_or_create(None, &root, true);
    assert_eq!(clock.reads(), 1);
    assert_eq!(
        root_span.with_span(|span| span.start_timestamp()),
        Some(1_000_000)
    );

    let child = TraceContext::builder()
        .child_of(&root)
        .span_id(2)
        .build()
        .unwrap();
    let child_span = registry.get_or_create(Some(&root), &child, true);

    // The child derived its clock from the root's entry: no new wall read.
    assert_eq!(clock.reads(), 1);

    // Finish child first, then root, dispatching through the chain.
    for (context, span) in [(&child, &child_span), (&root, &root_span)] {
        assert!(registry.remove(context));
        span.with_span(|span| {
            span.set_finish_timestamp(span.start_timestamp().unwrap() + 10);
            chain.on_finish(context, span)
        });
    }

    assert!(registry.is_empty());
    let events = recorder.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].hook, Hook::Finish);
    assert_eq!(events[0].context, child);
    assert_eq!(events[1].context, root);
}

#[test]
fn orphan_is_reported_exactly_once() {
    let clock = MockClock::at(5_000_000);
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .clock(clock.clone())
        .orphan_handler(recorder.handler("orphans").into_arc())
        .build();

    let context = root_context(1);
    let span = registry.get_or_create(None, &context, false);
    span.with_span(|span| span.set_name("leaked"));
    drop(span);

    // Any unrelated registry call drains; repeated calls must not repeat
    // the report.
    assert!(registry.get(&root_context(2)).is_none());
    assert!(registry.get(&root_context(2)).is_none());
    assert!(!registry.remove(&context));

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].hook, Hook::Finish);
    assert_eq!(events[0].context, context);
    assert_eq!(events[0].span.name(), Some("leaked"));
    assert!(events[0]
        .span
        .annotations()
        .contains(&(5_000_000, FLUSH_ANNOTATION.to_string())));
}

#[test]
fn removing_a_dead_entry_is_absent_but_the_orphan_still_reports() {
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .orphan_handler(recorder.handler("orphans").into_arc())
        .build();

    let context = root_context(1);
    let span = registry.get_or_create(None, &context, false);
    span.with_span(|span| span.set_name("leaked"));
    drop(span);

    // Detach runs before the drain, so it finds the dead weak entry under
    // the key. The entry must count as absent: its reclamation record is
    // already queued and will deliver the one and only report.
    assert!(!registry.remove(&context));

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].hook, Hook::Finish);
    assert_eq!(events[0].context, context);
    assert!(registry.is_empty());

    // Later drains have nothing left for this identity.
    assert!(registry.get(&context).is_none());
    assert_eq!(recorder.len(), 1);
}

#[test]
fn empty_orphan_is_dropped_silently() {
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .orphan_handler(recorder.handler("orphans").into_arc())
        .build();

    let context = root_context(1);
    drop(registry.get_or_create(None, &context, false));
    assert!(registry.get(&context).is_none());

    assert!(recorder.is_empty());
}

#[test]
fn untouched_shared_span_counts_as_empty() {
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .orphan_handler(recorder.handler("orphans").into_arc())
        .build();

    let shared = TraceContext::builder()
        .trace_id(1)
        .span_id(1)
        .shared(true)
        .build()
        .unwrap();
    drop(registry.get_or_create(None, &shared, false));
    assert!(registry.get(&shared).is_none());

    assert!(recorder.is_empty());
}

#[test]
fn abandoned_entry_is_never_reclaimed() {
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .orphan_handler(recorder.handler("orphans").into_arc())
        .build();

    let context = root_context(1);
    let span = registry.get_or_create(None, &context, true);
    span.with_span(|span| span.set_name("speculative"));

    let abandoned = registry.abandon(&context).expect("was live");
    drop(abandoned);
    drop(span);

    assert!(registry.get(&context).is_none());
    assert!(recorder.is_empty());
}

#[test]
fn kill_switch_suppresses_reclamation_reporting() {
    let noop = Arc::new(AtomicBool::new(false));
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .orphan_handler(recorder.handler("orphans").into_arc())
        .noop_switch(noop.clone())
        .build();

    noop.store(true, Ordering::Relaxed);

    let context = root_context(1);
    let span = registry.get_or_create(None, &context, true);
    span.with_span(|span| span.set_name("invisible"));
    drop(span);

    assert!(registry.get(&context).is_none());
    assert!(recorder.is_empty());
    // The stale map entry was still evicted.
    assert!(registry.is_empty());
}

#[test]
fn reused_identity_is_an_unrelated_entry() {
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .orphan_handler(recorder.handler("orphans").into_arc())
        .build();

    let context = root_context(1);
    let first = registry.get_or_create(None, &context, false);
    first.with_span(|span| span.tag("incarnation", "first"));
    drop(first);

    // Creation drains first, so the dead entry is reported and the reused
    // identity starts clean.
    let second = registry.get_or_create(None, &context, false);
    assert!(second.with_span(|span| span.tags().is_empty()));
    assert_eq!(recorder.len(), 1);

    assert!(registry.remove(&context));
    assert_eq!(recorder.len(), 1);
}

#[test]
fn flush_time_is_read_once_per_drain_batch() {
    let clock = MockClock::at(9_000_000);
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .clock(clock.clone())
        .orphan_handler(recorder.handler("orphans").into_arc())
        .build();

    for trace_id in 1..=3 {
        let context = root_context(trace_id);
        let span = registry.get_or_create(None, &context, false);
        span.with_span(|span| span.set_name("leaked"));
        drop(span);
    }
    let creation_reads = clock.reads();
    assert_eq!(creation_reads, 3);

    assert!(registry.get(&root_context(9)).is_none());

    let events = recorder.events();
    assert_eq!(events.len(), 3);
    // One wall read covered the whole batch, and every orphan got the same
    // flush time.
    assert_eq!(clock.reads(), creation_reads + 1);
    for event in &events {
        assert!(event
            .span
            .annotations()
            .contains(&(9_000_000, FLUSH_ANNOTATION.to_string())));
    }
}

#[test]
fn panicking_orphan_handler_does_not_stop_the_drain() {
    let recorder = handler::recorder();
    let registry = PendingSpans::builder()
        .orphan_handler(recorder.handler("orphans").panic_on(Hook::Finish).into_arc())
        .build();

    for trace_id in 1..=2 {
        let context = root_context(trace_id);
        let span = registry.get_or_create(None, &context, false);
        span.with_span(|span| span.set_name("leaked"));
        drop(span);
    }

    assert!(registry.get(&root_context(9)).is_none());

    // Both orphans reached the handler despite the first panic, and the
    // registry is still usable.
    assert_eq!(recorder.len(), 2);
    let context = root_context(3);
    let _span = registry.get_or_create(None, &context, true);
    assert!(registry.remove(&context));
}
