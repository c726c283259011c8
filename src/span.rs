//! The mutable span data container.
//!
//! A [`MutableSpan`] is a passive holder for everything recorded about one
//! span before it is reported: name, kind, timestamps, tags, annotations and
//! error state. It carries no behavior beyond field access and the
//! [emptiness predicate](MutableSpan::is_empty), which the registry uses to
//! decide whether a reclaimed orphan is worth reporting at all.

/// The kind of span, used by backends to interpret the timing model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// The span covers a client-side remote call.
    Client,
    /// The span covers the server side of a remote call.
    Server,
    /// The span covers a message send.
    Producer,
    /// The span covers a message receive.
    Consumer,
}

/// Data recorded for one span while it is pending.
///
/// Instances are handed out by the registry and mutated directly by the
/// span's owner; the same instance is later passed to span handlers, so
/// handlers observe exactly what instrumentation recorded, with no copying.
///
/// This type does not synchronize anything. A span's data is expected to be
/// mutated by a single logical caller at a time; that discipline belongs to
/// the instrumentation layer above.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutableSpan {
    name: Option<String>,
    kind: Option<Kind>,
    start_timestamp: Option<u64>,
    finish_timestamp: Option<u64>,
    tags: Vec<(String, String)>,
    annotations: Vec<(u64, String)>,
    error: Option<String>,
    shared: bool,
}

impl MutableSpan {
    /// Returns a container with nothing set.
    pub fn new() -> Self {
        MutableSpan::default()
    }

    /// True if nothing was ever recorded on this span.
    ///
    /// The shared flag does not count: it is set by the registry when the
    /// identity itself is shared, before the owner records anything, and an
    /// untouched shared span is still an empty one.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.kind.is_none()
            && self.start_timestamp.is_none()
            && self.finish_timestamp.is_none()
            && self.tags.is_empty()
            && self.annotations.is_empty()
            && self.error.is_none()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    pub fn set_kind(&mut self, kind: Kind) {
        self.kind = Some(kind);
    }

    /// The start time in epoch microseconds, if started.
    pub fn start_timestamp(&self) -> Option<u64> {
        self.start_timestamp
    }

    pub fn set_start_timestamp(&mut self, micros: u64) {
        self.start_timestamp = Some(micros);
    }

    /// The finish time in epoch microseconds, if finished.
    pub fn finish_timestamp(&self) -> Option<u64> {
        self.finish_timestamp
    }

    pub fn set_finish_timestamp(&mut self, micros: u64) {
        self.finish_timestamp = Some(micros);
    }

    /// Tags recorded so far, in no particular order.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Sets a tag, replacing any previous value recorded under `key`.
    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.tags.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
            return;
        }
        self.tags.push((key, value));
    }

    /// Timestamped annotations, in recording order.
    pub fn annotations(&self) -> &[(u64, String)] {
        &self.annotations
    }

    /// Appends an annotation at `micros`.
    pub fn annotate(&mut self, micros: u64, value: impl Into<String>) {
        self.annotations.push((micros, value.into()));
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// True if this span's identity is shared with a remote side.
    pub fn shared(&self) -> bool {
        self.shared
    }

    pub fn set_shared(&mut self) {
        self.shared = true;
    }
}
