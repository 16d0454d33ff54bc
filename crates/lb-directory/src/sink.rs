//! Streaming result delivery and cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use lb_model::{sort_by_label, EntryRecord};
use parking_lot::Mutex;

/// Push-style consumer of query results.
///
/// Entries arrive in server order. [`reset`](ResultSink::reset) means
/// everything delivered so far is void and the operation starts over (after
/// a size-limit restart in paged mode, or a reconnect).
pub trait ResultSink: Send {
    /// Receives one entry.
    fn add_entry(&mut self, entry: EntryRecord);

    /// Discards all entries received so far.
    fn reset(&mut self);
}

impl<T: ResultSink + ?Sized> ResultSink for &mut T {
    fn add_entry(&mut self, entry: EntryRecord) {
        (**self).add_entry(entry);
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}

/// Sink that accumulates entries, used for batch operations.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Vec<EntryRecord>,
    resets: usize,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries received since the last reset, in arrival order.
    #[must_use]
    pub fn entries(&self) -> &[EntryRecord] {
        &self.entries
    }

    /// How many times the sink was reset.
    #[must_use]
    pub const fn resets(&self) -> usize {
        self.resets
    }

    /// Consumes the sink, returning entries in arrival order.
    #[must_use]
    pub fn into_entries(self) -> Vec<EntryRecord> {
        self.entries
    }

    /// Consumes the sink, returning entries sorted by label.
    #[must_use]
    pub fn into_sorted(self) -> Vec<EntryRecord> {
        let mut entries = self.entries;
        sort_by_label(&mut entries);
        entries
    }
}

impl ResultSink for CollectingSink {
    fn add_entry(&mut self, entry: EntryRecord) {
        self.entries.push(entry);
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.resets += 1;
    }
}

type CancelListener = Box<dyn FnOnce() + Send>;

/// Cancellation state of one streaming operation.
///
/// Share it (usually in an `Arc`) between the code running the query and
/// the code that may abort it. The engine checks it between pages and
/// before delivering each entry.
#[derive(Default)]
pub struct SearchContext {
    canceled: AtomicBool,
    listeners: Mutex<Vec<CancelListener>>,
}

impl SearchContext {
    /// Creates a live context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and notifies listeners. Later calls do nothing.
    pub fn cancel(&self) {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            listener();
        }
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Registers a callback run once on cancellation, immediately if the
    /// context is already canceled.
    pub fn on_cancel<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut listeners = self.listeners.lock();
        if self.is_canceled() {
            drop(listeners);
            listener();
        } else {
            listeners.push(Box::new(listener));
        }
    }
}

impl fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchContext")
            .field("canceled", &self.is_canceled())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
