//! Query execution.
//!
//! Every list or search runs the same state machine:
//!
//! 1. A direct, unpaged request, unless the connection is already known to
//!    support paging and a page size has been learned.
//! 2. On `sizeLimitExceeded`, the root DSE is probed. With paging support
//!    the page size becomes one less than the number of entries received,
//!    the sink is reset and the operation restarts in paged mode. Without
//!    it the partial result stands.
//! 3. Paged mode follows the server cookie until it comes back empty.
//! 4. A dropped connection triggers one reconnect and a full re-run.
//!
//! Each attempt works on its own session handle, which is always closed
//! before the attempt returns.

use std::sync::Arc;

use lb_model::EntryRecord;

use crate::connection::{close_quietly, ConnectionManager, SessionLease};
use crate::error::{QueryError, QueryResult};
use crate::session::{
    Connector, DirectorySession, Scope, SearchRequest, SearchStatus, MATCH_ALL_FILTER,
    NO_ATTRIBUTES,
};
use crate::sink::{CollectingSink, ResultSink, SearchContext};

/// Reconnects attempted per operation after a dropped connection.
pub const MAX_RECONNECTS: usize = 1;

/// What an attempt fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// One-level or subtree enumeration with object-class attachment.
    Listing,
    /// A single base-scope entry with all its attributes.
    Entry,
}

/// Whether delivery went to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Canceled,
}

/// Runs list, search and fetch operations against a [`ConnectionManager`].
pub struct QueryEngine<C: Connector> {
    connections: Arc<ConnectionManager<C>>,
}

impl<C: Connector> Clone for QueryEngine<C> {
    fn clone(&self) -> Self {
        Self {
            connections: Arc::clone(&self.connections),
        }
    }
}

impl<C: Connector> QueryEngine<C> {
    /// Creates an engine over `connections`.
    #[must_use]
    pub fn new(connections: Arc<ConnectionManager<C>>) -> Self {
        Self { connections }
    }

    /// The underlying connection manager.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager<C>> {
        &self.connections
    }

    // ========================================================================
    // Batch Operations
    // ========================================================================

    /// Lists the immediate children of `path`, sorted by label.
    ///
    /// An empty `path` means the profile's base DN; anything else is an
    /// absolute DN.
    ///
    /// ## Errors
    ///
    /// Returns [`QueryError::NotConnected`] when disconnected, or the error
    /// that ended the operation after the reconnect policy was applied.
    pub async fn list_children(&self, path: &str) -> QueryResult<Vec<EntryRecord>> {
        let mut sink = CollectingSink::new();
        self.list_children_into(path, &mut sink, &SearchContext::new())
            .await?;
        Ok(sink.into_sorted())
    }

    /// Searches the subtree under the base DN, sorted by label.
    ///
    /// ## Errors
    ///
    /// Same as [`list_children`](Self::list_children).
    pub async fn search(&self, filter: &str) -> QueryResult<Vec<EntryRecord>> {
        let mut sink = CollectingSink::new();
        self.search_into(filter, &mut sink, &SearchContext::new())
            .await?;
        Ok(sink.into_sorted())
    }

    /// Fetches every user attribute of the entry at `dn`.
    ///
    /// ## Errors
    ///
    /// Returns [`QueryError::NotConnected`] without touching the network
    /// when disconnected, [`QueryError::NotFound`] when the server returns
    /// no entry, or the error that ended the operation after the reconnect
    /// policy was applied.
    pub async fn get_entry(&self, dn: &str) -> QueryResult<EntryRecord> {
        let request = SearchRequest::new(dn, Scope::Base, MATCH_ALL_FILTER);
        let mut sink = CollectingSink::new();
        self.run(&request, Mode::Entry, &mut sink, &SearchContext::new())
            .await?;
        sink.into_entries()
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::NotFound(dn.to_string()))
    }

    // ========================================================================
    // Streaming Operations
    // ========================================================================

    /// Streams the immediate children of `path` into `sink` in server order.
    ///
    /// Stops silently once `ctx` is canceled.
    ///
    /// ## Errors
    ///
    /// Same as [`list_children`](Self::list_children).
    pub async fn list_children_into<S>(
        &self,
        path: &str,
        sink: &mut S,
        ctx: &SearchContext,
    ) -> QueryResult<()>
    where
        S: ResultSink + ?Sized,
    {
        let base = if path.is_empty() {
            self.connections.base_dn().await
        } else {
            path.to_string()
        };
        let request = SearchRequest::new(base, Scope::OneLevel, MATCH_ALL_FILTER)
            .attributes([NO_ATTRIBUTES]);
        self.run(&request, Mode::Listing, sink, ctx).await
    }

    /// Streams the subtree search for `filter` into `sink` in server order.
    ///
    /// Stops silently once `ctx` is canceled.
    ///
    /// ## Errors
    ///
    /// Same as [`list_children`](Self::list_children).
    pub async fn search_into<S>(
        &self,
        filter: &str,
        sink: &mut S,
        ctx: &SearchContext,
    ) -> QueryResult<()>
    where
        S: ResultSink + ?Sized,
    {
        let base = self.connections.base_dn().await;
        let request =
            SearchRequest::new(base, Scope::Subtree, filter).attributes([NO_ATTRIBUTES]);
        self.run(&request, Mode::Listing, sink, ctx).await
    }

    // ========================================================================
    // State Machine
    // ========================================================================

    async fn run<S>(
        &self,
        request: &SearchRequest,
        mode: Mode,
        sink: &mut S,
        ctx: &SearchContext,
    ) -> QueryResult<()>
    where
        S: ResultSink + ?Sized,
    {
        let mut reconnects = 0;
        loop {
            let SessionLease {
                mut session,
                generation,
            } = self.connections.lease().await?;

            let outcome = self
                .attempt(&mut session, generation, request, mode, sink, ctx)
                .await;
            close_quietly(&mut session).await;

            match outcome {
                Err(err) if err.is_disconnect() && reconnects < MAX_RECONNECTS => {
                    reconnects += 1;
                    tracing::warn!(base = %request.base, error = %err, "Connection dropped; retrying once");
                    self.connections.reconnect_if_stale(generation).await?;
                    sink.reset();
                }
                other => return other,
            }
        }
    }

    async fn attempt<S>(
        &self,
        session: &mut C::Session,
        generation: u64,
        request: &SearchRequest,
        mode: Mode,
        sink: &mut S,
        ctx: &SearchContext,
    ) -> QueryResult<()>
    where
        S: ResultSink + ?Sized,
    {
        if mode == Mode::Entry {
            let page = session.search(request).await?;
            for mut entry in page.entries {
                entry.object_classes_from_attributes();
                sink.add_entry(entry);
            }
            return Ok(());
        }

        if let Some(size) = self.connections.paging_state().await.page_size() {
            return self.paged(session, request, size, sink, ctx).await;
        }

        let page = session.search(request).await?;
        let received = page.entries.len();
        tracing::debug!(base = %request.base, entries = received, "Direct request complete");
        if deliver(session, page.entries, sink, ctx).await? == Flow::Canceled {
            return Ok(());
        }
        if page.status != SearchStatus::SizeLimitExceeded {
            return Ok(());
        }

        if !self.connections.paging_support().await.is_supported() {
            tracing::warn!(
                base = %request.base,
                entries = received,
                "Size limit exceeded and paging unsupported; result is partial"
            );
            return Ok(());
        }

        let size = u32::try_from(received.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .max(1);
        self.connections.set_max_page_size(generation, size).await;
        tracing::info!(base = %request.base, page_size = size, "Size limit hit; restarting in paged mode");
        sink.reset();
        self.paged(session, request, size, sink, ctx).await
    }

    async fn paged<S>(
        &self,
        session: &mut C::Session,
        request: &SearchRequest,
        size: u32,
        sink: &mut S,
        ctx: &SearchContext,
    ) -> QueryResult<()>
    where
        S: ResultSink + ?Sized,
    {
        let mut cookie = Vec::new();
        let mut pages = 0usize;
        loop {
            if ctx.is_canceled() {
                tracing::debug!(base = %request.base, pages, "Paged request canceled");
                return Ok(());
            }

            let page = session.search(&request.page(size, cookie)).await?;
            pages += 1;
            let next = page.next_cookie().map(<[u8]>::to_vec);
            let status = page.status;
            tracing::debug!(base = %request.base, page = pages, entries = page.entries.len(), "Page received");

            if deliver(session, page.entries, sink, ctx).await? == Flow::Canceled {
                return Ok(());
            }
            if status == SearchStatus::SizeLimitExceeded {
                tracing::warn!(base = %request.base, pages, "Size limit exceeded in paged mode; result is partial");
                return Ok(());
            }
            match next {
                Some(next) => cookie = next,
                None => return Ok(()),
            }
        }
    }
}

impl<C: Connector> std::fmt::Debug for QueryEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("connections", &self.connections)
            .finish()
    }
}

/// Attaches object classes and pushes entries, checking for cancellation
/// before each one.
async fn deliver<D, S>(
    session: &mut D,
    entries: Vec<EntryRecord>,
    sink: &mut S,
    ctx: &SearchContext,
) -> QueryResult<Flow>
where
    D: DirectorySession,
    S: ResultSink + ?Sized,
{
    for mut entry in entries {
        if ctx.is_canceled() {
            return Ok(Flow::Canceled);
        }
        attach_object_classes(session, &mut entry).await?;
        sink.add_entry(entry);
    }
    Ok(Flow::Continue)
}

/// Fetches `objectClass` for `entry`.
///
/// A dropped connection is returned so the operation can be retried; any
/// other failure leaves the entry without classes.
async fn attach_object_classes<D: DirectorySession>(
    session: &mut D,
    entry: &mut EntryRecord,
) -> QueryResult<()> {
    let request = SearchRequest::new(entry.dn(), Scope::Base, MATCH_ALL_FILTER)
        .attributes(["objectClass"]);
    match session.search(&request).await {
        Ok(page) => {
            if let Some(found) = page.entries.first() {
                entry.set_object_classes(found.attributes.texts("objectClass"));
            }
        }
        Err(e) if e.is_disconnect() => return Err(e.into()),
        Err(e) => {
            tracing::warn!(dn = %entry.dn(), error = %e, "Could not read object classes");
        }
    }
    Ok(())
}
