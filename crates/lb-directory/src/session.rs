//! Directory session seam.
//!
//! The engine talks to a directory only through [`Connector`] and
//! [`DirectorySession`]. The production implementation is
//! [`Ldap3Connector`](crate::ldap::Ldap3Connector); tests plug in an
//! in-memory directory.

use async_trait::async_trait;
use lb_model::EntryRecord;

use crate::auth::ConnectEnv;
use crate::error::SessionResult;

/// Attribute list value requesting no attributes at all (RFC 4511).
pub const NO_ATTRIBUTES: &str = "1.1";

/// Attribute list value requesting all user attributes.
pub const ALL_USER_ATTRIBUTES: &str = "*";

/// Attribute list value requesting all operational attributes.
pub const ALL_OPERATIONAL_ATTRIBUTES: &str = "+";

/// Filter matching every entry.
pub const MATCH_ALL_FILTER: &str = "(objectClass=*)";

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the base entry.
    Base,
    /// Immediate children of the base entry.
    OneLevel,
    /// The base entry and everything below it.
    Subtree,
}

/// Paged-results request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Requested page size.
    pub size: u32,
    /// Opaque cookie from the previous page; empty for the first page.
    pub cookie: Vec<u8>,
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base DN.
    pub base: String,
    /// Scope.
    pub scope: Scope,
    /// Filter in RFC 4515 string form.
    pub filter: String,
    /// Attributes to return.
    pub attributes: Vec<String>,
    /// Paging, if the request should carry the paged-results control.
    pub page: Option<PageRequest>,
}

impl SearchRequest {
    /// Creates a request returning all user attributes.
    #[must_use]
    pub fn new(base: impl Into<String>, scope: Scope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: vec![ALL_USER_ATTRIBUTES.to_string()],
            page: None,
        }
    }

    /// Replaces the requested attribute list.
    #[must_use]
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns a copy of this request asking for one page.
    #[must_use]
    pub fn page(&self, size: u32, cookie: Vec<u8>) -> Self {
        Self {
            page: Some(PageRequest { size, cookie }),
            ..self.clone()
        }
    }
}

/// How a search round-trip ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// All matching entries (or the whole page) were returned.
    Complete,
    /// The server stopped early with `sizeLimitExceeded`; the entries
    /// received before the limit are included.
    SizeLimitExceeded,
}

/// The result of one search round-trip.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Entries in server order.
    pub entries: Vec<EntryRecord>,
    /// Completion status.
    pub status: SearchStatus,
    /// Paged-results cookie from the response control, if any.
    pub cookie: Option<Vec<u8>>,
}

impl SearchPage {
    /// A complete, unpaged result.
    #[must_use]
    pub fn complete(entries: Vec<EntryRecord>) -> Self {
        Self {
            entries,
            status: SearchStatus::Complete,
            cookie: None,
        }
    }

    /// The cookie for the next page, or `None` when paging is finished.
    #[must_use]
    pub fn next_cookie(&self) -> Option<&[u8]> {
        self.cookie.as_deref().filter(|cookie| !cookie.is_empty())
    }
}

/// One handle on an authenticated directory connection.
#[async_trait]
pub trait DirectorySession: Send + Sync + 'static {
    /// Executes one search round-trip.
    ///
    /// A `sizeLimitExceeded` result is not an error: it is reported through
    /// [`SearchPage::status`] together with the entries received so far.
    async fn search(&mut self, request: &SearchRequest) -> SessionResult<SearchPage>;

    /// Returns an independent handle on the same connection, so that request
    /// controls set on one handle never affect another.
    fn duplicate(&self) -> Self
    where
        Self: Sized;

    /// Releases this handle. Closing the primary handle closes the
    /// connection.
    async fn close(&mut self) -> SessionResult<()>;
}

/// Opens authenticated sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Session type produced by this connector.
    type Session: DirectorySession;

    /// Connects and binds according to `env`.
    async fn connect(&self, env: &ConnectEnv) -> SessionResult<Self::Session>;
}
