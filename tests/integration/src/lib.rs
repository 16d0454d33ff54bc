//! In-memory directory server for end-to-end tests.
//!
//! [`MockDirectory`] holds a flat list of entries in server order plus a
//! root DSE, and emulates the behaviors the query engine reacts to: an
//! administrative size limit, the paged-results control, dropped
//! connections and refused reconnects. Every connect, bind and search is
//! recorded so tests can assert on network traffic.

use std::sync::Arc;

use async_trait::async_trait;
use lb_directory::{
    BindRequest, ConnectEnv, Connector, DirectorySession, Scope, SearchPage, SearchRequest,
    SearchStatus, SessionError, SessionResult, PAGED_RESULTS_OID,
};
use lb_model::{dn, EntryRecord};
use parking_lot::Mutex;

/// Bind recorded by the mock connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedBind {
    /// No bind.
    Anonymous,
    /// Simple bind as this DN.
    Simple(String),
    /// GSSAPI bind as this principal.
    Gssapi(Option<String>),
}

#[derive(Debug, Default)]
struct DirectoryState {
    entries: Vec<EntryRecord>,
    paging: bool,
    size_limit: Option<usize>,
    drop_skip: usize,
    pending_drops: usize,
    refuse_connections: bool,
    deny_object_class: bool,
    connects: usize,
    binds: Vec<RecordedBind>,
    searches: Vec<SearchRequest>,
    closes: usize,
}

/// Shared in-memory directory.
#[derive(Debug, Default)]
pub struct MockDirectory {
    state: Mutex<DirectoryState>,
}

impl MockDirectory {
    /// Creates an empty directory without paging support or size limit.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds an entry. Entries are returned in insertion order.
    pub fn add_entry(&self, entry: EntryRecord) {
        self.state.lock().entries.push(entry);
    }

    /// Adds an entry with the given object classes.
    pub fn add(&self, dn: &str, object_classes: &[&str]) {
        let mut entry = EntryRecord::new(dn);
        for class in object_classes {
            entry.add_value("objectClass", *class);
        }
        self.add_entry(entry);
    }

    /// Advertises (or stops advertising) the paged-results control.
    pub fn set_paging(&self, supported: bool) {
        self.state.lock().paging = supported;
    }

    /// Caps every response at `limit` entries.
    pub fn set_size_limit(&self, limit: Option<usize>) {
        self.state.lock().size_limit = limit;
    }

    /// Fails the next `count` searches as dropped connections.
    pub fn drop_next_searches(&self, count: usize) {
        self.drop_searches_after(0, count);
    }

    /// Lets `skip` searches through, then fails the following `count` as
    /// dropped connections.
    pub fn drop_searches_after(&self, skip: usize, count: usize) {
        let mut state = self.state.lock();
        state.drop_skip = skip;
        state.pending_drops = count;
    }

    /// Makes new connections fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Rejects `objectClass`-only reads with insufficient access rights.
    pub fn deny_object_class_reads(&self, deny: bool) {
        self.state.lock().deny_object_class = deny;
    }

    /// Number of successful connects.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Binds in connection order.
    #[must_use]
    pub fn binds(&self) -> Vec<RecordedBind> {
        self.state.lock().binds.clone()
    }

    /// Every search received, including failed ones.
    #[must_use]
    pub fn searches(&self) -> Vec<SearchRequest> {
        self.state.lock().searches.clone()
    }

    /// Searches that carried the paged-results control.
    #[must_use]
    pub fn paged_searches(&self) -> Vec<SearchRequest> {
        self.searches()
            .into_iter()
            .filter(|request| request.page.is_some())
            .collect()
    }

    /// Number of session handles closed.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    fn root_dse(paging: bool) -> EntryRecord {
        let mut entry = EntryRecord::with_label("", "Root DSE");
        entry.add_value("objectClass", "top");
        entry.add_value("supportedLDAPVersion", "3");
        entry.add_value("supportedControl", "2.16.840.1.113730.3.4.18");
        if paging {
            entry.add_value("supportedControl", PAGED_RESULTS_OID);
        }
        entry
    }

    fn search(&self, request: &SearchRequest) -> SessionResult<SearchPage> {
        let mut state = self.state.lock();
        state.searches.push(request.clone());

        if state.drop_skip > 0 {
            state.drop_skip -= 1;
        } else if state.pending_drops > 0 {
            state.pending_drops -= 1;
            return Err(SessionError::disconnected("connection reset by peer"));
        }
        if state.deny_object_class && request.attributes == ["objectClass"] {
            return Err(SessionError::result(50, "Insufficient access"));
        }

        if request.base.is_empty() && request.scope == Scope::Base {
            let entry = project(&Self::root_dse(state.paging), &request.attributes);
            return Ok(SearchPage::complete(vec![entry]));
        }

        let matches: Vec<&EntryRecord> = state
            .entries
            .iter()
            .filter(|entry| in_scope(entry.dn(), &request.base, request.scope))
            .filter(|entry| matches_filter(entry, &request.filter))
            .collect();

        if request.scope == Scope::Base && matches.is_empty() {
            return Err(SessionError::result(32, "No such object"));
        }

        let limit = state.size_limit.unwrap_or(usize::MAX);
        let page = request.page.as_ref().filter(|_| state.paging);

        let Some(page) = page else {
            let status = if matches.len() > limit {
                SearchStatus::SizeLimitExceeded
            } else {
                SearchStatus::Complete
            };
            let entries = matches
                .iter()
                .take(limit)
                .map(|entry| project(entry, &request.attributes))
                .collect();
            return Ok(SearchPage {
                entries,
                status,
                cookie: None,
            });
        };

        let offset: usize = if page.cookie.is_empty() {
            0
        } else {
            std::str::from_utf8(&page.cookie)
                .ok()
                .and_then(|cookie| cookie.parse().ok())
                .ok_or_else(|| SessionError::result(2, "Invalid paged results cookie"))?
        };
        let size = usize::try_from(page.size).unwrap_or(usize::MAX);
        let remaining = &matches[offset.min(matches.len())..];

        if size > limit && remaining.len() > limit {
            let entries = remaining
                .iter()
                .take(limit)
                .map(|entry| project(entry, &request.attributes))
                .collect();
            return Ok(SearchPage {
                entries,
                status: SearchStatus::SizeLimitExceeded,
                cookie: Some(Vec::new()),
            });
        }

        let taken = remaining.len().min(size);
        let next = offset + taken;
        let cookie = if next < matches.len() {
            next.to_string().into_bytes()
        } else {
            Vec::new()
        };
        let entries = remaining[..taken]
            .iter()
            .map(|entry| project(entry, &request.attributes))
            .collect();
        Ok(SearchPage {
            entries,
            status: SearchStatus::Complete,
            cookie: Some(cookie),
        })
    }
}

fn in_scope(entry_dn: &str, base: &str, scope: Scope) -> bool {
    match scope {
        Scope::Base => dn::normalize(entry_dn) == dn::normalize(base),
        Scope::OneLevel => dn::is_child_of(entry_dn, base),
        Scope::Subtree => dn::is_within(entry_dn, base),
    }
}

/// Supports `(attr=*)` and `(attr=value)`, case-insensitively.
fn matches_filter(entry: &EntryRecord, filter: &str) -> bool {
    let inner = filter.trim().trim_start_matches('(').trim_end_matches(')');
    let Some((attr, value)) = inner.split_once('=') else {
        return false;
    };
    if attr.eq_ignore_ascii_case("objectClass") && value == "*" {
        return true;
    }
    let values = entry.attributes.texts(attr);
    if value == "*" {
        return !values.is_empty();
    }
    values.iter().any(|v| v.eq_ignore_ascii_case(value))
}

/// Copies `entry` with only the requested attributes, as a server would.
fn project(entry: &EntryRecord, attributes: &[String]) -> EntryRecord {
    let mut out = EntryRecord::with_label(entry.dn(), entry.label());
    let all = attributes.iter().any(|a| a == "*" || a == "+");
    for attr in &entry.attributes {
        if all || attributes.iter().any(|a| a.eq_ignore_ascii_case(&attr.name)) {
            for value in &attr.values {
                out.add_value(&attr.name, value.clone());
            }
        }
    }
    out.object_classes_from_attributes();
    out
}

/// Connector handing out sessions on a [`MockDirectory`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    directory: Arc<MockDirectory>,
}

impl MockConnector {
    /// Creates a connector for `directory`.
    #[must_use]
    pub fn new(directory: Arc<MockDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, env: &ConnectEnv) -> SessionResult<MockSession> {
        let mut state = self.directory.state.lock();
        if state.refuse_connections {
            return Err(SessionError::Transport(format!("{}: connection refused", env.url)));
        }
        state.connects += 1;
        state.binds.push(match &env.bind {
            BindRequest::Anonymous => RecordedBind::Anonymous,
            BindRequest::Simple { dn, .. } => RecordedBind::Simple(dn.clone()),
            BindRequest::Gssapi { identity, .. } => {
                RecordedBind::Gssapi(identity.principal().map(str::to_string))
            }
        });
        Ok(MockSession {
            directory: Arc::clone(&self.directory),
            primary: true,
        })
    }
}

/// A handle on the mock directory.
#[derive(Debug)]
pub struct MockSession {
    directory: Arc<MockDirectory>,
    primary: bool,
}

impl MockSession {
    /// Whether this is the connection's primary handle.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }
}

#[async_trait]
impl DirectorySession for MockSession {
    async fn search(&mut self, request: &SearchRequest) -> SessionResult<SearchPage> {
        self.directory.search(request)
    }

    fn duplicate(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            primary: false,
        }
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.directory.state.lock().closes += 1;
        Ok(())
    }
}
