//! Server capability discovery.
//!
//! The only capability the engine cares about is the simple paged-results
//! control (RFC 2696), advertised in the root DSE's `supportedControl`.

use lb_model::EntryRecord;

use crate::session::{
    DirectorySession, Scope, SearchRequest, ALL_OPERATIONAL_ATTRIBUTES, ALL_USER_ATTRIBUTES,
    MATCH_ALL_FILTER,
};

/// OID of the simple paged-results control.
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// Paged-results support of the connected server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingSupport {
    /// Not probed yet on this connection.
    #[default]
    Unknown,
    /// The root DSE advertises the control.
    Supported,
    /// Not advertised, or the probe failed.
    Unsupported,
}

impl PagingSupport {
    /// Whether paging may be used.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::Supported)
    }
}

/// Root DSE probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityProbe;

impl CapabilityProbe {
    /// The root DSE request: base scope on the empty DN, every attribute.
    #[must_use]
    pub fn root_dse_request() -> SearchRequest {
        SearchRequest::new("", Scope::Base, MATCH_ALL_FILTER)
            .attributes([ALL_USER_ATTRIBUTES, ALL_OPERATIONAL_ATTRIBUTES])
    }

    /// Scans root DSE entries for the paged-results OID.
    #[must_use]
    pub fn paging_from_root_dse(entries: &[EntryRecord]) -> PagingSupport {
        let advertised = entries.iter().any(|entry| {
            entry
                .attributes
                .texts("supportedControl")
                .iter()
                .any(|oid| oid.trim() == PAGED_RESULTS_OID)
        });
        if advertised {
            PagingSupport::Supported
        } else {
            PagingSupport::Unsupported
        }
    }

    /// Probes the server over `session`.
    ///
    /// Never fails: any error means [`PagingSupport::Unsupported`].
    pub async fn detect<S: DirectorySession>(session: &mut S) -> PagingSupport {
        match session.search(&Self::root_dse_request()).await {
            Ok(page) => Self::paging_from_root_dse(&page.entries),
            Err(e) => {
                tracing::debug!(error = %e, "Root DSE probe failed; assuming no paging support");
                PagingSupport::Unsupported
            }
        }
    }
}
