//! # lb-directory
//!
//! LDAP connection and query engine for ldapbrowse.
//!
//! This crate connects to a directory server with `ldap3`, authenticates
//! anonymously, with a simple bind or with Kerberos 5 (SASL GSSAPI), and
//! runs one-level listings, subtree searches and single-entry fetches.
//!
//! ## Behavior
//!
//! - Size-limited results switch transparently to the paged-results
//!   control when the server advertises it
//! - A dropped connection is re-established once per operation
//! - Batch results are sorted by label; streaming results arrive in server
//!   order through a [`ResultSink`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lb_directory::{ConnectionManager, Ldap3Connector, QueryEngine};
//! use lb_model::ServerProfile;
//!
//! let profile = ServerProfile::from_env()?;
//! let connections = Arc::new(ConnectionManager::new(Ldap3Connector::new(), profile.clone()));
//! connections.connect(profile).await?;
//!
//! let engine = QueryEngine::new(connections);
//! for entry in engine.list_children("").await? {
//!     println!("{}", entry.label());
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod capability;
pub mod connection;
pub mod error;
pub mod ldap;
pub mod query;
pub mod session;
pub mod sink;

pub use auth::{
    prepare_environment, BindRequest, ConnectEnv, KerberosIdentity, KerberosLogin, KinitLogin,
};
pub use capability::{CapabilityProbe, PagingSupport, PAGED_RESULTS_OID};
pub use connection::{ConnectionManager, PagingState, SessionLease};
pub use error::{ConnectionError, QueryError, QueryResult, SessionError, SessionResult};
pub use ldap::{Ldap3Connector, Ldap3Session};
pub use query::{QueryEngine, MAX_RECONNECTS};
pub use session::{
    Connector, DirectorySession, PageRequest, Scope, SearchPage, SearchRequest, SearchStatus,
};
pub use sink::{CollectingSink, ResultSink, SearchContext};
