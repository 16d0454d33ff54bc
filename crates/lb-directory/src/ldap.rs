//! `ldap3` backend.
//!
//! ## Security Requirements
//!
//! LDAPS connections validate the server certificate unless the profile
//! explicitly disables it. Bind passwords are never logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lb_model::{is_binary_attribute, AttributeValue, EntryRecord};
use ldap3::asn1::StructureTag;
use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, ResultEntry};

use crate::auth::{BindRequest, ConnectEnv};
use crate::capability::PAGED_RESULTS_OID;
use crate::error::{SessionError, SessionResult};
use crate::session::{Connector, DirectorySession, Scope, SearchPage, SearchRequest, SearchStatus};

/// LDAP result code `success`.
const RC_SUCCESS: u32 = 0;
/// LDAP result code `sizeLimitExceeded`.
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
/// LDAP result code `referral`.
const RC_REFERRAL: u32 = 10;

/// BER tag number of a SearchResultEntry.
const SEARCH_RESULT_ENTRY: u64 = 4;

/// Opens sessions with `ldap3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldap3Connector;

impl Ldap3Connector {
    /// Creates the connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for Ldap3Connector {
    type Session = Ldap3Session;

    async fn connect(&self, env: &ConnectEnv) -> SessionResult<Ldap3Session> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(env.timeout)
            .set_no_tls_verify(env.secure && !env.validate_certificates);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &env.url)
            .await
            .map_err(|e| SessionError::Transport(format!("{}: {e}", env.url)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!("LDAP connection driver error: {}", e);
            }
        });

        bind(&mut ldap, env).await?;
        tracing::debug!(url = %env.url, "LDAP session established");

        Ok(Ldap3Session {
            ldap,
            primary: true,
            timeout: env.timeout,
            binary_attributes: Arc::new(env.binary_attributes.clone()),
        })
    }
}

async fn bind(ldap: &mut Ldap, env: &ConnectEnv) -> SessionResult<()> {
    match &env.bind {
        BindRequest::Anonymous => Ok(()),
        BindRequest::Simple { dn, password } => {
            ldap.with_timeout(env.timeout)
                .simple_bind(dn, password.expose())
                .await
                .map_err(|e| SessionError::Bind(e.to_string()))?
                .success()
                .map_err(|e| SessionError::Bind(e.to_string()))?;
            Ok(())
        }
        BindRequest::Gssapi {
            server_fqdn,
            identity,
        } => gssapi_bind(ldap, server_fqdn, identity).await,
    }
}

#[cfg(feature = "gssapi")]
async fn gssapi_bind(
    ldap: &mut Ldap,
    server_fqdn: &str,
    identity: &crate::auth::KerberosIdentity,
) -> SessionResult<()> {
    identity
        .run_as(ldap.sasl_gssapi_bind(server_fqdn))
        .await
        .map_err(|e| SessionError::Bind(e.to_string()))?
        .success()
        .map_err(|e| SessionError::Bind(e.to_string()))?;
    tracing::debug!(principal = ?identity.principal(), "GSSAPI bind complete");
    Ok(())
}

#[cfg(not(feature = "gssapi"))]
async fn gssapi_bind(
    _ldap: &mut Ldap,
    _server_fqdn: &str,
    _identity: &crate::auth::KerberosIdentity,
) -> SessionResult<()> {
    Err(SessionError::Unsupported(
        "Kerberos bind requires the `gssapi` feature".to_string(),
    ))
}

/// A handle on an `ldap3` connection.
///
/// [`duplicate`](DirectorySession::duplicate) clones the underlying handle,
/// so request controls and timeouts never leak between operations. Only the
/// primary handle unbinds on close.
pub struct Ldap3Session {
    ldap: Ldap,
    primary: bool,
    timeout: Duration,
    binary_attributes: Arc<Vec<String>>,
}

impl Ldap3Session {
    /// Whether this handle owns the connection.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }
}

impl std::fmt::Debug for Ldap3Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldap3Session")
            .field("primary", &self.primary)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn search(&mut self, request: &SearchRequest) -> SessionResult<SearchPage> {
        let scope = match request.scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::OneLevel => ldap3::Scope::OneLevel,
            Scope::Subtree => ldap3::Scope::Subtree,
        };
        let attributes: Vec<&str> = request.attributes.iter().map(String::as_str).collect();

        self.ldap.with_timeout(self.timeout);
        if let Some(page) = &request.page {
            self.ldap.with_controls(PagedResults {
                size: i32::try_from(page.size).unwrap_or(i32::MAX),
                cookie: page.cookie.clone(),
            });
        }

        let ldap3::SearchResult(raw_entries, result) = self
            .ldap
            .search(&request.base, scope, &request.filter, attributes)
            .await
            .map_err(map_ldap_error)?;

        let status = match result.rc {
            RC_SUCCESS => SearchStatus::Complete,
            RC_SIZE_LIMIT_EXCEEDED => SearchStatus::SizeLimitExceeded,
            RC_REFERRAL => {
                tracing::debug!(base = %request.base, refs = ?result.refs, "Referral not followed");
                SearchStatus::Complete
            }
            rc => return Err(SessionError::result(rc, result.text)),
        };

        let mut entries = Vec::with_capacity(raw_entries.len());
        for raw in raw_entries {
            if raw.is_ref() {
                tracing::debug!(base = %request.base, "Skipping search reference");
                continue;
            }
            entries.push(decode_entry(raw, &self.binary_attributes)?);
        }

        tracing::debug!(
            base = %request.base,
            filter = %request.filter,
            entries = entries.len(),
            rc = result.rc,
            "LDAP search round-trip"
        );

        Ok(SearchPage {
            entries,
            status,
            cookie: paged_cookie(&result.ctrls),
        })
    }

    fn duplicate(&self) -> Self {
        Self {
            ldap: self.ldap.clone(),
            primary: false,
            timeout: self.timeout,
            binary_attributes: Arc::clone(&self.binary_attributes),
        }
    }

    async fn close(&mut self) -> SessionResult<()> {
        if self.primary {
            self.ldap.unbind().await.map_err(map_ldap_error)?;
        }
        Ok(())
    }
}

/// Maps an `ldap3` operation error onto the session error categories.
fn map_ldap_error(err: ldap3::LdapError) -> SessionError {
    use ldap3::LdapError;

    match err {
        LdapError::Timeout { .. } => SessionError::Timeout,
        LdapError::EndOfStream
        | LdapError::Io { .. }
        | LdapError::OpSend { .. }
        | LdapError::ResultRecv { .. } => SessionError::disconnected(err.to_string()),
        LdapError::LdapResult { result } => SessionError::result(result.rc, result.text),
        other => SessionError::Transport(other.to_string()),
    }
}

/// Extracts the paged-results cookie from the response controls.
fn paged_cookie(ctrls: &[Control]) -> Option<Vec<u8>> {
    ctrls.iter().find_map(|Control(kind, raw)| {
        let paged = matches!(kind, Some(ControlType::PagedResults)) || raw.ctype == PAGED_RESULTS_OID;
        if paged && raw.val.is_some() {
            Some(raw.parse::<PagedResults>().cookie)
        } else {
            None
        }
    })
}

/// Decodes a SearchResultEntry, keeping attributes in server order.
fn decode_entry(raw: ResultEntry, binary_attributes: &[String]) -> SessionResult<EntryRecord> {
    let mut parts = raw
        .0
        .match_id(SEARCH_RESULT_ENTRY)
        .and_then(StructureTag::expect_constructed)
        .ok_or_else(|| SessionError::malformed("search result entry is not constructed"))?
        .into_iter();

    let dn = octet_string(parts.next(), "object name")?;
    let dn = String::from_utf8(dn).map_err(|_| SessionError::malformed("DN is not valid UTF-8"))?;
    let mut entry = EntryRecord::new(dn);

    let attributes = parts
        .next()
        .and_then(StructureTag::expect_constructed)
        .ok_or_else(|| SessionError::malformed("missing attribute list"))?;

    for partial in attributes {
        let mut fields = partial
            .expect_constructed()
            .ok_or_else(|| SessionError::malformed("attribute is not a sequence"))?
            .into_iter();
        let name = octet_string(fields.next(), "attribute type")?;
        let name = String::from_utf8(name)
            .map_err(|_| SessionError::malformed("attribute type is not valid UTF-8"))?;
        let binary = is_binary_attribute(&name, binary_attributes);

        let values = fields
            .next()
            .and_then(StructureTag::expect_constructed)
            .ok_or_else(|| SessionError::malformed(format!("missing values for {name}")))?;
        for value in values {
            let bytes = value
                .expect_primitive()
                .ok_or_else(|| SessionError::malformed(format!("bad value for {name}")))?;
            entry.add_value(&name, AttributeValue::from_bytes(bytes, binary));
        }
    }

    entry.object_classes_from_attributes();
    Ok(entry)
}

fn octet_string(tag: Option<StructureTag>, what: &str) -> SessionResult<Vec<u8>> {
    tag.and_then(StructureTag::expect_primitive)
        .ok_or_else(|| SessionError::malformed(format!("missing {what}")))
}
