//! Connection lifecycle management.
//!
//! A [`ConnectionManager`] owns the one primary session for a server
//! profile. Queries never use that session directly: they take an
//! independent duplicate through [`ConnectionManager::lease`] and close it
//! when done.
//!
//! Session, paging capability, learned page size, connection generation
//! and the cached Kerberos identity live behind a single async mutex. It is
//! held to clone the session, to read or write paging state, and while
//! (re)connecting; never across a query's page loop.

use std::path::PathBuf;
use std::sync::Arc;

use lb_model::{
    Authentication, EntryRecord, KerberosLoginKind, KerberosSettings, ProfileError, ProfileEvent,
    ProfileEvents, ProfileField, ProfileResult, Secret, ServerProfile,
};
use tokio::sync::{Mutex, MutexGuard};

use crate::auth::{prepare_environment, KerberosIdentity, KerberosLogin, KinitLogin};
use crate::capability::{CapabilityProbe, PagingSupport};
use crate::error::{ConnectionError, QueryError, QueryResult};
use crate::session::{Connector, DirectorySession};

/// Mutable connection state.
struct ConnectionState<S> {
    profile: ServerProfile,
    session: Option<S>,
    paging: PagingSupport,
    max_page_size: Option<u32>,
    generation: u64,
    kerberos_identity: Option<KerberosIdentity>,
    /// Set until the first `connect` and by `disconnect`; a closed manager
    /// is never reopened by drop recovery.
    closed: bool,
}

/// An operation-scoped session handle.
#[derive(Debug)]
pub struct SessionLease<S> {
    /// Independent handle on the primary connection.
    pub session: S,
    /// Generation of the connection the handle belongs to.
    pub generation: u64,
}

/// Paging knowledge for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingState {
    /// Probed paged-results support.
    pub support: PagingSupport,
    /// Page size learned from a size-limit result.
    pub max_page_size: Option<u32>,
}

impl PagingState {
    /// Page size to use, if paging is both supported and sized.
    #[must_use]
    pub fn page_size(&self) -> Option<u32> {
        self.max_page_size.filter(|_| self.support.is_supported())
    }
}

/// Owns the primary session for one server profile.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    login: Arc<dyn KerberosLogin>,
    state: Mutex<ConnectionState<C::Session>>,
    events: ProfileEvents,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a disconnected manager for `profile`.
    ///
    /// Kerberos logins go through `kinit`; see [`with_login`](Self::with_login).
    pub fn new(connector: C, profile: ServerProfile) -> Self {
        Self {
            connector,
            login: Arc::new(KinitLogin::new()),
            state: Mutex::new(ConnectionState {
                profile,
                session: None,
                paging: PagingSupport::Unknown,
                max_page_size: None,
                generation: 0,
                kerberos_identity: None,
                closed: true,
            }),
            events: ProfileEvents::new(),
        }
    }

    /// Replaces the Kerberos login strategy.
    #[must_use]
    pub fn with_login(mut self, login: Arc<dyn KerberosLogin>) -> Self {
        self.login = login;
        self
    }

    /// Profile change notifications.
    #[must_use]
    pub fn events(&self) -> &ProfileEvents {
        &self.events
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects with `profile`, replacing any open session.
    ///
    /// ## Errors
    ///
    /// Returns [`ConnectionError::Profile`] for an invalid profile,
    /// [`ConnectionError::Login`] when the Kerberos login fails, and
    /// [`ConnectionError::Session`] for transport, TLS or bind failures. The
    /// manager is disconnected afterwards in every error case.
    pub async fn connect(&self, profile: ServerProfile) -> Result<(), ConnectionError> {
        profile.validate()?;
        let mut state = self.state.lock().await;
        if state.profile.authentication.kerberos() != profile.authentication.kerberos() {
            state.kerberos_identity = None;
        }
        state.profile = profile;
        state.closed = false;
        self.open(&mut state).await
    }

    /// Reconnects with the stored profile unless another operation already
    /// did so since `generation` was observed.
    ///
    /// ## Errors
    ///
    /// Returns [`QueryError::NotConnected`] if [`disconnect`](Self::disconnect)
    /// was called in the meantime, and [`QueryError::Reconnect`] wrapping the
    /// same errors as [`connect`](Self::connect).
    pub async fn reconnect_if_stale(&self, generation: u64) -> QueryResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            tracing::debug!(generation, "Connection closed by host; not reconnecting");
            return Err(QueryError::NotConnected);
        }
        if state.generation != generation && state.session.is_some() {
            tracing::debug!(generation, current = state.generation, "Connection already re-established");
            return Ok(());
        }
        tracing::info!(host = %state.profile.host, "Reconnecting after dropped connection");
        self.open(&mut state).await.map_err(QueryError::Reconnect)
    }

    /// Closes the session. Close failures are ignored; calling this while
    /// disconnected does nothing.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(mut session) = state.session.take() {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "Ignoring error while closing session");
            }
            tracing::info!(host = %state.profile.host, "Disconnected");
        }
        state.paging = PagingSupport::Unknown;
        state.max_page_size = None;
    }

    /// Whether a session is open.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    /// Current connection generation; incremented by every successful
    /// connect.
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    async fn open(
        &self,
        state: &mut MutexGuard<'_, ConnectionState<C::Session>>,
    ) -> Result<(), ConnectionError> {
        if let Some(mut old) = state.session.take() {
            if let Err(e) = old.close().await {
                tracing::debug!(error = %e, "Ignoring error while closing previous session");
            }
        }
        state.paging = PagingSupport::Unknown;
        state.max_page_size = None;

        let identity = match state.profile.authentication.kerberos().cloned() {
            Some(settings) => Some(self.kerberos_identity_for(state, settings).await?),
            None => None,
        };
        let env = prepare_environment(&state.profile, identity.as_ref())?;

        let session = self.connector.connect(&env).await.map_err(|e| {
            tracing::warn!(url = %env.url, error = %e, "Connection failed");
            ConnectionError::from(e)
        })?;

        state.session = Some(session);
        state.generation += 1;
        tracing::info!(
            url = %env.url,
            auth = ?state.profile.authentication.kind(),
            generation = state.generation,
            "Connected to directory"
        );
        Ok(())
    }

    async fn kerberos_identity_for(
        &self,
        state: &mut MutexGuard<'_, ConnectionState<C::Session>>,
        settings: KerberosSettings,
    ) -> Result<KerberosIdentity, ConnectionError> {
        if let Some(identity) = &state.kerberos_identity {
            return Ok(identity.clone());
        }
        let identity = self.login.login(&settings).await?;
        state.kerberos_identity = Some(identity.clone());
        Ok(identity)
    }

    /// The cached Kerberos identity, if a login happened and its settings
    /// have not changed since.
    pub async fn kerberos_identity(&self) -> Option<KerberosIdentity> {
        self.state.lock().await.kerberos_identity.clone()
    }

    // ========================================================================
    // Session Access
    // ========================================================================

    /// Takes an independent handle on the open session.
    ///
    /// ## Errors
    ///
    /// Returns [`QueryError::NotConnected`] when no session is open.
    pub async fn lease(&self) -> QueryResult<SessionLease<C::Session>> {
        let state = self.state.lock().await;
        let session = state.session.as_ref().ok_or(QueryError::NotConnected)?;
        Ok(SessionLease {
            session: session.duplicate(),
            generation: state.generation,
        })
    }

    /// Takes an independent handle on the open session.
    ///
    /// ## Errors
    ///
    /// Returns [`QueryError::NotConnected`] when no session is open.
    pub async fn clone_session(&self) -> QueryResult<C::Session> {
        self.lease().await.map(|lease| lease.session)
    }

    /// Reads the root DSE with all user and operational attributes.
    ///
    /// Also records the paging capability it advertises.
    ///
    /// ## Errors
    ///
    /// Returns [`QueryError::NotConnected`] when disconnected, or the
    /// session error of the search.
    pub async fn root_capabilities(&self) -> QueryResult<Vec<EntryRecord>> {
        let SessionLease {
            mut session,
            generation,
        } = self.lease().await?;
        let result = session.search(&CapabilityProbe::root_dse_request()).await;
        close_quietly(&mut session).await;
        let page = result?;

        let support = CapabilityProbe::paging_from_root_dse(&page.entries);
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.paging = support;
        }
        Ok(page.entries)
    }

    // ========================================================================
    // Paging State
    // ========================================================================

    /// Paged-results support of the current connection, probing the root
    /// DSE the first time it is asked after a connect.
    ///
    /// Returns [`PagingSupport::Unknown`] while disconnected.
    pub async fn paging_support(&self) -> PagingSupport {
        let (mut probe, generation) = {
            let state = self.state.lock().await;
            if state.paging != PagingSupport::Unknown {
                return state.paging;
            }
            match &state.session {
                Some(session) => (session.duplicate(), state.generation),
                None => return PagingSupport::Unknown,
            }
        };

        let support = CapabilityProbe::detect(&mut probe).await;
        close_quietly(&mut probe).await;
        tracing::debug!(?support, "Probed paged-results support");

        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.paging = support;
        }
        support
    }

    /// Snapshot of the paging state.
    pub async fn paging_state(&self) -> PagingState {
        let state = self.state.lock().await;
        PagingState {
            support: state.paging,
            max_page_size: state.max_page_size,
        }
    }

    /// Learned page size of the current connection.
    pub async fn max_page_size(&self) -> Option<u32> {
        self.state.lock().await.max_page_size
    }

    /// Records the page size learned on connection `generation`. Ignored if
    /// the connection has been replaced since.
    pub async fn set_max_page_size(&self, generation: u64, size: u32) {
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.max_page_size = Some(size.max(1));
        }
    }

    // ========================================================================
    // Profile
    // ========================================================================

    /// Snapshot of the stored profile.
    pub async fn profile(&self) -> ServerProfile {
        self.state.lock().await.profile.clone()
    }

    /// Base DN of the stored profile.
    pub async fn base_dn(&self) -> String {
        self.state.lock().await.profile.base_dn.clone()
    }

    /// Replaces the stored profile without reconnecting and notifies
    /// subscribers of every changed field.
    ///
    /// ## Errors
    ///
    /// Returns an error if `profile` fails validation.
    pub async fn update_profile(&self, profile: ServerProfile) -> ProfileResult<()> {
        profile.validate()?;
        let fields = {
            let mut state = self.state.lock().await;
            let fields = changed_fields(&state.profile, &profile);
            if state.profile.authentication.kerberos() != profile.authentication.kerberos() {
                state.kerberos_identity = None;
            }
            state.profile = profile;
            fields
        };
        self.publish(&fields).await;
        Ok(())
    }

    /// Sets the Kerberos principal.
    ///
    /// ## Errors
    ///
    /// Returns an error if the profile does not use Kerberos.
    pub async fn set_kerberos_username(&self, username: impl Into<String>) -> ProfileResult<()> {
        let username = username.into();
        self.update_kerberos(ProfileField::KerberosUsername, |krb| {
            krb.username = username;
        })
        .await
    }

    /// Sets the Kerberos password.
    ///
    /// ## Errors
    ///
    /// Returns an error if the profile does not use Kerberos.
    pub async fn set_kerberos_password(&self, password: impl Into<Secret>) -> ProfileResult<()> {
        let password = password.into();
        self.update_kerberos(ProfileField::KerberosPassword, |krb| {
            krb.password = password;
        })
        .await
    }

    /// Sets the Kerberos keytab path.
    ///
    /// ## Errors
    ///
    /// Returns an error if the profile does not use Kerberos.
    pub async fn set_kerberos_keytab(&self, keytab: Option<PathBuf>) -> ProfileResult<()> {
        self.update_kerberos(ProfileField::KerberosKeytab, |krb| {
            krb.keytab = keytab;
        })
        .await
    }

    /// Sets how the Kerberos identity is obtained.
    ///
    /// ## Errors
    ///
    /// Returns an error if the profile does not use Kerberos.
    pub async fn set_kerberos_login_kind(&self, login: KerberosLoginKind) -> ProfileResult<()> {
        self.update_kerberos(ProfileField::KerberosLogin, |krb| {
            krb.login = login;
        })
        .await
    }

    async fn update_kerberos<F>(&self, field: ProfileField, update: F) -> ProfileResult<()>
    where
        F: FnOnce(&mut KerberosSettings),
    {
        let changed = {
            let mut state = self.state.lock().await;
            let Authentication::Kerberos5(settings) = &mut state.profile.authentication else {
                return Err(ProfileError::invalid("profile does not use Kerberos"));
            };
            let before = settings.clone();
            update(settings);
            let changed = *settings != before;
            if changed {
                state.kerberos_identity = None;
            }
            changed
        };
        if changed {
            self.publish(&[field]).await;
        }
        Ok(())
    }

    async fn publish(&self, fields: &[ProfileField]) {
        if fields.is_empty() {
            return;
        }
        let host = self.state.lock().await.profile.host.clone();
        for field in fields {
            self.events.publish(&ProfileEvent {
                host: host.clone(),
                field: *field,
            });
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Closes an operation-scoped handle, ignoring failures.
pub(crate) async fn close_quietly<S: DirectorySession>(session: &mut S) {
    if let Err(e) = session.close().await {
        tracing::debug!(error = %e, "Ignoring error while closing session handle");
    }
}

/// Lists the fields that differ between two profiles.
fn changed_fields(old: &ServerProfile, new: &ServerProfile) -> Vec<ProfileField> {
    let mut fields = Vec::new();
    if old.host != new.host {
        fields.push(ProfileField::Host);
    }
    if old.port != new.port {
        fields.push(ProfileField::Port);
    }
    if old.secure != new.secure {
        fields.push(ProfileField::Secure);
    }
    if old.timeout_ms != new.timeout_ms {
        fields.push(ProfileField::Timeout);
    }
    if old.base_dn != new.base_dn {
        fields.push(ProfileField::BaseDn);
    }
    match (old.authentication.kerberos(), new.authentication.kerberos()) {
        (Some(a), Some(b)) => {
            if a.username != b.username {
                fields.push(ProfileField::KerberosUsername);
            }
            if a.password != b.password {
                fields.push(ProfileField::KerberosPassword);
            }
            if a.keytab != b.keytab {
                fields.push(ProfileField::KerberosKeytab);
            }
            if a.login != b.login {
                fields.push(ProfileField::KerberosLogin);
            }
        }
        _ => {
            if old.authentication != new.authentication {
                fields.push(ProfileField::Authentication);
            }
        }
    }
    if old.validate_certificates != new.validate_certificates {
        fields.push(ProfileField::ValidateCertificates);
    }
    if old.binary_attributes != new.binary_attributes {
        fields.push(ProfileField::BinaryAttributes);
    }
    fields
}
