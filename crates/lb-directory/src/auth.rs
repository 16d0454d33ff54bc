//! Authentication strategies.
//!
//! Each [`Authentication`] kind turns into a [`BindRequest`] inside the
//! [`ConnectEnv`] handed to the connector. Kerberos first needs a
//! [`KerberosIdentity`], obtained through a pluggable [`KerberosLogin`]
//! strategy; the GSSAPI bind then runs *as* that identity via
//! [`KerberosIdentity::run_as`].
//!
//! ## Security
//!
//! Passwords are passed to `kinit` on stdin, never on the command line, and
//! are never logged.

use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lb_model::{Authentication, KerberosLoginKind, KerberosSettings, Secret, ServerProfile};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::ConnectionError;

/// Environment variable naming the GSSAPI credential cache.
const KRB5CCNAME: &str = "KRB5CCNAME";

/// Serializes every section that points `KRB5CCNAME` at an identity.
static CREDENTIAL_CACHE_LOCK: Mutex<()> = Mutex::const_new(());

static CACHE_COUNTER: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Connection Environment
// ============================================================================

/// The bind step of a connection.
#[derive(Debug, Clone)]
pub enum BindRequest {
    /// No bind.
    Anonymous,
    /// Simple bind.
    Simple {
        /// Bind DN.
        dn: String,
        /// Bind password.
        password: Secret,
    },
    /// SASL GSSAPI bind as a Kerberos identity.
    Gssapi {
        /// Server host name used for the service principal.
        server_fqdn: String,
        /// Identity the bind runs as.
        identity: KerberosIdentity,
    },
}

/// Everything a [`Connector`](crate::session::Connector) needs to open a
/// session.
#[derive(Debug, Clone)]
pub struct ConnectEnv {
    /// `ldap://` or `ldaps://` URL.
    pub url: String,
    /// Server host.
    pub host: String,
    /// LDAPS in use.
    pub secure: bool,
    /// Validate the server certificate.
    pub validate_certificates: bool,
    /// Connect and per-operation timeout.
    pub timeout: Duration,
    /// Extra attribute names to decode as binary.
    pub binary_attributes: Vec<String>,
    /// Bind step.
    pub bind: BindRequest,
}

impl ConnectEnv {
    /// Builds the environment for `profile` with an already prepared bind.
    #[must_use]
    pub fn new(profile: &ServerProfile, bind: BindRequest) -> Self {
        Self {
            url: profile.url(),
            host: profile.host.clone(),
            secure: profile.secure,
            validate_certificates: profile.validate_certificates,
            timeout: profile.timeout(),
            binary_attributes: profile.binary_attributes.clone(),
            bind,
        }
    }
}

/// Prepares the connection environment for `profile`.
///
/// Kerberos profiles need an identity; pass the cached one or the result
/// of a fresh [`KerberosLogin::login`].
///
/// ## Errors
///
/// Returns [`ConnectionError::Login`] for a Kerberos profile without an
/// identity.
pub fn prepare_environment(
    profile: &ServerProfile,
    identity: Option<&KerberosIdentity>,
) -> Result<ConnectEnv, ConnectionError> {
    let bind = match &profile.authentication {
        Authentication::None => BindRequest::Anonymous,
        Authentication::Simple { bind_dn, password } => BindRequest::Simple {
            dn: bind_dn.clone(),
            password: password.clone(),
        },
        Authentication::Kerberos5(_) => BindRequest::Gssapi {
            server_fqdn: profile.host.clone(),
            identity: identity
                .cloned()
                .ok_or_else(|| ConnectionError::login("no Kerberos identity available"))?,
        },
    };
    Ok(ConnectEnv::new(profile, bind))
}

// ============================================================================
// Kerberos Identity
// ============================================================================

#[derive(Debug)]
struct IdentityInner {
    principal: Option<String>,
    credential_cache: Option<PathBuf>,
    owns_cache: bool,
}

impl Drop for IdentityInner {
    fn drop(&mut self) {
        if let (true, Some(path)) = (self.owns_cache, &self.credential_cache) {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A Kerberos security identity: a principal and the credential cache
/// holding its tickets.
///
/// Clones share the same cache. A cache created by a login is removed when
/// the last clone is dropped.
#[derive(Debug, Clone)]
pub struct KerberosIdentity {
    inner: Arc<IdentityInner>,
}

impl KerberosIdentity {
    /// The identity of the system default credential cache.
    #[must_use]
    pub fn system(principal: Option<String>) -> Self {
        Self {
            inner: Arc::new(IdentityInner {
                principal,
                credential_cache: None,
                owns_cache: false,
            }),
        }
    }

    /// An identity whose tickets live in `cache`.
    ///
    /// When `owned` is set, the cache file is deleted once the identity is
    /// no longer referenced.
    #[must_use]
    pub fn with_cache(principal: impl Into<String>, cache: PathBuf, owned: bool) -> Self {
        Self {
            inner: Arc::new(IdentityInner {
                principal: Some(principal.into()),
                credential_cache: Some(cache),
                owns_cache: owned,
            }),
        }
    }

    /// Principal name, if known.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.inner.principal.as_deref()
    }

    /// Private credential cache, or `None` for the system default.
    #[must_use]
    pub fn credential_cache(&self) -> Option<&Path> {
        self.inner.credential_cache.as_deref()
    }

    /// Runs `op` with the GSSAPI library pointed at this identity's tickets.
    ///
    /// `KRB5CCNAME` is process-wide, so sections run one at a time and the
    /// previous value is restored afterwards.
    pub async fn run_as<F, T>(&self, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let Some(cache) = self.credential_cache() else {
            return op.await;
        };

        let _guard = CREDENTIAL_CACHE_LOCK.lock().await;
        let previous: Option<OsString> = std::env::var_os(KRB5CCNAME);
        std::env::set_var(KRB5CCNAME, format!("FILE:{}", cache.display()));

        let output = op.await;

        match previous {
            Some(value) => std::env::set_var(KRB5CCNAME, value),
            None => std::env::remove_var(KRB5CCNAME),
        }
        output
    }
}

// ============================================================================
// Kerberos Login Strategies
// ============================================================================

/// Obtains a Kerberos identity.
#[async_trait]
pub trait KerberosLogin: Send + Sync {
    /// Logs in according to `settings.login`.
    async fn login(&self, settings: &KerberosSettings) -> Result<KerberosIdentity, ConnectionError>;
}

/// Logs in with the MIT `kinit` tool.
///
/// - [`KerberosLoginKind::TicketCache`]: no login, the system cache is used.
/// - [`KerberosLoginKind::Password`]: `kinit principal`, password on stdin.
/// - [`KerberosLoginKind::Keytab`]: `kinit -k -t keytab principal`.
///
/// Password and keytab logins write to a private cache file in the temp
/// directory.
#[derive(Debug, Clone)]
pub struct KinitLogin {
    program: PathBuf,
    cache_dir: PathBuf,
}

impl Default for KinitLogin {
    fn default() -> Self {
        Self {
            program: PathBuf::from("kinit"),
            cache_dir: std::env::temp_dir(),
        }
    }
}

impl KinitLogin {
    /// Creates a strategy using `kinit` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific `kinit` executable.
    #[must_use]
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Writes credential caches into `dir`.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    fn next_cache_path(&self) -> PathBuf {
        let n = CACHE_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.cache_dir
            .join(format!("ldapbrowse_krb5cc_{}_{n}", std::process::id()))
    }

    async fn kinit(
        &self,
        settings: &KerberosSettings,
        args: &[&OsStr],
        password: Option<&Secret>,
    ) -> Result<KerberosIdentity, ConnectionError> {
        let cache = self.next_cache_path();
        let mut command = Command::new(&self.program);
        command
            .arg("-c")
            .arg(format!("FILE:{}", cache.display()))
            .args(args)
            .arg(&settings.username)
            .stdin(if password.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ConnectionError::login(format!("cannot run {}: {e}", self.program.display()))
        })?;

        if let (Some(password), Some(mut stdin)) = (password, child.stdin.take()) {
            stdin
                .write_all(format!("{}\n", password.expose()).as_bytes())
                .await
                .map_err(|e| ConnectionError::login(format!("cannot pass password to kinit: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ConnectionError::login(format!("kinit did not finish: {e}")))?;

        if !output.status.success() {
            let _ = std::fs::remove_file(&cache);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConnectionError::login(format!(
                "kinit for {} failed: {}",
                settings.username,
                stderr.trim()
            )));
        }

        tracing::debug!(principal = %settings.username, "Obtained Kerberos ticket");
        Ok(KerberosIdentity::with_cache(
            settings.username.clone(),
            cache,
            true,
        ))
    }
}

#[async_trait]
impl KerberosLogin for KinitLogin {
    async fn login(&self, settings: &KerberosSettings) -> Result<KerberosIdentity, ConnectionError> {
        match settings.login {
            KerberosLoginKind::TicketCache => {
                let principal = Some(settings.username.clone()).filter(|p| !p.is_empty());
                Ok(KerberosIdentity::system(principal))
            }
            KerberosLoginKind::Password => {
                self.kinit(settings, &[], Some(&settings.password)).await
            }
            KerberosLoginKind::Keytab => {
                let keytab = settings
                    .keytab
                    .as_ref()
                    .ok_or_else(|| ConnectionError::login("keytab login without a keytab"))?;
                self.kinit(settings, &[OsStr::new("-k"), OsStr::new("-t"), keytab.as_os_str()], None)
                    .await
            }
        }
    }
}
