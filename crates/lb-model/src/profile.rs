//! Server connection profiles.
//!
//! A [`ServerProfile`] is the plain configuration record the host
//! application persists and hands to the engine. It is built through
//! [`ServerProfileBuilder`], which validates it, or loaded from
//! `LDAPBROWSE_*` environment variables.
//!
//! ## Security
//!
//! Passwords are wrapped in [`Secret`]: they never appear in `Debug`
//! output and are skipped when a profile is serialized.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, ProfileResult};

/// Default plain LDAP port.
pub const DEFAULT_PORT: u16 = 389;

/// Default LDAPS port.
pub const DEFAULT_SECURE_PORT: u16 = 636;

/// Default per-operation timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Secrets
// ============================================================================

/// A credential that must not leak through `Debug` or serialization.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the credential.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the credential is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// How the engine authenticates, without the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationKind {
    /// Anonymous access.
    None,
    /// Simple bind with DN and password.
    Simple,
    /// SASL GSSAPI with a Kerberos 5 identity.
    Kerberos5,
}

/// Where a Kerberos identity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KerberosLoginKind {
    /// Use the tickets already in the system credential cache.
    #[default]
    TicketCache,
    /// Obtain a ticket with principal and password.
    Password,
    /// Obtain a ticket with principal and keytab.
    Keytab,
}

/// Kerberos 5 login parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KerberosSettings {
    /// Principal name (`user@REALM`). Optional for ticket-cache logins.
    pub username: String,
    /// Password for [`KerberosLoginKind::Password`].
    #[serde(skip_serializing, default)]
    pub password: Secret,
    /// Keytab for [`KerberosLoginKind::Keytab`].
    pub keytab: Option<PathBuf>,
    /// Login configuration.
    pub login: KerberosLoginKind,
}

/// Authentication with its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Authentication {
    /// Anonymous access.
    #[default]
    None,
    /// Simple bind.
    Simple {
        /// Bind DN.
        bind_dn: String,
        /// Bind password.
        #[serde(skip_serializing, default)]
        password: Secret,
    },
    /// Kerberos 5 via SASL GSSAPI.
    Kerberos5(KerberosSettings),
}

impl Authentication {
    /// Returns the parameter-free kind.
    #[must_use]
    pub const fn kind(&self) -> AuthenticationKind {
        match self {
            Self::None => AuthenticationKind::None,
            Self::Simple { .. } => AuthenticationKind::Simple,
            Self::Kerberos5(_) => AuthenticationKind::Kerberos5,
        }
    }

    /// Returns the Kerberos settings, if this is a Kerberos profile.
    #[must_use]
    pub const fn kerberos(&self) -> Option<&KerberosSettings> {
        match self {
            Self::Kerberos5(settings) => Some(settings),
            _ => None,
        }
    }
}

// ============================================================================
// Server Profile
// ============================================================================

/// Connection parameters for one directory server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Use LDAPS.
    pub secure: bool,
    /// Per-operation timeout in milliseconds.
    pub timeout_ms: u64,
    /// Base DN the tree and searches are rooted at.
    pub base_dn: String,
    /// Authentication method and parameters.
    pub authentication: Authentication,
    /// Whether to validate the server certificate on LDAPS connections.
    pub validate_certificates: bool,
    /// Extra attribute names whose values are always binary.
    #[serde(default)]
    pub binary_attributes: Vec<String>,
}

impl ServerProfile {
    /// Creates a new profile builder.
    #[must_use]
    pub fn builder() -> ServerProfileBuilder {
        ServerProfileBuilder::new()
    }

    /// Per-operation timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connection URL, e.g. `ldaps://ldap.example.com:636`.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "ldaps" } else { "ldap" };
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{scheme}://[{}]:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }

    /// Validates the profile.
    ///
    /// ## Errors
    ///
    /// Returns an error if the host is missing, the port or timeout is zero,
    /// or the authentication parameters are incomplete for their kind.
    pub fn validate(&self) -> ProfileResult<()> {
        if self.host.trim().is_empty() {
            return Err(ProfileError::Missing("host"));
        }
        if self.port == 0 {
            return Err(ProfileError::invalid("port must be non-zero"));
        }
        if self.timeout_ms == 0 {
            return Err(ProfileError::invalid("timeout must be non-zero"));
        }

        match &self.authentication {
            Authentication::None => {}
            Authentication::Simple { bind_dn, .. } => {
                if bind_dn.trim().is_empty() {
                    return Err(ProfileError::Missing("bind_dn"));
                }
            }
            Authentication::Kerberos5(krb) => match krb.login {
                KerberosLoginKind::TicketCache => {}
                KerberosLoginKind::Password => {
                    if krb.username.trim().is_empty() {
                        return Err(ProfileError::Missing("kerberos username"));
                    }
                }
                KerberosLoginKind::Keytab => {
                    if krb.username.trim().is_empty() {
                        return Err(ProfileError::Missing("kerberos username"));
                    }
                    if krb.keytab.is_none() {
                        return Err(ProfileError::Missing("kerberos keytab"));
                    }
                }
            },
        }

        Ok(())
    }

    /// Loads a profile from `LDAPBROWSE_*` environment variables.
    ///
    /// ## Errors
    ///
    /// Returns an error if `LDAPBROWSE_HOST` is unset, a variable cannot be
    /// parsed, or the resulting profile fails validation.
    pub fn from_env() -> ProfileResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads a profile from an arbitrary variable source.
    ///
    /// Recognized variables: `LDAPBROWSE_HOST`, `_PORT`, `_SECURE`,
    /// `_TIMEOUT_MS`, `_BASE_DN`, `_VALIDATE_CERTS`, `_BINARY_ATTRIBUTES`
    /// (comma-separated), `_AUTH` (`none`, `simple`, `kerberos5`),
    /// `_BIND_DN`, `_BIND_PASSWORD`, `_KRB5_PRINCIPAL`, `_KRB5_PASSWORD`,
    /// `_KRB5_KEYTAB`, `_KRB5_LOGIN` (`ticket_cache`, `password`, `keytab`).
    ///
    /// ## Errors
    ///
    /// Same as [`ServerProfile::from_env`].
    pub fn from_lookup<F>(lookup: F) -> ProfileResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("LDAPBROWSE_{suffix}"));

        let host = var("HOST").ok_or(ProfileError::Missing("host"))?;
        let mut builder = Self::builder().host(host);

        if let Some(port) = var("PORT") {
            let port = port
                .trim()
                .parse()
                .map_err(|_| ProfileError::environment("LDAPBROWSE_PORT", "not a port number"))?;
            builder = builder.port(port);
        }
        if let Some(secure) = var("SECURE") {
            builder = builder.secure(parse_flag("LDAPBROWSE_SECURE", &secure)?);
        }
        if let Some(timeout) = var("TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                ProfileError::environment("LDAPBROWSE_TIMEOUT_MS", "not a number of milliseconds")
            })?;
            builder = builder.timeout(Duration::from_millis(millis));
        }
        if let Some(base_dn) = var("BASE_DN") {
            builder = builder.base_dn(base_dn);
        }
        if let Some(validate) = var("VALIDATE_CERTS") {
            builder = builder.validate_certificates(parse_flag("LDAPBROWSE_VALIDATE_CERTS", &validate)?);
        }
        if let Some(names) = var("BINARY_ATTRIBUTES") {
            for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                builder = builder.binary_attribute(name);
            }
        }

        let auth = var("AUTH").unwrap_or_else(|| "none".to_string());
        builder = match auth.trim().to_lowercase().as_str() {
            "none" | "" => builder.anonymous(),
            "simple" => builder.simple_bind(
                var("BIND_DN").unwrap_or_default(),
                var("BIND_PASSWORD").unwrap_or_default(),
            ),
            "kerberos5" | "kerberos" | "krb5" => {
                let login = match var("KRB5_LOGIN")
                    .unwrap_or_else(|| "ticket_cache".to_string())
                    .trim()
                    .to_lowercase()
                    .as_str()
                {
                    "ticket_cache" | "" => KerberosLoginKind::TicketCache,
                    "password" => KerberosLoginKind::Password,
                    "keytab" => KerberosLoginKind::Keytab,
                    other => {
                        return Err(ProfileError::environment(
                            "LDAPBROWSE_KRB5_LOGIN",
                            format!("unknown login kind '{other}'"),
                        ))
                    }
                };
                builder.kerberos(KerberosSettings {
                    username: var("KRB5_PRINCIPAL").unwrap_or_default(),
                    password: Secret::new(var("KRB5_PASSWORD").unwrap_or_default()),
                    keytab: var("KRB5_KEYTAB").map(PathBuf::from),
                    login,
                })
            }
            other => {
                return Err(ProfileError::environment(
                    "LDAPBROWSE_AUTH",
                    format!("unknown authentication kind '{other}'"),
                ))
            }
        };

        let profile = builder.build()?;
        tracing::debug!(
            url = %profile.url(),
            auth = ?profile.authentication.kind(),
            "Loaded server profile from environment"
        );
        Ok(profile)
    }
}

fn parse_flag(name: &str, value: &str) -> ProfileResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ProfileError::environment(name, "expected true or false")),
    }
}

// ============================================================================
// Profile Builder
// ============================================================================

/// Builder for [`ServerProfile`].
#[derive(Debug)]
pub struct ServerProfileBuilder {
    host: Option<String>,
    port: Option<u16>,
    secure: bool,
    timeout: Duration,
    base_dn: String,
    authentication: Authentication,
    validate_certificates: bool,
    binary_attributes: Vec<String>,
}

impl Default for ServerProfileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerProfileBuilder {
    /// Creates a builder with defaults: anonymous, plain LDAP, 5 s timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: None,
            port: None,
            secure: false,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            base_dn: String::new(),
            authentication: Authentication::None,
            validate_certificates: true,
            binary_attributes: Vec::new(),
        }
    }

    /// Sets the host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the port. Defaults to 389, or 636 for LDAPS.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Selects LDAPS.
    #[must_use]
    pub const fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the per-operation timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the base DN.
    #[must_use]
    pub fn base_dn(mut self, dn: impl Into<String>) -> Self {
        self.base_dn = dn.into();
        self
    }

    /// Uses anonymous access.
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.authentication = Authentication::None;
        self
    }

    /// Uses a simple bind.
    #[must_use]
    pub fn simple_bind(mut self, bind_dn: impl Into<String>, password: impl Into<Secret>) -> Self {
        self.authentication = Authentication::Simple {
            bind_dn: bind_dn.into(),
            password: password.into(),
        };
        self
    }

    /// Uses Kerberos 5.
    #[must_use]
    pub fn kerberos(mut self, settings: KerberosSettings) -> Self {
        self.authentication = Authentication::Kerberos5(settings);
        self
    }

    /// Sets whether server certificates are validated.
    #[must_use]
    pub const fn validate_certificates(mut self, validate: bool) -> Self {
        self.validate_certificates = validate;
        self
    }

    /// Marks an additional attribute as binary.
    #[must_use]
    pub fn binary_attribute(mut self, name: impl Into<String>) -> Self {
        self.binary_attributes.push(name.into());
        self
    }

    /// Builds and validates the profile.
    ///
    /// ## Errors
    ///
    /// Returns an error if the host is missing or validation fails.
    pub fn build(self) -> ProfileResult<ServerProfile> {
        let default_port = if self.secure {
            DEFAULT_SECURE_PORT
        } else {
            DEFAULT_PORT
        };
        let timeout_ms = u64::try_from(self.timeout.as_millis())
            .map_err(|_| ProfileError::invalid("timeout is too large"))?;

        let profile = ServerProfile {
            host: self.host.ok_or(ProfileError::Missing("host"))?,
            port: self.port.unwrap_or(default_port),
            secure: self.secure,
            timeout_ms,
            base_dn: self.base_dn,
            authentication: self.authentication,
            validate_certificates: self.validate_certificates,
            binary_attributes: self.binary_attributes,
        };

        profile.validate()?;

        Ok(profile)
    }
}
