//! Common test utilities and fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lb_directory::{ConnectionError, ConnectionManager, KerberosIdentity, KerberosLogin, QueryEngine};
use lb_integration_tests::{MockConnector, MockDirectory};
use lb_model::{KerberosSettings, ServerProfile};

/// Base DN of every test profile.
pub const BASE_DN: &str = "dc=example,dc=com";

/// Test environment: a mock directory and an engine pointed at it.
pub struct TestEnv {
    /// The directory server.
    pub directory: Arc<MockDirectory>,
    /// Connection manager under test.
    pub connections: Arc<ConnectionManager<MockConnector>>,
    /// Query engine under test.
    pub engine: QueryEngine<MockConnector>,
    /// Profile the manager was created with.
    pub profile: ServerProfile,
}

impl TestEnv {
    /// Creates a disconnected environment with an anonymous profile.
    pub fn new() -> Self {
        Self::with_profile(anonymous_profile())
    }

    /// Creates a disconnected environment for `profile`.
    pub fn with_profile(profile: ServerProfile) -> Self {
        init_tracing();
        let directory = MockDirectory::new();
        let connections = Arc::new(ConnectionManager::new(
            MockConnector::new(Arc::clone(&directory)),
            profile.clone(),
        ));
        let engine = QueryEngine::new(Arc::clone(&connections));
        Self {
            directory,
            connections,
            engine,
            profile,
        }
    }

    /// Creates an environment and connects it.
    pub async fn connected() -> anyhow::Result<Self> {
        let env = Self::new();
        env.connect().await?;
        Ok(env)
    }

    /// Connects with the environment's profile.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.connections.connect(self.profile.clone()).await
    }

    /// Adds `count` children `cn=entryNNN` under the base DN, in reverse
    /// label order.
    pub fn populate_children(&self, count: usize) {
        for i in (0..count).rev() {
            self.directory.add(
                &format!("cn=entry{i:03},{BASE_DN}"),
                &["top", "organizationalRole"],
            );
        }
    }
}

/// Initializes test logging once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lb_directory=debug")
        .with_test_writer()
        .try_init();
}

/// Anonymous profile for `ldap.example.com`.
pub fn anonymous_profile() -> ServerProfile {
    ServerProfile::builder()
        .host("ldap.example.com")
        .base_dn(BASE_DN)
        .build()
        .expect("valid profile")
}

/// Kerberos ticket-cache profile for `ldap.example.com`.
pub fn kerberos_profile(principal: &str) -> ServerProfile {
    ServerProfile::builder()
        .host("ldap.example.com")
        .base_dn(BASE_DN)
        .kerberos(KerberosSettings {
            username: principal.to_string(),
            ..Default::default()
        })
        .build()
        .expect("valid profile")
}

/// Kerberos login that hands out system identities and counts calls.
#[derive(Debug, Default)]
pub struct CountingLogin {
    logins: AtomicUsize,
}

impl CountingLogin {
    /// Number of logins performed.
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KerberosLogin for CountingLogin {
    async fn login(&self, settings: &KerberosSettings) -> Result<KerberosIdentity, ConnectionError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(KerberosIdentity::system(Some(settings.username.clone())))
    }
}
