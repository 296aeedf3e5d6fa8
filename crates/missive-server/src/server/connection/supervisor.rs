//! Supervised connection to one allocator endpoint.
//!
//! [`ConnectionSupervisor`] owns exactly one gRPC [`Channel`] and never hands
//! it out before it is ready. Ready means the transport is connected (TCP,
//! plus the TLS handshake in mutual TLS mode); it does not mean the allocator
//! service has answered a call. It drives the lifecycle:
//!
//! - **Validating**: configuration is checked synchronously in
//!   [`ConnectionSupervisor::connect`]. Invalid configuration is returned as a
//!   [`ConfigError`] and no connection is attempted.
//! - **Initializing**: a background task issues one connect attempt at a time,
//!   each bounded by the configured deadline. A failed attempt is retried with
//!   the same deadline while `attempts_used < max_retries`. There is no
//!   backoff between attempts.
//! - **Initialized**: terminal success; the channel is published.
//! - **InitializeFailed**: terminal failure; retries exhausted or the attempt
//!   was cancelled by [`ConnectionSupervisor::disconnect`].
//! - **Disconnected**: a ready channel was closed on request.
//!
//! The state lives in a [`watch`] cell so health checks on other threads can
//! read it without locking and tests can await settlement.
//!
//! ## Transport
//!
//! Plaintext unless credential material is configured, in which case the
//! channel uses mutual TLS. Credential files are read at construction (an
//! unreadable file is a [`ConfigError`]) but only interpreted when connecting,
//! so wrong or mismatched material shows up as ordinary failed attempts.

use crate::telemetry::increment_connect_attempts;
use missive_core::{AllocationError, ConfigError, ConnectError, types::ConnectionState};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

/// Per-attempt connect deadline used when none is configured.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Number of retries after the first attempt used when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Paths to the PEM files used for mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub root_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl TlsPaths {
    /// Builds the path set from three optional paths. All three or none.
    pub fn from_parts(
        root_cert: Option<PathBuf>,
        client_cert: Option<PathBuf>,
        client_key: Option<PathBuf>,
    ) -> Result<Option<Self>, ConfigError> {
        match (root_cert, client_cert, client_key) {
            (None, None, None) => Ok(None),
            (Some(root_cert), Some(client_cert), Some(client_key)) => Ok(Some(Self {
                root_cert,
                client_cert,
                client_key,
            })),
            _ => Err(ConfigError::IncompleteTls),
        }
    }
}

/// Configuration for one [`ConnectionSupervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Name used in logs and health output, e.g. `"allocator"`.
    pub label: String,
    /// `host:port`, or a full `http://` / `https://` URI.
    pub endpoint: String,
    pub deadline: Duration,
    pub max_retries: u32,
    pub tls: Option<TlsPaths>,
    /// Overrides the server name checked against the server certificate.
    pub tls_domain: Option<String>,
}

impl SupervisorConfig {
    pub fn new(label: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            endpoint: endpoint.into(),
            deadline: DEFAULT_DEADLINE,
            max_retries: DEFAULT_MAX_RETRIES,
            tls: None,
            tls_domain: None,
        }
    }

    /// Builds a configuration from the signed values the CLI layer accepts,
    /// rejecting negative deadlines and retry counts.
    pub fn from_raw(
        label: impl Into<String>,
        endpoint: impl Into<String>,
        deadline_secs: i64,
        retries: i64,
    ) -> Result<Self, ConfigError> {
        let deadline_secs =
            u64::try_from(deadline_secs).map_err(|_| ConfigError::NegativeDeadline(deadline_secs))?;
        if retries < 0 {
            return Err(ConfigError::NegativeRetries(retries));
        }
        // Anything beyond u32::MAX retries is indistinguishable from "forever".
        let max_retries = u32::try_from(retries).unwrap_or(u32::MAX);

        Ok(Self::new(label, endpoint)
            .with_deadline(Duration::from_secs(deadline_secs))
            .with_max_retries(max_retries))
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_tls(mut self, tls: TlsPaths) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_tls_domain(mut self, domain: impl Into<String>) -> Self {
        self.tls_domain = Some(domain.into());
        self
    }
}

/// PEM material loaded from [`TlsPaths`].
struct Credentials {
    root_cert: Vec<u8>,
    client_cert: Vec<u8>,
    client_key: Vec<u8>,
}

impl Credentials {
    fn load(paths: &TlsPaths) -> Result<Self, ConfigError> {
        Ok(Self {
            root_cert: read_credential("root certificate", &paths.root_cert)?,
            client_cert: read_credential("client certificate", &paths.client_cert)?,
            client_key: read_credential("client key", &paths.client_key)?,
        })
    }
}

fn read_credential(what: &'static str, path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| ConfigError::UnreadableCredential {
        what,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

enum Transport {
    Plaintext,
    MutualTls {
        credentials: Credentials,
        domain: Option<String>,
    },
}

/// Owns and supervises a single allocator channel.
///
/// Created with [`ConnectionSupervisor::connect`], which validates the
/// configuration and spawns the retry loop. The loop is single-flight: a new
/// attempt starts only after the previous one resolved. Supervisors share no
/// state with each other.
pub struct ConnectionSupervisor {
    label: String,
    uri: String,
    deadline: Duration,
    max_retries: u32,
    transport: Transport,
    state: watch::Sender<ConnectionState>,
    channel: RwLock<Option<Channel>>,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    /// Validates `config` and starts connecting in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the endpoint is not a valid URI, if only
    /// part of the TLS material is configured, or if a credential file cannot
    /// be read. No connection is attempted in that case.
    pub fn connect(config: SupervisorConfig) -> Result<Arc<Self>, ConfigError> {
        let (state, _) = watch::channel(ConnectionState::Validating);

        let transport = match &config.tls {
            None => Transport::Plaintext,
            Some(paths) => Transport::MutualTls {
                credentials: Credentials::load(paths)?,
                domain: config.tls_domain.clone(),
            },
        };
        let uri = endpoint_uri(&config.endpoint, config.tls.is_some());
        Endpoint::from_shared(uri.clone()).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            reason: e.to_string(),
        })?;

        let supervisor = Arc::new(Self {
            label: config.label,
            uri,
            deadline: config.deadline,
            max_retries: config.max_retries,
            transport,
            state,
            channel: RwLock::new(None),
            cancel: CancellationToken::new(),
        });

        supervisor.state.send_replace(ConnectionState::Initializing);
        tracing::info!(
            upstream = %supervisor.label,
            uri = %supervisor.uri,
            tls = supervisor.is_tls(),
            deadline = ?supervisor.deadline,
            max_retries = supervisor.max_retries,
            "Connecting to allocator"
        );

        tokio::spawn(Arc::clone(&supervisor).supervise());

        Ok(supervisor)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::MutualTls { .. })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Resolves once the supervisor has stopped trying to connect and returns
    /// the settled state.
    pub async fn wait_settled(&self) -> ConnectionState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| state.is_settled()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Returns a handle to the ready channel.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotReady`] unless the state is `Initialized`.
    pub fn ready_channel(&self) -> Result<Channel, AllocationError> {
        let channel = self.channel.read();
        let state = self.state();
        match (state, channel.as_ref()) {
            (ConnectionState::Initialized, Some(channel)) => Ok(channel.clone()),
            _ => Err(AllocationError::NotReady { state }),
        }
    }

    /// Closes the channel.
    ///
    /// - `Initialized`: the channel is dropped and the state becomes
    ///   `Disconnected`.
    /// - `Validating`/`Initializing`: the in-flight attempt is cancelled and
    ///   the loop ends in `InitializeFailed` without retrying.
    /// - Otherwise: no-op.
    pub fn disconnect(&self) {
        let mut closed = false;
        self.state.send_if_modified(|state| match *state {
            ConnectionState::Initialized => {
                *state = ConnectionState::Disconnected;
                closed = true;
                true
            }
            ConnectionState::Validating | ConnectionState::Initializing => {
                self.cancel.cancel();
                false
            }
            ConnectionState::InitializeFailed | ConnectionState::Disconnected => false,
        });

        if closed {
            self.channel.write().take();
            tracing::info!(upstream = %self.label, "Allocator connection closed");
        } else if self.cancel.is_cancelled() {
            tracing::info!(upstream = %self.label, "Cancelling allocator connect");
        }
    }

    /// The retry loop. Runs until the state settles.
    async fn supervise(self: Arc<Self>) {
        let mut attempts_used: u32 = 0;

        loop {
            let attempt = attempts_used + 1;
            tracing::debug!(upstream = %self.label, attempt, "Connect attempt");
            increment_connect_attempts(&self.label);

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(ConnectError::Cancelled),
                result = self.attempt() => result,
            };

            match outcome {
                Ok(channel) => {
                    self.publish_ready(channel, attempt);
                    return;
                }
                Err(ConnectError::Cancelled) => {
                    tracing::warn!(upstream = %self.label, attempt, "Connect cancelled");
                    self.publish_failed();
                    return;
                }
                Err(e) if attempts_used < self.max_retries => {
                    attempts_used += 1;
                    tracing::warn!(
                        upstream = %self.label,
                        attempt,
                        remaining = self.max_retries - attempts_used + 1,
                        "Connect attempt failed: {e}"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        upstream = %self.label,
                        attempts = attempt,
                        "Allocator unreachable, giving up: {e}"
                    );
                    self.publish_failed();
                    return;
                }
            }
        }
    }

    /// One connect attempt bounded by the deadline.
    async fn attempt(&self) -> Result<Channel, ConnectError> {
        let endpoint = self.endpoint()?;
        match timeout(self.deadline, endpoint.connect()).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(e)) => Err(ConnectError::Transport(error_chain(&e))),
            Err(_) => Err(ConnectError::Timeout(self.deadline)),
        }
    }

    fn endpoint(&self) -> Result<Endpoint, ConnectError> {
        let endpoint = Endpoint::from_shared(self.uri.clone())
            .map_err(|e| ConnectError::Transport(e.to_string()))?
            .connect_timeout(self.deadline);

        match &self.transport {
            Transport::Plaintext => Ok(endpoint),
            Transport::MutualTls {
                credentials,
                domain,
            } => {
                let mut tls = ClientTlsConfig::new()
                    .ca_certificate(Certificate::from_pem(&credentials.root_cert))
                    .identity(Identity::from_pem(
                        &credentials.client_cert,
                        &credentials.client_key,
                    ));
                if let Some(domain) = domain {
                    tls = tls.domain_name(domain.clone());
                }
                endpoint
                    .tls_config(tls)
                    .map_err(|e| ConnectError::Transport(error_chain(&e)))
            }
        }
    }

    fn publish_ready(&self, channel: Channel, attempt: u32) {
        *self.channel.write() = Some(channel);

        let published = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Initializing && !self.cancel.is_cancelled() {
                *state = ConnectionState::Initialized;
                true
            } else {
                false
            }
        });

        if published {
            tracing::info!(upstream = %self.label, attempt, "Allocator connection ready");
        } else {
            // Disconnected while the last attempt was completing.
            self.channel.write().take();
            self.publish_failed();
        }
    }

    fn publish_failed(&self) {
        self.state.send_if_modified(|state| {
            if state.is_settled() {
                false
            } else {
                *state = ConnectionState::InitializeFailed;
                true
            }
        });
    }
}

fn endpoint_uri(endpoint: &str, tls: bool) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if tls {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

/// Flattens an error and its sources into one line; tonic's transport errors
/// hide the useful part in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}
