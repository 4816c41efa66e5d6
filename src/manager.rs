//! Named connector instances and their connection lifecycle.
//!
//! Each source id moves through an explicit state machine:
//!
//! ```text
//! Pending ──> Connecting ──> Connected
//!    ^            │
//!    └── Failed <─┘
//! ```
//!
//! A connection attempt runs as its own task and publishes its outcome on a
//! `watch` channel, so every caller waiting on the same id observes the same
//! attempt and dropping one waiter never strands the others.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::database::connector::Connector;
use crate::database::registry::{ConnectorFactory, DefaultConnectorFactory};
use crate::database::types::{ConnectorConfig, ExecuteOptions, SqlResult, SqlValue};
use crate::dsn::obfuscate_dsn;
use crate::error::GatewayError;
use crate::tunnel::{rewrite_dsn, Tunnel, TunnelProvider, TunnelTarget, UnavailableTunnelProvider};

/// Outcome of one attempt; `None` while it is running.
type AttemptOutcome = Option<Result<(), Arc<GatewayError>>>;

enum SourceState {
    Pending,
    Connecting(watch::Receiver<AttemptOutcome>),
    Connected {
        connector: Arc<dyn Connector>,
        tunnel: Option<Arc<dyn Tunnel>>,
    },
    Failed(Arc<GatewayError>),
}

/// Snapshot of a source's connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Configured, not connected
    Pending,
    /// An attempt is in flight
    Connecting,
    Connected,
    /// The last attempt failed with this message; the next use retries
    Failed(String),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}

struct Inner {
    /// Source ids in configuration order; the first is the default.
    order: Vec<String>,
    sources: HashMap<String, SourceConfig>,
    states: Mutex<HashMap<String, SourceState>>,
    factory: Arc<dyn ConnectorFactory>,
    tunnels: Arc<dyn TunnelProvider>,
}

/// Owns one connector per configured source.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectorManager {
    inner: Arc<Inner>,
}

impl ConnectorManager {
    /// Register `sources` without connecting anything.
    ///
    /// Sources are resolved here; ids must be unique and at least one source
    /// must be given.
    pub fn new(
        sources: Vec<SourceConfig>,
        factory: Arc<dyn ConnectorFactory>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> Result<Self, GatewayError> {
        if sources.is_empty() {
            return Err(GatewayError::config("At least one source must be configured"));
        }

        let mut order = Vec::with_capacity(sources.len());
        let mut resolved = HashMap::with_capacity(sources.len());
        let mut states = HashMap::with_capacity(sources.len());

        for source in sources {
            let source = source.resolve()?;
            if resolved.contains_key(&source.id) {
                return Err(GatewayError::config(format!(
                    "Duplicate source id '{}'",
                    source.id
                )));
            }
            order.push(source.id.clone());
            states.insert(source.id.clone(), SourceState::Pending);
            resolved.insert(source.id.clone(), source);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                order,
                sources: resolved,
                states: Mutex::new(states),
                factory,
                tunnels,
            }),
        })
    }

    /// Manager with the built-in connectors and no SSH transport.
    pub fn with_defaults(sources: Vec<SourceConfig>) -> Result<Self, GatewayError> {
        Self::new(
            sources,
            Arc::new(DefaultConnectorFactory),
            Arc::new(UnavailableTunnelProvider),
        )
    }

    /// Connect every eager source, one at a time in configuration order.
    ///
    /// The first failure disconnects whatever was already connected and is
    /// returned; lazy sources are left pending.
    pub async fn start(&self) -> Result<(), GatewayError> {
        for id in &self.inner.order {
            if self.inner.sources[id].lazy {
                debug!(source_id = %id, "Deferring lazy source");
                continue;
            }
            if let Err(e) = self.ensure_connected(id).await {
                warn!(source_id = %id, error = %e, "Startup connection failed, tearing down");
                self.disconnect().await;
                return Err(e);
            }
        }
        info!(sources = self.inner.order.len(), "Connector manager started");
        Ok(())
    }

    /// Connected connector for `id`, connecting first if needed.
    ///
    /// Concurrent calls for the same id share a single attempt.
    pub async fn ensure_connected(&self, id: &str) -> Result<Arc<dyn Connector>, GatewayError> {
        loop {
            let mut outcome = {
                let mut states = self.inner.states.lock();
                let state = states.get_mut(id).ok_or_else(|| self.not_found(id))?;
                match state {
                    SourceState::Connected { connector, .. } => return Ok(Arc::clone(connector)),
                    SourceState::Connecting(outcome) => outcome.clone(),
                    SourceState::Pending | SourceState::Failed(_) => {
                        let (publish, outcome) = watch::channel(None);
                        *state = SourceState::Connecting(outcome.clone());
                        self.spawn_attempt(id, publish);
                        outcome
                    }
                }
            };

            let result = match outcome.wait_for(Option::is_some).await {
                Ok(done) => done.clone(),
                Err(_) => None,
            };

            match result {
                Some(Ok(())) => continue,
                Some(Err(e)) => return Err(e.replicate()),
                None => {
                    // The attempt task died without reporting
                    let mut states = self.inner.states.lock();
                    if let Some(state) = states.get_mut(id) {
                        if matches!(state, SourceState::Connecting(_)) {
                            *state = SourceState::Pending;
                        }
                    }
                    return Err(GatewayError::internal(format!(
                        "Connection attempt for source '{}' was aborted",
                        id
                    )));
                }
            }
        }
    }

    fn spawn_attempt(&self, id: &str, publish: watch::Sender<AttemptOutcome>) {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();

        tokio::spawn(async move {
            let result = inner.establish(&id).await;

            let outcome = {
                let mut states = inner.states.lock();
                match result {
                    Ok((connector, tunnel)) => {
                        states.insert(id.clone(), SourceState::Connected { connector, tunnel });
                        Ok(())
                    }
                    Err(e) => {
                        warn!(source_id = %id, error = %e, "Source connection failed");
                        let e = Arc::new(e);
                        states.insert(id.clone(), SourceState::Failed(Arc::clone(&e)));
                        Err(e)
                    }
                }
            };
            publish.send_replace(Some(outcome));
        });
    }

    /// Connector for `id`, or for the default source when `None`.
    pub async fn get_connector(&self, id: Option<&str>) -> Result<Arc<dyn Connector>, GatewayError> {
        let id = id.unwrap_or_else(|| self.default_source_id());
        self.ensure_connected(id).await
    }

    /// Run `sql` against a source with that source's execute options.
    pub async fn execute(
        &self,
        id: Option<&str>,
        sql: &str,
        parameters: &[SqlValue],
    ) -> Result<SqlResult, GatewayError> {
        let id = id.unwrap_or_else(|| self.default_source_id());
        let options = self.execute_options(id)?;
        let connector = self.ensure_connected(id).await?;
        connector.execute_sql(sql, &options, parameters).await
    }

    /// Source ids in configuration order.
    pub fn source_ids(&self) -> &[String] {
        &self.inner.order
    }

    /// Id of the first configured source.
    pub fn default_source_id(&self) -> &str {
        // `new` rejects an empty source list
        self.inner.order.first().map(String::as_str).unwrap_or_default()
    }

    pub fn source_config(&self, id: &str) -> Result<&SourceConfig, GatewayError> {
        self.inner.sources.get(id).ok_or_else(|| self.not_found(id))
    }

    /// Default execute options for `id`.
    pub fn execute_options(&self, id: &str) -> Result<ExecuteOptions, GatewayError> {
        Ok(self.source_config(id)?.execute_options())
    }

    /// Driver-level settings for `id`.
    pub fn connector_config(&self, id: &str) -> Result<ConnectorConfig, GatewayError> {
        Ok(self.source_config(id)?.connector_config())
    }

    pub fn is_connected(&self, id: &str) -> bool {
        matches!(
            self.inner.states.lock().get(id),
            Some(SourceState::Connected { .. })
        )
    }

    /// Current state of `id`, or `None` for an unknown id.
    pub fn state(&self, id: &str) -> Option<ConnectionState> {
        self.inner.states.lock().get(id).map(|state| match state {
            SourceState::Pending => ConnectionState::Pending,
            SourceState::Connecting(_) => ConnectionState::Connecting,
            SourceState::Connected { .. } => ConnectionState::Connected,
            SourceState::Failed(e) => ConnectionState::Failed(e.to_string()),
        })
    }

    /// Disconnect every connector, then close every tunnel.
    ///
    /// Failures are logged and do not stop the rest of the teardown.
    /// Disconnected sources return to pending and reconnect on next use.
    pub async fn disconnect(&self) {
        let mut connectors = Vec::new();
        let mut tunnels = Vec::new();
        {
            let mut states = self.inner.states.lock();
            for id in &self.inner.order {
                let Some(state) = states.get_mut(id) else {
                    continue;
                };
                if matches!(state, SourceState::Connected { .. }) {
                    if let SourceState::Connected { connector, tunnel } =
                        std::mem::replace(state, SourceState::Pending)
                    {
                        connectors.push((id.clone(), connector));
                        if let Some(tunnel) = tunnel {
                            tunnels.push((id.clone(), tunnel));
                        }
                    }
                }
            }
        }

        for (id, connector) in connectors {
            match connector.disconnect().await {
                Ok(()) => info!(source_id = %id, "Source disconnected"),
                Err(e) => warn!(source_id = %id, error = %e, "Failed to disconnect source"),
            }
        }

        for (id, tunnel) in tunnels {
            close_tunnel(&id, tunnel.as_ref()).await;
        }
    }

    fn not_found(&self, id: &str) -> GatewayError {
        GatewayError::source_not_found(id, self.inner.order.clone())
    }
}

impl Inner {
    /// Open the tunnel (if any) and connect a fresh connector.
    async fn establish(
        &self,
        id: &str,
    ) -> Result<(Arc<dyn Connector>, Option<Arc<dyn Tunnel>>), GatewayError> {
        let source = self
            .sources
            .get(id)
            .ok_or_else(|| GatewayError::internal(format!("Source '{}' has no configuration", id)))?;
        let dialect = source.dialect()?;
        let config = source.connector_config();

        let mut dsn = source.dsn().to_string();
        let mut tunnel: Option<Arc<dyn Tunnel>> = None;

        if let Some(ref ssh) = source.ssh {
            let target = TunnelTarget::from_dsn(&dsn, dialect)?;
            let opened: Arc<dyn Tunnel> = Arc::from(self.tunnels.open(ssh, &target).await?);
            info!(
                source_id = %id,
                bastion = %ssh.host,
                target = %format!("{}:{}", target.host, target.port),
                local_port = opened.local_port(),
                "SSH tunnel established"
            );

            match rewrite_dsn(&dsn, opened.as_ref()) {
                Ok(rewritten) => dsn = rewritten,
                Err(e) => {
                    close_tunnel(id, opened.as_ref()).await;
                    return Err(e);
                }
            }
            tunnel = Some(opened);
        }

        let mut connector = self.factory.create(dialect);
        connector.set_source_id(id);

        debug!(source_id = %id, dsn = %obfuscate_dsn(&dsn), "Connecting source");
        if let Err(e) = connector
            .connect(&dsn, source.init_script.as_deref(), &config)
            .await
        {
            if let Some(ref tunnel) = tunnel {
                close_tunnel(id, tunnel.as_ref()).await;
            }
            return Err(e);
        }

        info!(source_id = %id, dialect = %dialect, "Source connected");
        Ok((Arc::from(connector), tunnel))
    }
}

async fn close_tunnel(id: &str, tunnel: &dyn Tunnel) {
    match tunnel.close().await {
        Ok(()) => debug!(source_id = %id, "SSH tunnel closed"),
        Err(e) => warn!(source_id = %id, error = %e, "Failed to close SSH tunnel"),
    }
}
