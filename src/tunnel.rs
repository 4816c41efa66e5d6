//! SSH tunnel contract.
//!
//! The gateway does not speak SSH itself. A [`TunnelProvider`] opens a
//! forward from a loopback port to the database endpoint through a bastion;
//! the manager only needs the local endpoint it exposes and a way to close it.

use async_trait::async_trait;

use crate::config::SshTunnelConfig;
use crate::constants::TUNNEL_LOOPBACK_HOST;
use crate::dialect::Dialect;
use crate::dsn::ConnectionUrl;
use crate::error::GatewayError;

/// Database endpoint a tunnel forwards to, as seen from the bastion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    /// Endpoint named by `dsn`, with the dialect's default port when absent.
    pub fn from_dsn(dsn: &str, dialect: Dialect) -> Result<Self, GatewayError> {
        let url = ConnectionUrl::parse(dsn)?;
        let port = url.port().or(dialect.default_port()).ok_or_else(|| {
            GatewayError::config(format!(
                "{} sources cannot be reached through a tunnel",
                dialect.display_name()
            ))
        })?;
        Ok(Self {
            host: url.require_host()?,
            port,
        })
    }
}

/// An established forward.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Loopback address the forward listens on.
    fn local_host(&self) -> &str {
        TUNNEL_LOOPBACK_HOST
    }

    fn local_port(&self) -> u16;

    /// Stop forwarding. Closing twice is a no-op.
    async fn close(&self) -> Result<(), GatewayError>;
}

/// Opens tunnels.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn open(
        &self,
        ssh: &SshTunnelConfig,
        target: &TunnelTarget,
    ) -> Result<Box<dyn Tunnel>, GatewayError>;
}

/// Provider for builds without an SSH transport; every open fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTunnelProvider;

#[async_trait]
impl TunnelProvider for UnavailableTunnelProvider {
    async fn open(
        &self,
        ssh: &SshTunnelConfig,
        target: &TunnelTarget,
    ) -> Result<Box<dyn Tunnel>, GatewayError> {
        Err(GatewayError::tunnel(format!(
            "No SSH transport configured to reach {}:{} via {}@{}:{}",
            target.host, target.port, ssh.username, ssh.host, ssh.port
        )))
    }
}

/// Point `dsn` at the tunnel's local endpoint.
pub fn rewrite_dsn(dsn: &str, tunnel: &dyn Tunnel) -> Result<String, GatewayError> {
    ConnectionUrl::parse(dsn)?.with_endpoint(tunnel.local_host(), tunnel.local_port())
}
