//! Source configuration for the SQL gateway.
//!
//! A source is either a full connection string or discrete fields from which
//! one is assembled. The binary loads a single source from environment
//! variables following the 12-factor app pattern; embedders can deserialize
//! a list of [`SourceConfig`] from any format serde supports.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_SOURCE_ID, DEFAULT_SSH_PORT};
use crate::database::types::{ConnectorConfig, ExecuteOptions};
use crate::dialect::Dialect;
use crate::dsn::ConnectionUrl;
use crate::error::GatewayError;

/// Characters escaped in the userinfo part of an assembled DSN.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// SSH bastion in front of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTunnelConfig {
    /// Bastion hostname
    pub host: String,

    /// Bastion port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Login user on the bastion
    pub username: String,

    /// Password authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Path to a private key file
    #[serde(default)]
    pub private_key: Option<String>,

    /// Passphrase for `private_key`
    #[serde(default)]
    pub passphrase: Option<String>,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// One named database source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique id across the process
    pub id: String,

    /// Full connection string
    #[serde(default)]
    pub dsn: Option<String>,

    /// Database type when the DSN is assembled from discrete fields
    #[serde(default, rename = "type")]
    pub dialect: Option<Dialect>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Database name, or file path for SQLite
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// SQL Server named instance
    #[serde(default)]
    pub instance_name: Option<String>,

    /// SQL Server authentication (`ntlm`, `azure-active-directory-access-token`)
    #[serde(default)]
    pub authentication: Option<String>,

    /// NTLM domain
    #[serde(default)]
    pub domain: Option<String>,

    /// `disable` or `require`
    #[serde(default)]
    pub sslmode: Option<String>,

    #[serde(default)]
    pub ssh: Option<SshTunnelConfig>,

    /// Connect timeout in seconds
    #[serde(default)]
    pub connection_timeout: Option<u64>,

    /// Per-statement timeout in seconds
    #[serde(default)]
    pub query_timeout: Option<u64>,

    /// Statements run right after connecting
    #[serde(default)]
    pub init_script: Option<String>,

    /// Connect on first use instead of at startup
    #[serde(default)]
    pub lazy: bool,

    /// Reject anything but read-only statements
    #[serde(default)]
    pub readonly: bool,

    /// Cap on rows returned per query statement
    #[serde(default)]
    pub max_rows: Option<u32>,
}

impl SourceConfig {
    /// Source with just an id and a connection string.
    pub fn from_dsn(id: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dsn: Some(dsn.into()),
            ..Self::default()
        }
    }

    /// Validate and populate derived fields.
    ///
    /// With a DSN, the dialect, host, port and database are derived from it
    /// unless set explicitly. Without one, a DSN is assembled from the
    /// discrete fields.
    pub fn resolve(mut self) -> Result<Self, GatewayError> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::config("Source id must not be empty"));
        }

        match self.dsn.as_deref().map(str::trim) {
            Some(dsn) if !dsn.is_empty() => {
                let dsn = dsn.to_string();
                let dialect = Dialect::from_dsn(&dsn)?;
                if let Some(explicit) = self.dialect {
                    if explicit != dialect {
                        return Err(GatewayError::config(format!(
                            "Source '{}' declares type '{}' but its DSN is for '{}'",
                            self.id, explicit, dialect
                        )));
                    }
                }
                self.dialect = Some(dialect);

                if dialect != Dialect::Sqlite {
                    let url = ConnectionUrl::parse(&dsn)?;
                    self.host = self.host.or_else(|| url.host());
                    self.port = self.port.or_else(|| url.port()).or(dialect.default_port());
                    self.database = self.database.or_else(|| url.database());
                }
                self.dsn = Some(dsn);
            }
            _ => {
                let dialect = self.dialect.ok_or_else(|| {
                    GatewayError::config(format!(
                        "Source '{}' needs either a DSN or a database type",
                        self.id
                    ))
                })?;
                self.port = self.port.or(dialect.default_port());
                self.dsn = Some(self.assemble_dsn(dialect)?);
            }
        }

        if let Some(ref ssh) = self.ssh {
            if ssh.host.trim().is_empty() || ssh.username.trim().is_empty() {
                return Err(GatewayError::config(format!(
                    "Source '{}' has an SSH tunnel without host or username",
                    self.id
                )));
            }
            if self.dialect == Some(Dialect::Sqlite) {
                return Err(GatewayError::config(format!(
                    "Source '{}' is SQLite and cannot use an SSH tunnel",
                    self.id
                )));
            }
        }

        Ok(self)
    }

    fn assemble_dsn(&self, dialect: Dialect) -> Result<String, GatewayError> {
        let database = self.database.as_deref().unwrap_or_default();

        if dialect == Dialect::Sqlite {
            return match database {
                "" => Err(GatewayError::config(format!(
                    "SQLite source '{}' needs a database path",
                    self.id
                ))),
                ":memory:" => Ok("sqlite:///:memory:".to_string()),
                path => Ok(format!("sqlite://{}", path)),
            };
        }

        let host = self.host.as_deref().filter(|h| !h.is_empty()).ok_or_else(|| {
            GatewayError::config(format!("Source '{}' needs a host", self.id))
        })?;

        let mut dsn = format!("{}://", dialect.schemes()[0]);
        if let Some(ref user) = self.user {
            dsn.push_str(&utf8_percent_encode(user, USERINFO).to_string());
            if let Some(ref password) = self.password {
                dsn.push(':');
                dsn.push_str(&utf8_percent_encode(password, USERINFO).to_string());
            }
            dsn.push('@');
        }
        if host.contains(':') {
            dsn.push_str(&format!("[{}]", host));
        } else {
            dsn.push_str(host);
        }
        if let Some(port) = self.port {
            dsn.push_str(&format!(":{}", port));
        }
        if !database.is_empty() {
            dsn.push('/');
            dsn.push_str(&utf8_percent_encode(database, USERINFO).to_string());
        }

        let params: Vec<String> = [
            ("instanceName", &self.instance_name),
            ("authentication", &self.authentication),
            ("domain", &self.domain),
            ("sslmode", &self.sslmode),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .map(|v| format!("{}={}", key, utf8_percent_encode(v, USERINFO)))
        })
        .collect();
        if !params.is_empty() {
            dsn.push('?');
            dsn.push_str(&params.join("&"));
        }

        // Round-trip through the parser so a bad host fails here
        ConnectionUrl::parse(&dsn)?;
        Ok(dsn)
    }

    /// Connection string; empty until [`resolve`](Self::resolve) has run
    /// on a source configured by fields.
    pub fn dsn(&self) -> &str {
        self.dsn.as_deref().unwrap_or_default()
    }

    /// Dialect of the source.
    pub fn dialect(&self) -> Result<Dialect, GatewayError> {
        match self.dialect {
            Some(dialect) => Ok(dialect),
            None => Dialect::from_dsn(self.dsn()),
        }
    }

    /// Driver-level settings for this source.
    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            connection_timeout_seconds: self
                .connection_timeout
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_SECS),
            query_timeout_seconds: self.query_timeout,
            readonly: self.readonly,
        }
    }

    /// Default execute options for this source.
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            max_rows: self.max_rows,
            readonly: self.readonly,
        }
    }
}

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Configured sources; the first is the default
    pub sources: Vec<SourceConfig>,
}

impl GatewayConfig {
    /// Load a single-source configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Connection (one of)
    /// - `DSN`: Full connection string
    /// - `DB_TYPE`, `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`
    ///
    /// ## Optional
    /// - `SOURCE_ID`: Source id (default: `default`)
    /// - `READONLY`: Only allow read-only statements (default: false)
    /// - `MAX_ROWS`: Row cap per query statement
    /// - `CONNECTION_TIMEOUT`: Connect timeout in seconds (default: 30)
    /// - `QUERY_TIMEOUT`: Statement timeout in seconds
    /// - `INIT_SCRIPT`: SQL run after connecting
    /// - `LAZY`: Connect on first use (default: false)
    /// - `SSH_HOST`, `SSH_PORT`, `SSH_USER`, `SSH_PASSWORD`, `SSH_KEY`, `SSH_PASSPHRASE`
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GatewayError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            var(key)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false)
        };
        let number = |key: &str| -> Result<Option<u64>, GatewayError> {
            var(key)
                .map(|v| {
                    v.trim().parse().map_err(|_| {
                        GatewayError::config(format!("{} must be a number, got '{}'", key, v))
                    })
                })
                .transpose()
        };

        let dialect = var("DB_TYPE")
            .map(|t| {
                t.parse::<Dialect>()
                    .map_err(|e| GatewayError::config(e.to_string()))
            })
            .transpose()?;

        if var("DSN").is_none() && dialect.is_none() {
            return Err(GatewayError::config(
                "Set DSN, or DB_TYPE with DB_HOST and related variables",
            ));
        }

        let port = number("DB_PORT")?
            .map(|p| {
                u16::try_from(p).map_err(|_| GatewayError::config(format!("DB_PORT {} is out of range", p)))
            })
            .transpose()?;

        let max_rows = number("MAX_ROWS")?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));

        let ssh = match var("SSH_HOST") {
            Some(host) => Some(SshTunnelConfig {
                host,
                port: number("SSH_PORT")?
                    .and_then(|p| u16::try_from(p).ok())
                    .unwrap_or(DEFAULT_SSH_PORT),
                username: var("SSH_USER").ok_or_else(|| {
                    GatewayError::config("SSH_USER is required when SSH_HOST is set")
                })?,
                password: var("SSH_PASSWORD"),
                private_key: var("SSH_KEY"),
                passphrase: var("SSH_PASSPHRASE"),
            }),
            None => None,
        };

        let source = SourceConfig {
            id: var("SOURCE_ID").unwrap_or_else(|| DEFAULT_SOURCE_ID.to_string()),
            dsn: var("DSN"),
            dialect,
            host: var("DB_HOST"),
            port,
            database: var("DB_NAME"),
            user: var("DB_USER"),
            password: var("DB_PASSWORD"),
            instance_name: var("DB_INSTANCE_NAME"),
            authentication: var("DB_AUTHENTICATION"),
            domain: var("DB_DOMAIN"),
            sslmode: var("DB_SSLMODE"),
            ssh,
            connection_timeout: number("CONNECTION_TIMEOUT")?,
            query_timeout: number("QUERY_TIMEOUT")?,
            init_script: var("INIT_SCRIPT"),
            lazy: flag("LAZY"),
            readonly: flag("READONLY"),
            max_rows,
        }
        .resolve()?;

        Ok(Self {
            sources: vec![source],
        })
    }
}
