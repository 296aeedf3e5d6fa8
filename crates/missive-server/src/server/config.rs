use crate::connection::{SupervisorConfig, TlsPaths};
use crate::telemetry::LogFormat;
use anyhow::{Context, bail};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Runtime configuration for the `missive-server` binary.
///
/// Every flag is mirrored by an environment variable; a `.env` file in the
/// working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "missive-server",
    version,
    about = "Message service with keyset pagination and allocator-issued ids"
)]
pub struct CliArgs {
    /// Address the HTTP server binds to.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8040"))]
    pub server_addr: String,

    /// PostgreSQL connection string. Messages are kept in memory when unset.
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Size of the PostgreSQL connection pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub database_max_connections: u32,

    /// Create the `messages` table on startup if it does not exist.
    ///
    /// Environment variable: `DATABASE_ENSURE_SCHEMA`
    #[arg(long, env = "DATABASE_ENSURE_SCHEMA", default_value_t = false)]
    pub database_ensure_schema: bool,

    /// `host:port` (or full URI) of the id allocator. Message creation is
    /// disabled when unset.
    ///
    /// Environment variable: `ALLOCATOR_ENDPOINT`
    #[arg(long, env = "ALLOCATOR_ENDPOINT")]
    pub allocator_endpoint: Option<String>,

    /// Per-attempt connect deadline, in seconds.
    ///
    /// Environment variable: `ALLOCATOR_DEADLINE_SECS`
    #[arg(
        long,
        env = "ALLOCATOR_DEADLINE_SECS",
        default_value_t = 5,
        allow_negative_numbers = true
    )]
    pub allocator_deadline_secs: i64,

    /// Connect retries after the first attempt.
    ///
    /// Environment variable: `ALLOCATOR_RETRIES`
    #[arg(
        long,
        env = "ALLOCATOR_RETRIES",
        default_value_t = 5,
        allow_negative_numbers = true
    )]
    pub allocator_retries: i64,

    /// PEM root certificate used to verify the allocator.
    ///
    /// Environment variable: `ALLOCATOR_ROOT_CERT`
    #[arg(long, env = "ALLOCATOR_ROOT_CERT")]
    pub allocator_root_cert: Option<PathBuf>,

    /// PEM client certificate presented to the allocator.
    ///
    /// Environment variable: `ALLOCATOR_CLIENT_CERT`
    #[arg(long, env = "ALLOCATOR_CLIENT_CERT")]
    pub allocator_client_cert: Option<PathBuf>,

    /// PEM private key for the client certificate.
    ///
    /// Environment variable: `ALLOCATOR_CLIENT_KEY`
    #[arg(long, env = "ALLOCATOR_CLIENT_KEY")]
    pub allocator_client_key: Option<PathBuf>,

    /// Server name expected in the allocator's certificate, if it differs
    /// from the endpoint host.
    ///
    /// Environment variable: `ALLOCATOR_TLS_DOMAIN`
    #[arg(long, env = "ALLOCATOR_TLS_DOMAIN")]
    pub allocator_tls_domain: Option<String>,

    /// Log every allocation request at debug level.
    ///
    /// Environment variable: `ALLOCATOR_DEBUG`
    #[arg(long, env = "ALLOCATOR_DEBUG", default_value_t = false)]
    pub allocator_debug: bool,

    /// Console log layout.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub ensure_schema: bool,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &redact_url(&self.url))
            .field("max_connections", &self.max_connections)
            .field("ensure_schema", &self.ensure_schema)
            .finish()
    }
}

/// Masks the userinfo of a connection URL and drops its query string, where
/// libpq-style URLs may carry a password.
fn redact_url(url: &str) -> String {
    let url = url.split_once('?').map_or(url, |(base, _)| base);
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let authority_end = rest.find('/').unwrap_or(rest.len());
            match rest[..authority_end].rfind('@') {
                Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
                None => format!("{scheme}://{rest}"),
            }
        }
        None => "***".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub supervisor: SupervisorConfig,
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub database: Option<DatabaseConfig>,
    pub allocator: Option<AllocatorConfig>,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr: SocketAddr = args.server_addr.parse().with_context(|| {
            format!("SERVER_ADDR `{}` is not a socket address", args.server_addr)
        })?;

        let database = match args.database_url {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => {
                if args.database_max_connections == 0 {
                    bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
                }
                Some(DatabaseConfig {
                    url,
                    max_connections: args.database_max_connections,
                    ensure_schema: args.database_ensure_schema,
                })
            }
            None => None,
        };

        let tls = TlsPaths::from_parts(
            args.allocator_root_cert,
            args.allocator_client_cert,
            args.allocator_client_key,
        )?;

        let allocator = match args.allocator_endpoint {
            Some(endpoint) => {
                let mut supervisor = SupervisorConfig::from_raw(
                    "allocator",
                    endpoint,
                    args.allocator_deadline_secs,
                    args.allocator_retries,
                )?;
                if let Some(tls) = tls {
                    supervisor = supervisor.with_tls(tls);
                }
                if let Some(domain) = args.allocator_tls_domain {
                    supervisor = supervisor.with_tls_domain(domain);
                }
                Some(AllocatorConfig {
                    supervisor,
                    debug: args.allocator_debug,
                })
            }
            None if tls.is_some() => {
                bail!("allocator TLS material is set but ALLOCATOR_ENDPOINT is not")
            }
            None => None,
        };

        Ok(Self {
            server_addr,
            database,
            allocator,
            log_format: args.log_format,
        })
    }
}
