//! Gateway configuration.
//!
//! [`GatewayArgs`] is the command-line / environment surface. It is turned
//! into a validated [`GatewayConfig`] by [`GatewayArgs::into_config`]; the
//! rest of the crate only ever sees the typed configs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use learnms_core::{RedactionPolicy, DEFAULT_CORRELATION_HEADER};
use regex::Regex;
use url::Url;

use crate::network::NetworkConfig;
use crate::pipeline::DEFAULT_QUIET_PATHS;

/// Header an upstream authentication proxy uses to pass the caller's identity.
pub const DEFAULT_IDENTITY_HEADER: &str = "X-Authenticated-User";

const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:8081/";

/// Header names are lower-cased by the HTTP stack before redaction sees them.
pub const DEFAULT_REDACT_FIELDS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Errors raised while validating [`GatewayArgs`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid upstream url {url:?}: {source}")]
    UpstreamUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("upstream url {0:?} cannot be used as a base")]
    UpstreamNotBase(String),
    #[error("invalid quiet path pattern: {0}")]
    QuietPaths(#[from] regex::Error),
    #[error("correlation header must not be empty")]
    EmptyCorrelationHeader,
}

/// Output format for the process-wide tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, one event per line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

// ---------------------------------------------------------------------------
// Typed configs
// ---------------------------------------------------------------------------

/// Settings for the interceptor chain.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Header carrying the correlation id.
    pub correlation_header: String,
    /// Header carrying the authenticated principal.
    pub identity_header: String,
    /// Field names masked in audit records.
    pub redaction: Arc<RedactionPolicy>,
    /// Successful requests whose path matches are not audited.
    pub quiet_paths: Option<Regex>,
    /// Capacity of the queue between request handling and the audit writer.
    pub audit_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            correlation_header: DEFAULT_CORRELATION_HEADER.to_string(),
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            redaction: Arc::new(RedactionPolicy::new(DEFAULT_REDACT_FIELDS.iter().copied())),
            quiet_paths: Regex::new(DEFAULT_QUIET_PATHS).ok(),
            audit_queue_capacity: 4096,
        }
    }
}

/// Settings for the downstream forwarder.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Base URL every request path is resolved against.
    pub upstream: Url,
    /// Total time allowed for one downstream exchange.
    pub timeout: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            upstream: Url::parse(DEFAULT_UPSTREAM).expect("default upstream is a valid URL"),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Complete, validated gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub network: NetworkConfig,
    pub pipeline: PipelineConfig,
    pub forward: ForwardConfig,
    pub log_format: LogFormat,
    /// Where the Prometheus scrape endpoint listens, if enabled.
    pub metrics_addr: Option<SocketAddr>,
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// learnms API gateway
#[derive(Debug, Parser)]
#[command(name = "learnms-gateway", version, about)]
pub struct GatewayArgs {
    /// Bind address
    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port
    #[arg(short, long, env = "GATEWAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Base URL of the downstream services
    #[arg(long, env = "GATEWAY_UPSTREAM", default_value = DEFAULT_UPSTREAM)]
    pub upstream: String,

    /// Downstream timeout in milliseconds
    #[arg(long, env = "GATEWAY_UPSTREAM_TIMEOUT_MS", default_value_t = 30_000)]
    pub upstream_timeout_ms: u64,

    /// Header carrying the correlation id
    #[arg(long, env = "GATEWAY_CORRELATION_HEADER", default_value = DEFAULT_CORRELATION_HEADER)]
    pub correlation_header: String,

    /// Header carrying the authenticated user, set by the auth proxy
    #[arg(long, env = "GATEWAY_IDENTITY_HEADER", default_value = DEFAULT_IDENTITY_HEADER)]
    pub identity_header: String,

    /// Comma-separated header and query parameter names to mask in audit records
    #[arg(
        long,
        env = "GATEWAY_REDACT_FIELDS",
        value_delimiter = ',',
        default_value = "authorization,cookie,set-cookie"
    )]
    pub redact_fields: Vec<String>,

    /// Paths matching this pattern are only audited when they fail; empty disables
    #[arg(long, env = "GATEWAY_QUIET_PATHS", default_value = DEFAULT_QUIET_PATHS)]
    pub quiet_paths: String,

    /// Audit queue capacity
    #[arg(long, env = "GATEWAY_AUDIT_QUEUE", default_value_t = 4096)]
    pub audit_queue_capacity: usize,

    /// Maximum request body size in bytes
    #[arg(long, env = "GATEWAY_BODY_LIMIT", default_value_t = 2 * 1024 * 1024)]
    pub body_limit: usize,

    /// Log output format
    #[arg(long, env = "GATEWAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Address for the Prometheus scrape endpoint
    #[arg(long, env = "GATEWAY_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl GatewayArgs {
    /// Validates the arguments and builds the typed configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unparseable or non-base upstream URL,
    /// an invalid quiet path regex, or a blank correlation header name.
    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let correlation_header = self.correlation_header.trim().to_string();
        if correlation_header.is_empty() {
            return Err(ConfigError::EmptyCorrelationHeader);
        }

        let upstream = Url::parse(&self.upstream).map_err(|source| ConfigError::UpstreamUrl {
            url: self.upstream.clone(),
            source,
        })?;
        if upstream.cannot_be_a_base() {
            return Err(ConfigError::UpstreamNotBase(self.upstream));
        }

        let quiet_paths = if self.quiet_paths.trim().is_empty() {
            None
        } else {
            Some(Regex::new(&self.quiet_paths)?)
        };

        let redaction = RedactionPolicy::new(
            self.redact_fields
                .iter()
                .map(|f| f.trim())
                .filter(|f| !f.is_empty()),
        );

        Ok(GatewayConfig {
            network: NetworkConfig {
                host: self.host,
                port: self.port,
                body_limit: self.body_limit,
                ..NetworkConfig::default()
            },
            pipeline: PipelineConfig {
                correlation_header,
                identity_header: self.identity_header,
                redaction: Arc::new(redaction),
                quiet_paths,
                audit_queue_capacity: self.audit_queue_capacity,
            },
            forward: ForwardConfig {
                upstream,
                timeout: Duration::from_millis(self.upstream_timeout_ms),
            },
            log_format: self.log_format,
            metrics_addr: self.metrics_addr,
        })
    }
}
