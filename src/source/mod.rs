use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigurationError, ControlConfig};

/// Raw status snapshot as reported by the control server.
pub type RawSnapshot = Value;

/// Errors raised while fetching a status snapshot.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The control socket does not exist yet. Expected while the host
    /// process is still booting.
    #[error("control socket {} not found", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("control endpoint is not configured")]
    NotConfigured,

    #[error("unix socket transport is not supported on this platform")]
    UnsupportedTransport,

    #[error("control request timed out after {0:?}")]
    Timeout(Duration),

    #[error("control socket I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("control request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from control server")]
    Status { status: u16 },

    #[error("control server returned an empty body")]
    EmptyBody,

    #[error("decoding stats: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Whether this is the not-yet-ready socket case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Produces raw status snapshots on demand.
pub trait SampleSource: Send + Sync {
    /// Whether the source has an endpoint to poll.
    fn is_configured(&self) -> bool {
        true
    }

    /// Fetches one snapshot from the monitored process.
    fn fetch(&self) -> impl std::future::Future<Output = Result<RawSnapshot, FetchError>> + Send;
}

/// Parsed control server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEndpoint {
    /// `unix://<path>`
    Unix(PathBuf),
    /// `tcp://<host>:<port>`, queried over plain HTTP.
    Tcp(String),
}

impl ControlEndpoint {
    /// Parses a `unix://` or `tcp://` control URL.
    pub fn parse(url: &str) -> Result<Self, ConfigurationError> {
        let invalid = || ConfigurationError::InvalidControlUrl(url.to_string());

        if let Some(path) = url.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        if let Some(authority) = url.strip_prefix("tcp://") {
            let authority = authority.trim_end_matches('/');
            if authority.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Tcp(authority.to_string()));
        }

        Err(invalid())
    }
}

/// Control server client speaking HTTP over a Unix socket or TCP.
pub struct ControlClient {
    http: reqwest::Client,
    endpoint: Option<ControlEndpoint>,
    stats_url: reqwest::Url,
    timeout: Duration,
}

impl ControlClient {
    /// Creates a client from configuration. A missing URL is allowed here;
    /// every fetch then fails with [`FetchError::NotConfigured`].
    pub fn new(cfg: &ControlConfig) -> Result<Self> {
        let endpoint = cfg
            .url
            .as_deref()
            .map(ControlEndpoint::parse)
            .transpose()?;

        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        let authority = match &endpoint {
            Some(ControlEndpoint::Tcp(authority)) => authority.as_str(),
            _ => "localhost",
        };
        let stats_url = stats_url(authority, &cfg.auth_token)?;

        Ok(Self {
            http,
            endpoint,
            stats_url,
            timeout,
        })
    }

    /// Configured endpoint, if any.
    pub fn endpoint(&self) -> Option<&ControlEndpoint> {
        self.endpoint.as_ref()
    }

    /// Path and query sent on the Unix socket transport.
    fn stats_path(&self) -> String {
        match self.stats_url.query() {
            Some(query) => format!("{}?{query}", self.stats_url.path()),
            None => self.stats_url.path().to_string(),
        }
    }

    async fn read_data(&self) -> Result<String, FetchError> {
        match &self.endpoint {
            None => Err(FetchError::NotConfigured),
            Some(ControlEndpoint::Unix(path)) => self.read_socket(path).await,
            Some(ControlEndpoint::Tcp(_)) => self.read_http().await,
        }
    }

    async fn read_http(&self) -> Result<String, FetchError> {
        let response = self.http.get(self.stats_url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    #[cfg(unix)]
    async fn read_socket(&self, path: &Path) -> Result<String, FetchError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::UnixStream;

        let exchange = async {
            let mut stream = UnixStream::connect(path).await.map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    FetchError::NotFound {
                        path: path.to_path_buf(),
                        source: e,
                    }
                } else {
                    FetchError::Io(e)
                }
            })?;

            let request = format!("GET {} HTTP/1.0\r\n\r\n", self.stats_path());
            stream.write_all(request.as_bytes()).await?;

            let mut response = Vec::with_capacity(4096);
            stream.read_to_end(&mut response).await?;

            Ok::<_, FetchError>(String::from_utf8_lossy(&response).into_owned())
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }

    #[cfg(not(unix))]
    async fn read_socket(&self, _path: &Path) -> Result<String, FetchError> {
        Err(FetchError::UnsupportedTransport)
    }
}

/// Builds the `/stats` URL with the token as a percent-encoded query pair.
fn stats_url(authority: &str, token: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(&format!("http://{authority}/stats"))
        .with_context(|| format!("invalid control address {authority}"))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

impl SampleSource for ControlClient {
    fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn fetch(&self) -> Result<RawSnapshot, FetchError> {
        let body = self.read_data().await?;
        debug!(bytes = body.len(), "fetched control stats");
        parse_snapshot(&body)
    }
}

/// Parses the last non-blank line of a response body as JSON.
///
/// Works for both a bare body and a full HTTP/1.0 response read off a
/// socket, where the stats document follows the headers.
pub fn parse_snapshot(body: &str) -> Result<RawSnapshot, FetchError> {
    let line = body
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or(FetchError::EmptyBody)?;

    Ok(serde_json::from_str(line)?)
}
