pub mod health;
pub mod http;
pub mod log;
pub mod metric;

use std::io;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

use crate::config::PublishConfig;
use crate::storage::Windows;

use self::http::HttpPublisher;
use self::log::LogPublisher;

/// Errors raised while publishing a flush.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("encoding metric data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("compressing metric data: {0}")]
    Compress(#[from] io::Error),

    #[error("sending metric data: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from metrics backend")]
    Status { status: u16 },
}

impl PublishError {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Encode(_) => "encode",
            Self::Compress(_) => "compress",
            Self::Http(_) => "http",
            Self::Status { .. } => "status",
        }
    }
}

/// Sends extracted windows to a metrics backend.
pub trait Publish: Send + Sync {
    /// Publisher name for logging.
    fn name(&self) -> &str;

    /// Publishes every data point of `windows` in one call. Returns the
    /// number of data points sent.
    fn publish(
        &self,
        windows: &Windows,
    ) -> impl std::future::Future<Output = Result<usize, PublishError>> + Send;
}

/// Publisher dispatch over the shipped backends.
pub enum Publisher {
    Http(HttpPublisher),
    Log(LogPublisher),
}

impl Publisher {
    /// Builds the configured publisher. Falls back to the log publisher when
    /// no HTTP backend is enabled.
    pub fn from_config(cfg: &PublishConfig, send_frequency: Duration) -> Result<Self> {
        if cfg.http.enabled {
            let publisher = HttpPublisher::new(cfg.http.clone(), &cfg.namespace, send_frequency)?;
            return Ok(Self::Http(publisher));
        }

        Ok(Self::Log(LogPublisher::new(&cfg.namespace, send_frequency)))
    }
}

impl Publish for Publisher {
    fn name(&self) -> &str {
        match self {
            Self::Http(p) => p.name(),
            Self::Log(p) => p.name(),
        }
    }

    async fn publish(&self, windows: &Windows) -> Result<usize, PublishError> {
        match self {
            Self::Http(p) => p.publish(windows).await,
            Self::Log(p) => p.publish(windows).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpPublishConfig;

    #[test]
    fn test_from_config_defaults_to_log() {
        let publisher =
            Publisher::from_config(&PublishConfig::default(), Duration::from_secs(60)).expect("build");
        assert!(matches!(publisher, Publisher::Log(_)));
        assert_eq!(publisher.name(), "log");
    }

    #[test]
    fn test_from_config_http() {
        let cfg = PublishConfig {
            http: HttpPublishConfig {
                enabled: true,
                address: "http://127.0.0.1:1/metrics".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let publisher = Publisher::from_config(&cfg, Duration::from_secs(60)).expect("build");
        assert!(matches!(publisher, Publisher::Http(_)));
        assert_eq!(publisher.name(), "http");
    }

    #[test]
    fn test_publish_error_labels() {
        assert_eq!(PublishError::Status { status: 503 }.label(), "status");
        let io = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(PublishError::from(io).label(), "compress");
    }
}
