use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};

use super::metric::build_metric_data;
use super::{Publish, PublishError};
use crate::config::HttpPublishConfig;
use crate::storage::Windows;

/// HTTP JSON publisher with optional compression.
///
/// Each flush becomes a single POST carrying the namespace and every data
/// point extracted in that flush.
pub struct HttpPublisher {
    cfg: HttpPublishConfig,
    namespace: String,
    send_frequency: Duration,
    client: reqwest::Client,
}

impl HttpPublisher {
    /// Creates a new HTTP publisher with the given configuration.
    pub fn new(cfg: HttpPublishConfig, namespace: &str, send_frequency: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building HTTP client")?;

        tracing::info!(
            address = %cfg.address,
            compression = %cfg.compression,
            "HTTP publisher configured",
        );

        Ok(Self {
            cfg,
            namespace: namespace.to_string(),
            send_frequency,
            client,
        })
    }

    /// Serializes and compresses the publish document.
    fn encode(&self, windows: &Windows) -> Result<(Vec<u8>, usize), PublishError> {
        let doc = build_metric_data(&self.namespace, windows, self.send_frequency);
        let raw = serde_json::to_vec(&doc)?;
        let body = compress(&raw, &self.cfg.compression)?;
        Ok((body, doc.metric_data.len()))
    }
}

impl Publish for HttpPublisher {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(&self, windows: &Windows) -> Result<usize, PublishError> {
        let (body, points) = self.encode(windows)?;
        let bytes = body.len();

        let mut request = self
            .client
            .post(&self.cfg.address)
            .header("Content-Type", "application/json")
            .body(body);

        if let Some(encoding) = content_encoding(&self.cfg.compression) {
            request = request.header("Content-Encoding", encoding);
        }

        for (k, v) in &self.cfg.headers {
            request = request.header(k.as_str(), v.as_str());
        }

        let resp = request.send().await?;
        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        if !status.is_success() {
            return Err(PublishError::Status {
                status: status.as_u16(),
            });
        }

        tracing::debug!(points, bytes, "published metric data via HTTP");

        Ok(points)
    }
}

// --- Compression ---

/// Compresses data using the specified algorithm.
pub fn compress(data: &[u8], algorithm: &str) -> io::Result<Vec<u8>> {
    match algorithm {
        "none" | "" => Ok(data.to_vec()),
        "gzip" => compress_gzip(data),
        "zstd" => zstd::encode_all(data, 0),
        "zlib" => compress_zlib(data),
        "snappy" => Ok(snap::raw::Encoder::new().compress_vec(data)?),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported compression: {other}"),
        )),
    }
}

/// Returns the Content-Encoding header value for the algorithm.
pub fn content_encoding(algorithm: &str) -> Option<&'static str> {
    match algorithm {
        "gzip" => Some("gzip"),
        "zstd" => Some("zstd"),
        "zlib" => Some("deflate"),
        "snappy" => Some("snappy"),
        _ => None,
    }
}

fn compress_gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn compress_zlib(data: &[u8]) -> io::Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
