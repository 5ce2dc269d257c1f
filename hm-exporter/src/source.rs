//! Sources of the statelist document.

use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::config::SourceConfig;

/// A readable statelist byte stream.
pub type ExportStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Errors opening a statelist stream.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Something that can produce a fresh statelist stream per cycle.
pub trait ExportSource: Send + Sync + 'static {
    /// Human readable location, used in logs.
    fn describe(&self) -> String;

    /// Open a new stream positioned at the start of the document.
    fn open(&self) -> impl Future<Output = Result<ExportStream, SourceError>> + Send;
}

/// Fetches the statelist from the CCU XML-API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    /// Create a source with the configured URL and request timeout.
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ExportSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn open(&self) -> Result<ExportStream, SourceError> {
        let request_error = |source| SourceError::Request {
            url: self.url.clone(),
            source,
        };

        debug!(url = %self.url, "Requesting statelist");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}

/// Serves a document held in memory.
///
/// The document can be swapped between cycles.
#[derive(Debug)]
pub struct StaticSource {
    document: RwLock<Arc<[u8]>>,
}

impl StaticSource {
    pub fn new(document: impl Into<Vec<u8>>) -> Self {
        Self {
            document: RwLock::new(Arc::from(document.into())),
        }
    }

    /// Replace the document served by subsequent cycles.
    pub fn replace(&self, document: impl Into<Vec<u8>>) {
        *self.document.write() = Arc::from(document.into());
    }
}

impl ExportSource for StaticSource {
    fn describe(&self) -> String {
        format!("static document ({} bytes)", self.document.read().len())
    }

    async fn open(&self) -> Result<ExportStream, SourceError> {
        let document = self.document.read().clone();
        Ok(Box::pin(Cursor::new(document)))
    }
}
