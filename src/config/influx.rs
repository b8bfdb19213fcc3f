//! InfluxDB backend configuration.

use std::time::Duration;

/// Default InfluxDB URL.
pub const DEFAULT_INFLUXDB_URL: &str = "http://influxdb.influxdb:8086";

/// Default InfluxDB token.
pub const DEFAULT_INFLUXDB_TOKEN: &str = "notme:notmypassword";

/// Default InfluxDB bucket.
pub const DEFAULT_INFLUXDB_BUCKET: &str = "iioflux/autogen";

/// Configuration for the InfluxDB client and its write buffer.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB server
    pub url: String,
    /// API token sent as `Authorization: Token <token>`
    pub token: String,
    /// Organization points are written to
    pub org: String,
    /// Bucket points are written to
    pub bucket: String,
    /// Number of buffered points that triggers a flush
    pub batch_size: usize,
    /// Maximum time a point waits in the buffer
    pub flush_interval: Duration,
    /// Timeout for every HTTP request
    pub request_timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_INFLUXDB_URL.to_string(),
            token: DEFAULT_INFLUXDB_TOKEN.to_string(),
            org: String::new(),
            bucket: DEFAULT_INFLUXDB_BUCKET.to_string(),
            batch_size: 5000,
            flush_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl InfluxConfig {
    /// Create a new configuration for the given server and credentials.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    /// Set the organization.
    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = org.into();
        self
    }

    /// Set the bucket.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Set the flush batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the flush interval. A zero interval is rejected when a write buffer is opened.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// URL of the health endpoint.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.url.trim_end_matches('/'))
    }

    /// URL of the v2 write endpoint (query parameters are added by the writer).
    pub fn write_url(&self) -> String {
        format!("{}/api/v2/write", self.url.trim_end_matches('/'))
    }
}
