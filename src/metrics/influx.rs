//! InfluxDB v2 client: health check and a background-flushed write buffer.

use crate::config::InfluxConfig;
use crate::error::{Error, Result};
use crate::metrics::point::Point;
use crate::metrics::sink::PointSink;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Health status reported by a healthy server.
pub const HEALTH_STATUS_PASS: &str = "pass";

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub name: Option<String>,
    pub message: Option<String>,
    pub status: String,
    pub version: Option<String>,
}

/// Client for one InfluxDB server.
pub struct InfluxClient {
    http: reqwest::Client,
    config: InfluxConfig,
    buffers: Mutex<Vec<Arc<WriteBuffer>>>,
}

impl InfluxClient {
    /// Create a client. No request is made until [`InfluxClient::health`].
    pub fn connect(config: InfluxConfig) -> Result<Self> {
        Url::parse(&config.url)
            .map_err(|e| Error::config_error(format!("invalid InfluxDB URL '{}': {}", config.url, e)))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            buffers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    /// Query the server's health endpoint.
    pub async fn health(&self) -> Result<Health> {
        let response = self.http.get(self.config.health_url()).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // an unhealthy server answers 503 with a regular health body
        match serde_json::from_str::<Health>(&body) {
            Ok(health) => Ok(health),
            Err(_) if !status.is_success() => Err(Error::backend_error(format!(
                "health check returned {}: {}",
                status,
                body.trim()
            ))),
            Err(e) => Err(Error::backend_error(format!("invalid health response: {}", e))),
        }
    }

    /// Query the health endpoint and require status `pass`.
    pub async fn check_health(&self) -> Result<Health> {
        let health = self.health().await?;
        if health.status != HEALTH_STATUS_PASS {
            return Err(Error::Unhealthy {
                status: health.status,
            });
        }
        Ok(health)
    }

    /// Open a write buffer for the configured org and bucket.
    ///
    /// The buffer is closed together with the client in [`InfluxClient::close`].
    pub fn write_buffer(&self) -> Result<Arc<WriteBuffer>> {
        let buffer = Arc::new(WriteBuffer::spawn(self.http.clone(), &self.config)?);
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.push(Arc::clone(&buffer));
        }
        Ok(buffer)
    }

    /// Flush and stop every write buffer opened from this client.
    pub async fn close(&self) {
        let buffers = match self.buffers.lock() {
            Ok(mut buffers) => std::mem::take(&mut *buffers),
            Err(_) => Vec::new(),
        };

        for buffer in buffers {
            buffer.close().await;
        }
    }
}

enum Message {
    Point(Point),
    Close,
}

/// Counters for a write buffer's lifetime.
#[derive(Debug, Default)]
pub struct WriteStats {
    written: AtomicU64,
    failed: AtomicU64,
}

impl WriteStats {
    /// Points accepted by the server.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Points lost to rejected or failed writes.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Asynchronous, batching writer for one org and bucket.
///
/// Points are queued without blocking and written by a background task when the
/// batch is full, when the flush interval elapses, and on close.
pub struct WriteBuffer {
    tx: mpsc::UnboundedSender<Message>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stats: Arc<WriteStats>,
}

impl WriteBuffer {
    fn spawn(http: reqwest::Client, config: &InfluxConfig) -> Result<Self> {
        if config.flush_interval.is_zero() {
            return Err(Error::config_error("InfluxDB flush interval must be greater than zero"));
        }

        let url = Url::parse_with_params(
            &config.write_url(),
            &[
                ("org", config.org.as_str()),
                ("bucket", config.bucket.as_str()),
                ("precision", "ns"),
            ],
        )
        .map_err(|e| Error::config_error(format!("invalid InfluxDB URL '{}': {}", config.url, e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(WriteStats::default());
        let writer = Writer {
            http,
            url,
            authorization: format!("Token {}", config.token),
            batch_size: config.batch_size.max(1),
            stats: Arc::clone(&stats),
        };

        let task = tokio::spawn(writer.run(rx, config.flush_interval));

        Ok(Self {
            tx,
            task: tokio::sync::Mutex::new(Some(task)),
            stats,
        })
    }

    pub fn stats(&self) -> &WriteStats {
        &self.stats
    }

    /// Flush everything submitted so far and stop the background writer.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        let _ = self.tx.send(Message::Close);
        if let Err(e) = task.await {
            error!("InfluxDB writer task failed: {}", e);
        }

        info!(
            "closed InfluxDB write buffer: {} points written, {} failed",
            self.stats.written(),
            self.stats.failed()
        );
    }
}

impl PointSink for WriteBuffer {
    fn submit(&self, mut point: Point) {
        if point.timestamp.is_none() {
            point.timestamp = Some(Utc::now());
        }
        if self.tx.send(Message::Point(point)).is_err() {
            warn!("InfluxDB write buffer is closed, dropping point");
        }
    }
}

struct Writer {
    http: reqwest::Client,
    url: Url,
    authorization: String,
    batch_size: usize,
    stats: Arc<WriteStats>,
}

impl Writer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Message>, flush_interval: std::time::Duration) {
        let mut batch: Vec<String> = Vec::with_capacity(self.batch_size.min(1024));
        let mut ticker = time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(Message::Point(point)) => {
                        match point.to_line_protocol() {
                            Some(line) => batch.push(line),
                            None => warn!("dropping point {} without finite fields", point.measurement),
                        }
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    Some(Message::Close) | None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }

        // Close is only sent by WriteBuffer::close, after which nothing else is
        // accepted; drain whatever raced in before it.
        while let Ok(Message::Point(point)) = rx.try_recv() {
            if let Some(line) = point.to_line_protocol() {
                batch.push(line);
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch).await;
        }
    }

    async fn flush(&self, batch: &mut Vec<String>) {
        let count = batch.len() as u64;
        let body = batch.join("\n");
        batch.clear();

        match self.write(body).await {
            Ok(()) => {
                debug!("wrote {} points to InfluxDB", count);
                self.stats.written.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                error!("InfluxDB write of {} points failed: {}", count, e);
                self.stats.failed.fetch_add(count, Ordering::Relaxed);
            }
        }
    }

    async fn write(&self, body: String) -> Result<()> {
        let response = self
            .http
            .post(self.url.clone())
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(Error::backend_error(format!("write returned {}: {}", status, text.trim())))
    }
}
