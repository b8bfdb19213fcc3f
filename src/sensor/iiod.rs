//! Client for the iiod network protocol.
//!
//! Commands are single lines terminated by `\r\n`. Every reply starts with a line
//! holding a signed integer: negative values are `-errno`, anything else is the
//! length of the payload that follows (itself terminated by a newline).

use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::sensor::context::SensorContext;
use crate::sensor::{SensorClient, SensorConnector};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

/// Port iiod listens on.
pub const DEFAULT_IIOD_PORT: u16 = 30431;

/// Default timeout applied to connecting and to every request.
pub const DEFAULT_IIOD_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest payload we accept in a single reply.
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

type Connection = BufStream<TcpStream>;

/// A connection to one iiod host.
pub struct IiodClient {
    host: String,
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl IiodClient {
    /// Connect to `remote` on behalf of `host`.
    pub async fn connect(host: &str, remote: &str, io_timeout: Duration) -> Result<Self> {
        let addr = socket_address(remote);
        let client = Self {
            host: host.to_string(),
            addr,
            timeout: io_timeout,
            conn: Mutex::new(None),
        };

        let conn = client
            .open()
            .await
            .map_err(|e| Error::connection_error(host, e.to_string()))?;
        *client.conn.lock().await = Some(conn);

        info!("connected to iiod at {} for host {}", client.addr, host);
        Ok(client)
    }

    async fn open(&self) -> Result<Connection> {
        let stream = timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::protocol_error(format!("timed out connecting to {}", self.addr)))??;
        stream.set_nodelay(true)?;

        let mut conn = BufStream::new(stream);
        let ms = self.timeout.as_millis();
        self.request(&mut conn, &format!("TIMEOUT {}", ms)).await?;
        Ok(conn)
    }

    /// Send a command whose reply is a bare status integer.
    async fn request(&self, conn: &mut Connection, command: &str) -> Result<i64> {
        timeout(self.timeout, async {
            send_command(conn, command).await?;
            read_status(conn).await
        })
        .await
        .map_err(|_| self.timed_out(command))?
    }

    /// Send a command whose reply carries a payload.
    async fn request_payload(&self, conn: &mut Connection, command: &str) -> Result<String> {
        timeout(self.timeout, async {
            send_command(conn, command).await?;
            let len = read_status(conn).await?;
            read_payload(conn, len as usize).await
        })
        .await
        .map_err(|_| self.timed_out(command))?
    }

    /// Read one attribute value.
    ///
    /// A negative status only means this attribute could not be read; the stream
    /// stays in sync and `None` is returned.
    async fn read_attribute(&self, conn: &mut Connection, command: &str) -> Result<Option<String>> {
        timeout(self.timeout, async {
            send_command(conn, command).await?;
            let status = read_status_line(conn).await?;
            if status < 0 {
                debug!("{}: {} failed: {}", self.host, command, errno_error(status));
                return Ok(None);
            }
            read_payload(conn, status as usize).await.map(Some)
        })
        .await
        .map_err(|_| self.timed_out(command))?
    }

    fn timed_out(&self, command: &str) -> Error {
        Error::protocol_error(format!("{}: timed out waiting for reply to {:?}", self.addr, command))
    }

    async fn fetch(&self, conn: &mut Connection) -> Result<SensorContext> {
        let xml = self.request_payload(conn, "PRINT").await?;
        let mut context = SensorContext::from_xml(&xml)?;

        for device in &mut context.devices {
            for channel in &mut device.channels {
                for attr in channel.unread_attributes() {
                    let command = format!("READ {} INPUT {} {}", device.id, channel.id, attr);
                    let value = self.read_attribute(conn, &command).await?;
                    channel.attributes.insert(attr, value);
                }
            }
        }

        Ok(context)
    }
}

#[async_trait]
impl SensorClient for IiodClient {
    async fn refresh_attributes(&self) -> Result<SensorContext> {
        let mut guard = self.conn.lock().await;

        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => {
                debug!("reconnecting to iiod at {} for host {}", self.addr, self.host);
                self.open().await?
            }
        };

        // A failed exchange leaves the stream in an unknown state; it is dropped
        // here and the next refresh reconnects.
        let context = self.fetch(&mut conn).await?;
        *guard = Some(conn);
        Ok(context)
    }
}

/// Opens [`IiodClient`] connections for configured hosts.
#[derive(Debug, Clone)]
pub struct IiodConnector {
    pub timeout: Duration,
}

impl Default for IiodConnector {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_IIOD_TIMEOUT,
        }
    }
}

#[async_trait]
impl SensorConnector for IiodConnector {
    async fn connect(&self, host: &HostConfig) -> Result<Arc<dyn SensorClient>> {
        let client = IiodClient::connect(&host.name, &host.remote, self.timeout).await?;
        Ok(Arc::new(client))
    }
}

/// Turn a configured remote (`host`, `host:port`, `ip:host[:port]`) into `host:port`.
pub fn socket_address(remote: &str) -> String {
    let remote = remote.trim();
    let remote = remote.strip_prefix("ip:").unwrap_or(remote);

    if remote.starts_with('[') {
        // bracketed IPv6, with or without port
        if remote.contains("]:") {
            return remote.to_string();
        }
        return format!("{}:{}", remote, DEFAULT_IIOD_PORT);
    }

    match remote.matches(':').count() {
        0 => format!("{}:{}", remote, DEFAULT_IIOD_PORT),
        1 => remote.to_string(),
        _ => format!("[{}]:{}", remote, DEFAULT_IIOD_PORT),
    }
}

async fn send_command(conn: &mut Connection, command: &str) -> Result<()> {
    conn.write_all(command.as_bytes()).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;
    Ok(())
}

async fn read_status(conn: &mut Connection) -> Result<i64> {
    let status = read_status_line(conn).await?;
    if status < 0 {
        return Err(errno_error(status));
    }
    Ok(status)
}

/// Read a reply's status line without interpreting its sign.
async fn read_status_line(conn: &mut Connection) -> Result<i64> {
    let mut line = String::new();
    if conn.read_line(&mut line).await? == 0 {
        return Err(Error::protocol_error("connection closed by iiod"));
    }

    line.trim()
        .parse()
        .map_err(|_| Error::protocol_error(format!("unexpected reply {:?}", line.trim())))
}

/// Describe a negative iiod status as an error.
fn errno_error(status: i64) -> Error {
    match status.checked_neg().and_then(|errno| i32::try_from(errno).ok()) {
        Some(errno) => Error::protocol_error(format!(
            "iiod returned error {}: {}",
            status,
            std::io::Error::from_raw_os_error(errno)
        )),
        None => Error::protocol_error(format!("iiod returned error {}", status)),
    }
}

async fn read_payload(conn: &mut Connection, len: usize) -> Result<String> {
    if len > MAX_PAYLOAD {
        return Err(Error::protocol_error(format!("reply of {} bytes is too large", len)));
    }

    let mut buf = vec![0u8; len];
    conn.read_exact(&mut buf).await?;

    let mut newline = [0u8; 1];
    conn.read_exact(&mut newline).await?;
    if newline[0] != b'\n' {
        return Err(Error::protocol_error("payload not terminated by a newline"));
    }

    let payload = String::from_utf8_lossy(&buf);
    Ok(payload.trim_end_matches('\0').to_string())
}
