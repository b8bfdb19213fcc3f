//! Error handling for the iioflux crate.

/// A specialized `Result` type for iioflux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for iioflux.
///
/// Everything except [`Error::Protocol`] raised from a worker is a startup
/// error: the binary reports it and exits before scheduling begins.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sensor or backend configuration is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A sensor host could not be reached
    #[error("error connecting to host {host}: {message}")]
    Connection { host: String, message: String },

    /// The iiod peer sent something we could not understand, or reported an error
    #[error("iiod protocol error: {0}")]
    Protocol(String),

    /// The time-series backend rejected a request
    #[error("InfluxDB error: {0}")]
    Backend(String),

    /// The time-series backend answered its health check with a status other than `pass`
    #[error("InfluxDB server was not healthy, status={status}")]
    Unhealthy { status: String },

    /// HTTP transport failure talking to the backend
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Poll interval could not be parsed
    #[error("error parsing interval: {0}")]
    Interval(String),

    /// Unknown log level
    #[error("error parsing loglevel: {0}")]
    LogLevel(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new connection error for `host`
    pub fn connection_error(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            message: msg.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new backend error
    pub fn backend_error(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a new interval error
    pub fn interval_error(msg: impl Into<String>) -> Self {
        Self::Interval(msg.into())
    }
}
