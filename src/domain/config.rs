use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TempBridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Sensor line settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Messaging server and account
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// Query responder behaviour
    #[serde(default)]
    pub responder: ResponderConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial line configuration
///
/// The sensor always talks 9600 8N1 without flow control, so only the device
/// and the read behaviour are configurable. Unknown keys such as `baud_rate`
/// are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialConfig {
    /// Device path, e.g. /dev/ttyUSB0
    #[serde(default = "default_device")]
    pub device: String,
    /// Optional bound on a single read. Unset means reads block until a byte
    /// arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    /// Pause before retrying after a read error
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

/// Messaging server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Budget for every request/reply exchange with the server
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,
    /// Presence status advertised after login
    #[serde(default = "default_status_text")]
    pub status_text: String,
}

/// Query responder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponderConfig {
    #[serde(default)]
    pub absent_policy: AbsentReadingPolicy,
}

/// What to do when a query arrives before the first reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentReadingPolicy {
    /// Reply with an explicit "no data yet" message
    #[default]
    NoData,
    /// Send nothing
    Suppress,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_retry_backoff() -> u64 {
    100
}

fn default_server() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7522
}

fn default_resource() -> String {
    "tempbridge".to_string()
}

fn default_reply_timeout() -> u64 {
    3000
}

fn default_status_text() -> String {
    "Measuring data...".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            read_timeout_ms: None,
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            resource: default_resource(),
            reply_timeout_ms: default_reply_timeout(),
            status_text: default_status_text(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl MessagingConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// `server:port`, used in log lines and error context
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}
