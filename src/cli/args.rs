use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Command line arguments for TempBridge
#[derive(Parser, Debug)]
#[command(
    name = "tempbridge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serial temperature sensor to messaging bridge",
    long_about = "Reads a serial temperature sensor and answers `temp?` chat queries with the latest reading. Chat traffic goes through a tempbridge messaging gateway. The account password comes from the configuration file or the TEMPBRIDGE_PASSWORD environment variable."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the bridge until interrupted
    Run(RunArgs),
    /// Print readings from the sensor without connecting to the messaging server
    Monitor {
        /// Serial device path
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Decode sensor lines and show the outcome
    Parse {
        /// Raw sensor lines
        #[arg(required = true)]
        lines: Vec<String>,
    },
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// Environment variable holding the account password for `run`
pub const PASSWORD_ENV: &str = "TEMPBRIDGE_PASSWORD";

/// Overrides applied on top of the loaded configuration.
///
/// There is no password flag; see [`PASSWORD_ENV`].
#[derive(ClapArgs, Debug, Default)]
pub struct RunArgs {
    /// Serial device path
    #[arg(short, long)]
    pub device: Option<String>,

    /// Messaging gateway host
    #[arg(short, long)]
    pub server: Option<String>,

    /// Messaging gateway port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Account name
    #[arg(short, long)]
    pub username: Option<String>,

    /// Resource bound at login
    #[arg(short, long)]
    pub resource: Option<String>,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Create a project configuration with defaults
    Init {
        /// Directory to create `.tempbridge/config.toml` in
        #[arg(short, long)]
        path: Option<String>,
    },
}

impl RunArgs {
    /// Apply the flags that were given to `config`
    pub fn apply_to(&self, config: &mut crate::domain::config::BridgeConfig) {
        if let Some(device) = &self.device {
            config.serial.device = device.clone();
        }
        if let Some(server) = &self.server {
            config.messaging.server = server.clone();
        }
        if let Some(port) = self.port {
            config.messaging.port = port;
        }
        if let Some(username) = &self.username {
            config.messaging.username = username.clone();
        }
        if let Some(resource) = &self.resource {
            config.messaging.resource = resource.clone();
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}
