use crate::cli::args::OutputFormat;
use crate::core::parser::ParserStats;
use crate::domain::{config::BridgeConfig, reading::Temperature};
use crate::infrastructure::serial::port::BAUD_RATE;
use serde::Serialize;
use std::io;
use tabled::{Table, Tabled};

/// Outcome of decoding one line with `parse`
#[derive(Debug, Clone, Serialize)]
pub struct ParseReport {
    pub line: String,
    pub reading: Option<Temperature>,
}

/// Reading change observed by `monitor`
#[derive(Debug, Clone, Serialize)]
pub struct ReadingEvent {
    pub previous: Option<Temperature>,
    pub current: Temperature,
}

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_config(&self, config: &BridgeConfig) -> Result<(), OutputError>;
    fn write_parse_reports(&self, reports: &[ParseReport], stats: &ParserStats) -> Result<(), OutputError>;
    fn write_reading(&self, event: &ReadingEvent) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::BridgeError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_config(&self, config: &BridgeConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("TempBridge Configuration:");
                println!("  Log level: {}", config.global.log_level);
                println!("  Serial:");
                println!("    Device: {}", config.serial.device);
                println!("    Line: {} baud 8N1, no flow control", BAUD_RATE);
                println!("    Reads: {}", read_mode(config));
                println!("    Retry back-off: {}ms", config.serial.retry_backoff_ms);
                println!("  Messaging:");
                println!("    Server: {}", config.messaging.server_address());
                let username = if config.messaging.username.is_empty() {
                    "(not set)"
                } else {
                    &config.messaging.username
                };
                println!("    Username: {}", username);
                println!("    Resource: {}", config.messaging.resource);
                println!("    Reply timeout: {}ms", config.messaging.reply_timeout_ms);
                println!("    Status: {}", config.messaging.status_text);
                println!("  Responder:");
                println!("    Absent reading: {:?}", config.responder.absent_policy);
            }
            OutputFormat::Json => {
                let mut redacted = config.clone();
                if !redacted.messaging.password.is_empty() {
                    redacted.messaging.password = "<redacted>".to_string();
                }
                println!("{}", serde_json::to_string_pretty(&redacted)?);
            }
            OutputFormat::Table => {
                println!("{}", Table::new(config_rows(config)));
            }
        }
        Ok(())
    }

    fn write_parse_reports(&self, reports: &[ParseReport], stats: &ParserStats) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                for report in reports {
                    match &report.reading {
                        Some(reading) => println!(
                            "{:?}: {} ({})",
                            report.line,
                            reading,
                            reading.to_fahrenheit()
                        ),
                        None => println!("{:?}: rejected", report.line),
                    }
                }
                println!(
                    "{} accepted, {} rejected",
                    stats.accepted,
                    stats.rejected_shape + stats.rejected_numeric
                );
            }
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "results": reports,
                    "stats": stats,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                let rows: Vec<ParseTableRow> = reports.iter().map(ParseTableRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
        Ok(())
    }

    fn write_reading(&self, event: &ReadingEvent) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(event)?);
            }
            _ => match &event.previous {
                Some(previous) => println!("{} (was {})", event.current, previous),
                None => println!("{}", event.current),
            },
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                println!("{}", message);
            }
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}

fn read_mode(config: &BridgeConfig) -> String {
    match config.serial.read_timeout_ms {
        Some(ms) => format!("bounded by {}ms", ms),
        None => "blocking".to_string(),
    }
}

/// Table row for one configuration key
#[derive(Tabled)]
struct ConfigTableRow {
    section: &'static str,
    key: &'static str,
    value: String,
}

fn config_rows(config: &BridgeConfig) -> Vec<ConfigTableRow> {
    let row = |section, key, value: String| ConfigTableRow { section, key, value };
    vec![
        row("global", "log_level", config.global.log_level.clone()),
        row("serial", "device", config.serial.device.clone()),
        row("serial", "read_timeout_ms", read_mode(config)),
        row("serial", "retry_backoff_ms", config.serial.retry_backoff_ms.to_string()),
        row("messaging", "server", config.messaging.server.clone()),
        row("messaging", "port", config.messaging.port.to_string()),
        row("messaging", "username", config.messaging.username.clone()),
        row("messaging", "resource", config.messaging.resource.clone()),
        row("messaging", "reply_timeout_ms", config.messaging.reply_timeout_ms.to_string()),
        row("messaging", "status_text", config.messaging.status_text.clone()),
        row("responder", "absent_policy", format!("{:?}", config.responder.absent_policy)),
    ]
}

/// Table row for a parsed line
#[derive(Tabled)]
struct ParseTableRow {
    line: String,
    accepted: bool,
    celsius: String,
    fahrenheit: String,
}

impl From<&ParseReport> for ParseTableRow {
    fn from(report: &ParseReport) -> Self {
        Self {
            line: report.line.clone(),
            accepted: report.reading.is_some(),
            celsius: report.reading.map(|r| r.to_celsius().to_string()).unwrap_or_default(),
            fahrenheit: report
                .reading
                .map(|r| r.to_fahrenheit().to_string())
                .unwrap_or_default(),
        }
    }
}
