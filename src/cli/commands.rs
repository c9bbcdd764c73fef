use crate::cli::args::{Args, Command, ConfigCommand, RunArgs, PASSWORD_ENV};
use crate::cli::output::{ConsoleWriter, OutputWriter, ParseReport, ReadingEvent};
use crate::core::{channel::TemperatureChannel, parser::LineParser, responder::QueryResponder};
use crate::domain::config::BridgeConfig;
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::messaging::{MessagingSession, SessionOptions, TcpTransport};
use crate::infrastructure::serial::{LineSettings, SerialReader, SystemPortOpener};
use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> anyhow::Result<()> {
    let writer = ConsoleWriter::new(args.output);

    // Load configuration using ConfigManager
    let config_manager = ConfigManager::new()?;
    let config = if let Some(config_path) = &args.config {
        config_manager.load_config_from_path(config_path.as_ref())?
    } else {
        config_manager.load_config()?
    };

    init_logging(&config.global.log_level, args.verbose)
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    match args.command {
        Command::Run(run_args) => execute_run(run_args, config, &writer).await,
        Command::Monitor { device } => execute_monitor(device, config, &writer).await,
        Command::Parse { lines } => execute_parse(&lines, &writer),
        Command::Config(config_args) => match config_args.command {
            ConfigCommand::Show => {
                writer.write_config(&config)?;
                Ok(())
            }
            ConfigCommand::Init { path } => {
                let base = match path {
                    Some(path) => PathBuf::from(path),
                    None => std::env::current_dir()
                        .context("Failed to determine current directory")?,
                };
                let written = config_manager.init_project_config(&base)?;
                writer.write_message(&format!(
                    "Project configuration created at {}",
                    written.display()
                ))?;
                Ok(())
            }
        },
        Command::Version => {
            writer.write_message(&format!("tempbridge {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

fn open_reader(config: &BridgeConfig, channel: TemperatureChannel) -> anyhow::Result<SerialReader> {
    let mut reader = SerialReader::new(
        Arc::new(SystemPortOpener),
        LineSettings::from(&config.serial),
        channel,
    )
    .with_retry_backoff(config.serial.retry_backoff());

    reader
        .connect(&config.serial.device)
        .with_context(|| format!("Failed to open sensor on {}", config.serial.device))?;
    Ok(reader)
}

/// A non-empty password from the environment replaces the configured one
fn apply_password_env(config: &mut BridgeConfig, password: Option<String>) {
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        debug!("Using account password from {}", PASSWORD_ENV);
        config.messaging.password = password;
    }
}

async fn start_session(session: &MessagingSession, config: &BridgeConfig) -> anyhow::Result<()> {
    let messaging = &config.messaging;
    session
        .init(&messaging.server, messaging.port)
        .await
        .with_context(|| format!("Failed to reach {}", messaging.server_address()))?;
    session
        .login(&messaging.username, &messaging.password, &messaging.resource)
        .await
        .with_context(|| format!("Failed to log in as {}", messaging.username))?;
    Ok(())
}

async fn execute_run(
    run_args: RunArgs,
    mut config: BridgeConfig,
    writer: &ConsoleWriter,
) -> anyhow::Result<()> {
    run_args.apply_to(&mut config);
    apply_password_env(&mut config, std::env::var(PASSWORD_ENV).ok());
    if config.messaging.username.is_empty() {
        bail!("No messaging account configured; set messaging.username or pass --username");
    }

    let channel = TemperatureChannel::new();
    let mut reader = open_reader(&config, channel.clone())?;

    let session = MessagingSession::new(
        Box::new(TcpTransport::new()),
        SessionOptions {
            reply_timeout: config.messaging.reply_timeout(),
            status_text: config.messaging.status_text.clone(),
        },
    );
    let responder = Arc::new(QueryResponder::new(channel, config.responder.absent_policy));
    session.set_handler(responder.clone());

    if let Err(e) = start_session(&session, &config).await {
        session.destroy().await;
        reader.close()?;
        return Err(e);
    }

    writer.write_message(&format!(
        "Bridging {} through gateway {} as {} (Press Ctrl+C to stop)",
        config.serial.device,
        config.messaging.server_address(),
        session.address().unwrap_or_default()
    ))?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    session.destroy().await;
    reader.close()?;

    let stats = reader.parser().stats();
    writer.write_message(&format!(
        "Stopped after {} reading(s) and {} answered quer{}",
        stats.accepted,
        responder.answered(),
        if responder.answered() == 1 { "y" } else { "ies" }
    ))?;
    Ok(())
}

async fn execute_monitor(
    device: Option<String>,
    mut config: BridgeConfig,
    writer: &ConsoleWriter,
) -> anyhow::Result<()> {
    if let Some(device) = device {
        config.serial.device = device;
    }

    let channel = TemperatureChannel::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = channel.subscribe(move |previous, current| {
        // Receiver gone means monitor is shutting down.
        let _ = tx.send(ReadingEvent { previous, current });
    });

    let mut reader = open_reader(&config, channel.clone())?;
    writer.write_message(&format!(
        "Monitoring {} (Press Ctrl+C to stop)",
        config.serial.device
    ))?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => writer.write_reading(&event)?,
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
        }
    }

    channel.unsubscribe(subscription);
    reader.close()?;
    Ok(())
}

fn execute_parse(lines: &[String], writer: &ConsoleWriter) -> anyhow::Result<()> {
    let parser = LineParser::new();
    let reports: Vec<ParseReport> = lines
        .iter()
        .map(|line| ParseReport {
            line: line.clone(),
            reading: parser.parse(line),
        })
        .collect();

    writer.write_parse_reports(&reports, &parser.stats())?;
    Ok(())
}
