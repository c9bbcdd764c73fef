use super::lines::LineAssembler;
use super::port::{LineSettings, PortOpener};
use crate::core::{channel::TemperatureChannel, parser::LineParser};
use crate::domain::error::{BridgeError, BridgeResult};
use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const READ_BUFFER_SIZE: usize = 256;
const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(1);
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Lifecycle of a [`SerialReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Connecting,
    Streaming,
    Failed,
    Closed,
}

impl std::fmt::Display for ReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderState::Idle => write!(f, "Idle"),
            ReaderState::Connecting => write!(f, "Connecting"),
            ReaderState::Streaming => write!(f, "Streaming"),
            ReaderState::Failed => write!(f, "Failed"),
            ReaderState::Closed => write!(f, "Closed"),
        }
    }
}

/// Owns the sensor device and the background loop that drains it.
///
/// `connect` opens the device and starts exactly one `serial-reader` thread.
/// The thread publishes every accepted line to the channel until `close` is
/// called, the stream ends, or the reader is dropped. A closed reader cannot
/// be reconnected.
pub struct SerialReader {
    opener: Arc<dyn PortOpener>,
    settings: LineSettings,
    retry_backoff: Duration,
    close_grace: Duration,
    channel: TemperatureChannel,
    parser: Arc<LineParser>,
    state: ReaderState,
    device: Option<String>,
    shutdown: Option<watch::Sender<bool>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for SerialReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialReader")
            .field("state", &self.state)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl SerialReader {
    pub fn new(
        opener: Arc<dyn PortOpener>,
        settings: LineSettings,
        channel: TemperatureChannel,
    ) -> Self {
        Self {
            opener,
            settings,
            retry_backoff: Duration::from_millis(100),
            close_grace: DEFAULT_CLOSE_GRACE,
            channel,
            parser: Arc::new(LineParser::new()),
            state: ReaderState::Idle,
            device: None,
            shutdown: None,
            worker: None,
        }
    }

    /// Pause between retries after a read error; zero retries immediately
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// How long `close` waits for a read that is blocked on a silent sensor
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Open `device` and start the read loop.
    pub fn connect(&mut self, device: &str) -> BridgeResult<()> {
        if self.state != ReaderState::Idle {
            return Err(BridgeError::InvalidState {
                message: format!("Serial reader is {}, connect requires Idle", self.state),
            });
        }

        self.state = ReaderState::Connecting;
        self.device = Some(device.to_string());
        info!("Connecting to sensor on {}", device);

        let port = match self.opener.open(device, &self.settings) {
            Ok(port) => port,
            Err(e) => {
                self.state = ReaderState::Failed;
                error!("Failed to open sensor port {}: {}", device, e);
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let read_loop = ReadLoop {
            device: device.to_string(),
            port,
            parser: Arc::clone(&self.parser),
            channel: self.channel.clone(),
            shutdown: shutdown_rx,
            retry_backoff: self.retry_backoff,
        };

        let worker = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || read_loop.run())
            .map_err(|e| {
                self.state = ReaderState::Failed;
                error!("Failed to start serial reader thread for {}: {}", device, e);
                BridgeError::Io(e)
            })?;

        self.shutdown = Some(shutdown_tx);
        self.worker = Some(worker);
        self.state = ReaderState::Streaming;
        info!("Streaming sensor readings from {}", device);
        Ok(())
    }

    /// Stop the read loop and release the device.
    ///
    /// The loop notices the signal after its pending read returns. Reads block
    /// until the sensor sends a byte, so `close` waits at most the close grace
    /// and then leaves the thread to exit on its own; the device is released
    /// when that read completes. Safe to call repeatedly and after a failed
    /// connect.
    pub fn close(&mut self) -> BridgeResult<()> {
        if self.state == ReaderState::Closed {
            return Ok(());
        }

        if let Some(shutdown) = self.shutdown.take() {
            // An error only means the loop already exited.
            let _ = shutdown.send(true);
        }

        if let Some(worker) = self.worker.take() {
            let deadline = Instant::now() + self.close_grace;
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(CLOSE_POLL_INTERVAL);
            }

            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!("Serial reader thread panicked before shutdown");
                }
            } else {
                warn!(
                    "Serial reader for {} still blocked in a read after {:?}; detaching it",
                    self.device.as_deref().unwrap_or_default(),
                    self.close_grace
                );
            }
        }

        self.state = ReaderState::Closed;
        if let Some(device) = &self.device {
            info!("Serial reader for {} closed", device);
        }
        Ok(())
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// True while the read loop thread is alive
    pub fn is_streaming(&self) -> bool {
        self.state == ReaderState::Streaming
            && self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn channel(&self) -> &TemperatureChannel {
        &self.channel
    }

    pub fn parser(&self) -> &LineParser {
        &self.parser
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close serial reader on drop: {}", e);
        }
    }
}

struct ReadLoop {
    device: String,
    port: Box<dyn Read + Send>,
    parser: Arc<LineParser>,
    channel: TemperatureChannel,
    shutdown: watch::Receiver<bool>,
    retry_backoff: Duration,
}

impl ReadLoop {
    fn run(mut self) {
        let mut assembler = LineAssembler::new();
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        debug!("Serial read loop started for {}", self.device);

        while !self.shutdown_requested() {
            match self.port.read(&mut buffer) {
                Ok(0) => {
                    info!("Serial stream {} reached end of input", self.device);
                    break;
                }
                Ok(n) => {
                    for line in assembler.push(&buffer[..n]) {
                        if let Some(reading) = self.parser.parse(&line) {
                            self.channel.publish(reading);
                        }
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    // Retried forever; only shutdown or end of stream stops the loop.
                    warn!("Error reading data from serial port {}: {}", self.device, e);
                    if !self.retry_backoff.is_zero() {
                        thread::sleep(self.retry_backoff);
                    }
                }
            }
        }

        debug!("Serial read loop for {} stopped", self.device);
    }

    fn shutdown_requested(&self) -> bool {
        // A dropped sender cancels as well.
        self.shutdown.has_changed().is_err() || *self.shutdown.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::mock::{MockOpenFailure, MockPort, MockPortOpener};
    use std::sync::mpsc;

    /// Read that blocks until its sender is dropped, like a silent sensor
    struct SilentLine(mpsc::Receiver<()>);

    impl Read for SilentLine {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    struct SilentLineOpener(parking_lot::Mutex<Option<SilentLine>>);

    impl PortOpener for SilentLineOpener {
        fn open(&self, _device: &str, _settings: &LineSettings) -> BridgeResult<Box<dyn Read + Send>> {
            let line = self.0.lock().take().ok_or_else(|| BridgeError::PortUnavailable {
                device: "/dev/ttyUSB0".to_string(),
                message: "already open".to_string(),
            })?;
            Ok(Box::new(line))
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn reader_for(opener: MockPortOpener) -> (SerialReader, TemperatureChannel) {
        let channel = TemperatureChannel::new();
        let reader = SerialReader::new(Arc::new(opener), LineSettings::default(), channel.clone())
            .with_retry_backoff(Duration::from_millis(1));
        (reader, channel)
    }

    #[test]
    fn test_streams_readings_into_channel() {
        let port = MockPort::new();
        port.enqueue_line("+23.50C");
        let (mut reader, channel) = reader_for(MockPortOpener::new(port.clone()));

        reader.connect("/dev/ttyUSB0").unwrap();
        assert_eq!(reader.state(), ReaderState::Streaming);
        assert!(wait_until(|| channel.read().is_some()));
        assert_eq!(channel.read().unwrap().value(), 23.5);

        port.enqueue_line("noise");
        port.enqueue_line("+24.00C");
        assert!(wait_until(|| channel.read().map(|r| r.value()) == Some(24.0)));

        reader.close().unwrap();
        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(!reader.is_streaming());
        assert_eq!(reader.parser().stats().rejected_shape, 1);
    }

    #[test]
    fn test_busy_port_fails_without_starting_loop() {
        let (mut reader, channel) = reader_for(MockPortOpener::failing(MockOpenFailure::Busy));

        let result = reader.connect("/dev/ttyUSB0");
        assert!(matches!(result, Err(BridgeError::PortUnavailable { .. })));
        assert_eq!(reader.state(), ReaderState::Failed);
        assert!(!reader.is_streaming());
        assert!(channel.read().is_none());

        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(reader.state(), ReaderState::Closed);
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let (mut reader, _channel) = reader_for(MockPortOpener::new(MockPort::new()));
        reader.connect("/dev/ttyUSB0").unwrap();
        assert!(matches!(
            reader.connect("/dev/ttyUSB1"),
            Err(BridgeError::InvalidState { .. })
        ));
        reader.close().unwrap();
        assert!(matches!(
            reader.connect("/dev/ttyUSB0"),
            Err(BridgeError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_read_errors_are_retried() {
        let port = MockPort::new();
        port.enqueue_error(io::ErrorKind::BrokenPipe);
        port.enqueue_error(io::ErrorKind::Other);
        port.enqueue_line("+19.75C");
        let (mut reader, channel) = reader_for(MockPortOpener::new(port));

        reader.connect("/dev/ttyUSB0").unwrap();
        assert!(wait_until(|| channel.read().is_some()));
        assert_eq!(channel.read().unwrap().value(), 19.75);
        assert!(reader.is_streaming());
        reader.close().unwrap();
    }

    #[test]
    fn test_end_of_stream_stops_loop() {
        let port = MockPort::new();
        port.enqueue_line("+20.00C");
        port.enqueue_eof();
        let (mut reader, channel) = reader_for(MockPortOpener::new(port));

        reader.connect("/dev/ttyUSB0").unwrap();
        assert!(wait_until(|| !reader.is_streaming()));
        assert_eq!(channel.read().unwrap().value(), 20.0);
        reader.close().unwrap();
    }

    #[test]
    fn test_close_does_not_hang_on_blocked_read() {
        let (release, blocked) = mpsc::channel();
        let opener = SilentLineOpener(parking_lot::Mutex::new(Some(SilentLine(blocked))));
        let mut reader = SerialReader::new(Arc::new(opener), LineSettings::default(), TemperatureChannel::new())
            .with_close_grace(Duration::from_millis(50));
        reader.connect("/dev/ttyUSB0").unwrap();

        let start = Instant::now();
        reader.close().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1), "close took {:?}", start.elapsed());
        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(!reader.is_streaming());

        // The detached loop exits once its read returns.
        drop(release);
    }
}
