use crate::domain::{
    config::SerialConfig,
    error::{BridgeError, BridgeResult},
};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read};
use std::time::Duration;
use tracing::{debug, info};

/// The sensor's fixed line format: 9600 baud, 8N1, no flow control
pub const BAUD_RATE: u32 = 9600;
pub const DATA_BITS: DataBits = DataBits::Eight;
pub const STOP_BITS: StopBits = StopBits::One;
pub const PARITY: Parity = Parity::None;
pub const FLOW_CONTROL: FlowControl = FlowControl::None;

/// Longest read timeout every `serialport` backend accepts. Used when reads
/// should block until data arrives.
pub const BLOCKING_READ_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Read behaviour applied when a device is opened
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineSettings {
    /// `None` blocks each read until at least one byte is available
    pub read_timeout: Option<Duration>,
}

impl LineSettings {
    /// Timeout handed to the driver
    pub fn driver_timeout(&self) -> Duration {
        self.read_timeout.unwrap_or(BLOCKING_READ_TIMEOUT)
    }
}

impl From<&SerialConfig> for LineSettings {
    fn from(config: &SerialConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
        }
    }
}

/// Opens a sensor device as a byte stream.
pub trait PortOpener: Send + Sync {
    fn open(&self, device: &str, settings: &LineSettings) -> BridgeResult<Box<dyn Read + Send>>;
}

/// [`PortOpener`] backed by the `serialport` crate.
///
/// Ports are opened for exclusive access with DTR asserted.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, device: &str, settings: &LineSettings) -> BridgeResult<Box<dyn Read + Send>> {
        match settings.read_timeout {
            Some(timeout) => debug!(
                "Opening {} at {} baud 8N1, reads bounded by {:?}",
                device, BAUD_RATE, timeout
            ),
            None => debug!("Opening {} at {} baud 8N1, blocking reads", device, BAUD_RATE),
        }

        let mut port = serialport::new(device, BAUD_RATE)
            .data_bits(DATA_BITS)
            .stop_bits(STOP_BITS)
            .parity(PARITY)
            .flow_control(FLOW_CONTROL)
            .timeout(settings.driver_timeout())
            .open_native()
            .map_err(|e| classify_open_error(device, e))?;

        port.write_data_terminal_ready(true)
            .map_err(|e| BridgeError::PortConfiguration {
                device: device.to_string(),
                message: format!("Failed to assert DTR: {}", e),
            })?;

        info!("Serial port {} opened", device);
        Ok(Box::new(port))
    }
}

/// Map an open failure onto the setup error taxonomy.
pub fn classify_open_error(device: &str, error: serialport::Error) -> BridgeError {
    let device = device.to_string();
    let description = error.description.to_lowercase();

    match error.kind() {
        serialport::ErrorKind::InvalidInput => BridgeError::PortConfiguration {
            device,
            message: error.description,
        },
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => BridgeError::PortNotFound { device },
        serialport::ErrorKind::Io(_)
            if description.contains("ioctl") || description.contains("not a tty") =>
        {
            BridgeError::UnsupportedDevice { device }
        }
        serialport::ErrorKind::NoDevice
        | serialport::ErrorKind::Io(_)
        | serialport::ErrorKind::Unknown => BridgeError::PortUnavailable {
            device,
            message: error.description,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format_is_9600_8n1() {
        assert_eq!(BAUD_RATE, 9600);
        assert_eq!(DATA_BITS, DataBits::Eight);
        assert_eq!(STOP_BITS, StopBits::One);
        assert_eq!(PARITY, Parity::None);
        assert_eq!(FLOW_CONTROL, FlowControl::None);
    }

    #[test]
    fn test_reads_block_by_default() {
        let settings = LineSettings::from(&SerialConfig::default());
        assert_eq!(settings, LineSettings::default());
        assert_eq!(settings.read_timeout, None);
        assert_eq!(settings.driver_timeout(), BLOCKING_READ_TIMEOUT);
        assert!(BLOCKING_READ_TIMEOUT > Duration::from_secs(24 * 60 * 60));

        let bounded = LineSettings {
            read_timeout: Some(Duration::from_millis(200)),
        };
        assert_eq!(bounded.driver_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_busy_device_is_unavailable() {
        let error = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::Other),
            "Device or resource busy",
        );
        let mapped = classify_open_error("/dev/ttyUSB0", error);
        assert!(matches!(mapped, BridgeError::PortUnavailable { ref device, .. } if device == "/dev/ttyUSB0"));

        let error = serialport::Error::new(serialport::ErrorKind::NoDevice, "no such device");
        assert!(matches!(
            classify_open_error("/dev/ttyUSB0", error),
            BridgeError::PortUnavailable { .. }
        ));
    }

    #[test]
    fn test_error_kinds_map_to_setup_errors() {
        let error = serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud rate");
        assert!(matches!(
            classify_open_error("/dev/ttyS0", error),
            BridgeError::PortConfiguration { .. }
        ));

        let error = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::Other),
            "Inappropriate ioctl for device",
        );
        assert!(matches!(
            classify_open_error("/dev/null", error),
            BridgeError::UnsupportedDevice { .. }
        ));

        let error = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::NotFound),
            "No such file or directory",
        );
        assert!(matches!(
            classify_open_error("/dev/missing", error),
            BridgeError::PortNotFound { .. }
        ));
    }

    #[test]
    fn test_non_serial_device_fails_gracefully() {
        // /dev/null opens but is not a tty
        let result = SystemPortOpener.open("/dev/null", &LineSettings::default());
        match result {
            Err(e) => assert!(e.is_setup_error()),
            Ok(_) => panic!("/dev/null must not open as a serial port"),
        }
    }
}
