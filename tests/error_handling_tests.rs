use std::error::Error;
use tempbridge::infrastructure::serial::{LineSettings, PortOpener, SystemPortOpener};
use tempbridge::{BridgeError, BridgeResult};

/// Error handling and resilience tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_error_types() {
        let errors = vec![
            BridgeError::PortUnavailable {
                device: "/dev/ttyUSB0".to_string(),
                message: "busy".to_string(),
            },
            BridgeError::PortNotFound { device: "/dev/ttyUSB9".to_string() },
            BridgeError::PortConfiguration {
                device: "/dev/ttyUSB0".to_string(),
                message: "unsupported baud rate".to_string(),
            },
            BridgeError::UnsupportedDevice { device: "/dev/null".to_string() },
            BridgeError::Connect {
                server: "example.com:5222".to_string(),
                message: "refused".to_string(),
            },
            BridgeError::Auth {
                username: "sensor".to_string(),
                message: "not-authorized".to_string(),
            },
            BridgeError::NotConnected {
                operation: "send_message".to_string(),
                required: "Authenticated".to_string(),
            },
            BridgeError::InvalidState { message: "closed".to_string() },
            BridgeError::Protocol("unexpected frame".to_string()),
            BridgeError::Config { message: "bad toml".to_string() },
            BridgeError::Output("stdout closed".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty(), "Error display should not be empty");
        }
        assert_send_sync::<BridgeError>();
    }

    #[test]
    fn test_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let bridge_error: BridgeError = io_error.into();
        assert!(matches!(bridge_error, BridgeError::Io(_)));
        assert!(bridge_error.source().is_some());
    }

    #[test]
    fn test_result_type() {
        fn failing() -> BridgeResult<String> {
            Err(BridgeError::Config { message: "Test error".to_string() })
        }

        let error = tokio_test::assert_err!(failing());
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_setup_errors_are_classified() {
        assert!(BridgeError::UnsupportedDevice { device: "x".to_string() }.is_setup_error());
        assert!(!BridgeError::Protocol("x".to_string()).is_setup_error());
        assert!(!BridgeError::InvalidState { message: "x".to_string() }.is_setup_error());
    }

    #[test]
    fn test_missing_device_is_setup_error() {
        let result = SystemPortOpener.open("/dev/tempbridge-missing-device", &LineSettings::default());
        let error = match result {
            Ok(_) => panic!("opening a missing device should fail"),
            Err(error) => error,
        };
        assert!(error.is_setup_error(), "unexpected error: {}", error);
        assert!(error.to_string().contains("/dev/tempbridge-missing-device"));
    }

    #[test]
    fn test_anyhow_context_keeps_cause() {
        use anyhow::Context;

        let result: anyhow::Result<()> = Err(BridgeError::PortNotFound {
            device: "/dev/ttyUSB9".to_string(),
        })
        .context("Failed to open sensor");
        let rendered = format!("{:#}", result.unwrap_err());
        assert!(rendered.contains("Failed to open sensor"));
        assert!(rendered.contains("/dev/ttyUSB9"));
    }
}
