//! In-memory sensor stream for tests and demos.
//!
//! [`MockPort`] hands out queued chunks to the read loop. Once the queue is
//! empty it acts like a line opened with a short read timeout, so tests never
//! block. [`MockPortOpener`]
//! returns clones of one port, or fails the way a real device would.

use super::port::{LineSettings, PortOpener};
use crate::domain::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
enum MockRead {
    Data(Vec<u8>),
    Error(io::ErrorKind),
    Eof,
}

#[derive(Debug)]
struct MockPortState {
    reads: VecDeque<MockRead>,
    idle_delay: Duration,
    bytes_read: usize,
}

/// Scripted byte stream; clones share one queue.
#[derive(Debug, Clone)]
pub struct MockPort {
    state: Arc<Mutex<MockPortState>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockPortState {
                reads: VecDeque::new(),
                idle_delay: Duration::from_millis(5),
                bytes_read: 0,
            })),
        }
    }

    /// How long an empty port waits before reporting a timeout
    pub fn with_idle_delay(self, delay: Duration) -> Self {
        self.state.lock().idle_delay = delay;
        self
    }

    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().reads.push_back(MockRead::Data(data.to_vec()));
    }

    /// Queue `line` followed by CRLF
    pub fn enqueue_line(&self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.state.lock().reads.push_back(MockRead::Data(data));
    }

    pub fn enqueue_error(&self, kind: io::ErrorKind) {
        self.state.lock().reads.push_back(MockRead::Error(kind));
    }

    /// Queue end-of-stream
    pub fn enqueue_eof(&self) {
        self.state.lock().reads.push_back(MockRead::Eof);
    }

    pub fn pending_reads(&self) -> usize {
        self.state.lock().reads.len()
    }

    pub fn bytes_read(&self) -> usize {
        self.state.lock().bytes_read
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        match state.reads.pop_front() {
            Some(MockRead::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.reads.push_front(MockRead::Data(data.split_off(n)));
                }
                state.bytes_read += n;
                Ok(n)
            }
            Some(MockRead::Error(kind)) => Err(io::Error::new(kind, "mock read failure")),
            Some(MockRead::Eof) => Ok(0),
            None => {
                let delay = state.idle_delay;
                drop(state);
                std::thread::sleep(delay);
                Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
            }
        }
    }
}

/// Failure a [`MockPortOpener`] reports instead of opening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOpenFailure {
    Busy,
    BadConfiguration,
    NotSerial,
    Missing,
}

/// [`PortOpener`] that serves a [`MockPort`]
#[derive(Debug)]
pub struct MockPortOpener {
    port: MockPort,
    failure: Option<MockOpenFailure>,
    opened: Mutex<Vec<(String, LineSettings)>>,
}

impl MockPortOpener {
    pub fn new(port: MockPort) -> Self {
        Self {
            port,
            failure: None,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(failure: MockOpenFailure) -> Self {
        Self {
            port: MockPort::new(),
            failure: Some(failure),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Devices successfully opened so far, with the settings used
    pub fn opened(&self) -> Vec<(String, LineSettings)> {
        self.opened.lock().clone()
    }
}

impl PortOpener for MockPortOpener {
    fn open(&self, device: &str, settings: &LineSettings) -> BridgeResult<Box<dyn Read + Send>> {
        let device_name = device.to_string();
        match self.failure {
            Some(MockOpenFailure::Busy) => Err(BridgeError::PortUnavailable {
                device: device_name,
                message: "Port is currently owned by another process".to_string(),
            }),
            Some(MockOpenFailure::BadConfiguration) => Err(BridgeError::PortConfiguration {
                device: device_name,
                message: "Unsupported line parameters".to_string(),
            }),
            Some(MockOpenFailure::NotSerial) => {
                Err(BridgeError::UnsupportedDevice { device: device_name })
            }
            Some(MockOpenFailure::Missing) => Err(BridgeError::PortNotFound { device: device_name }),
            None => {
                self.opened.lock().push((device_name, settings.clone()));
                Ok(Box::new(self.port.clone()))
            }
        }
    }
}
