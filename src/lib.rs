//! TempBridge Library
//!
//! Reads a serial temperature sensor on a background thread, keeps the
//! latest reading in a shared channel, and answers `temp?` chat queries over
//! a presence-based messaging session.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::domain::error::{BridgeError, BridgeResult};
pub use crate::domain::config::BridgeConfig;
pub use crate::domain::reading::{Temperature, TemperatureUnit};
pub use crate::core::{parse_line, LineParser, QueryResponder, SubscriptionId, TemperatureChannel};
pub use crate::infrastructure::messaging::{MessagingSession, SessionState};
pub use crate::infrastructure::serial::{ReaderState, SerialReader};
