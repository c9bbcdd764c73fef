// Infrastructure module - Device, network, config and logging adapters
pub mod config;
pub mod logging;
pub mod messaging;
pub mod serial;
