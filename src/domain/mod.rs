// Domain module - Core types shared by every layer
pub mod config;
pub mod error;
pub mod message;
pub mod reading;
