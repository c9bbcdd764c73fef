//! Answers `temp?` queries with the latest reading.

use crate::core::channel::TemperatureChannel;
use crate::domain::{
    config::AbsentReadingPolicy, error::BridgeResult, message::InboundMessage,
    reading::Temperature,
};
use crate::infrastructure::messaging::session::{InboundHandler, MessagingSession};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Request body; the whole message must equal it, ignoring ASCII case
pub const QUERY_TOKEN: &str = "temp?";

/// Reply body when no reading has been published yet
pub const NO_DATA_BODY: &str = "No temperature reading available yet";

pub fn is_query(body: &str) -> bool {
    body.eq_ignore_ascii_case(QUERY_TOKEN)
}

/// What the responder did with one inbound message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseOutcome {
    /// Not a query
    Ignored,
    /// Replied with this reading
    Answered(Temperature),
    /// Replied with [`NO_DATA_BODY`]
    NoData,
    /// Query arrived before any reading and the policy says stay quiet
    Suppressed,
}

/// Outbound side the responder replies through
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_reading(&self, reading: &Temperature, to: &str) -> BridgeResult<()>;
    async fn send_text(&self, body: &str, to: &str) -> BridgeResult<()>;
}

#[async_trait]
impl ReplySender for MessagingSession {
    async fn send_reading(&self, reading: &Temperature, to: &str) -> BridgeResult<()> {
        self.send_structured_reading(reading, to).await
    }

    async fn send_text(&self, body: &str, to: &str) -> BridgeResult<()> {
        self.send_message(body, to).await
    }
}

pub struct QueryResponder {
    channel: TemperatureChannel,
    absent_policy: AbsentReadingPolicy,
    answered: AtomicU64,
}

impl QueryResponder {
    pub fn new(channel: TemperatureChannel, absent_policy: AbsentReadingPolicy) -> Self {
        Self {
            channel,
            absent_policy,
            answered: AtomicU64::new(0),
        }
    }

    /// Handle one message. The reading is taken at the moment of the call.
    pub async fn respond(
        &self,
        sender: &dyn ReplySender,
        message: &InboundMessage,
    ) -> BridgeResult<ResponseOutcome> {
        if !is_query(&message.body) {
            debug!("Ignoring message from {}", message.from);
            return Ok(ResponseOutcome::Ignored);
        }

        match self.channel.read() {
            Some(reading) => {
                sender.send_reading(&reading, &message.from).await?;
                self.answered.fetch_add(1, Ordering::Relaxed);
                info!("Answered query from {} with {}", message.from, reading);
                Ok(ResponseOutcome::Answered(reading))
            }
            None => match self.absent_policy {
                AbsentReadingPolicy::NoData => {
                    sender.send_text(NO_DATA_BODY, &message.from).await?;
                    self.answered.fetch_add(1, Ordering::Relaxed);
                    info!("Query from {} arrived before any reading", message.from);
                    Ok(ResponseOutcome::NoData)
                }
                AbsentReadingPolicy::Suppress => {
                    debug!("No reading yet; not replying to {}", message.from);
                    Ok(ResponseOutcome::Suppressed)
                }
            },
        }
    }

    /// Replies sent so far
    pub fn answered(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }

    pub fn absent_policy(&self) -> AbsentReadingPolicy {
        self.absent_policy
    }
}

#[async_trait]
impl InboundHandler for QueryResponder {
    async fn handle_message(&self, session: &MessagingSession, message: InboundMessage) {
        if let Err(e) = self.respond(session, &message).await {
            warn!("Failed to answer {}: {}", message.from, e);
        }
    }
}
