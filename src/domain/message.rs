use serde::{Deserialize, Serialize};

/// A chat message delivered to the bridge: who sent it and what it says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
}

impl InboundMessage {
    pub fn new(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            body: body.into(),
        }
    }
}
