use crate::domain::{message::InboundMessage, reading::Temperature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed side-channel value attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Temperature(Temperature),
}

/// Chat message stanza
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStanza {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl MessageStanza {
    pub fn new(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            from: None,
            to: to.into(),
            body: body.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Sender and body, if the stanza names its sender
    pub fn into_inbound(self) -> Option<InboundMessage> {
        self.from.map(|from| InboundMessage { from, body: self.body })
    }
}

/// Presence stanza type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceType {
    Available,
    Unavailable,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
}

/// Presence broadcast or subscription request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStanza {
    #[serde(rename = "presence")]
    pub kind: PresenceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: i8,
}

impl PresenceStanza {
    pub fn new(kind: PresenceType) -> Self {
        Self {
            kind,
            from: None,
            to: None,
            status: None,
            priority: 0,
        }
    }
}

/// Info/query stanza; the bridge never acts on these
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IqStanza {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub query: String,
}

/// Unit of exchange with the messaging server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Stanza {
    Message(MessageStanza),
    Presence(PresenceStanza),
    Iq(IqStanza),
}

impl Stanza {
    pub fn kind(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    pub fn as_message(&self) -> Option<&MessageStanza> {
        match self {
            Stanza::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_presence(&self) -> Option<&PresenceStanza> {
        match self {
            Stanza::Presence(presence) => Some(presence),
            _ => None,
        }
    }
}
