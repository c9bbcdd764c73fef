use crate::domain::error::BridgeResult;
use crate::infrastructure::messaging::stanza::Stanza;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// SASL mechanisms a server may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    Plain,
    ScramSha1,
    DigestMd5,
    Anonymous,
}

/// Credentialed mechanisms, cheapest handshake first
pub const MECHANISM_PREFERENCE: [AuthMechanism; 3] = [
    AuthMechanism::Plain,
    AuthMechanism::ScramSha1,
    AuthMechanism::DigestMd5,
];

impl AuthMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::ScramSha1 => "SCRAM-SHA-1",
            AuthMechanism::DigestMd5 => "DIGEST-MD5",
            AuthMechanism::Anonymous => "ANONYMOUS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(AuthMechanism::Plain),
            "SCRAM-SHA-1" => Some(AuthMechanism::ScramSha1),
            "DIGEST-MD5" => Some(AuthMechanism::DigestMd5),
            "ANONYMOUS" => Some(AuthMechanism::Anonymous),
            _ => None,
        }
    }

    /// Pick the lowest-friction mechanism both sides support.
    pub fn negotiate(offered: &[AuthMechanism], supported: &[AuthMechanism]) -> Option<Self> {
        MECHANISM_PREFERENCE
            .into_iter()
            .find(|mechanism| offered.contains(mechanism) && supported.contains(mechanism))
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Account used to log in
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub resource: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("resource", &self.resource)
            .finish()
    }
}

/// Connection to a presence/messaging server.
///
/// Implementations own the wire format. Inbound stanzas are delivered through
/// the receiver returned once by [`take_inbound`](Transport::take_inbound).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Mechanisms this client can perform
    fn supported_mechanisms(&self) -> &[AuthMechanism];

    /// Open the connection and return the mechanisms the server offers.
    async fn connect(
        &mut self,
        server: &str,
        port: u16,
        reply_timeout: Duration,
    ) -> BridgeResult<Vec<AuthMechanism>>;

    /// Authenticate and bind the resource, returning the full address.
    async fn authenticate(
        &mut self,
        mechanism: AuthMechanism,
        credentials: &Credentials,
    ) -> BridgeResult<String>;

    async fn send(&self, stanza: Stanza) -> BridgeResult<()>;

    fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Stanza>>;

    async fn disconnect(&mut self) -> BridgeResult<()>;

    fn is_connected(&self) -> bool;
}
