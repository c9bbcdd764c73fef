//! Messaging session lifecycle and inbound dispatch.
//!
//! `Disconnected --init--> Connected --login--> Authenticated`; `destroy`
//! returns to `Disconnected` from anywhere. Sending chat messages requires
//! `Authenticated`, presence updates only need a connection.

use crate::domain::{
    error::{BridgeError, BridgeResult},
    message::InboundMessage,
    reading::Temperature,
};
use crate::infrastructure::messaging::{
    stanza::{MessageStanza, PresenceStanza, PresenceType, PropertyValue, Stanza},
    transport::{AuthMechanism, Credentials, Transport},
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Property carrying the Celsius value of a structured reading
pub const CELSIUS_PROPERTY: &str = "celsius";
/// Property carrying the Fahrenheit value of a structured reading
pub const FAHRENHEIT_PROPERTY: &str = "fahrenheit";

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Authenticated => write!(f, "Authenticated"),
        }
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Budget for connect and for each request/reply exchange
    pub reply_timeout: Duration,
    /// Presence status advertised right after login
    pub status_text: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(3000),
            status_text: "Measuring data...".to_string(),
        }
    }
}

/// Receives accepted chat messages.
///
/// Runs on the session's delivery task: the next message is not delivered
/// until this returns, so handlers should finish quickly.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_message(&self, session: &MessagingSession, message: InboundMessage);
}

/// Body of a structured reading reply
pub fn format_reading_body(reading: &Temperature) -> String {
    format!(
        "Current temperature: \n{}\n{}",
        reading.to_celsius(),
        reading.to_fahrenheit()
    )
}

struct SessionInner {
    transport: Mutex<Box<dyn Transport>>,
    options: SessionOptions,
    state: RwLock<SessionState>,
    server: RwLock<Option<String>>,
    username: RwLock<Option<String>>,
    address: RwLock<Option<String>>,
    mechanism: RwLock<Option<AuthMechanism>>,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to one messaging session
#[derive(Clone)]
pub struct MessagingSession {
    inner: Arc<SessionInner>,
}

impl MessagingSession {
    pub fn new(transport: Box<dyn Transport>, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport: Mutex::new(transport),
                options,
                state: RwLock::new(SessionState::Disconnected),
                server: RwLock::new(None),
                username: RwLock::new(None),
                address: RwLock::new(None),
                mechanism: RwLock::new(None),
                handler: RwLock::new(None),
                dispatcher: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Register the receiver of inbound chat messages. Takes effect for
    /// messages delivered after the call.
    pub fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    /// Connect to `server:port` and pick an authentication mechanism.
    pub async fn init(&self, server: &str, port: u16) -> BridgeResult<()> {
        let address = format!("{}:{}", server, port);
        let state = self.state();
        if state != SessionState::Disconnected {
            return Err(BridgeError::InvalidState {
                message: format!("init requires Disconnected, session is {}", state),
            });
        }

        let reply_timeout = self.inner.options.reply_timeout;
        let mut transport = self.inner.transport.lock().await;
        info!("Connecting to {} over {} transport", address, transport.kind());

        let offered =
            match tokio::time::timeout(reply_timeout, transport.connect(server, port, reply_timeout))
                .await
            {
                Ok(Ok(offered)) => offered,
                Ok(Err(e)) => {
                    error!("Failed to connect to {}: {}", address, e);
                    return Err(match e {
                        BridgeError::Connect { .. } => e,
                        other => BridgeError::Connect {
                            server: address,
                            message: other.to_string(),
                        },
                    });
                }
                Err(_) => {
                    error!("Connecting to {} timed out", address);
                    return Err(BridgeError::Connect {
                        server: address,
                        message: format!("No response within {:?}", reply_timeout),
                    });
                }
            };

        let Some(mechanism) = AuthMechanism::negotiate(&offered, transport.supported_mechanisms())
        else {
            if let Err(e) = transport.disconnect().await {
                warn!("Failed to disconnect from {}: {}", address, e);
            }
            error!("{} offers no usable authentication mechanism ({:?})", address, offered);
            return Err(BridgeError::Connect {
                server: address,
                message: format!("No usable authentication mechanism in {:?}", offered),
            });
        };

        *self.inner.mechanism.write() = Some(mechanism);
        *self.inner.server.write() = Some(address.clone());
        *self.inner.state.write() = SessionState::Connected;
        info!("Connected to {} (auth mechanism {})", address, mechanism);
        Ok(())
    }

    /// Authenticate, go available, and start delivering inbound messages.
    pub async fn login(&self, username: &str, credential: &str, resource: &str) -> BridgeResult<()> {
        let auth_error = |message: String| BridgeError::Auth {
            username: username.to_string(),
            message,
        };

        let state = self.state();
        if state != SessionState::Connected {
            error!("Login as {} failed: session is {}", username, state);
            return Err(auth_error(format!("login requires Connected, session is {}", state)));
        }
        let mechanism = (*self.inner.mechanism.read())
            .ok_or_else(|| auth_error("no negotiated mechanism".to_string()))?;

        let credentials = Credentials::new(username, credential, resource);
        let reply_timeout = self.inner.options.reply_timeout;
        let inbound = {
            let mut transport = self.inner.transport.lock().await;
            let address = match tokio::time::timeout(
                reply_timeout,
                transport.authenticate(mechanism, &credentials),
            )
            .await
            {
                Ok(Ok(address)) => address,
                Ok(Err(e)) => {
                    error!("Login as {} failed: {}", username, e);
                    return Err(match e {
                        BridgeError::Auth { .. } => e,
                        other => auth_error(other.to_string()),
                    });
                }
                Err(_) => {
                    error!("Login as {} timed out", username);
                    return Err(auth_error(format!("No reply within {:?}", reply_timeout)));
                }
            };

            // Authenticated only once presence is out.
            let status_text = &self.inner.options.status_text;
            let presence = presence_stanza(true, status_text, Some(address.clone()));
            if let Err(e) = transport.send(presence).await {
                error!("Login as {} failed: presence not accepted: {}", username, e);
                return Err(auth_error(format!("presence not accepted: {}", e)));
            }
            debug!("Presence set to available ({})", status_text);

            *self.inner.address.write() = Some(address.clone());
            *self.inner.username.write() = Some(username.to_string());
            *self.inner.state.write() = SessionState::Authenticated;
            info!("Connection established as {}", address);
            transport.take_inbound()
        };

        match inbound {
            Some(receiver) => self.start_dispatch(receiver),
            None => warn!("Transport has no inbound stream; queries will not be answered"),
        }
        Ok(())
    }

    /// Broadcast presence.
    pub async fn set_status(&self, available: bool, status_text: &str) -> BridgeResult<()> {
        if self.state() == SessionState::Disconnected {
            return Err(BridgeError::NotConnected {
                operation: "set_status".to_string(),
                required: "a connection".to_string(),
            });
        }

        self.send_stanza(presence_stanza(available, status_text, self.address()))
            .await?;
        debug!("Presence set to {} ({})", if available { "available" } else { "unavailable" }, status_text);
        Ok(())
    }

    pub async fn send_message(&self, body: &str, to: &str) -> BridgeResult<()> {
        self.require_authenticated("send_message")?;
        let mut message = MessageStanza::new(to, body);
        message.from = self.address();
        self.send_stanza(Stanza::Message(message)).await
    }

    /// Send `reading` with both units in the body and as typed properties.
    pub async fn send_structured_reading(&self, reading: &Temperature, to: &str) -> BridgeResult<()> {
        self.require_authenticated("send_structured_reading")?;

        let celsius = reading.to_celsius();
        let fahrenheit = reading.to_fahrenheit();
        let mut message = MessageStanza::new(to, format_reading_body(reading))
            .with_property(CELSIUS_PROPERTY, PropertyValue::Temperature(celsius))
            .with_property(FAHRENHEIT_PROPERTY, PropertyValue::Temperature(fahrenheit));
        message.from = self.address();

        self.send_stanza(Stanza::Message(message)).await?;
        debug!("Sent reading {} / {} to {}", celsius, fahrenheit, to);
        Ok(())
    }

    /// Stop dispatch and disconnect. Safe in any state, any number of times.
    pub async fn destroy(&self) {
        if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
            dispatcher.abort();
        }

        // The link may already be gone; disconnect still releases its tasks.
        let mut transport = self.inner.transport.lock().await;
        if let Err(e) = transport.disconnect().await {
            warn!("Failed to disconnect cleanly: {}", e);
        }
        drop(transport);

        let previous = std::mem::replace(&mut *self.inner.state.write(), SessionState::Disconnected);
        *self.inner.address.write() = None;
        *self.inner.mechanism.write() = None;
        if previous != SessionState::Disconnected {
            info!("Session to {} closed", self.server().unwrap_or_default());
        }
    }

    /// Current state. A session whose link was closed by the server reports
    /// `Disconnected` until `destroy` and a fresh `init`.
    pub fn state(&self) -> SessionState {
        let state = *self.inner.state.read();
        if state != SessionState::Disconnected && !self.link_alive() {
            SessionState::Disconnected
        } else {
            state
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() != SessionState::Disconnected
    }

    /// Full address bound at login
    pub fn address(&self) -> Option<String> {
        self.inner.address.read().clone()
    }

    pub fn server(&self) -> Option<String> {
        self.inner.server.read().clone()
    }

    pub fn mechanism(&self) -> Option<AuthMechanism> {
        *self.inner.mechanism.read()
    }

    fn link_alive(&self) -> bool {
        // A held lock means an operation is in flight and will report the
        // link itself.
        match self.inner.transport.try_lock() {
            Ok(transport) => transport.is_connected(),
            Err(_) => true,
        }
    }

    fn require_authenticated(&self, operation: &str) -> BridgeResult<()> {
        let state = self.state();
        if state == SessionState::Authenticated {
            Ok(())
        } else {
            debug!("Refusing {} while {}", operation, state);
            Err(BridgeError::NotConnected {
                operation: operation.to_string(),
                required: SessionState::Authenticated.to_string(),
            })
        }
    }

    async fn send_stanza(&self, stanza: Stanza) -> BridgeResult<()> {
        let transport = self.inner.transport.lock().await;
        transport.send(stanza).await
    }

    fn start_dispatch(&self, receiver: mpsc::UnboundedReceiver<Stanza>) {
        let session = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(dispatch_inbound(session, receiver));
        if let Some(previous) = self.inner.dispatcher.lock().replace(handle) {
            previous.abort();
        }
        debug!("Inbound dispatch started");
    }

    async fn deliver(&self, message: MessageStanza) {
        let Some(inbound) = message.into_inbound() else {
            debug!("Dropping inbound message without sender");
            return;
        };

        let handler = self.inner.handler.read().clone();
        match handler {
            Some(handler) => handler.handle_message(self, inbound).await,
            None => trace!("No handler registered; ignoring message from {}", inbound.from),
        }
    }

    async fn accept_subscription(&self, request: PresenceStanza) {
        let Some(from) = request.from else {
            return;
        };

        let mut reply = PresenceStanza::new(PresenceType::Subscribed);
        reply.from = self.address();
        reply.to = Some(from.clone());
        match self.send_stanza(Stanza::Presence(reply)).await {
            Ok(()) => info!("Accepted presence subscription from {}", from),
            Err(e) => warn!("Failed to accept subscription from {}: {}", from, e),
        }
    }
}

fn presence_stanza(available: bool, status_text: &str, from: Option<String>) -> Stanza {
    let mut presence = PresenceStanza::new(if available {
        PresenceType::Available
    } else {
        PresenceType::Unavailable
    });
    presence.from = from;
    presence.status = Some(status_text.to_string());
    presence.priority = 1;
    Stanza::Presence(presence)
}

async fn dispatch_inbound(session: Weak<SessionInner>, mut inbound: mpsc::UnboundedReceiver<Stanza>) {
    while let Some(stanza) = inbound.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        let session = MessagingSession { inner };

        match stanza {
            Stanza::Message(message) => session.deliver(message).await,
            Stanza::Presence(presence) if presence.kind == PresenceType::Subscribe => {
                session.accept_subscription(presence).await
            }
            other => trace!("Ignoring inbound {} stanza", other.kind()),
        }
    }

    if let Some(inner) = session.upgrade() {
        let session = MessagingSession { inner };
        if session.state() == SessionState::Disconnected {
            warn!(
                "Connection to {} lost; inbound messages are no longer delivered",
                session.server().unwrap_or_default()
            );
        }
    }
    debug!("Inbound dispatch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::messaging::memory::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session_with(transport: &MemoryTransport) -> MessagingSession {
        MessagingSession::new(Box::new(transport.clone()), SessionOptions::default())
    }

    async fn authenticated(transport: &MemoryTransport) -> MessagingSession {
        let session = session_with(transport);
        session.init("example.com", 5222).await.unwrap();
        session.login("sensor", "secret", "tempbridge").await.unwrap();
        session
    }

    struct CountingHandler {
        calls: AtomicUsize,
        bodies: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InboundHandler for CountingHandler {
        async fn handle_message(&self, _session: &MessagingSession, message: InboundMessage) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().push(message.body);
        }
    }

    #[tokio::test]
    async fn test_init_moves_to_connected() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = session_with(&transport);
        assert_eq!(session.state(), SessionState::Disconnected);

        session.init("example.com", 5222).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.mechanism(), Some(AuthMechanism::Plain));
        assert_eq!(session.server().as_deref(), Some("example.com:5222"));
    }

    #[tokio::test]
    async fn test_init_unreachable_server() {
        let transport = MemoryTransport::unreachable();
        let session = session_with(&transport);
        let result = session.init("example.com", 5222).await;
        assert!(matches!(result, Err(BridgeError::Connect { .. })));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_init_without_usable_mechanism() {
        let transport = MemoryTransport::new().with_offered_mechanisms(vec![AuthMechanism::Anonymous]);
        let session = session_with(&transport);
        let result = session.init("example.com", 5222).await;
        assert!(matches!(result, Err(BridgeError::Connect { .. })));
        assert!(!transport.connected());
    }

    #[tokio::test]
    async fn test_login_requires_connection() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = session_with(&transport);
        let result = session.login("sensor", "secret", "tempbridge").await;
        assert!(matches!(result, Err(BridgeError::Auth { .. })));
    }

    #[tokio::test]
    async fn test_login_with_bad_credentials() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = session_with(&transport);
        session.init("example.com", 5222).await.unwrap();

        let result = session.login("sensor", "wrong", "tempbridge").await;
        assert!(matches!(result, Err(BridgeError::Auth { .. })));
        assert_eq!(session.state(), SessionState::Connected);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_login_announces_presence() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = authenticated(&transport).await;

        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.address().as_deref(), Some("sensor@example.com/tempbridge"));

        let sent = transport.sent();
        let presence = sent[0].as_presence().unwrap();
        assert_eq!(presence.kind, PresenceType::Available);
        assert_eq!(presence.status.as_deref(), Some("Measuring data..."));
        assert_eq!(presence.priority, 1);
    }

    #[tokio::test]
    async fn test_login_fails_when_presence_cannot_be_sent() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = session_with(&transport);
        session.init("example.com", 5222).await.unwrap();
        transport.reject_sends(true);

        let result = session.login("sensor", "secret", "tempbridge").await;
        assert!(matches!(result, Err(BridgeError::Auth { .. })));
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.address().is_none());

        transport.reject_sends(false);
        let result = session.send_message("hello", "alice@example.com").await;
        assert!(matches!(result, Err(BridgeError::NotConnected { .. })));
        assert!(transport.sent().is_empty());

        session.login("sensor", "secret", "tempbridge").await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        session.destroy().await;
    }

    #[tokio::test]
    async fn test_send_requires_authentication() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = session_with(&transport);

        let result = session.send_message("hello", "alice@example.com").await;
        assert!(matches!(result, Err(BridgeError::NotConnected { .. })));

        session.init("example.com", 5222).await.unwrap();
        let result = session.send_message("hello", "alice@example.com").await;
        assert!(matches!(result, Err(BridgeError::NotConnected { .. })));
        assert!(transport.sent().is_empty());

        let reading = Temperature::celsius(20.0).unwrap();
        let result = session.send_structured_reading(&reading, "alice@example.com").await;
        assert!(matches!(result, Err(BridgeError::NotConnected { .. })));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_set_status_needs_connection() {
        let transport = MemoryTransport::new();
        let session = session_with(&transport);
        let result = session.set_status(false, "Away").await;
        assert!(matches!(result, Err(BridgeError::NotConnected { .. })));

        session.init("example.com", 5222).await.unwrap();
        session.set_status(false, "Away").await.unwrap();
        let presence = transport.sent()[0].as_presence().cloned().unwrap();
        assert_eq!(presence.kind, PresenceType::Unavailable);
        assert_eq!(presence.status.as_deref(), Some("Away"));
    }

    #[tokio::test]
    async fn test_structured_reading_carries_both_units() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = authenticated(&transport).await;
        transport.clear_sent();

        let reading = Temperature::celsius(23.5).unwrap();
        session
            .send_structured_reading(&reading, "alice@example.com")
            .await
            .unwrap();

        let messages = transport.sent_messages();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.to, "alice@example.com");
        assert_eq!(message.body, "Current temperature: \n23.50 °C\n74.30 °F");
        assert_eq!(
            message.property(CELSIUS_PROPERTY),
            Some(&PropertyValue::Temperature(reading))
        );
        match message.property(FAHRENHEIT_PROPERTY) {
            Some(PropertyValue::Temperature(f)) => assert!((f.value() - 74.3).abs() < 1e-9),
            other => panic!("unexpected fahrenheit property {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_filters_non_message_stanzas() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            bodies: parking_lot::Mutex::new(Vec::new()),
        });
        let session = session_with(&transport);
        session.set_handler(handler.clone());
        session.init("example.com", 5222).await.unwrap();
        session.login("sensor", "secret", "tempbridge").await.unwrap();

        let mut presence = PresenceStanza::new(PresenceType::Available);
        presence.from = Some("alice@example.com".to_string());
        assert!(transport.inject(Stanza::Presence(presence)));
        assert!(transport.inject(Stanza::Iq(crate::infrastructure::messaging::stanza::IqStanza {
            id: "1".to_string(),
            from: Some("example.com".to_string()),
            query: "ping".to_string(),
        })));
        assert!(transport.inject_message("alice@example.com", "hello"));

        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.bodies.lock().as_slice(), ["hello".to_string()]);
        session.destroy().await;
    }

    #[tokio::test]
    async fn test_subscription_requests_are_accepted() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = authenticated(&transport).await;
        transport.clear_sent();

        let mut request = PresenceStanza::new(PresenceType::Subscribe);
        request.from = Some("bob@example.com".to_string());
        assert!(transport.inject(Stanza::Presence(request)));

        let mut reply = None;
        for _ in 0..100 {
            reply = transport.sent().into_iter().find_map(|s| s.as_presence().cloned());
            if reply.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let reply = reply.expect("subscription reply");
        assert_eq!(reply.kind, PresenceType::Subscribed);
        assert_eq!(reply.to.as_deref(), Some("bob@example.com"));
        session.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = session_with(&transport);
        session.destroy().await;
        assert_eq!(session.state(), SessionState::Disconnected);

        session.init("example.com", 5222).await.unwrap();
        session.login("sensor", "secret", "tempbridge").await.unwrap();
        session.destroy().await;
        session.destroy().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
        assert!(!transport.connected());
        assert!(session.address().is_none());
    }

    #[tokio::test]
    async fn test_server_closing_link_disconnects_session() {
        let transport = MemoryTransport::new().with_account("sensor", "secret");
        let session = authenticated(&transport).await;
        transport.clear_sent();

        transport.drop_link();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
        let result = session.send_message("hello", "alice@example.com").await;
        assert!(matches!(result, Err(BridgeError::NotConnected { .. })));
        assert!(transport.sent().is_empty());

        session.destroy().await;
        assert_eq!(transport.disconnects(), 1);
        assert!(session.address().is_none());

        session.init("example.com", 5222).await.unwrap();
        session.login("sensor", "secret", "tempbridge").await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        session.destroy().await;
    }
}
