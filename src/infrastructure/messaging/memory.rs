//! In-process [`Transport`] that records what the session sends.
//!
//! Clones share state, so a test can hand one clone to a session and keep
//! another to inject inbound stanzas and inspect outbound ones.

use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::messaging::{
    stanza::{MessageStanza, Stanza},
    transport::{AuthMechanism, Credentials, Transport},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const ALL_MECHANISMS: [AuthMechanism; 4] = [
    AuthMechanism::Plain,
    AuthMechanism::ScramSha1,
    AuthMechanism::DigestMd5,
    AuthMechanism::Anonymous,
];

#[derive(Debug)]
struct MemoryState {
    reachable: bool,
    connected: bool,
    offered: Vec<AuthMechanism>,
    accounts: HashMap<String, String>,
    server: Option<String>,
    sent: Vec<Stanza>,
    inbound_tx: Option<mpsc::UnboundedSender<Stanza>>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Stanza>>,
    last_mechanism: Option<AuthMechanism>,
    rejecting_sends: bool,
    disconnects: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Reachable server offering PLAIN and SCRAM-SHA-1, no accounts yet
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                reachable: true,
                connected: false,
                offered: vec![AuthMechanism::ScramSha1, AuthMechanism::Plain],
                accounts: HashMap::new(),
                server: None,
                sent: Vec::new(),
                inbound_tx: None,
                inbound_rx: None,
                last_mechanism: None,
                rejecting_sends: false,
                disconnects: 0,
            })),
        }
    }

    /// Server that refuses every connection
    pub fn unreachable() -> Self {
        let transport = Self::new();
        transport.state.lock().reachable = false;
        transport
    }

    pub fn with_account(self, username: &str, password: &str) -> Self {
        self.state
            .lock()
            .accounts
            .insert(username.to_string(), password.to_string());
        self
    }

    pub fn with_offered_mechanisms(self, offered: Vec<AuthMechanism>) -> Self {
        self.state.lock().offered = offered;
        self
    }

    /// Deliver a stanza as if the server had sent it. Returns `false` when
    /// there is no live connection to deliver on.
    pub fn inject(&self, stanza: Stanza) -> bool {
        let state = self.state.lock();
        match &state.inbound_tx {
            Some(tx) if state.connected => tx.send(stanza).is_ok(),
            _ => false,
        }
    }

    pub fn inject_message(&self, from: &str, body: &str) -> bool {
        let mut message = MessageStanza::new("bridge", body);
        message.from = Some(from.to_string());
        self.inject(Stanza::Message(message))
    }

    /// Make every outbound stanza fail, as a link that drops writes would
    pub fn reject_sends(&self, rejecting: bool) {
        self.state.lock().rejecting_sends = rejecting;
    }

    /// Close the connection from the server side
    pub fn drop_link(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.inbound_tx = None;
    }

    /// Number of `disconnect` calls received
    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn sent(&self) -> Vec<Stanza> {
        self.state.lock().sent.clone()
    }

    pub fn sent_messages(&self) -> Vec<MessageStanza> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|stanza| stanza.as_message().cloned())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    pub fn last_mechanism(&self) -> Option<AuthMechanism> {
        self.state.lock().last_mechanism
    }

    pub fn connected(&self) -> bool {
        self.state.lock().connected
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn supported_mechanisms(&self) -> &[AuthMechanism] {
        &ALL_MECHANISMS
    }

    async fn connect(
        &mut self,
        server: &str,
        port: u16,
        _reply_timeout: Duration,
    ) -> BridgeResult<Vec<AuthMechanism>> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(BridgeError::Connect {
                server: format!("{}:{}", server, port),
                message: "Connection refused".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.inbound_tx = Some(tx);
        state.inbound_rx = Some(rx);
        state.connected = true;
        state.server = Some(server.to_string());
        Ok(state.offered.clone())
    }

    async fn authenticate(
        &mut self,
        mechanism: AuthMechanism,
        credentials: &Credentials,
    ) -> BridgeResult<String> {
        let mut state = self.state.lock();
        let auth_error = |message: &str| BridgeError::Auth {
            username: credentials.username.clone(),
            message: message.to_string(),
        };

        if !state.connected {
            return Err(auth_error("not connected"));
        }
        if !state.offered.contains(&mechanism) {
            return Err(auth_error("mechanism not offered"));
        }
        match state.accounts.get(&credentials.username) {
            Some(password) if *password == credentials.password => {}
            _ => return Err(auth_error("not-authorized")),
        }

        state.last_mechanism = Some(mechanism);
        let domain = state.server.clone().unwrap_or_default();
        Ok(format!("{}@{}/{}", credentials.username, domain, credentials.resource))
    }

    async fn send(&self, stanza: Stanza) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(BridgeError::NotConnected {
                operation: "send".to_string(),
                required: "an open connection".to_string(),
            });
        }
        if state.rejecting_sends {
            return Err(BridgeError::Protocol(format!(
                "Link dropped {} stanza",
                stanza.kind()
            )));
        }
        state.sent.push(stanza);
        Ok(())
    }

    fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Stanza>> {
        self.state.lock().inbound_rx.take()
    }

    async fn disconnect(&mut self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.inbound_tx = None;
        state.inbound_rx = None;
        state.disconnects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}
