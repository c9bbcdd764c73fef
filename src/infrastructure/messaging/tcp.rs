//! tempbridge gateway protocol: newline-delimited JSON frames over TCP.
//!
//! This is not XMPP. It is spoken by a relay that sits in front of the chat
//! network and forwards stanzas both ways, and by the loopback server in the
//! tests. A full XMPP client would be another [`Transport`].
//!
//! After the socket opens the server announces its SASL mechanisms with a
//! `features` frame. The client answers with an `auth` frame and waits for
//! `success` (carrying the bound address) or `failure`. From then on both
//! sides exchange `stanza` frames until either sends `close`.

use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::messaging::{
    stanza::Stanza,
    transport::{AuthMechanism, Credentials, Transport},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const SUPPORTED_MECHANISMS: [AuthMechanism; 1] = [AuthMechanism::Plain];

/// One line on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Features { mechanisms: Vec<String> },
    Auth { mechanism: String, payload: String, resource: String },
    Success { address: String },
    Failure { reason: String },
    Stanza { stanza: Stanza },
    Close,
}

impl Frame {
    pub fn encode(&self) -> BridgeResult<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| BridgeError::Protocol(format!("Failed to encode frame: {}", e)))?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> BridgeResult<Self> {
        serde_json::from_str(line)
            .map_err(|e| BridgeError::Protocol(format!("Malformed frame {:?}: {}", line, e)))
    }
}

/// SASL PLAIN initial response: base64 of `\0username\0password`
pub fn plain_payload(credentials: &Credentials) -> String {
    STANDARD.encode(format!("\0{}\0{}", credentials.username, credentials.password))
}

pub struct TcpTransport {
    server: String,
    reply_timeout: Duration,
    connected: Arc<AtomicBool>,
    tx_sender: Option<mpsc::UnboundedSender<Frame>>,
    control_receiver: Option<mpsc::UnboundedReceiver<Frame>>,
    inbound_receiver: Option<mpsc::UnboundedReceiver<Stanza>>,
    tx_handle: Option<tokio::task::JoinHandle<()>>,
    rx_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            server: String::new(),
            reply_timeout: Duration::from_millis(3000),
            connected: Arc::new(AtomicBool::new(false)),
            tx_sender: None,
            control_receiver: None,
            inbound_receiver: None,
            tx_handle: None,
            rx_handle: None,
        }
    }

    fn queue(&self, frame: Frame) -> BridgeResult<()> {
        let sender = self.tx_sender.as_ref().ok_or_else(|| BridgeError::NotConnected {
            operation: "send".to_string(),
            required: "an open connection".to_string(),
        })?;
        sender.send(frame).map_err(|e| BridgeError::Protocol(format!(
            "Failed to queue frame for {}: {}",
            self.server, e
        )))
    }

    /// Next non-stanza frame from the server within the reply budget
    async fn next_control_frame(&mut self) -> BridgeResult<Frame> {
        let server = self.server.clone();
        let receiver = self.control_receiver.as_mut().ok_or_else(|| {
            BridgeError::Protocol(format!("No connection to {}", server))
        })?;

        match tokio::time::timeout(self.reply_timeout, receiver.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(BridgeError::Protocol(format!("{} closed the connection", server))),
            Err(_) => Err(BridgeError::Protocol(format!(
                "No reply from {} within {:?}",
                server, self.reply_timeout
            ))),
        }
    }

    fn shutdown_tasks(&mut self) {
        self.tx_sender = None;
        self.control_receiver = None;
        self.inbound_receiver = None;
        if let Some(handle) = self.rx_handle.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> &'static str {
        "gateway"
    }

    fn supported_mechanisms(&self) -> &[AuthMechanism] {
        &SUPPORTED_MECHANISMS
    }

    async fn connect(
        &mut self,
        server: &str,
        port: u16,
        reply_timeout: Duration,
    ) -> BridgeResult<Vec<AuthMechanism>> {
        let address = format!("{}:{}", server, port);
        self.server = address.clone();
        self.reply_timeout = reply_timeout;

        let stream = tokio::time::timeout(reply_timeout, TcpStream::connect((server, port)))
            .await
            .map_err(|_| BridgeError::Connect {
                server: address.clone(),
                message: format!("Connection timeout after {:?}", reply_timeout),
            })?
            .map_err(|e| BridgeError::Connect {
                server: address.clone(),
                message: e.to_string(),
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        info!("TCP connection established to {}", address);

        let (read_half, mut write_half) = stream.into_split();
        let (tx_sender, mut tx_receiver) = mpsc::unbounded_channel::<Frame>();
        let (control_sender, control_receiver) = mpsc::unbounded_channel::<Frame>();
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel::<Stanza>();
        self.connected.store(true, Ordering::SeqCst);

        // TX task - writes queued frames
        let tx_server = address.clone();
        let tx_handle = tokio::spawn(async move {
            while let Some(frame) = tx_receiver.recv().await {
                let line = match frame.encode() {
                    Ok(line) => line,
                    Err(e) => {
                        error!("{}", e);
                        continue;
                    }
                };
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    error!("Failed to write to {}: {}", tx_server, e);
                    break;
                }
                if let Err(e) = write_half.flush().await {
                    error!("Failed to flush stream to {}: {}", tx_server, e);
                    break;
                }
                debug!("Sent {} bytes to {}", line.len(), tx_server);
                if frame == Frame::Close {
                    break;
                }
            }
            if let Err(e) = write_half.shutdown().await {
                debug!("Failed to shut down write half for {}: {}", tx_server, e);
            }
        });

        // RX task - splits server frames into control and stanza queues
        let rx_server = address.clone();
        let connected = Arc::clone(&self.connected);
        let rx_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match Frame::decode(&line) {
                        Ok(Frame::Stanza { stanza }) => {
                            debug!("Received {} stanza from {}", stanza.kind(), rx_server);
                            if inbound_sender.send(stanza).is_err() {
                                debug!("Inbound receiver for {} dropped", rx_server);
                            }
                        }
                        Ok(Frame::Close) => {
                            info!("{} closed the stream", rx_server);
                            break;
                        }
                        Ok(frame) => {
                            if control_sender.send(frame).is_err() {
                                debug!("Control receiver for {} dropped", rx_server);
                            }
                        }
                        Err(e) => warn!("{}", e),
                    },
                    Ok(None) => {
                        info!("TCP connection to {} closed by peer", rx_server);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read from {}: {}", rx_server, e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        self.tx_sender = Some(tx_sender);
        self.control_receiver = Some(control_receiver);
        self.inbound_receiver = Some(inbound_receiver);
        self.tx_handle = Some(tx_handle);
        self.rx_handle = Some(rx_handle);

        let offered = match self.next_control_frame().await {
            Ok(Frame::Features { mechanisms }) => mechanisms
                .iter()
                .filter_map(|name| AuthMechanism::from_name(name))
                .collect(),
            Ok(other) => {
                self.shutdown_tasks();
                return Err(BridgeError::Connect {
                    server: address,
                    message: format!("Expected stream features, got {:?}", other),
                });
            }
            Err(e) => {
                self.shutdown_tasks();
                return Err(BridgeError::Connect {
                    server: address,
                    message: e.to_string(),
                });
            }
        };

        Ok(offered)
    }

    async fn authenticate(
        &mut self,
        mechanism: AuthMechanism,
        credentials: &Credentials,
    ) -> BridgeResult<String> {
        let auth_error = |message: String| BridgeError::Auth {
            username: credentials.username.clone(),
            message,
        };

        if mechanism != AuthMechanism::Plain {
            return Err(auth_error(format!("Mechanism {} is not implemented", mechanism)));
        }

        self.queue(Frame::Auth {
            mechanism: mechanism.name().to_string(),
            payload: plain_payload(credentials),
            resource: credentials.resource.clone(),
        })
        .map_err(|e| auth_error(e.to_string()))?;

        match self.next_control_frame().await {
            Ok(Frame::Success { address }) => Ok(address),
            Ok(Frame::Failure { reason }) => Err(auth_error(reason)),
            Ok(other) => Err(auth_error(format!("Unexpected reply {:?}", other))),
            Err(e) => Err(auth_error(e.to_string())),
        }
    }

    async fn send(&self, stanza: Stanza) -> BridgeResult<()> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected {
                operation: format!("send {}", stanza.kind()),
                required: "an open connection".to_string(),
            });
        }
        self.queue(Frame::Stanza { stanza })
    }

    fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Stanza>> {
        self.inbound_receiver.take()
    }

    async fn disconnect(&mut self) -> BridgeResult<()> {
        if self.tx_sender.is_some() {
            // Best effort; the peer may already be gone.
            let _ = self.queue(Frame::Close);
        }
        self.tx_sender = None;

        if let Some(handle) = self.tx_handle.take() {
            if let Err(e) = handle.await {
                warn!("TX task completed with error: {}", e);
            }
        }

        self.shutdown_tasks();
        info!("TCP transport to {} closed", self.server);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
