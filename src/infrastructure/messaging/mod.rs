// Messaging module - Presence/chat session and its transports
pub mod memory;
pub mod session;
pub mod stanza;
pub mod tcp;
pub mod transport;

pub use memory::MemoryTransport;
pub use session::{InboundHandler, MessagingSession, SessionOptions, SessionState};
pub use stanza::{MessageStanza, PresenceStanza, PresenceType, PropertyValue, Stanza};
pub use tcp::TcpTransport;
pub use transport::{AuthMechanism, Credentials, Transport};
