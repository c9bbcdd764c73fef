// Core module - Reading pipeline and query protocol
pub mod channel;
pub mod parser;
pub mod responder;

pub use channel::{SubscriptionId, TemperatureChannel};
pub use parser::{parse_line, LineParser, ParserStats};
pub use responder::QueryResponder;
