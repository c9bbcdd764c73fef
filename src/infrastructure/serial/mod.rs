// Serial module - Sensor line ingestion
pub mod lines;
pub mod mock;
pub mod port;
pub mod reader;

pub use lines::LineAssembler;
pub use mock::{MockOpenFailure, MockPort, MockPortOpener};
pub use port::{LineSettings, PortOpener, SystemPortOpener};
pub use reader::{ReaderState, SerialReader};
