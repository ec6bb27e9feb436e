// vantage-api: transport seam for the engine's live streams and REST control

pub mod engine;
pub mod error;
pub mod transport;
pub mod websocket;

pub use engine::{EngineClient, EngineVersion};
pub use error::Error;
pub use transport::{Connect, ERROR_MARKER, Frame, Transport, TransportSender};
pub use websocket::WsConnector;
