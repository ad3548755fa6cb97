pub mod config;
pub mod connection;
mod err;
pub mod reorder;
pub mod registry;
pub mod segment;
pub mod substrate;
pub mod unacked;

pub use config::ConnectionConfig;
pub use connection::Connection;
pub use err::Error;
pub use registry::{ConnId, Registry};
pub use segment::Segment;
pub use substrate::{DatagramSocket, InputSource, InputStatus, OutputSink, OutputStatus, SendStatus};
