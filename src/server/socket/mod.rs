pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{DeviceClient, DeviceLink, TcpLink};
pub use protocol::*;
pub use transport::{InProcessPeer, InProcessTransport, TcpTransport, Transport};
