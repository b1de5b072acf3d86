pub mod config;
pub mod device;
pub mod error;
pub mod server;
pub mod utils;

pub use device::{DeviceConfig, MockDevice, RegisterFile};
pub use error::DeviceError;
pub use server::socket::{DeviceClient, TcpTransport};
