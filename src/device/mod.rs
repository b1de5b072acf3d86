pub mod dispatch;
pub mod mock;
pub mod register_file;
pub mod stream;

pub use dispatch::Dispatcher;
pub use mock::{DeviceConfig, MockDevice};
pub use register_file::RegisterFile;
pub use stream::{ByteQueue, Parsed, StreamAccumulator};
