pub mod shell;
pub mod socket;
pub mod worker;

pub use worker::{spawn, WorkerCommand, WorkerEvent, WorkerHandle, WorkerState};
