pub mod log;
pub mod trace;
