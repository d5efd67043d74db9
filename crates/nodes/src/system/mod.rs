//! Built-in handlers that ship with every engine.

mod basic;
mod log;
mod sleep;

pub use basic::{collect_result, EndHandler, StartHandler};
pub use log::LogHandler;
pub use sleep::SleepHandler;

pub const TYPE_START: &str = "start";
pub const TYPE_END: &str = "end";
pub const TYPE_LOG: &str = "log";
pub const TYPE_SLEEP: &str = "sleep";
