mod console;
mod orchestrator;
mod runtime;
mod shutdown;
mod types;


pub use console::{render, ConsoleTransport};
pub use orchestrator::PicamOrchestrator;
pub use types::{OutputFormat, ShutdownReason};
