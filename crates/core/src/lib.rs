pub mod config;
pub mod descriptor;
pub mod error;

pub use config::{ApprovalMode, Config, EngineConfig, Timeouts};
pub use descriptor::{Endpoint, ToolServerDescriptor, TransportKind};
pub use error::*;
