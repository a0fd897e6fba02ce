pub mod config;
pub mod error;
pub mod event;
pub mod node;
pub mod persona;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{NodeflowError, Result};
pub use event::{EventStatus, ExecutionEvent, LogEntry, RunEvent};
pub use node::{NodeKind, NodeRecord};
pub use persona::Persona;
pub use types::*;
