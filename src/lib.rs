pub mod config;
pub mod controller;
pub mod duration;
pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod sink;
pub mod template;
pub mod worker;

pub use config::{RunConfig, SinkConfig};
pub use controller::{run, ExecutionController, RunSummary};
pub use error::{AttemptError, ConfigError, RenderError, RunError};
