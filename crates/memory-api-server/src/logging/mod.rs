//! Tracing setup and activity logging with async queue mechanism

mod logger;
mod subscriber;
pub mod types;

pub use logger::{ActivityLogger, LoggerConfig};
pub use subscriber::init;
pub use types::{ActivityLog, ActivityStatus, ActivityType};
