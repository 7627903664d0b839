pub mod error;
pub mod limiters;
pub mod token_estimator;

pub use error::{EngineError, EngineResult};
pub use limiters::Limiters;
