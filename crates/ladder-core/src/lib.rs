pub mod config;
pub mod error;
pub mod types;

pub use config::{LadderConfig, parse_duration};
pub use error::{CoreError, CoreResult};
pub use types::*;
