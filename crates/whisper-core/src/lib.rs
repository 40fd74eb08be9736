pub mod config;
pub mod error;
pub mod limits;

pub use config::WhisperConfig;
pub use error::{WhisperError, WhisperResult};
pub use limits::Limits;
