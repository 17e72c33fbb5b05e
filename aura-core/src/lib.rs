pub mod config;
pub mod pcm;
pub mod prompt;
pub mod text;
pub mod types;

pub use config::SessionConfig;
pub use pcm::{AudioBuffer, DecodeError};
pub use types::{Message, SessionId, SessionStatus, SessionSummary, SessionView};
