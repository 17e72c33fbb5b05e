pub mod gemini_live;
pub mod wire;

pub use gemini_live::{GeminiLiveConfig, GeminiLiveHandle, spawn_live_session};
pub use wire::{FunctionCall, FunctionDeclaration, FunctionResponse, LiveEvent, LiveSetup};
