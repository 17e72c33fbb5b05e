pub mod capture;
pub mod error;
pub mod live;
pub mod playback;
pub mod session;
pub mod testing;
pub mod transcript;
pub mod traits;
pub mod transport;

pub use error::{SessionError, user_facing_error};
pub use live::{SessionDeps, SessionHandle, start_session};
pub use transport::GeminiConnector;
