// Configuration loading

pub mod session;
pub mod session_manager;
pub mod settings;

pub use session::{JsonSessionStore, SessionState, SessionStore};
pub use session_manager::{SessionManager, SessionUpdate};
pub use settings::Settings;
