//! PlayHub engine: multi-platform game library sync, play-session
//! tracking, and presence.
//!
//! The crate wires the store ([`playhub_db`]) and the provider clients
//! ([`playhub_providers`]) into one [`engine::Engine`] that an embedding
//! surface (UI bridge, RPC) drives. `playhubd` runs it headless.

pub mod background;
pub mod broadcast;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod events;
pub mod presence;
pub mod process;
pub mod session;
pub mod state;
pub mod sync;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError};
pub use events::EngineEvent;
pub use state::SharedState;
