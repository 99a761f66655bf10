//! Two-client game session synchronization over a shared state store.

pub mod actors;
pub mod attack;
pub mod bus;
pub mod channel;
pub mod directory;
pub mod engine;
pub mod error;
pub mod heart_rate;
pub mod lifecycle;
pub mod presence;
pub mod reset;
pub mod session;
pub mod state;
pub mod store;

pub use error::SessionError;
pub use session::{MatchSession, SessionContext};
pub use store::{MemoryStore, SharedStateStore, StoreError};
