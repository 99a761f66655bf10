mod config;
mod game_state;
mod message;
mod path;
mod presence;
mod room;

pub use config::*;
pub use game_state::*;
pub use message::*;
pub use path::*;
pub use presence::*;
pub use room::*;
