//! Session error types.

use thiserror::Error;

use crate::store::{PollError, StoreError};
use pulsepair::{GameKind, RoomStatus};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("{user} is not a participant of room {session_id}")]
    NotParticipant { user: String, session_id: String },

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: RoomStatus, to: RoomStatus },

    #[error("no real-time engine for game kind {0}")]
    NoEngine(GameKind),

    #[error("engine plays {actual}, room plays {expected}")]
    EngineKind { expected: GameKind, actual: GameKind },
}
