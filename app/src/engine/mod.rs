//! Local game engines.
//!
//! An engine is the authoritative simulation of one participant's game. The
//! session drives it with inputs, ticks and garbage, and collects the events
//! it produced since the last call to `take_events`.

mod tetris;

pub use tetris::{TetrisEngine, garbage_row};

use pulsepair::{BoardSection, Field, GameKind};

/// Player input for block-stacking engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MoveLeft,
    MoveRight,
    RotateCw,
    SoftDrop,
    HardDrop,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::MoveLeft,
        Action::MoveRight,
        Action::RotateCw,
        Action::SoftDrop,
        Action::HardDrop,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The visible field changed.
    FieldUpdated,
    ScoreChanged(u32),
    /// Rows cleared by a single lock.
    LinesCleared(u32),
    GameOver,
}

pub trait GameEngine: Send {
    fn kind(&self) -> GameKind;

    /// Visible field, including the falling piece.
    fn field(&self) -> Field;

    fn score(&self) -> u32;

    fn is_game_over(&self) -> bool;

    fn apply(&mut self, action: Action);

    /// Advance one simulation step.
    fn tick(&mut self);

    /// Push `lines` garbage rows in from the bottom.
    fn receive_garbage_lines(&mut self, lines: u32);

    /// Start a fresh game.
    fn restart(&mut self);

    fn take_events(&mut self) -> Vec<EngineEvent>;
}

/// Bind a game kind to its engine. Only real-time kinds have one.
pub fn engine_for(
    kind: GameKind,
    board: BoardSection,
    gravity_ticks: u32,
    seed: u64,
) -> Option<Box<dyn GameEngine>> {
    match kind {
        GameKind::Tetris => Some(Box::new(TetrisEngine::new(
            board.columns,
            board.rows,
            gravity_ticks,
            seed,
        ))),
        GameKind::Othello | GameKind::CardGame | GameKind::HeartRate => None,
    }
}
