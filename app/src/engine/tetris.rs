//! Block-stacking engine.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{Action, EngineEvent, GameEngine};
use pulsepair::{CellCode, EMPTY_CELL, Field, GARBAGE_CELL, GameKind};

const MIN_DIMENSION: usize = 4;
const KICKS: [i32; 5] = [0, -1, 1, -2, 2];

/// A garbage row: every cell is `GARBAGE_CELL` except one empty cell at a
/// uniformly random column.
pub fn garbage_row<R: Rng + ?Sized>(columns: usize, rng: &mut R) -> Vec<CellCode> {
    let mut row = vec![GARBAGE_CELL; columns];
    if columns > 0 {
        row[rng.random_range(0..columns)] = EMPTY_CELL;
    }
    row
}

fn line_clear_score(lines: u32) -> u32 {
    match lines {
        0 => 0,
        1 => 100,
        2 => 300,
        3 => 500,
        _ => 800,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

impl Shape {
    const ALL: [Shape; 7] = [
        Shape::I,
        Shape::O,
        Shape::T,
        Shape::S,
        Shape::Z,
        Shape::J,
        Shape::L,
    ];

    fn cell(self) -> CellCode {
        match self {
            Shape::I => 1,
            Shape::O => 2,
            Shape::T => 3,
            Shape::S => 4,
            Shape::Z => 5,
            Shape::J => 6,
            Shape::L => 7,
        }
    }

    /// Side of the rotation box.
    fn size(self) -> i32 {
        match self {
            Shape::I => 4,
            Shape::O => 2,
            _ => 3,
        }
    }

    /// Blocks as (row, col) in the rotation box, spawn orientation.
    fn blocks(self) -> [(i32, i32); 4] {
        match self {
            Shape::I => [(1, 0), (1, 1), (1, 2), (1, 3)],
            Shape::O => [(0, 0), (0, 1), (1, 0), (1, 1)],
            Shape::T => [(0, 1), (1, 0), (1, 1), (1, 2)],
            Shape::S => [(0, 1), (0, 2), (1, 0), (1, 1)],
            Shape::Z => [(0, 0), (0, 1), (1, 1), (1, 2)],
            Shape::J => [(0, 0), (1, 0), (1, 1), (1, 2)],
            Shape::L => [(0, 2), (1, 0), (1, 1), (1, 2)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    shape: Shape,
    rotation: u8,
    row: i32,
    col: i32,
}

impl Piece {
    fn cells(&self) -> [(i32, i32); 4] {
        let n = self.shape.size();
        self.shape.blocks().map(|(mut r, mut c)| {
            for _ in 0..self.rotation % 4 {
                (r, c) = (c, n - 1 - r);
            }
            (self.row + r, self.col + c)
        })
    }

    fn shifted(self, dr: i32, dc: i32) -> Self {
        Self {
            row: self.row + dr,
            col: self.col + dc,
            ..self
        }
    }

    fn rotated(self) -> Self {
        Self {
            rotation: (self.rotation + 1) % 4,
            ..self
        }
    }
}

pub struct TetrisEngine {
    columns: usize,
    rows: usize,
    board: Vec<Vec<CellCode>>,
    active: Option<Piece>,
    bag: Vec<Shape>,
    rng: StdRng,
    score: u32,
    game_over: bool,
    gravity_ticks: u32,
    tick_count: u32,
    events: Vec<EngineEvent>,
}

impl TetrisEngine {
    pub fn new(columns: usize, rows: usize, gravity_ticks: u32, seed: u64) -> Self {
        let columns = columns.max(MIN_DIMENSION);
        let rows = rows.max(MIN_DIMENSION);
        let mut engine = Self {
            columns,
            rows,
            board: vec![vec![EMPTY_CELL; columns]; rows],
            active: None,
            bag: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            score: 0,
            game_over: false,
            gravity_ticks: gravity_ticks.max(1),
            tick_count: 0,
            events: Vec::new(),
        };
        engine.spawn();
        engine
    }

    /// Field without the falling piece.
    pub fn locked_field(&self) -> Field {
        Field::from_rows(self.board.clone())
    }

    fn fits(&self, piece: &Piece) -> bool {
        piece.cells().iter().all(|&(r, c)| {
            r >= 0
                && c >= 0
                && (r as usize) < self.rows
                && (c as usize) < self.columns
                && self.board[r as usize][c as usize] == EMPTY_CELL
        })
    }

    fn next_shape(&mut self) -> Shape {
        if self.bag.is_empty() {
            self.bag = Shape::ALL.to_vec();
            self.bag.shuffle(&mut self.rng);
        }
        self.bag.pop().unwrap_or(Shape::T)
    }

    fn spawn(&mut self) {
        let shape = self.next_shape();
        let piece = Piece {
            shape,
            rotation: 0,
            row: 0,
            col: (self.columns as i32 - shape.size()) / 2,
        };
        if self.fits(&piece) {
            self.active = Some(piece);
        } else {
            self.active = None;
            self.top_out();
        }
        self.events.push(EngineEvent::FieldUpdated);
    }

    fn top_out(&mut self) {
        if !self.game_over {
            debug!("tetris: game over at score {}", self.score);
            self.game_over = true;
            self.events.push(EngineEvent::GameOver);
        }
    }

    /// Move the active piece if the result fits. Returns whether it moved.
    fn try_move(&mut self, candidate: Piece) -> bool {
        if self.fits(&candidate) {
            self.active = Some(candidate);
            self.events.push(EngineEvent::FieldUpdated);
            true
        } else {
            false
        }
    }

    fn step_down(&mut self) {
        let Some(piece) = self.active else { return };
        if !self.try_move(piece.shifted(1, 0)) {
            self.lock();
        }
    }

    fn lock(&mut self) {
        let Some(piece) = self.active.take() else {
            return;
        };
        for (r, c) in piece.cells() {
            self.board[r as usize][c as usize] = piece.shape.cell();
        }

        let before = self.board.len();
        self.board
            .retain(|row| row.iter().any(|&cell| cell == EMPTY_CELL));
        let cleared = (before - self.board.len()) as u32;
        for _ in 0..cleared {
            self.board.insert(0, vec![EMPTY_CELL; self.columns]);
        }
        if cleared > 0 {
            self.score += line_clear_score(cleared);
            self.events.push(EngineEvent::LinesCleared(cleared));
            self.events.push(EngineEvent::ScoreChanged(self.score));
        }
        self.spawn();
    }
}

impl GameEngine for TetrisEngine {
    fn kind(&self) -> GameKind {
        GameKind::Tetris
    }

    fn field(&self) -> Field {
        let mut rows = self.board.clone();
        if let Some(piece) = self.active {
            for (r, c) in piece.cells() {
                rows[r as usize][c as usize] = piece.shape.cell();
            }
        }
        Field::from_rows(rows)
    }

    fn score(&self) -> u32 {
        self.score
    }

    fn is_game_over(&self) -> bool {
        self.game_over
    }

    fn apply(&mut self, action: Action) {
        if self.game_over {
            return;
        }
        let Some(piece) = self.active else { return };
        match action {
            Action::MoveLeft => {
                self.try_move(piece.shifted(0, -1));
            }
            Action::MoveRight => {
                self.try_move(piece.shifted(0, 1));
            }
            Action::RotateCw => {
                let rotated = piece.rotated();
                for dc in KICKS {
                    if self.try_move(rotated.shifted(0, dc)) {
                        break;
                    }
                }
            }
            Action::SoftDrop => self.step_down(),
            Action::HardDrop => {
                let mut dropped = piece;
                while self.fits(&dropped.shifted(1, 0)) {
                    dropped = dropped.shifted(1, 0);
                }
                self.active = Some(dropped);
                self.lock();
            }
        }
    }

    fn tick(&mut self) {
        if self.game_over {
            return;
        }
        self.tick_count += 1;
        if self.tick_count >= self.gravity_ticks {
            self.tick_count = 0;
            self.step_down();
        }
    }

    fn receive_garbage_lines(&mut self, lines: u32) {
        if self.game_over || lines == 0 {
            return;
        }
        for _ in 0..lines {
            if self.board[0].iter().any(|&cell| cell != EMPTY_CELL) {
                self.top_out();
                break;
            }
            self.board.remove(0);
            let row = garbage_row(self.columns, &mut self.rng);
            self.board.push(row);

            if let Some(piece) = self.active
                && !self.fits(&piece)
            {
                let lifted = piece.shifted(-1, 0);
                if self.fits(&lifted) {
                    self.active = Some(lifted);
                } else {
                    self.active = None;
                    self.top_out();
                    break;
                }
            }
        }
        self.events.push(EngineEvent::FieldUpdated);
    }

    fn restart(&mut self) {
        self.board = vec![vec![EMPTY_CELL; self.columns]; self.rows];
        self.active = None;
        self.bag.clear();
        self.score = 0;
        self.game_over = false;
        self.tick_count = 0;
        self.events.push(EngineEvent::ScoreChanged(0));
        self.spawn();
    }

    fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_rows_except(engine: &mut TetrisEngine, count: usize, hole: usize) {
        let rows = engine.rows;
        for r in rows - count..rows {
            for c in 0..engine.columns {
                engine.board[r][c] = if c == hole { EMPTY_CELL } else { GARBAGE_CELL };
            }
        }
    }

    #[test]
    fn garbage_row_has_exactly_one_hole() {
        let mut rng = StdRng::seed_from_u64(7);
        for columns in 4..=12 {
            for _ in 0..50 {
                let row = garbage_row(columns, &mut rng);
                assert_eq!(row.len(), columns);
                assert_eq!(row.iter().filter(|&&c| c == EMPTY_CELL).count(), 1);
                assert_eq!(row.iter().filter(|&&c| c == GARBAGE_CELL).count(), columns - 1);
            }
        }
    }

    #[test]
    fn garbage_hole_covers_every_column() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen = [false; 10];
        for _ in 0..1000 {
            let row = garbage_row(10, &mut rng);
            let hole = row.iter().position(|&c| c == EMPTY_CELL).unwrap();
            seen[hole] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn rotation_is_clockwise_and_cyclic() {
        let piece = Piece {
            shape: Shape::I,
            rotation: 1,
            row: 0,
            col: 0,
        };
        let mut cols: Vec<i32> = piece.cells().iter().map(|&(_, c)| c).collect();
        cols.dedup();
        assert_eq!(cols, vec![2]);
        let mut full = piece;
        for _ in 0..3 {
            full = full.rotated();
        }
        assert_eq!(full.rotation, 0);
    }

    #[test]
    fn four_line_clear_scores_and_reports() {
        let mut engine = TetrisEngine::new(10, 20, 5, 1);
        engine.take_events();
        fill_rows_except(&mut engine, 4, 0);
        // Vertical I whose cells sit in column 0.
        engine.active = Some(Piece {
            shape: Shape::I,
            rotation: 1,
            row: 0,
            col: -2,
        });
        engine.apply(Action::HardDrop);

        let events = engine.take_events();
        assert!(events.contains(&EngineEvent::LinesCleared(4)));
        assert!(events.contains(&EngineEvent::ScoreChanged(800)));
        assert_eq!(engine.score(), 800);
        assert_eq!(engine.locked_field().occupied_cells(), 0);
    }

    #[test]
    fn garbage_pushes_board_up() {
        let mut engine = TetrisEngine::new(10, 20, 5, 3);
        engine.board[19][4] = 3;
        engine.receive_garbage_lines(4);
        let field = engine.locked_field();
        assert_eq!(field.garbage_rows_at_bottom(), 4);
        assert_eq!(field.get(15, 4), Some(3));
        assert_eq!(field.row_count(), 20);
        assert!(!engine.is_game_over());
    }

    #[test]
    fn garbage_overflow_ends_the_game() {
        let mut engine = TetrisEngine::new(10, 20, 5, 3);
        engine.active = None;
        engine.board[0][0] = 2;
        engine.take_events();
        engine.receive_garbage_lines(1);
        assert!(engine.is_game_over());
        assert!(engine.take_events().contains(&EngineEvent::GameOver));
    }

    #[test]
    fn gravity_moves_piece_every_n_ticks() {
        let mut engine = TetrisEngine::new(10, 20, 3, 5);
        let start = engine.active.unwrap().row;
        engine.tick();
        engine.tick();
        assert_eq!(engine.active.unwrap().row, start);
        engine.tick();
        assert_eq!(engine.active.unwrap().row, start + 1);
    }

    #[test]
    fn same_seed_same_game() {
        let mut a = TetrisEngine::new(10, 20, 5, 42);
        let mut b = TetrisEngine::new(10, 20, 5, 42);
        for _ in 0..30 {
            a.apply(Action::HardDrop);
            b.apply(Action::HardDrop);
        }
        assert_eq!(a.field(), b.field());
    }

    #[test]
    fn stacking_tops_out_and_restart_clears() {
        let mut engine = TetrisEngine::new(10, 20, 5, 9);
        for _ in 0..500 {
            if engine.is_game_over() {
                break;
            }
            engine.apply(Action::HardDrop);
        }
        assert!(engine.is_game_over());
        assert!(engine.take_events().contains(&EngineEvent::GameOver));

        engine.restart();
        assert!(!engine.is_game_over());
        assert_eq!(engine.score(), 0);
        assert_eq!(engine.locked_field().occupied_cells(), 0);
        assert!(engine.active.is_some());
    }

    #[test]
    fn walls_block_movement() {
        let mut engine = TetrisEngine::new(10, 20, 5, 2);
        for _ in 0..20 {
            engine.apply(Action::MoveLeft);
        }
        let min_col = engine
            .active
            .unwrap()
            .cells()
            .iter()
            .map(|&(_, c)| c)
            .min()
            .unwrap();
        assert_eq!(min_col, 0);
    }
}
