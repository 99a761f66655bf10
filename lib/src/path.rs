//! Slash-delimited store paths and the layout of every record the session
//! engine reads or writes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{GameKind, Role};

/// A path into the shared store tree, e.g. `rooms/alice_bob/status`.
///
/// Segments are non-empty and never contain `/`. The root path has no
/// segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-delimited path. Empty segments are dropped, so
    /// `"/a//b/"` and `"a/b"` are the same path.
    pub fn parse(s: &str) -> Self {
        Self {
            segments: s
                .split('/')
                .filter(|seg| !seg.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Append one or more segments (a `/` inside `segment` splits it).
    pub fn child(&self, segment: &str) -> Self {
        let mut next = self.clone();
        next.segments.extend(
            segment
                .split('/')
                .filter(|seg| !seg.is_empty())
                .map(str::to_string),
        );
        next
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<StorePath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// `self` equals `other` or lies above it in the tree.
    pub fn is_ancestor_of(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Paths on the same branch: one is an ancestor of the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl From<&str> for StorePath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for StorePath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<StorePath> for String {
    fn from(p: StorePath) -> Self {
        p.to_string()
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

pub mod paths {
    use super::*;

    pub fn room(session_id: &str) -> StorePath {
        StorePath::root().child("rooms").child(session_id)
    }

    pub fn room_status(session_id: &str) -> StorePath {
        room(session_id).child("status")
    }

    pub fn notifications(user_id: &str) -> StorePath {
        StorePath::root().child("notifications").child(user_id)
    }

    pub fn presence(user_id: &str) -> StorePath {
        StorePath::root().child("presence").child(user_id)
    }

    pub fn heart_rate(user_id: &str) -> StorePath {
        StorePath::root().child("heartRates").child(user_id)
    }

    /// Root of one game's state inside a session.
    pub fn game(session_id: &str, kind: GameKind) -> StorePath {
        StorePath::root()
            .child("games")
            .child(session_id)
            .child(kind.key())
    }

    pub fn player(session_id: &str, kind: GameKind, role: Role) -> StorePath {
        game(session_id, kind).child("players").child(role.key())
    }

    pub fn pending_attack_lines(session_id: &str, kind: GameKind, role: Role) -> StorePath {
        player(session_id, kind, role).child("pendingAttackLines")
    }

    pub fn game_status(session_id: &str, kind: GameKind) -> StorePath {
        game(session_id, kind).child("status")
    }

    pub fn wins(session_id: &str, kind: GameKind) -> StorePath {
        game(session_id, kind).child("wins")
    }

    pub fn reset(session_id: &str, kind: GameKind) -> StorePath {
        game(session_id, kind).child("reset")
    }

    /// Attack records sent by `from`.
    pub fn attacks(session_id: &str, kind: GameKind, from: Role) -> StorePath {
        game(session_id, kind).child("attacks").child(from.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_slashes() {
        assert_eq!(StorePath::parse("/a//b/"), StorePath::parse("a/b"));
        assert_eq!(StorePath::parse("a/b").to_string(), "a/b");
        assert!(StorePath::parse("").is_root());
    }

    #[test]
    fn ancestry() {
        let a = StorePath::parse("games/x");
        let b = StorePath::parse("games/x/tetris/players");
        assert!(a.is_ancestor_of(&b));
        assert!(!b.is_ancestor_of(&a));
        assert!(b.overlaps(&a));
        assert!(!StorePath::parse("games/y").overlaps(&b));
        assert!(StorePath::root().is_ancestor_of(&b));
        assert_eq!(b.parent().unwrap().last(), Some("tetris"));
    }

    #[test]
    fn layout() {
        assert_eq!(
            paths::pending_attack_lines("a_b", GameKind::Tetris, Role::Invited).to_string(),
            "games/a_b/tetris/players/invited/pendingAttackLines"
        );
        assert_eq!(
            paths::attacks("a_b", GameKind::Tetris, Role::Creator).to_string(),
            "games/a_b/tetris/attacks/creator"
        );
        assert_eq!(paths::room_status("a_b").to_string(), "rooms/a_b/status");
    }
}
