//! Position Model: the canonical "where we are in the recording" (§4.2).
//!
//! Exactly one [`Position`] exists per session. It is owned exclusively by
//! the `PositionModel`; every other component holds only a read-only
//! reference to it, and only the Dispatcher is allowed to mutate it (§3).

use crate::ids::{CallKey, IterationIndex, LoopId, PathId, Tick};
use serde::{Deserialize, Serialize};

/// Source location surfaced to the UI. Opaque beyond these fields (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: PathId,
    pub line: i64,
    pub function_name: String,
    pub tick: Tick,
    pub depth: usize,
    pub key: CallKey,
}

/// Identifies a loop iteration the current position sits inside, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopContext {
    pub loop_id: LoopId,
    pub iteration: IterationIndex,
}

/// `{tick, location, frameDepth, activeLoopContext?}` (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub tick: Tick,
    pub location: Location,
    pub frame_depth: usize,
    pub active_loop_context: Option<LoopContext>,
}

/// Owns the single current [`Position`] for a session.
///
/// Only [`PositionModel::set`] (crate-private) may change it; the
/// Dispatcher is the only caller that holds `&mut PositionModel`, matching
/// §3's ownership rule.
#[derive(Debug, Clone)]
pub struct PositionModel {
    current: Position,
}

impl PositionModel {
    /// Creates a model seeded at the recording's entry position.
    pub fn new(initial: Position) -> Self {
        Self { current: initial }
    }

    /// Read-only access to the current position; safe to hand to every
    /// read-style query.
    pub fn current(&self) -> &Position {
        &self.current
    }

    /// Replaces the current position. `pub(crate)` so only the Dispatcher
    /// (and, within the crate, the Stepping Engine it drives) can mutate it.
    pub(crate) fn set(&mut self, position: Position) {
        self.current = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tick: i64) -> Position {
        Position {
            tick: Tick(tick),
            location: Location {
                path: PathId(0),
                line: 1,
                function_name: "main".into(),
                tick: Tick(tick),
                depth: 0,
                key: CallKey(0),
            },
            frame_depth: 0,
            active_loop_context: None,
        }
    }

    #[test]
    fn only_crate_internal_code_can_mutate() {
        let mut model = PositionModel::new(sample(0));
        assert_eq!(model.current().tick, Tick(0));
        model.set(sample(5));
        assert_eq!(model.current().tick, Tick(5));
    }
}
