//! Newtype identifiers shared across the replay core.
//!
//! These mirror the identifiers produced by the out-of-scope recorder: the
//! core never invents or renumbers them, it only reads and compares.

use std::ops::{Add, Sub};

/// The fundamental time coordinate of a recording.
///
/// Monotonic and produced exclusively by the recorder (§3 invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Tick(pub i64);

impl Tick {
    /// The tick before the first recorded observation.
    pub const ZERO: Tick = Tick(0);
}

impl Add<i64> for Tick {
    type Output = Tick;
    fn add(self, rhs: i64) -> Tick {
        Tick(self.0 + rhs)
    }
}

impl Sub<i64> for Tick {
    type Output = Tick;
    fn sub(self, rhs: i64) -> Tick {
        Tick(self.0 - rhs)
    }
}

impl Sub<Tick> for Tick {
    type Output = i64;
    fn sub(self, rhs: Tick) -> i64 {
        self.0 - rhs.0
    }
}

/// Identifies a function within the recording's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct FunctionKey(pub usize);

/// Identifies a uniquely keyed invocation of a function (a.k.a. call key).
///
/// `NO_KEY` marks "no enclosing call" the way the recorder represents the
/// root frame, so callers never need an `Option<CallKey>` at the edges of
/// the call tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CallKey(pub i64);

impl CallKey {
    /// Sentinel for "no enclosing function instance".
    pub const NO_KEY: CallKey = CallKey(-1);

    /// Whether this key refers to an actual function instance.
    pub fn is_present(self) -> bool {
        self != Self::NO_KEY
    }
}

impl From<CallKey> for usize {
    fn from(value: CallKey) -> Self {
        value.0 as usize
    }
}

/// Identifies a source path in the recording's path table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PathId(pub usize);

/// Identifies a variable binding recorded by the tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct VariableId(pub usize);

/// Identifies an entry in the recording's type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub usize);

/// Identifies a row in the event stream. Dense and stable (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct EventId(pub usize);

/// Identifies a recorded step; also an index into the step stream since the
/// stream is dense and tick-ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StepIndex(pub usize);

impl Add<usize> for StepIndex {
    type Output = StepIndex;
    fn add(self, rhs: usize) -> StepIndex {
        StepIndex(self.0 + rhs)
    }
}

impl Sub<usize> for StepIndex {
    type Output = StepIndex;
    fn sub(self, rhs: usize) -> StepIndex {
        StepIndex(self.0 - rhs)
    }
}

/// A one-based iteration index within a loop. Contiguous from 1 (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct IterationIndex(pub usize);

/// Identifies a loop shape within a function, as determined by static
/// analysis of the source (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LoopId(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_arithmetic() {
        assert_eq!(Tick(10) + 5, Tick(15));
        assert_eq!(Tick(10) - 5, Tick(5));
        assert_eq!(Tick(10) - Tick(4), 6);
    }

    #[test]
    fn no_key_is_not_present() {
        assert!(!CallKey::NO_KEY.is_present());
        assert!(CallKey(0).is_present());
    }
}
