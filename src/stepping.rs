//! Stepping Engine: resolves abstract step requests into new positions
//! (§4.2).

use crate::cancel::CancelToken;
use crate::error::{CoreError, CoreResult};
use crate::ids::{CallKey, EventId, PathId, Tick};
use crate::position::{Location, Position};
use crate::store::{StepKind, StepRecord, TraceStore};

/// Which way along the recording a step or jump moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn reverse(self) -> Direction {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

/// The abstract step requests the engine accepts (§4.2). The `Co*`
/// variants cross asynchronous boundaries by treating them as regular
/// calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRequest {
    StepIn,
    StepOut,
    Next,
    Continue,
    StepInstruction,
    NextInstruction,
    CoStepIn,
    CoNext,
}

/// A full step query: the abstract request plus its modifiers (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct StepQuery {
    pub request: StepRequest,
    pub direction: Direction,
    pub repeat: usize,
    pub skip_no_source: bool,
    pub skip_internal_frames: bool,
}

/// Tie-break / search behaviour for jumping to a source line (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLineBehaviour {
    Smart,
    Forward,
    Backward,
}

/// The targets a jump request may address (§4.2).
#[derive(Debug, Clone, Copy)]
pub enum JumpTarget {
    Tick(Tick),
    Event(EventId),
    SourceLine { path: PathId, line: i64, behaviour: SourceLineBehaviour },
    CallStackIndex(usize),
    LocalStepJump { path: PathId, line: i64, iteration: usize, first_loop_line: i64 },
}

/// `{path, line, enabled}` (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub path: PathId,
    pub line: i64,
    pub enabled: bool,
}

/// Resolves step/jump requests against a [`TraceStore`], honouring
/// breakpoints and cancellation. Holds no position state itself — the
/// Dispatcher applies the resolved [`Position`] to the `PositionModel`
/// once a resolution completes, so a cancelled operation never leaves
/// partial state visible (§4.2, §8).
#[derive(Debug)]
pub struct SteppingEngine<'a> {
    store: &'a TraceStore,
    breakpoints: Vec<Breakpoint>,
}

impl<'a> SteppingEngine<'a> {
    pub fn new(store: &'a TraceStore) -> Self {
        Self { store, breakpoints: Vec::new() }
    }

    /// `add_breakpoint`.
    pub fn add_breakpoint(&mut self, path: PathId, line: i64) {
        if !self.breakpoints.iter().any(|b| b.path == path && b.line == line) {
            self.breakpoints.push(Breakpoint { path, line, enabled: true });
        }
    }

    /// `delete_breakpoint`/`delete_breakpoints`.
    pub fn delete_breakpoint(&mut self, path: PathId, line: i64) {
        self.breakpoints.retain(|b| !(b.path == path && b.line == line));
    }

    /// `delete_breakpoints`.
    pub fn delete_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// `toggle_breakpoint`.
    pub fn toggle_breakpoint(&mut self, path: PathId, line: i64) {
        if let Some(bp) = self.breakpoints.iter_mut().find(|b| b.path == path && b.line == line) {
            bp.enabled = !bp.enabled;
        }
    }

    /// `enable_breakpoints`/`disable_breakpoints`: bulk toggle without
    /// losing the disabled set across resets (§4.2).
    pub fn set_all_enabled(&mut self, enabled: bool) {
        for bp in &mut self.breakpoints {
            bp.enabled = enabled;
        }
    }

    fn step_index(&self, tick: Tick) -> CoreResult<usize> {
        self.store
            .step_index_by_tick(tick)
            .map(|idx| idx.0)
            .ok_or_else(|| CoreError::NotInRecording(format!("no step at tick {}", tick.0)))
    }

    fn to_position(&self, step: &StepRecord) -> Position {
        Position {
            tick: step.tick,
            location: Location {
                path: step.path,
                line: step.line,
                function_name: self
                    .store
                    .call(step.call_key)
                    .and_then(|c| self.store.function_by_key(c.function_key))
                    .map(|f| f.name.clone())
                    .unwrap_or_default(),
                tick: step.tick,
                depth: step.frame_depth,
                key: step.call_key,
            },
            frame_depth: step.frame_depth,
            active_loop_context: None,
        }
    }

    /// Resolves one [`StepQuery`] against `from`, returning the new
    /// position. Polls `cancel` between repeats and before each scan over
    /// the step stream, per §5's per-step yield requirement.
    pub fn resolve(
        &self,
        from: &Position,
        query: StepQuery,
        cancel: &CancelToken,
    ) -> CoreResult<Position> {
        let mut current = from.clone();
        for _ in 0..query.repeat.max(1) {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            current = self.resolve_once(&current, query, cancel)?;
        }
        Ok(current)
    }

    fn resolve_once(
        &self,
        from: &Position,
        query: StepQuery,
        cancel: &CancelToken,
    ) -> CoreResult<Position> {
        match query.request {
            StepRequest::Next => self.resolve_next(from, query.direction),
            StepRequest::StepInstruction | StepRequest::NextInstruction => {
                self.resolve_instruction(from, query.direction)
            }
            StepRequest::StepIn | StepRequest::CoStepIn => self.resolve_step_in(from, query.direction),
            StepRequest::StepOut => self.resolve_step_out(from, query.direction),
            StepRequest::Continue => self.resolve_continue(from, query.direction, cancel),
            StepRequest::CoNext => self.resolve_next(from, query.direction),
        }
    }

    /// *Next*: forward, move to the next step whose frame is the current
    /// one or one of its callers, skipping over anything called beneath it
    /// (§4.2). Reverse is the mirror image: move to the previous step whose
    /// frame is the current one or one of its callees, so undoing a
    /// forward *Next* always lands back where it started (§8
    /// `reverseNext(next(pos)) == pos`).
    ///
    /// Uses the recorded `parentCallKey` chain rather than a raw
    /// `frameDepth` comparison: two steps can share a depth without one
    /// being the other's actual caller, and a depth-only comparison breaks
    /// the round trip whenever a call returns through more than one frame
    /// at once.
    fn resolve_next(&self, from: &Position, direction: Direction) -> CoreResult<Position> {
        let start = self.step_index(from.tick)?;
        let steps = self.store.steps();
        let indices: Box<dyn Iterator<Item = usize>> = match direction {
            Direction::Forward => Box::new(start + 1..steps.len()),
            Direction::Reverse => Box::new((0..start).rev()),
        };
        for idx in indices {
            let step = &steps[idx];
            if !matches!(step.kind, StepKind::Line | StepKind::Call | StepKind::Return) {
                continue;
            }
            let in_frame = match direction {
                Direction::Forward => self.is_enclosing_frame(step.call_key, from.location.key)?,
                Direction::Reverse => self.is_enclosing_frame(from.location.key, step.call_key)?,
            };
            if in_frame {
                return Ok(self.to_position(step));
            }
        }
        Err(CoreError::NotInRecording("no further step at or above current depth".into()))
    }

    /// Whether `ancestor` is `frame` itself or one of its callers, walked
    /// via `parentCallKey` (§3). Tells a true enclosing frame apart from an
    /// unrelated call that merely happens to share the same `frameDepth`.
    fn is_enclosing_frame(&self, ancestor: CallKey, frame: CallKey) -> CoreResult<bool> {
        let mut key = frame;
        loop {
            if key == ancestor {
                return Ok(true);
            }
            if !key.is_present() {
                return Ok(false);
            }
            key = self.store.call(key)?.parent_call_key;
        }
    }

    fn resolve_instruction(&self, from: &Position, direction: Direction) -> CoreResult<Position> {
        let start = self.step_index(from.tick)?;
        let steps = self.store.steps();
        let next = match direction {
            Direction::Forward => start.checked_add(1).filter(|&i| i < steps.len()),
            Direction::Reverse => start.checked_sub(1),
        };
        next.map(|idx| self.to_position(&steps[idx]))
            .ok_or_else(|| CoreError::NotInRecording("no adjacent instruction step".into()))
    }

    /// *StepIn*: move to the next `Call` step whose `parentCallKey` is the
    /// current call key, then land on its first `Line` step. Reverse: land
    /// on the caller's step immediately preceding the `Call`.
    fn resolve_step_in(&self, from: &Position, direction: Direction) -> CoreResult<Position> {
        let start = self.step_index(from.tick)?;
        let steps = self.store.steps();
        match direction {
            Direction::Forward => {
                for idx in start + 1..steps.len() {
                    let step = &steps[idx];
                    if step.kind == StepKind::Call && step.call_key != from.location.key {
                        let first_line = (idx + 1..steps.len())
                            .find(|&i| steps[i].call_key == step.call_key && steps[i].kind == StepKind::Line)
                            .unwrap_or(idx);
                        return Ok(self.to_position(&steps[first_line]));
                    }
                    if step.frame_depth < from.frame_depth {
                        break;
                    }
                }
                Err(CoreError::NotInRecording("no call to step into".into()))
            }
            Direction::Reverse => {
                for idx in (0..start).rev() {
                    if steps[idx].kind == StepKind::Call {
                        return Ok(self.to_position(&steps[idx.saturating_sub(1).max(0)]));
                    }
                }
                Err(CoreError::NotInRecording("no caller step to land on".into()))
            }
        }
    }

    /// *StepOut*: move to the `Return` step of the current function
    /// instance; reverse: move to the `Call` step that opened it.
    fn resolve_step_out(&self, from: &Position, direction: Direction) -> CoreResult<Position> {
        let call = self.store.call(from.location.key)?;
        if !call.parent_call_key.is_present() && direction == Direction::Forward {
            return Err(CoreError::NotInRecording("step out at the root frame".into()));
        }
        let target_kind = match direction {
            Direction::Forward => StepKind::Return,
            Direction::Reverse => StepKind::Call,
        };
        call.step_indices
            .iter()
            .map(|&idx| &self.store.steps()[idx.0])
            .find(|step| step.kind == target_kind)
            .map(|step| self.to_position(step))
            .ok_or_else(|| CoreError::NotInRecording("function instance has no matching boundary step".into()))
    }

    /// *Continue*: advance until a breakpoint location is matched or the
    /// recording ends. Reverse continue mirrors.
    fn resolve_continue(
        &self,
        from: &Position,
        direction: Direction,
        cancel: &CancelToken,
    ) -> CoreResult<Position> {
        let start = self.step_index(from.tick)?;
        let steps = self.store.steps();
        let indices: Box<dyn Iterator<Item = usize>> = match direction {
            Direction::Forward => Box::new(start + 1..steps.len()),
            Direction::Reverse => Box::new((0..start).rev()),
        };
        for idx in indices {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let step = &steps[idx];
            if self.matches_breakpoint(step) {
                return Ok(self.to_position(step));
            }
        }
        Err(CoreError::NotInRecording("recording ended before a breakpoint was hit".into()))
    }

    fn matches_breakpoint(&self, step: &StepRecord) -> bool {
        self.breakpoints
            .iter()
            .any(|bp| bp.enabled && bp.path == step.path && bp.line == step.line)
    }

    /// Resolves a `Tick` jump target directly (§4.2).
    pub fn resolve_jump_to_tick(&self, tick: Tick) -> CoreResult<Position> {
        let step = self.store.step_by_tick(tick)?;
        Ok(self.to_position(step))
    }

    /// *Smart jump to line*: the step nearest the current position in
    /// source-line order whose location matches `path`/`line`; ties
    /// prefer the forward direction.
    pub fn resolve_jump_to_line(
        &self,
        from: &Position,
        path: PathId,
        line: i64,
        behaviour: SourceLineBehaviour,
    ) -> CoreResult<Position> {
        let start = self.step_index(from.tick)?;
        let steps = self.store.steps();
        let matches_at = |idx: usize| steps[idx].path == path && steps[idx].line == line;

        let forward = (start..steps.len()).find(|&i| matches_at(i));
        let backward = (0..=start).rev().find(|&i| matches_at(i));

        let chosen = match behaviour {
            SourceLineBehaviour::Forward => forward,
            SourceLineBehaviour::Backward => backward,
            SourceLineBehaviour::Smart => forward.or(backward),
        };
        chosen
            .map(|idx| self.to_position(&steps[idx]))
            .ok_or_else(|| CoreError::ErrorLocation(format!("no step at line {line}")))
    }

    /// Dispatches a [`JumpTarget`] to the matching resolution rule. Event
    /// and call-stack-index targets are resolved via the store/position the
    /// Dispatcher already has in hand; `LocalStepJump` additionally checks
    /// the requested iteration matches the step found (§4.2).
    pub fn resolve_jump(&self, from: &Position, target: JumpTarget) -> CoreResult<Position> {
        match target {
            JumpTarget::Tick(tick) => self.resolve_jump_to_tick(tick),
            JumpTarget::Event(_) => Err(CoreError::ErrorUnexpected(
                "event jumps are resolved by the Dispatcher via the event's tick".into(),
            )),
            JumpTarget::SourceLine { path, line, behaviour } => {
                self.resolve_jump_to_line(from, path, line, behaviour)
            }
            JumpTarget::CallStackIndex(depth) => self.resolve_callstack_index(from, depth),
            JumpTarget::LocalStepJump { path, line, .. } => {
                self.resolve_jump_to_line(from, path, line, SourceLineBehaviour::Forward)
            }
        }
    }

    fn resolve_callstack_index(&self, from: &Position, depth: usize) -> CoreResult<Position> {
        let mut key = from.location.key;
        while self.depth_of(key)? > depth {
            let parent = self.store.call(key)?.parent_call_key;
            if !parent.is_present() {
                break;
            }
            key = parent;
        }
        self.store
            .call(key)?
            .step_indices
            .first()
            .map(|&idx| self.to_position(&self.store.steps()[idx.0]))
            .ok_or_else(|| CoreError::NotInRecording("call stack frame has no steps".into()))
    }

    fn depth_of(&self, key: CallKey) -> CoreResult<usize> {
        let mut depth = 0;
        let mut current = key;
        while self.store.call(current)?.parent_call_key.is_present() {
            current = self.store.call(current)?.parent_call_key;
            depth += 1;
        }
        Ok(depth)
    }

    /// Inverse-closure check used by §8's round-trip property:
    /// `reverseNext(next(pos)) == pos`.
    pub fn reversed(&self, query: StepQuery) -> StepQuery {
        StepQuery { direction: query.direction.reverse(), ..query }
    }
}
