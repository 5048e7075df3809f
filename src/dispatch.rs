//! Dispatcher: single-threaded cooperative command loop (§4.8).
//!
//! All requests are serialised through a FIFO; at most one mutating
//! request is in-flight at a time. A new mutating request supersedes the
//! in-flight one, cancelling it at its next yield point (§5). This mirrors
//! the way a composing inspector fans a single call out to several
//! sub-components without introducing threads or locks of its own — here
//! the "sub-components" are the Stepping Engine, Flow Reconstructor,
//! Call-Tree Engine, and Tracepoint Runtime, and the fan-out is a
//! sequential match rather than a broadcast.

use crate::cancel::CancelToken;
use crate::calltree::{CallArgsUpdateResults, CallTreeEngine, IgnorePatterns, Mode};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::eventlog::{update_table, EventKind, TableData, TableQuery};
use crate::ids::CallKey;
use crate::position::{Position, PositionModel};
use crate::stepping::{JumpTarget, SteppingEngine, StepQuery};
use crate::store::TraceStore;
use crate::tracepoint::{run_tracepoints, TraceUpdate, TracepointResults, TracepointSession};

/// Stamped on every mutating request and echoed on every update derived
/// from it, so a UI can discard stale results after supersession (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub u64);

/// Monotonically increasing within one `OpId` (§5 ordering rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateId(pub u64);

/// `StatusUpdate{direction, currentOperation, stableBusy, historyBusy,
/// traceBusy, finished, lastAction, operationCount}` (§4.8).
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub current_operation: String,
    pub stable_busy: bool,
    pub history_busy: bool,
    pub trace_busy: bool,
    pub finished: bool,
    pub last_action: String,
    pub operation_count: u64,
}

/// Owns the session's only [`TraceStore`] and [`PositionModel`] (§3, §9:
/// "the core holds exactly one Trace Store and one Position per
/// session"), and is the sole mutator of the Position.
pub struct Dispatcher {
    store: TraceStore,
    position: PositionModel,
    config: CoreConfig,
    next_op_id: u64,
    in_flight: Option<(OpId, CancelToken)>,
    operation_count: u64,
    breakpoints_path_lines: Vec<(crate::ids::PathId, i64)>,
}

impl Dispatcher {
    pub fn new(store: TraceStore, initial: Position, config: CoreConfig) -> Self {
        Self {
            store,
            position: PositionModel::new(initial),
            config,
            next_op_id: 0,
            in_flight: None,
            operation_count: 0,
            breakpoints_path_lines: Vec::new(),
        }
    }

    /// Read-only access to the current position, for read-style queries
    /// that must be consistent with a snapshot (§4.8).
    pub fn position(&self) -> &Position {
        self.position.current()
    }

    /// Read-only access to the trace store, for components constructed
    /// per-request.
    pub fn store(&self) -> &TraceStore {
        &self.store
    }

    /// Read-only access to the active configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Applies a configuration patch; unknown keys fail the whole patch
    /// (§6, §4a).
    pub fn update_config(&mut self, patch: &crate::config::ConfigPatch) -> CoreResult<()> {
        self.config.merge_overrides(patch)
    }

    /// Begins a new mutating operation: supersedes any in-flight one by
    /// cancelling it, stamps a fresh `OpId`, and returns a token the new
    /// operation must poll (§4.8 supersession).
    fn begin_mutation(&mut self) -> (OpId, CancelToken) {
        if let Some((_, token)) = self.in_flight.take() {
            token.cancel();
        }
        let op_id = OpId(self.next_op_id);
        self.next_op_id += 1;
        let token = CancelToken::new();
        self.in_flight = Some((op_id, token.clone()));
        self.operation_count += 1;
        tracing::info!(op_id = op_id.0, "begin mutating operation");
        (op_id, token)
    }

    fn end_mutation(&mut self, op_id: OpId) {
        if matches!(&self.in_flight, Some((id, _)) if *id == op_id) {
            self.in_flight = None;
        }
    }

    /// Resolves a step request and, on success, applies the new position.
    /// On `Cancelled`, the Position is left exactly as it was observed
    /// before the operation began (§4.2, §8).
    pub fn step(&mut self, query: StepQuery) -> CoreResult<(OpId, Position)> {
        let (op_id, token) = self.begin_mutation();
        let engine = SteppingEngine::new(&self.store);
        let result = engine.resolve(self.position.current(), query, &token);
        self.end_mutation(op_id);
        match result {
            Ok(position) => {
                self.position.set(position.clone());
                Ok((op_id, position))
            }
            Err(err) => Err(err),
        }
    }

    /// Resolves a jump request the same way `step` resolves a step
    /// request. `Event` targets are resolved here rather than inside
    /// `SteppingEngine`: an event synthesised with no backing step carries
    /// `associated_step: None`, which is surfaced as `NotInRecording`
    /// rather than guessed at (§9 open question).
    pub fn jump(&mut self, target: JumpTarget) -> CoreResult<(OpId, Position)> {
        let (op_id, _token) = self.begin_mutation();
        let engine = SteppingEngine::new(&self.store);
        let result = match target {
            JumpTarget::Event(id) => self.store.event(id).and_then(|event| match event.associated_step {
                Some(_) => engine.resolve_jump_to_tick(event.tick),
                None => Err(CoreError::NotInRecording(format!(
                    "event {} has no associated step to jump to",
                    id.0
                ))),
            }),
            other => engine.resolve_jump(self.position.current(), other),
        };
        self.end_mutation(op_id);
        match result {
            Ok(position) => {
                self.position.set(position.clone());
                Ok((op_id, position))
            }
            Err(err) => Err(err),
        }
    }

    /// `loadCallTrace` (§4.4); a read-style query, gated by
    /// `calltrace.enabled`/`calltrace.callArgs` (§6).
    #[allow(clippy::too_many_arguments)]
    pub fn load_call_trace(
        &self,
        root: CallKey,
        start_call_line_index: usize,
        depth: usize,
        height: usize,
        ignore: &IgnorePatterns,
        auto_collapsing: bool,
        optimize_collapse: bool,
    ) -> CoreResult<CallArgsUpdateResults> {
        if !self.config.calltrace_enabled {
            return Ok(CallArgsUpdateResults { finished: true, call_lines: vec![], total_calls_count: 0 });
        }
        let mode = if self.config.calltrace_call_args { Mode::FullRecord } else { Mode::CallKeyOnly };
        let engine = CallTreeEngine::new(&self.store, mode);
        engine.load_call_trace(root, start_call_line_index, depth, height, ignore, auto_collapsing, optimize_collapse)
    }

    /// `loadFlow` (§4.3); gated by `flow.enabled`. Loop shapes come from the
    /// caller's static analysis of the source — the core only replays
    /// recorded steps against them, it never parses source itself.
    pub fn load_flow(
        &self,
        call_key: CallKey,
        loop_shapes: &[crate::flow::LoopShape],
    ) -> crate::flow::FlowViewUpdate {
        if !self.config.flow_enabled {
            return crate::flow::FlowViewUpdate {
                error: true,
                error_message: Some("flow.enabled is false".into()),
                ..Default::default()
            };
        }
        crate::flow::reconstruct(&self.store, call_key, loop_shapes)
    }

    /// `updateTable` (§4.6); gated by `events.enabled`.
    pub fn update_event_table(
        &self,
        query: &TableQuery,
        selected_kinds: &[EventKind],
    ) -> CoreResult<TableData> {
        if !self.config.events_enabled {
            return Ok(TableData { draw: query.draw, records_total: 0, records_filtered: 0, data: vec![] });
        }
        update_table(self.store.events(), query, selected_kinds)
    }

    /// `runTracepoints`; gated by `trace.enabled`. Streams through
    /// `on_batch` exactly as the Tracepoint Runtime produces updates,
    /// tagging each with the mutation's `OpId`.
    pub fn run_tracepoints(
        &mut self,
        session: &TracepointSession,
        stop_after: usize,
        mut on_batch: impl FnMut(OpId, TraceUpdate, Vec<TracepointResults>),
    ) -> CoreResult<()> {
        if !self.config.trace_enabled {
            return Err(CoreError::ErrorConfig("trace.enabled is false".into()));
        }
        let (op_id, token) = self.begin_mutation();
        run_tracepoints(&self.store, session, stop_after, &token, |update, results| {
            on_batch(op_id, update, results)
        });
        self.end_mutation(op_id);
        Ok(())
    }

    /// Current status snapshot (§4.8).
    pub fn status(&self, last_action: impl Into<String>) -> StatusUpdate {
        StatusUpdate {
            current_operation: self
                .in_flight
                .as_ref()
                .map(|(id, _)| format!("op-{}", id.0))
                .unwrap_or_default(),
            stable_busy: self.in_flight.is_some(),
            history_busy: false,
            trace_busy: false,
            finished: self.in_flight.is_none(),
            last_action: last_action.into(),
            operation_count: self.operation_count,
        }
    }

    /// `add_breakpoint` (§4.2), delegated via a fresh `SteppingEngine`
    /// because breakpoints are re-derived per call from the store; callers
    /// needing persistent breakpoint state across calls should hold their
    /// own `SteppingEngine`. Kept here for symmetry with the Dispatcher's
    /// other mutating entry points.
    pub fn add_breakpoint(&mut self, path: crate::ids::PathId, line: i64) {
        if !self.breakpoints_path_lines.contains(&(path, line)) {
            self.breakpoints_path_lines.push((path, line));
        }
    }

    /// Builds a [`SteppingEngine`] seeded with the breakpoints recorded via
    /// [`Dispatcher::add_breakpoint`].
    pub fn stepping_engine(&self) -> SteppingEngine<'_> {
        let mut engine = SteppingEngine::new(&self.store);
        for &(path, line) in &self.breakpoints_path_lines {
            engine.add_breakpoint(path, line);
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::EventRecord;
    use crate::ids::{FunctionKey, PathId, StepIndex, Tick};
    use crate::position::Location;
    use crate::store::{CallRecord, FunctionRecord, StepKind, StepRecord};

    fn store() -> TraceStore {
        let steps = vec![
            StepRecord {
                tick: Tick(0),
                path: PathId(0),
                line: 1,
                call_key: CallKey(0),
                frame_depth: 0,
                kind: StepKind::Line,
                before_values: vec![],
                after_values: vec![],
                branch_decisions: vec![],
            },
            StepRecord {
                tick: Tick(1),
                path: PathId(0),
                line: 2,
                call_key: CallKey(0),
                frame_depth: 0,
                kind: StepKind::Line,
                before_values: vec![],
                after_values: vec![],
                branch_decisions: vec![],
            },
        ];
        TraceStore::from_parts(
            steps,
            vec![CallRecord {
                function_key: FunctionKey(0),
                parent_call_key: CallKey::NO_KEY,
                caller_tick: Tick(0),
                return_tick: None,
                args_snapshot: None,
                return_value_snapshot: None,
                step_indices: vec![StepIndex(0), StepIndex(1)],
                children: vec![],
            }],
            vec![FunctionRecord { path: PathId(0), name: "main".into(), line_first: 1, line_last: 2 }],
            Vec::<EventRecord>::new(),
            vec![],
            vec![],
        )
    }

    fn initial_position() -> Position {
        Position {
            tick: Tick(0),
            location: Location { path: PathId(0), line: 1, function_name: "main".into(), tick: Tick(0), depth: 0, key: CallKey(0) },
            frame_depth: 0,
            active_loop_context: None,
        }
    }

    #[test]
    fn successful_step_advances_position_and_op_id() {
        let mut dispatcher = Dispatcher::new(store(), initial_position(), CoreConfig::default());
        let (op_id, position) = dispatcher
            .step(StepQuery {
                request: crate::stepping::StepRequest::Next,
                direction: crate::stepping::Direction::Forward,
                repeat: 1,
                skip_no_source: false,
                skip_internal_frames: false,
            })
            .unwrap();
        assert_eq!(op_id, OpId(0));
        assert_eq!(position.tick, Tick(1));
        assert_eq!(dispatcher.position().tick, Tick(1));
    }

    #[test]
    fn new_mutation_supersedes_the_previous_op_id() {
        let mut dispatcher = Dispatcher::new(store(), initial_position(), CoreConfig::default());
        let (first, _) = dispatcher.begin_mutation();
        let (second, _) = dispatcher.begin_mutation();
        assert_ne!(first, second);
        assert!(dispatcher.in_flight.as_ref().map(|(id, _)| *id) == Some(second));
    }

    #[test]
    fn disabled_calltrace_returns_empty_finished_result() {
        let mut config = CoreConfig::default();
        config.calltrace_enabled = false;
        let dispatcher = Dispatcher::new(store(), initial_position(), config);
        let result = dispatcher
            .load_call_trace(CallKey(0), 0, 5, 10, &IgnorePatterns::none(), true, false)
            .unwrap();
        assert!(result.finished);
        assert_eq!(result.total_calls_count, 0);
    }

    #[test]
    fn disabled_flow_returns_an_error_update() {
        let mut config = CoreConfig::default();
        config.flow_enabled = false;
        let dispatcher = Dispatcher::new(store(), initial_position(), config);
        let update = dispatcher.load_flow(CallKey(0), &[]);
        assert!(update.error);
    }

    #[test]
    fn enabled_flow_reconstructs_the_call_instance() {
        let dispatcher = Dispatcher::new(store(), initial_position(), CoreConfig::default());
        let update = dispatcher.load_flow(CallKey(0), &[]);
        assert!(!update.error);
        assert_eq!(update.steps.len(), 2);
    }
}
