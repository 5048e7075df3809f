//! Routes wire [`Envelope`] requests to the matching [`Dispatcher`] method
//! (§6). Keeps the request/response JSON shape out of `bin/core.rs`'s
//! socket-handling loop so the transport code doesn't need to know what any
//! particular request kind means.

use crate::calltree::IgnorePatterns;
use crate::dispatch::Dispatcher;
use crate::error::{CoreError, CoreResult};
use crate::eventlog::{SearchSpec, TableQuery};
use crate::ids::{CallKey, EventId, PathId, Tick};
use crate::stepping::{Direction, JumpTarget, SourceLineBehaviour, StepQuery, StepRequest};
use crate::tracepoint::{Tracepoint, TracepointSession};
use crate::wire::Envelope;
use serde::Deserialize;

/// Dispatches `request` by `kind`, returning the JSON payload to frame back
/// to the client on success.
pub fn handle_request(dispatcher: &mut Dispatcher, request: &Envelope) -> CoreResult<serde_json::Value> {
    match request.kind.as_str() {
        "status" => handle_status(dispatcher, request),
        "step" => handle_step(dispatcher, request),
        "jump" => handle_jump(dispatcher, request),
        "calltrace.load" => handle_calltrace_load(dispatcher, request),
        "events.update" => handle_events_update(dispatcher, request),
        "tracepoints.run" => handle_tracepoints_run(dispatcher, request),
        other => Err(CoreError::ErrorConfig(format!("unrecognised request kind '{other}'"))),
    }
}

fn handle_status(dispatcher: &mut Dispatcher, request: &Envelope) -> CoreResult<serde_json::Value> {
    let status = dispatcher.status(request.kind.clone());
    Ok(serde_json::json!({
        "stableBusy": status.stable_busy,
        "finished": status.finished,
        "operationCount": status.operation_count,
    }))
}

fn bad_payload(kind: &str, err: impl std::fmt::Display) -> CoreError {
    CoreError::ErrorConfig(format!("bad {kind} payload: {err}"))
}

fn one() -> usize {
    1
}

fn yes() -> bool {
    true
}

fn ten() -> usize {
    10
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepPayload {
    request: String,
    direction: String,
    #[serde(default = "one")]
    repeat: usize,
    #[serde(default)]
    skip_no_source: bool,
    #[serde(default)]
    skip_internal_frames: bool,
}

fn handle_step(dispatcher: &mut Dispatcher, request: &Envelope) -> CoreResult<serde_json::Value> {
    let payload: StepPayload =
        serde_json::from_value(request.payload.clone()).map_err(|err| bad_payload("step", err))?;
    let step_request = match payload.request.as_str() {
        "stepIn" => StepRequest::StepIn,
        "stepOut" => StepRequest::StepOut,
        "next" => StepRequest::Next,
        "continue" => StepRequest::Continue,
        "stepInstruction" => StepRequest::StepInstruction,
        "nextInstruction" => StepRequest::NextInstruction,
        "coStepIn" => StepRequest::CoStepIn,
        "coNext" => StepRequest::CoNext,
        other => return Err(CoreError::ErrorConfig(format!("unknown step request '{other}'"))),
    };
    let direction = match payload.direction.as_str() {
        "forward" => Direction::Forward,
        "reverse" => Direction::Reverse,
        other => return Err(CoreError::ErrorConfig(format!("unknown direction '{other}'"))),
    };
    let (_, position) = dispatcher.step(StepQuery {
        request: step_request,
        direction,
        repeat: payload.repeat.max(1),
        skip_no_source: payload.skip_no_source,
        skip_internal_frames: payload.skip_internal_frames,
    })?;
    serde_json::to_value(position).map_err(CoreError::from)
}

#[derive(Deserialize)]
#[serde(tag = "target", rename_all = "camelCase")]
enum JumpPayload {
    Tick { tick: i64 },
    Event { event_id: usize },
    SourceLine { path: usize, line: i64, #[serde(default)] behaviour: String },
    CallStackIndex { depth: usize },
}

fn handle_jump(dispatcher: &mut Dispatcher, request: &Envelope) -> CoreResult<serde_json::Value> {
    let payload: JumpPayload =
        serde_json::from_value(request.payload.clone()).map_err(|err| bad_payload("jump", err))?;
    let target = match payload {
        JumpPayload::Tick { tick } => JumpTarget::Tick(Tick(tick)),
        JumpPayload::Event { event_id } => JumpTarget::Event(EventId(event_id)),
        JumpPayload::SourceLine { path, line, behaviour } => JumpTarget::SourceLine {
            path: PathId(path),
            line,
            behaviour: match behaviour.as_str() {
                "forward" => SourceLineBehaviour::Forward,
                "backward" => SourceLineBehaviour::Backward,
                _ => SourceLineBehaviour::Smart,
            },
        },
        JumpPayload::CallStackIndex { depth } => JumpTarget::CallStackIndex(depth),
    };
    let (_, position) = dispatcher.jump(target)?;
    serde_json::to_value(position).map_err(CoreError::from)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalltraceLoadPayload {
    root: i64,
    start_call_line_index: usize,
    depth: usize,
    height: usize,
    #[serde(default)]
    path_ignore: String,
    #[serde(default)]
    name_ignore: String,
    #[serde(default = "yes")]
    auto_collapsing: bool,
    #[serde(default)]
    optimize_collapse: bool,
}

fn handle_calltrace_load(dispatcher: &mut Dispatcher, request: &Envelope) -> CoreResult<serde_json::Value> {
    let payload: CalltraceLoadPayload =
        serde_json::from_value(request.payload.clone()).map_err(|err| bad_payload("calltrace.load", err))?;
    let ignore = IgnorePatterns::parse(&payload.path_ignore, &payload.name_ignore)?;
    let result = dispatcher.load_call_trace(
        CallKey(payload.root),
        payload.start_call_line_index,
        payload.depth,
        payload.height,
        &ignore,
        payload.auto_collapsing,
        payload.optimize_collapse,
    )?;
    serde_json::to_value(result).map_err(CoreError::from)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsUpdatePayload {
    #[serde(default)]
    draw: u64,
    #[serde(default)]
    start: usize,
    #[serde(default = "ten")]
    length: usize,
    #[serde(default)]
    search: String,
    #[serde(default)]
    search_regex: bool,
}

fn handle_events_update(dispatcher: &mut Dispatcher, request: &Envelope) -> CoreResult<serde_json::Value> {
    let payload: EventsUpdatePayload =
        serde_json::from_value(request.payload.clone()).map_err(|err| bad_payload("events.update", err))?;
    let query = TableQuery {
        columns: vec![],
        order_column: None,
        order_ascending: true,
        draw: payload.draw,
        start: payload.start,
        length: payload.length,
        search: SearchSpec { value: payload.search, regex: payload.search_regex },
    };
    let table = dispatcher.update_event_table(&query, &[])?;
    Ok(serde_json::json!({
        "draw": table.draw,
        "recordsTotal": table.records_total,
        "recordsFiltered": table.records_filtered,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TracepointsRunPayload {
    session_id: usize,
    #[serde(default)]
    generation: usize,
    tracepoints: Vec<WireTracepoint>,
    #[serde(default = "ten")]
    stop_after: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTracepoint {
    id: usize,
    path: usize,
    line: i64,
    expression: String,
    #[serde(default = "yes")]
    enabled: bool,
}

fn handle_tracepoints_run(dispatcher: &mut Dispatcher, request: &Envelope) -> CoreResult<serde_json::Value> {
    let payload: TracepointsRunPayload =
        serde_json::from_value(request.payload.clone()).map_err(|err| bad_payload("tracepoints.run", err))?;
    let session = TracepointSession {
        session_id: payload.session_id,
        tracepoints: payload
            .tracepoints
            .into_iter()
            .map(|t| Tracepoint { id: t.id, path: PathId(t.path), line: t.line, expression: t.expression, enabled: t.enabled })
            .collect(),
        generation: payload.generation,
    };
    let mut matches = 0usize;
    let mut errors = Vec::new();
    dispatcher.run_tracepoints(&session, payload.stop_after.max(1), |_op_id, update, _results| {
        matches += update.count;
        errors.extend(update.tracepoint_errors.clone());
    })?;
    Ok(serde_json::json!({ "matches": matches, "errors": errors }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::eventlog::EventRecord;
    use crate::ids::{FunctionKey, StepIndex};
    use crate::position::{Location, Position};
    use crate::store::{CallRecord, FunctionRecord, StepKind, StepRecord, TraceStore};

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

    fn envelope(kind: &str, payload: serde_json::Value) -> Envelope {
        Envelope { id: 1, kind: kind.to_string(), payload }
    }

    #[test]
    fn step_request_advances_the_dispatcher_and_returns_the_new_position() {
        let mut dispatcher = Dispatcher::new(store(), initial_position(), CoreConfig::default());
        let request = envelope("step", serde_json::json!({"request": "next", "direction": "forward"}));
        let result = handle_request(&mut dispatcher, &request).unwrap();
        assert_eq!(result["tick"], 1);
        assert_eq!(dispatcher.position().tick, Tick(1));
    }

    #[test]
    fn unknown_request_kind_is_error_config() {
        let mut dispatcher = Dispatcher::new(store(), initial_position(), CoreConfig::default());
        let request = envelope("not.a.real.kind", serde_json::json!({}));
        let err = handle_request(&mut dispatcher, &request).unwrap_err();
        assert!(matches!(err, CoreError::ErrorConfig(_)));
    }

    #[test]
    fn malformed_step_payload_is_error_config_not_a_panic() {
        let mut dispatcher = Dispatcher::new(store(), initial_position(), CoreConfig::default());
        let request = envelope("step", serde_json::json!({"direction": "forward"}));
        let err = handle_request(&mut dispatcher, &request).unwrap_err();
        assert!(matches!(err, CoreError::ErrorConfig(_)));
    }

    #[test]
    fn calltrace_load_routes_through_to_the_real_call_tree() {
        let mut dispatcher = Dispatcher::new(store(), initial_position(), CoreConfig::default());
        let request = envelope(
            "calltrace.load",
            serde_json::json!({"root": 0, "startCallLineIndex": 0, "depth": 5, "height": 10}),
        );
        let result = handle_request(&mut dispatcher, &request).unwrap();
        assert_eq!(result["finished"], true);
    }
}
