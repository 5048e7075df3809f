//! Exercises the Dispatcher end-to-end: wire framing over an in-memory
//! duplex pipe, a step request, a call-trace load, and an event table
//! query against a small synthetic recording.

use codetracer_replay_core::calltree::IgnorePatterns;
use codetracer_replay_core::config::CoreConfig;
use codetracer_replay_core::dispatch::Dispatcher;
use codetracer_replay_core::eventlog::{EventKind, EventRecord, SearchSpec, TableQuery};
use codetracer_replay_core::ids::{CallKey, EventId, FunctionKey, PathId, StepIndex, Tick};
use codetracer_replay_core::position::Location;
use codetracer_replay_core::position::Position;
use codetracer_replay_core::protocol::handle_request;
use codetracer_replay_core::stepping::{Direction, StepQuery, StepRequest};
use codetracer_replay_core::store::{CallRecord, FunctionRecord, StepKind, StepRecord, TraceStore};
use codetracer_replay_core::wire::{read_frame, write_frame, Envelope};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// A byte pipe backed by a shared queue: writes on one end become readable
/// on the other, modelling the local socket the binary serves over without
/// touching the filesystem or the network.
#[derive(Clone)]
struct DuplexEnd {
    outbound: Arc<Mutex<VecDeque<u8>>>,
    inbound: Arc<Mutex<VecDeque<u8>>>,
}

fn duplex_pair() -> (DuplexEnd, DuplexEnd) {
    let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
    let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
    (
        DuplexEnd { outbound: a_to_b.clone(), inbound: b_to_a.clone() },
        DuplexEnd { outbound: b_to_a, inbound: a_to_b },
    )
}

impl Read for DuplexEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.inbound.lock().unwrap();
        let n = buf.len().min(queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = queue.pop_front().unwrap();
        }
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no more bytes queued"));
        }
        Ok(n)
    }
}

impl Write for DuplexEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.lock().unwrap().extend(buf.iter().copied());
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn sample_store() -> TraceStore {
    let steps = vec![
        StepRecord {
            tick: Tick(0),
            path: PathId(0),
            line: 1,
            call_key: CallKey(0),
            frame_depth: 0,
            kind: StepKind::Line,
            before_values: vec![],
            after_values: vec![("x".into(), codetracer_replay_core::value::Value::Int { i: 1, type_id: codetracer_replay_core::ids::TypeId(0) })],
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
    let calls = vec![CallRecord {
        function_key: FunctionKey(0),
        parent_call_key: CallKey::NO_KEY,
        caller_tick: Tick(0),
        return_tick: None,
        args_snapshot: None,
        return_value_snapshot: None,
        step_indices: vec![StepIndex(0), StepIndex(1)],
        children: vec![],
    }];
    let functions = vec![FunctionRecord { path: PathId(0), name: "main".into(), line_first: 1, line_last: 2 }];
    let events = vec![EventRecord {
        id: EventId(0),
        tick: Tick(0),
        kind: EventKind::Write,
        content: "wrote config".into(),
        content_is_base64: false,
        associated_step: Some(StepIndex(0)),
        high_level_loc: None,
        metadata: vec![],
    }];
    TraceStore::from_parts(steps, calls, functions, events, vec![], vec![])
}

fn entry_position() -> Position {
    Position {
        tick: Tick(0),
        location: Location { path: PathId(0), line: 1, function_name: "main".into(), tick: Tick(0), depth: 0, key: CallKey(0) },
        frame_depth: 0,
        active_loop_context: None,
    }
}

#[test]
fn a_request_frame_round_trips_over_the_duplex_pipe_unchanged() {
    let (mut client, mut server) = duplex_pair();

    let request = Envelope {
        id: 1,
        kind: "step".into(),
        payload: serde_json::json!({"request": "next", "direction": "forward"}),
    };
    write_frame(&mut client, &request).unwrap();

    let received: Envelope = read_frame(&mut server).unwrap().unwrap();
    assert_eq!(received.id, request.id);
    assert_eq!(received.kind, request.kind);
    assert_eq!(received.payload, request.payload);
}

#[test]
fn dispatcher_step_advances_the_position_directly() {
    let mut dispatcher = Dispatcher::new(sample_store(), entry_position(), CoreConfig::default());
    let (_op_id, position) = dispatcher
        .step(StepQuery {
            request: StepRequest::Next,
            direction: Direction::Forward,
            repeat: 1,
            skip_no_source: false,
            skip_internal_frames: false,
        })
        .unwrap();
    assert_eq!(position.tick, Tick(1));
    assert_eq!(dispatcher.position().tick, Tick(1));
}

#[test]
fn a_step_request_read_off_the_wire_actually_drives_the_dispatcher() {
    let (mut client, mut server) = duplex_pair();

    let request = Envelope {
        id: 1,
        kind: "step".into(),
        payload: serde_json::json!({"request": "next", "direction": "forward"}),
    };
    write_frame(&mut client, &request).unwrap();
    let received: Envelope = read_frame(&mut server).unwrap().unwrap();

    let mut dispatcher = Dispatcher::new(sample_store(), entry_position(), CoreConfig::default());
    let response = handle_request(&mut dispatcher, &received).unwrap();

    assert_eq!(response["tick"], 1);
    assert_eq!(dispatcher.position().tick, Tick(1));
}

#[test]
fn call_trace_and_event_table_are_consistent_with_the_recording() {
    let dispatcher = Dispatcher::new(sample_store(), entry_position(), CoreConfig::default());

    let trace = dispatcher
        .load_call_trace(CallKey(0), 0, 5, 10, &IgnorePatterns::none(), true, false)
        .unwrap();
    assert!(trace.finished);
    assert_eq!(trace.total_calls_count, 1);

    let query = TableQuery {
        columns: vec![],
        order_column: None,
        order_ascending: true,
        draw: 7,
        start: 0,
        length: 10,
        search: SearchSpec::default(),
    };
    let table = dispatcher.update_event_table(&query, &[]).unwrap();
    assert_eq!(table.draw, 7);
    assert_eq!(table.records_total, 1);
    assert_eq!(table.data[0].content, "wrote config");
}

#[test]
fn disabling_trace_rejects_tracepoint_runs() {
    let mut config = CoreConfig::default();
    config.trace_enabled = false;
    let mut dispatcher = Dispatcher::new(sample_store(), entry_position(), config);
    let session = codetracer_replay_core::tracepoint::TracepointSession {
        session_id: 1,
        tracepoints: vec![],
        generation: 0,
    };
    let err = dispatcher.run_tracepoints(&session, 10, |_, _, _| {}).unwrap_err();
    assert!(matches!(err, codetracer_replay_core::error::CoreError::ErrorConfig(_)));
}
