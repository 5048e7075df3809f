//! Tracepoint Runtime: applies user-defined synthetic log expressions
//! across the recording and streams results (§4.7).

use crate::cancel::CancelToken;
use crate::ids::{PathId, Tick};
use crate::store::TraceStore;
use crate::value::Value;

/// `{id, location, expression, enabled}` (§3).
#[derive(Debug, Clone)]
pub struct Tracepoint {
    pub id: usize,
    pub path: PathId,
    pub line: i64,
    pub expression: String,
    pub enabled: bool,
}

/// One match of a tracepoint against a recorded step (§4.7).
#[derive(Debug, Clone)]
pub struct Stop {
    pub tick: Tick,
    pub path: PathId,
    pub line: i64,
    pub iteration: usize,
    pub result_index: usize,
    pub locals: Vec<(String, Value)>,
    pub description: String,
    pub function_name: String,
}

/// `{sessionId, tracepoints[...], results[id -> list of Stop], totalCount,
/// generation}` (§3). Generations invalidate cached results after any
/// mutation.
#[derive(Debug, Clone)]
pub struct TracepointSession {
    pub session_id: usize,
    pub tracepoints: Vec<Tracepoint>,
    pub generation: usize,
}

impl TracepointSession {
    /// Bumps the generation, invalidating any cached results the UI holds.
    pub fn mutate(&mut self, f: impl FnOnce(&mut Vec<Tracepoint>)) {
        f(&mut self.tracepoints);
        self.generation += 1;
    }
}

/// Streamed after each `stopAfter` batch of stops (§4.7).
#[derive(Debug, Clone)]
pub struct TraceUpdate {
    pub update_id: usize,
    pub first_update: bool,
    pub session_id: usize,
    pub tracepoint_errors: Vec<(usize, String)>,
    pub count: usize,
    pub total_count: usize,
}

/// One tracepoint's accumulated results within a batch (§4.7).
#[derive(Debug, Clone)]
pub struct TracepointResults {
    pub session_id: usize,
    pub tracepoint_id: usize,
    pub tracepoint_values: Vec<Stop>,
    pub last_in_session: bool,
}

/// Runs every enabled tracepoint in `session` over `store`, invoking
/// `on_batch` once per `stop_after` stops (back-pressure, §4.7) and
/// checking `cancel` at each step boundary (§5). Returns once the
/// recording is exhausted or the session is cancelled.
pub fn run_tracepoints(
    store: &TraceStore,
    session: &TracepointSession,
    stop_after: usize,
    cancel: &CancelToken,
    mut on_batch: impl FnMut(TraceUpdate, Vec<TracepointResults>),
) {
    let enabled: Vec<&Tracepoint> = session.tracepoints.iter().filter(|t| t.enabled).collect();

    if enabled.is_empty() {
        // Boundary behaviour (§8): exactly one update, then terminate.
        on_batch(
            TraceUpdate {
                update_id: 0,
                first_update: true,
                session_id: session.session_id,
                tracepoint_errors: vec![],
                count: 0,
                total_count: 0,
            },
            vec![],
        );
        return;
    }

    let mut update_id = 0;
    let mut first_update = true;
    let mut total_count = 0;
    let mut pending: Vec<TracepointResults> = enabled
        .iter()
        .map(|tp| TracepointResults {
            session_id: session.session_id,
            tracepoint_id: tp.id,
            tracepoint_values: vec![],
            last_in_session: false,
        })
        .collect();
    let mut errors = Vec::new();
    let mut count_since_flush = 0;

    'steps: for (step_index, step) in store.steps().iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        for (tp_idx, tp) in enabled.iter().enumerate() {
            if step.path != tp.path || step.line != tp.line {
                continue;
            }
            let resolved = crate::value::parse_expression(&tp.expression).and_then(|expr| {
                let bindings: Vec<(String, Value)> =
                    step.after_values.iter().chain(step.before_values.iter()).cloned().collect();
                crate::value::evaluate(&expr, &bindings)
            });
            match resolved {
                Ok(value) => {
                    let stop = Stop {
                        tick: step.tick,
                        path: step.path,
                        line: step.line,
                        iteration: 0,
                        result_index: total_count,
                        description: format!("{} = {value:?}", tp.expression),
                        locals: vec![(tp.expression.clone(), value)],
                        function_name: store
                            .call(step.call_key)
                            .and_then(|c| store.function_by_key(c.function_key))
                            .map(|f| f.name.clone())
                            .unwrap_or_default(),
                    };
                    pending[tp_idx].tracepoint_values.push(stop);
                    total_count += 1;
                    count_since_flush += 1;
                }
                Err(err) => {
                    // A rejected or unresolved expression appends to
                    // `tracepointErrors` but does not abort the session (§4.7).
                    if !errors.iter().any(|(id, _): &(usize, String)| *id == tp.id) {
                        errors.push((tp.id, err.to_string()));
                    }
                }
            }

            if count_since_flush >= stop_after {
                flush(
                    &mut update_id,
                    &mut first_update,
                    session.session_id,
                    &mut errors,
                    total_count,
                    &mut pending,
                    false,
                    &mut on_batch,
                );
                count_since_flush = 0;
            }
        }
        let _ = step_index;
        if cancel.is_cancelled() {
            break 'steps;
        }
    }

    flush(
        &mut update_id,
        &mut first_update,
        session.session_id,
        &mut errors,
        total_count,
        &mut pending,
        true,
        &mut on_batch,
    );
}

#[allow(clippy::too_many_arguments)]
fn flush(
    update_id: &mut usize,
    first_update: &mut bool,
    session_id: usize,
    errors: &mut Vec<(usize, String)>,
    total_count: usize,
    pending: &mut [TracepointResults],
    last: bool,
    on_batch: &mut impl FnMut(TraceUpdate, Vec<TracepointResults>),
) {
    let batch: Vec<TracepointResults> = pending
        .iter_mut()
        .map(|r| TracepointResults {
            session_id: r.session_id,
            tracepoint_id: r.tracepoint_id,
            tracepoint_values: std::mem::take(&mut r.tracepoint_values),
            last_in_session: last,
        })
        .collect();
    let count = batch.iter().map(|r| r.tracepoint_values.len()).sum();
    on_batch(
        TraceUpdate {
            update_id: *update_id,
            first_update: *first_update,
            session_id,
            tracepoint_errors: std::mem::take(errors),
            count,
            total_count,
        },
        batch,
    );
    *update_id += 1;
    *first_update = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::EventRecord;
    use crate::ids::{CallKey, FunctionKey, StepIndex, TypeId};
    use crate::store::{CallRecord, FunctionRecord, StepKind, StepRecord};

    fn store() -> TraceStore {
        let steps = vec![
            StepRecord {
                tick: Tick(0),
                path: PathId(0),
                line: 5,
                call_key: CallKey(0),
                frame_depth: 0,
                kind: StepKind::Line,
                before_values: vec![],
                after_values: vec![("x".into(), Value::Int { i: 1, type_id: TypeId(0) })],
                branch_decisions: vec![],
            },
            StepRecord {
                tick: Tick(1),
                path: PathId(0),
                line: 5,
                call_key: CallKey(0),
                frame_depth: 0,
                kind: StepKind::Line,
                before_values: vec![],
                after_values: vec![("x".into(), Value::Int { i: 2, type_id: TypeId(0) })],
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
            vec![FunctionRecord { path: PathId(0), name: "main".into(), line_first: 1, line_last: 10 }],
            Vec::<EventRecord>::new(),
            vec![],
            vec![],
        )
    }

    #[test]
    fn zero_enabled_tracepoints_emits_one_empty_update() {
        let store = store();
        let session = TracepointSession { session_id: 1, tracepoints: vec![], generation: 0 };
        let cancel = CancelToken::new();
        let mut updates = vec![];
        run_tracepoints(&store, &session, 10, &cancel, |update, _| updates.push(update));
        assert_eq!(updates.len(), 1);
        assert!(updates[0].first_update);
        assert_eq!(updates[0].count, 0);
        assert_eq!(updates[0].total_count, 0);
    }

    #[test]
    fn matches_are_collected_across_batches() {
        let store = store();
        let session = TracepointSession {
            session_id: 1,
            tracepoints: vec![Tracepoint { id: 0, path: PathId(0), line: 5, expression: "x".into(), enabled: true }],
            generation: 0,
        };
        let cancel = CancelToken::new();
        let mut total = 0;
        run_tracepoints(&store, &session, 1, &cancel, |update, _| total += update.count);
        assert_eq!(total, 2);
    }

    #[test]
    fn stops_carry_the_evaluated_expression_value() {
        let store = store();
        let session = TracepointSession {
            session_id: 1,
            tracepoints: vec![Tracepoint { id: 0, path: PathId(0), line: 5, expression: "x".into(), enabled: true }],
            generation: 0,
        };
        let cancel = CancelToken::new();
        let mut stops = vec![];
        run_tracepoints(&store, &session, 10, &cancel, |_, batch| {
            for results in batch {
                stops.extend(results.tracepoint_values);
            }
        });
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].locals, vec![("x".to_string(), Value::Int { i: 1, type_id: TypeId(0) })]);
        assert_eq!(stops[1].locals, vec![("x".to_string(), Value::Int { i: 2, type_id: TypeId(0) })]);
    }

    #[test]
    fn unresolvable_expressions_are_collected_as_errors() {
        let store = store();
        let session = TracepointSession {
            session_id: 1,
            tracepoints: vec![Tracepoint {
                id: 0,
                path: PathId(0),
                line: 5,
                expression: "missing".into(),
                enabled: true,
            }],
            generation: 0,
        };
        let cancel = CancelToken::new();
        let mut errors = vec![];
        run_tracepoints(&store, &session, 10, &cancel, |update, _| {
            errors.extend(update.tracepoint_errors);
        });
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 0);
    }

    #[test]
    fn cancellation_halts_at_next_boundary() {
        let store = store();
        let session = TracepointSession {
            session_id: 1,
            tracepoints: vec![Tracepoint { id: 0, path: PathId(0), line: 5, expression: "x".into(), enabled: true }],
            generation: 0,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut total = 0;
        run_tracepoints(&store, &session, 1, &cancel, |update, _| total += update.count);
        assert_eq!(total, 0);
    }
}
