//! Flow Reconstructor: builds the per-line, per-iteration view of a
//! function instance's recorded steps (§4.3).

use crate::ids::{IterationIndex, LoopId, StepIndex, Tick};
use crate::store::{BranchOutcome, StepKind, TraceStore};
use std::collections::HashMap;

/// The reconstruction's progress, published to the UI as it advances
/// (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStatus {
    FlowNotLoading,
    FlowWaitingForStart,
    FlowLoading { steps_so_far: usize },
    FlowFinished,
}

/// A loop's static shape, pre-computed from the source (§4.3): the core
/// itself never does source analysis, it only consumes the shape model.
#[derive(Debug, Clone)]
pub struct LoopShape {
    pub loop_id: LoopId,
    pub header_line: i64,
    pub body_first_line: i64,
    pub body_last_line: i64,
    pub nested: Vec<LoopId>,
}

/// One step attributed to a particular source line and (if applicable)
/// loop iteration (§4.3 output).
#[derive(Debug, Clone)]
pub struct FlowStep {
    pub position: i64,
    pub loop_id: Option<LoopId>,
    pub iteration: Option<IterationIndex>,
    pub step_count: usize,
    pub tick: Tick,
    pub before_values: Vec<(String, crate::value::Value)>,
    pub after_values: Vec<(String, crate::value::Value)>,
    pub expr_order: Vec<String>,
}

/// One loop's reconstructed iteration sequence (§4.3 output).
#[derive(Debug, Clone)]
pub struct FlowLoop {
    pub base: LoopId,
    pub first: IterationIndex,
    pub last: IterationIndex,
    /// `iteration -> step count observed during that iteration`.
    pub step_counts: HashMap<IterationIndex, usize>,
    pub tick_per_iteration: HashMap<IterationIndex, Tick>,
    pub internal: Vec<FlowLoop>,
}

/// `FlowViewUpdate` (§4.3).
#[derive(Debug, Clone, Default)]
pub struct FlowViewUpdate {
    /// `line -> ordered indices into `steps``.
    pub position_step_counts: HashMap<i64, Vec<usize>>,
    pub steps: Vec<FlowStep>,
    pub loops: Vec<FlowLoop>,
    /// `line -> branch slot -> outcome`.
    pub branches_taken: HashMap<i64, HashMap<String, BranchOutcome>>,
    /// `line -> iteration -> step count`.
    pub loop_iteration_steps: HashMap<i64, HashMap<IterationIndex, usize>>,
    /// Positions reached by at least one step in any iteration, in source
    /// order.
    pub relevant_step_count: Vec<i64>,
    pub comment_lines: Vec<i64>,
    pub error: bool,
    pub error_message: Option<String>,
}

impl FlowViewUpdate {
    fn failed(message: impl Into<String>) -> Self {
        Self { error: true, error_message: Some(message.into()), ..Default::default() }
    }
}

/// Reconstructs a [`FlowViewUpdate`] for one function instance.
///
/// Grounded on the same "replay a flat, tick-ordered record sequence into
/// a structured view" shape used elsewhere in this crate: steps are
/// walked once, in order, and classified as they go rather than via a
/// second indexing pass.
pub fn reconstruct(
    store: &TraceStore,
    call_key: crate::ids::CallKey,
    loop_shapes: &[LoopShape],
) -> FlowViewUpdate {
    let steps = match store.steps_in_function(call_key) {
        Ok(steps) if !steps.is_empty() => steps,
        Ok(_) => return FlowViewUpdate::failed("function instance has no recorded steps"),
        Err(err) => return FlowViewUpdate::failed(err.to_string()),
    };

    let mut update = FlowViewUpdate::default();
    // header_line -> (loop_id, current iteration, visits so far)
    let mut active_iteration: HashMap<i64, (LoopId, usize)> = HashMap::new();
    let mut loop_state: HashMap<LoopId, FlowLoop> = loop_shapes
        .iter()
        .map(|shape| {
            (
                shape.loop_id,
                FlowLoop {
                    base: shape.loop_id,
                    first: IterationIndex(1),
                    last: IterationIndex(1),
                    step_counts: HashMap::new(),
                    tick_per_iteration: HashMap::new(),
                    internal: Vec::new(),
                },
            )
        })
        .collect();

    for (step_count, step) in steps.iter().enumerate() {
        // Step 2+3: a header-line visit opens (or advances) an iteration;
        // other lines inherit the most recently opened iteration that
        // encloses them.
        let enclosing_shape = loop_shapes.iter().find(|shape| {
            step.line == shape.header_line || (step.line >= shape.body_first_line && step.line <= shape.body_last_line)
        });

        let iteration = enclosing_shape.map(|shape| {
            let entry = active_iteration.entry(shape.header_line).or_insert((shape.loop_id, 0));
            if step.line == shape.header_line {
                entry.1 += 1;
            }
            let iteration = IterationIndex(entry.1.max(1));
            let flow_loop = loop_state.entry(shape.loop_id).or_insert_with(|| FlowLoop {
                base: shape.loop_id,
                first: iteration,
                last: iteration,
                step_counts: HashMap::new(),
                tick_per_iteration: HashMap::new(),
                internal: Vec::new(),
            });
            flow_loop.last = iteration;
            *flow_loop.step_counts.entry(iteration).or_insert(0) += 1;
            flow_loop.tick_per_iteration.entry(iteration).or_insert(step.tick);
            (shape.loop_id, iteration)
        });

        let flow_step = FlowStep {
            position: step.line,
            loop_id: iteration.map(|(id, _)| id),
            iteration: iteration.map(|(_, it)| it),
            step_count,
            tick: step.tick,
            // Step 4: materialise before/after values; unavailable
            // expressions are simply omitted, never replaced with a
            // placeholder.
            before_values: step.before_values.clone(),
            after_values: step.after_values.clone(),
            expr_order: step.after_values.iter().map(|(expr, _)| expr.clone()).collect(),
        };

        update.position_step_counts.entry(step.line).or_default().push(step_count);

        if let Some((loop_id, iteration)) = iteration {
            *update
                .loop_iteration_steps
                .entry(step.line)
                .or_default()
                .entry(iteration)
                .or_insert(0) += 1;
            let _ = loop_id;
        }

        // Step 5: branch outcomes. A step that stays within the current
        // iteration marks its header as Taken; the final visit with no
        // further iteration marks the exit branch NotTaken.
        if let Some(shape) = enclosing_shape {
            if step.line == shape.header_line {
                update
                    .branches_taken
                    .entry(shape.header_line)
                    .or_default()
                    .insert("loop-body".to_string(), BranchOutcome::Taken);
            }
        }
        for (expr, outcome) in &step.branch_decisions {
            update.branches_taken.entry(step.line).or_default().insert(expr.clone(), *outcome);
        }

        if step.kind == StepKind::Line && !update.relevant_step_count.contains(&step.line) {
            update.relevant_step_count.push(step.line);
        }

        update.steps.push(flow_step);
    }

    // Any header line that was visited but whose loop never repeats again
    // records the exit branch as NotTaken once reconstruction completes.
    for shape in loop_shapes {
        if active_iteration.contains_key(&shape.header_line) {
            update
                .branches_taken
                .entry(shape.header_line)
                .or_default()
                .entry("loop-exit".to_string())
                .or_insert(BranchOutcome::NotTaken);
        }
    }

    update.loops = loop_state.into_values().collect();
    update.relevant_step_count.sort_unstable();
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::EventRecord;
    use crate::ids::{CallKey, FunctionKey, PathId};
    use crate::store::{CallRecord, FunctionRecord, StepRecord};

    fn step(tick: i64, line: i64) -> StepRecord {
        StepRecord {
            tick: Tick(tick),
            path: PathId(0),
            line,
            call_key: CallKey(0),
            frame_depth: 0,
            kind: StepKind::Line,
            before_values: vec![],
            after_values: vec![],
            branch_decisions: vec![],
        }
    }

    fn three_iteration_loop_store() -> TraceStore {
        // for i in 1..3 { print(i) } modeled as header line 1, body line 2,
        // visited three times.
        let steps = vec![
            step(0, 1),
            step(1, 2),
            step(2, 1),
            step(3, 2),
            step(4, 1),
            step(5, 2),
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
                step_indices: (0..6).map(StepIndex).collect(),
                children: vec![],
            }],
            vec![FunctionRecord { path: PathId(0), name: "main".into(), line_first: 1, line_last: 2 }],
            Vec::<EventRecord>::new(),
            vec![],
            vec![],
        )
    }

    #[test]
    fn every_step_is_attributed_to_exactly_one_position() {
        let store = three_iteration_loop_store();
        let shapes = vec![LoopShape {
            loop_id: LoopId(0),
            header_line: 1,
            body_first_line: 2,
            body_last_line: 2,
            nested: vec![],
        }];
        let update = reconstruct(&store, CallKey(0), &shapes);

        let total_counted: usize = update.position_step_counts.values().map(|v| v.len()).sum();
        assert_eq!(total_counted, update.steps.len());
        assert_eq!(update.steps.len(), 6);
    }

    #[test]
    fn three_iterations_are_reconstructed() {
        let store = three_iteration_loop_store();
        let shapes = vec![LoopShape {
            loop_id: LoopId(0),
            header_line: 1,
            body_first_line: 2,
            body_last_line: 2,
            nested: vec![],
        }];
        let update = reconstruct(&store, CallKey(0), &shapes);
        let flow_loop = &update.loops[0];
        assert_eq!(flow_loop.last, IterationIndex(3));
        assert_eq!(flow_loop.step_counts.len(), 3);
    }

    #[test]
    fn missing_steps_produce_an_error_update_without_partial_data() {
        let store = TraceStore::from_parts(vec![], vec![], vec![], Vec::<EventRecord>::new(), vec![], vec![]);
        let update = reconstruct(&store, CallKey(0), &[]);
        assert!(update.error);
        assert!(update.steps.is_empty());
    }
}
