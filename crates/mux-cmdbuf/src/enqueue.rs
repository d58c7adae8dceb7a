//! Submission of a finalized command buffer to device queues.

use mux_hal::{CommandType, CompletionHook, Event, Operation, Queue, Submission};
use tracing::{trace, warn};

use crate::error::{CommandBufferError, Result};
use crate::finalize::ExecutableGraph;

/// Submits every step of `graph` to `queues` and returns the replay's completion event.
///
/// Each step gets its own internal event. Steps without dependencies wait on `external`. The
/// replay ends with a marker on the first queue that waits on every step and runs `on_complete`
/// before its event is published; every other in-order queue then gets a marker waiting on that
/// event, so later work on any of the queues orders after the whole replay.
pub(crate) fn submit(
    graph: &ExecutableGraph,
    queues: &[Queue],
    external: &[Event],
    on_complete: CompletionHook,
) -> Result<Event> {
    let primary = queues.first().ok_or(CommandBufferError::EmptyQueueList)?;

    let mut events: Vec<Event> = Vec::with_capacity(graph.steps.len());
    for (index, step) in graph.steps.iter().enumerate() {
        let queue = queues
            .get(step.queue)
            .ok_or(CommandBufferError::AmbiguousQueue)?;
        let mut wait_list: Vec<Event> = step
            .waits
            .iter()
            .filter_map(|&dep| events.get(dep).cloned())
            .collect();
        if step.external {
            wait_list.extend_from_slice(external);
        }
        let signal = queue.new_event(step.operation.command_type());
        trace!(
            step = index,
            queue = %queue.id(),
            waits = wait_list.len(),
            "submitting command-buffer step"
        );
        queue.submit(Submission {
            operation: step.operation.clone(),
            wait_list,
            signal: signal.clone(),
            on_complete: None,
        })?;
        events.push(signal);
    }

    // Waiting on every step rather than only the sinks also surfaces failures of steps whose
    // dependents were ordered by submission order alone.
    let wait_list = if events.is_empty() {
        external.to_vec()
    } else {
        events
    };
    let completion = primary.new_event(CommandType::CommandBuffer);
    primary.submit(Submission {
        operation: Operation::Marker,
        wait_list,
        signal: completion.clone(),
        on_complete: Some(on_complete),
    })?;

    let mut joined = vec![primary.id()];
    for queue in queues.iter().filter(|q| q.is_in_order()) {
        if joined.contains(&queue.id()) {
            continue;
        }
        joined.push(queue.id());
        let join = queue.new_event(CommandType::Marker);
        if let Err(err) = queue.submit(Submission {
            operation: Operation::Marker,
            wait_list: vec![completion.clone()],
            signal: join,
            on_complete: None,
        }) {
            warn!(queue = %queue.id(), "failed to join queue after command-buffer replay: {err}");
        }
    }

    Ok(completion)
}
