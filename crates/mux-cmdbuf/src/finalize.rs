use mux_hal::{Context, Operation, Queue};

use crate::command::Dispatch;
use crate::error::{CommandBufferError, Result};
use crate::ndrange;
use crate::sync_point::SyncPointGraph;
use crate::validate::check_contexts;

/// A command as stored while the buffer is recording.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCommand {
    pub operation: Operation,
    /// Index into the command buffer's queue list.
    pub queue: usize,
    /// Shape of a dispatch as appended, kept to re-validate it and to apply mutable updates.
    pub dispatch: Option<Dispatch>,
    pub mutable: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub operation: Operation,
    pub queue: usize,
    /// Earlier steps whose completion must be waited on explicitly. Dependencies on an earlier
    /// step of the same in-order queue are implied by submission order and left out.
    pub waits: Vec<usize>,
    /// Whether the step has no dependencies and so waits on the enqueue's external events.
    pub external: bool,
    pub dispatch: Option<Dispatch>,
    pub mutable: bool,
}

/// The frozen, replayable form of a command buffer. Steps are in recording order, which is a
/// topological order of the dependency graph.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExecutableGraph {
    pub steps: Vec<Step>,
}

/// Checks the recorded commands for consistency and translates them into an executable graph.
pub(crate) fn finalize(
    commands: &[RecordedCommand],
    graph: &SyncPointGraph,
    context: &Context,
    queues: &[Queue],
) -> Result<ExecutableGraph> {
    let mut steps = Vec::with_capacity(commands.len());
    for (index, command) in commands.iter().enumerate() {
        check_contexts(context, command.operation.contexts())?;
        let queue = queues
            .get(command.queue)
            .ok_or(CommandBufferError::AmbiguousQueue)?;
        if let Some(dispatch) = &command.dispatch {
            ndrange::resolve(dispatch, queue.device())?;
        }

        let dependencies = graph.dependencies(index);
        if let Some(&dependency) = dependencies.iter().find(|&&dep| dep >= index) {
            return Err(CommandBufferError::ForwardDependency {
                command: index,
                dependency,
            });
        }
        let waits = dependencies
            .iter()
            .copied()
            .filter(|&dep| !queue.is_in_order() || commands[dep].queue != command.queue)
            .collect();

        steps.push(Step {
            operation: command.operation.clone(),
            queue: command.queue,
            waits,
            external: dependencies.is_empty(),
            dispatch: command.dispatch.clone(),
            mutable: command.mutable,
        });
    }
    Ok(ExecutableGraph { steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_hal::{Device, DeviceConfig, QueueProperties};

    fn barrier(queue: usize) -> RecordedCommand {
        RecordedCommand {
            operation: Operation::Barrier,
            queue,
            dispatch: None,
            mutable: false,
        }
    }

    #[test]
    fn explicit_waits_only_where_submission_order_does_not_imply_them() {
        let dev = Device::new(DeviceConfig::default());
        let ctx = Context::new(&[dev.clone()]).unwrap();
        let in_order = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
        let ooo = Queue::new(&ctx, &dev, QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE).unwrap();
        let queues = [in_order, ooo];

        let mut graph = SyncPointGraph::new();
        graph.push(Vec::new(), true); // 0 on queue 0
        graph.push(vec![0], true); // 1 on queue 0, same in-order queue
        graph.push(vec![1], true); // 2 on queue 1, crosses queues
        graph.push(vec![2], false); // 3 on queue 1, out-of-order queue
        let commands = [barrier(0), barrier(0), barrier(1), barrier(1)];

        let exec = finalize(&commands, &graph, &ctx, &queues).unwrap();
        let waits: Vec<_> = exec.steps.iter().map(|s| s.waits.clone()).collect();
        assert_eq!(waits, vec![vec![], vec![], vec![1], vec![2]]);
        let external: Vec<_> = exec.steps.iter().map(|s| s.external).collect();
        assert_eq!(external, vec![true, false, false, false]);
    }
}
