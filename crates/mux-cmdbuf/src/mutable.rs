//! `cl_khr_command_buffer_mutable_dispatch`: updating recorded dispatches after finalization.

use mux_hal::{KernelArg, Operation, Queue};

use crate::command_buffer::CommandBufferId;
use crate::error::{CommandBufferError, Result};
use crate::finalize::ExecutableGraph;
use crate::ndrange;

/// `cl_mutable_command_khr`: names one dispatch of one command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutableCommand {
    buffer: CommandBufferId,
    index: usize,
}

impl MutableCommand {
    pub(crate) fn new(buffer: CommandBufferId, index: usize) -> Self {
        Self { buffer, index }
    }

    pub fn command_buffer(&self) -> CommandBufferId {
        self.buffer
    }

    /// Position of the command in recording order.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// New values for one mutable dispatch. Fields left unset keep their current value.
///
/// When the global size changes and the dispatch was recorded without a local size, the
/// work-group size is picked again for the new shape.
#[derive(Debug, Clone)]
pub struct MutableDispatchUpdate {
    pub command: MutableCommand,
    pub args: Vec<(u32, KernelArg)>,
    pub global_offset: Option<[usize; 3]>,
    pub global_size: Option<[usize; 3]>,
    pub local_size: Option<[usize; 3]>,
}

impl MutableDispatchUpdate {
    pub fn new(command: MutableCommand) -> Self {
        Self {
            command,
            args: Vec::new(),
            global_offset: None,
            global_size: None,
            local_size: None,
        }
    }

    pub fn with_arg(mut self, index: u32, arg: KernelArg) -> Self {
        self.args.push((index, arg));
        self
    }

    pub fn with_global_offset(mut self, offset: [usize; 3]) -> Self {
        self.global_offset = Some(offset);
        self
    }

    pub fn with_global_size(mut self, size: [usize; 3]) -> Self {
        self.global_size = Some(size);
        self
    }

    pub fn with_local_size(mut self, size: [usize; 3]) -> Self {
        self.local_size = Some(size);
        self
    }
}

/// Validates `update` and applies it to `graph`. `graph` is left untouched on error.
pub(crate) fn apply(
    graph: &mut ExecutableGraph,
    buffer: CommandBufferId,
    queues: &[Queue],
    update: &MutableDispatchUpdate,
) -> Result<()> {
    if update.command.buffer != buffer {
        return Err(CommandBufferError::InvalidMutableCommand);
    }
    let step = graph
        .steps
        .get_mut(update.command.index)
        .filter(|step| step.mutable)
        .ok_or(CommandBufferError::InvalidMutableCommand)?;
    let (Some(recorded), Operation::Dispatch(invocation)) = (&step.dispatch, &step.operation)
    else {
        return Err(CommandBufferError::InvalidMutableCommand);
    };

    let mut dispatch = recorded.clone();
    if let Some(offset) = update.global_offset {
        dispatch.global_offset = Some(offset);
    }
    if let Some(size) = update.global_size {
        dispatch.global_size = size;
    }
    if let Some(local) = update.local_size {
        dispatch.local_size = Some(local);
    }
    let device = queues
        .get(step.queue)
        .ok_or(CommandBufferError::InvalidMutableCommand)?
        .device();
    let range = ndrange::resolve(&dispatch, device)?;

    let mut invocation = invocation.clone();
    for (index, arg) in &update.args {
        invocation.set_arg(*index, arg.clone())?;
    }
    invocation.set_range(range);

    step.operation = Operation::Dispatch(invocation);
    step.dispatch = Some(dispatch);
    Ok(())
}
