use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use mux_hal::{
    CommandBufferCapabilities, Context, Event, ExecutionStatus, Queue, Status,
};
use tracing::{debug, trace, warn};

use crate::command::Command;
use crate::compat::{unsuitable_reason, QueueCompatibilityChecker};
use crate::enqueue;
use crate::error::{CommandBufferError, Result};
use crate::finalize::{self, ExecutableGraph, RecordedCommand};
use crate::mutable::{self, MutableCommand, MutableDispatchUpdate};
use crate::properties::CommandBufferProperties;
use crate::sync_point::{SyncPointGraph, SyncPointId};
use crate::validate;

static NEXT_COMMAND_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandBufferId(u64);

impl CommandBufferId {
    fn next() -> Self {
        Self(NEXT_COMMAND_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CommandBufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `cl_command_buffer_state_khr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    Recording,
    Executable,
    Pending,
}

impl CommandBufferState {
    pub fn as_raw(self) -> u32 {
        match self {
            CommandBufferState::Recording => 0,
            CommandBufferState::Executable => 1,
            CommandBufferState::Pending => 2,
        }
    }
}

/// Per-append options shared by every command kind.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    queue: Option<Queue>,
    wait_list: Vec<SyncPointId>,
    sync_point: bool,
    mutable: bool,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the command for `queue`, which must be one of the command buffer's queues.
    pub fn on_queue(mut self, queue: &Queue) -> Self {
        self.queue = Some(queue.clone());
        self
    }

    pub fn wait_for(mut self, sync_points: &[SyncPointId]) -> Self {
        self.wait_list.extend_from_slice(sync_points);
        self
    }

    /// Requests a sync point for the command.
    pub fn with_sync_point(mut self) -> Self {
        self.sync_point = true;
        self
    }

    /// Requests a [`MutableCommand`] handle for a dispatch.
    pub fn mutable(mut self) -> Self {
        self.mutable = true;
        self
    }
}

/// What an append hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Appended {
    pub sync_point: Option<SyncPointId>,
    pub mutable_command: Option<MutableCommand>,
}

struct Shared {
    state: CommandBufferState,
    ref_count: u32,
    in_flight: u32,
    queues: Vec<Queue>,
    /// Commands while recording; moved into `executable` by finalize.
    commands: Vec<RecordedCommand>,
    graph: SyncPointGraph,
    executable: Option<Arc<ExecutableGraph>>,
}

impl Shared {
    /// Drops every queue and resource handle. The returned values must be dropped after the
    /// lock is released because dropping a queue joins its worker.
    fn destroy(&mut self) -> (Vec<Queue>, Vec<RecordedCommand>, Option<Arc<ExecutableGraph>>) {
        self.graph = SyncPointGraph::new();
        (
            std::mem::take(&mut self.queues),
            std::mem::take(&mut self.commands),
            self.executable.take(),
        )
    }
}

struct Inner {
    id: CommandBufferId,
    context: Context,
    properties: CommandBufferProperties,
    shared: Mutex<Shared>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(command_buffer = %self.id, "recovering poisoned command buffer lock");
                poisoned.into_inner()
            }
        }
    }

    /// Locks the shared state of a command buffer that has not been released.
    fn live(&self) -> Result<MutexGuard<'_, Shared>> {
        let shared = self.lock();
        if shared.ref_count == 0 {
            return Err(CommandBufferError::Released(self.id));
        }
        Ok(shared)
    }

    fn replay_finished(&self, status: ExecutionStatus) {
        let destroyed = {
            let mut shared = self.lock();
            shared.in_flight = shared.in_flight.saturating_sub(1);
            debug!(
                command_buffer = %self.id,
                ?status,
                in_flight = shared.in_flight,
                "command buffer replay finished"
            );
            if shared.in_flight > 0 {
                return;
            }
            if shared.ref_count == 0 {
                debug!(command_buffer = %self.id, "running deferred destruction");
                Some(shared.destroy())
            } else {
                shared.state = CommandBufferState::Executable;
                None
            }
        };
        drop(destroyed);
    }
}

/// Decrements the in-flight count exactly once, even when the completion hook carrying it is
/// dropped without running.
struct Replay(Option<Arc<Inner>>);

impl Replay {
    fn finish(mut self, status: ExecutionStatus) {
        if let Some(inner) = self.0.take() {
            inner.replay_finished(status);
        }
    }
}

impl Drop for Replay {
    fn drop(&mut self) {
        if let Some(inner) = self.0.take() {
            warn!(command_buffer = %inner.id, "replay abandoned before completion");
            inner.replay_finished(ExecutionStatus::Error(Status::InvalidCommandQueue.code()));
        }
    }
}

/// A recorded, replayable sequence of device commands with explicit sync-point dependencies.
///
/// `CommandBuffer` is a handle: cloning it does not change the reference count managed by
/// [`CommandBuffer::retain`] and [`CommandBuffer::release`]. Once the count reaches zero every
/// operation fails with [`CommandBufferError::Released`].
#[derive(Clone)]
pub struct CommandBuffer(Arc<Inner>);

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.0.lock();
        f.debug_struct("CommandBuffer")
            .field("id", &self.0.id)
            .field("state", &shared.state)
            .field("ref_count", &shared.ref_count)
            .field("in_flight", &shared.in_flight)
            .field("num_commands", &shared.graph.len())
            .finish()
    }
}

impl CommandBuffer {
    /// `clCreateCommandBufferKHR`.
    pub fn new(queues: &[Queue], properties: Option<&[u64]>) -> Result<Self> {
        let first = queues.first().ok_or(CommandBufferError::EmptyQueueList)?;
        if let Some(index) = queues
            .iter()
            .position(|q| q.context() != first.context() || q.device() != first.device())
        {
            return Err(CommandBufferError::QueueMismatch { index });
        }

        let properties = CommandBufferProperties::parse(properties)?;
        let device = first.device();
        if properties.simultaneous_use()
            && !device
                .command_buffer_capabilities()
                .contains(CommandBufferCapabilities::SIMULTANEOUS_USE)
        {
            return Err(CommandBufferError::UnsupportedProperty(
                "CL_COMMAND_BUFFER_SIMULTANEOUS_USE_KHR",
            ));
        }
        if properties.mutable() && !device.config().mutable_dispatch {
            return Err(CommandBufferError::UnsupportedProperty(
                "CL_COMMAND_BUFFER_MUTABLE_KHR",
            ));
        }
        for queue in queues {
            if let Some(reason) = unsuitable_reason(queue) {
                return Err(CommandBufferError::UnsuitableQueue {
                    queue: queue.id(),
                    reason,
                });
            }
        }

        let id = CommandBufferId::next();
        debug!(
            command_buffer = %id,
            num_queues = queues.len(),
            flags = ?properties.flags(),
            "created command buffer"
        );
        Ok(Self(Arc::new(Inner {
            id,
            context: first.context().clone(),
            properties,
            shared: Mutex::new(Shared {
                state: CommandBufferState::Recording,
                ref_count: 1,
                in_flight: 0,
                queues: queues.to_vec(),
                commands: Vec::new(),
                graph: SyncPointGraph::new(),
                executable: None,
            }),
        })))
    }

    pub fn id(&self) -> CommandBufferId {
        self.0.id
    }

    /// `clRetainCommandBufferKHR`.
    pub fn retain(&self) -> Result<()> {
        self.0.live()?.ref_count += 1;
        Ok(())
    }

    /// `clReleaseCommandBufferKHR`. Dropping the last reference while replays are in flight
    /// defers destruction until the last one completes.
    pub fn release(&self) -> Result<()> {
        let destroyed = {
            let mut shared = self.0.live()?;
            shared.ref_count -= 1;
            if shared.ref_count > 0 {
                return Ok(());
            }
            if shared.in_flight > 0 {
                debug!(
                    command_buffer = %self.0.id,
                    in_flight = shared.in_flight,
                    "destruction deferred until replays complete"
                );
                return Ok(());
            }
            debug!(command_buffer = %self.0.id, "destroying command buffer");
            shared.destroy()
        };
        drop(destroyed);
        Ok(())
    }

    fn queue_index(queues: &[Queue], requested: Option<&Queue>) -> Result<usize> {
        match requested {
            None if queues.len() == 1 => Ok(0),
            None => Err(CommandBufferError::AmbiguousQueue),
            Some(queue) => queues
                .iter()
                .position(|q| q == queue)
                .ok_or(CommandBufferError::ForeignQueue(queue.id())),
        }
    }

    /// Records one command. Thread-safe; concurrent appends serialize on the buffer's lock.
    ///
    /// A barrier with an empty wait list depends on every previously recorded command.
    pub fn append(&self, command: impl Into<Command>, options: &AppendOptions) -> Result<Appended> {
        let command = command.into();
        let mut shared = self.0.live()?;
        if shared.state != CommandBufferState::Recording {
            return Err(CommandBufferError::InvalidState {
                actual: shared.state,
                expected: "recording",
            });
        }
        let queue = Self::queue_index(&shared.queues, options.queue.as_ref())?;
        shared.graph.check_wait_list(&options.wait_list)?;
        shared.graph.check_capacity(options.sync_point)?;
        if options.mutable {
            if !self.0.properties.mutable() {
                return Err(CommandBufferError::InvalidMutableRequest(
                    "command buffer was not created mutable",
                ));
            }
            if !matches!(command, Command::Dispatch(_)) {
                return Err(CommandBufferError::InvalidMutableRequest(
                    "only kernel dispatches can be mutable",
                ));
            }
        }
        let operation = validate::lower(&command, &self.0.context, shared.queues[queue].device())?;

        let dependencies = match command {
            Command::Barrier if options.wait_list.is_empty() => shared.graph.sinks(),
            _ => shared.graph.resolve(&options.wait_list),
        };
        let (index, sync_point) = shared.graph.push(dependencies, options.sync_point);
        trace!(
            command_buffer = %self.0.id,
            index,
            command = ?operation.command_type(),
            ?sync_point,
            "recorded command"
        );
        shared.commands.push(RecordedCommand {
            operation,
            queue,
            dispatch: match command {
                Command::Dispatch(dispatch) => Some(dispatch),
                _ => None,
            },
            mutable: options.mutable,
        });

        Ok(Appended {
            sync_point,
            mutable_command: options
                .mutable
                .then(|| MutableCommand::new(self.0.id, index)),
        })
    }

    /// `clCommandBarrierWithWaitListKHR`.
    pub fn barrier(&self, options: &AppendOptions) -> Result<Appended> {
        self.append(Command::Barrier, options)
    }

    /// `clFinalizeCommandBufferKHR`. On failure the buffer stays recording.
    pub fn finalize(&self) -> Result<()> {
        let mut shared = self.0.live()?;
        if shared.state != CommandBufferState::Recording {
            return Err(CommandBufferError::InvalidState {
                actual: shared.state,
                expected: "recording",
            });
        }
        let graph = finalize::finalize(
            &shared.commands,
            &shared.graph,
            &self.0.context,
            &shared.queues,
        )?;
        shared.commands.clear();
        shared.executable = Some(Arc::new(graph));
        shared.state = CommandBufferState::Executable;
        debug!(
            command_buffer = %self.0.id,
            num_commands = shared.graph.len(),
            "finalized command buffer"
        );
        Ok(())
    }

    fn check_replayable(&self, shared: &Shared) -> Result<()> {
        match shared.state {
            CommandBufferState::Recording => Err(CommandBufferError::InvalidState {
                actual: shared.state,
                expected: "executable",
            }),
            CommandBufferState::Pending if !self.0.properties.simultaneous_use() => {
                Err(CommandBufferError::AlreadyPending)
            }
            _ => Ok(()),
        }
    }

    /// `clEnqueueCommandBufferKHR`.
    ///
    /// An empty `substitutes` replays on the queues the buffer was created with. The returned
    /// event completes once every command of this replay has completed.
    pub fn enqueue(&self, substitutes: &[Queue], wait_list: &[Event]) -> Result<Event> {
        let (graph, queues, in_flight) = {
            let mut shared = self.0.live()?;
            self.check_replayable(&shared)?;
            let queues = QueueCompatibilityChecker::new(&shared.queues).resolve(substitutes)?;
            if wait_list.iter().any(|e| e.context() != &self.0.context) {
                return Err(CommandBufferError::ContextMismatch);
            }
            let graph = shared
                .executable
                .clone()
                .ok_or(CommandBufferError::InvalidState {
                    actual: shared.state,
                    expected: "executable",
                })?;
            shared.in_flight += 1;
            shared.state = CommandBufferState::Pending;
            (graph, queues, shared.in_flight)
        };

        let replay = Replay(Some(Arc::clone(&self.0)));
        let event = enqueue::submit(
            &graph,
            &queues,
            wait_list,
            Box::new(move |status: ExecutionStatus| replay.finish(status)),
        )?;
        debug!(
            command_buffer = %self.0.id,
            event = %event.id(),
            in_flight,
            "enqueued command buffer"
        );
        Ok(event)
    }

    /// `clUpdateMutableCommandsKHR`. Every update is validated before any is applied; replays
    /// already in flight keep running the previous form.
    pub fn update_mutable_commands(&self, updates: &[MutableDispatchUpdate]) -> Result<()> {
        let mut shared = self.0.live()?;
        self.check_replayable(&shared)?;
        let Some(current) = shared.executable.as_deref() else {
            return Err(CommandBufferError::InvalidState {
                actual: shared.state,
                expected: "executable",
            });
        };
        let mut graph = current.clone();
        for update in updates {
            mutable::apply(&mut graph, self.0.id, &shared.queues, update)?;
        }
        shared.executable = Some(Arc::new(graph));
        debug!(
            command_buffer = %self.0.id,
            updates = updates.len(),
            "updated mutable commands"
        );
        Ok(())
    }

    pub fn state(&self) -> Result<CommandBufferState> {
        Ok(self.0.live()?.state)
    }

    pub fn reference_count(&self) -> Result<u32> {
        Ok(self.0.live()?.ref_count)
    }

    pub fn queues(&self) -> Result<Vec<Queue>> {
        Ok(self.0.live()?.queues.clone())
    }

    pub fn num_queues(&self) -> Result<usize> {
        Ok(self.0.live()?.queues.len())
    }

    pub fn context(&self) -> Result<Context> {
        self.0.live()?;
        Ok(self.0.context.clone())
    }

    /// The creation property list exactly as supplied; empty when none was.
    pub fn properties(&self) -> Result<Vec<u64>> {
        self.0.live()?;
        Ok(self.0.properties.raw().to_vec())
    }

    pub fn num_commands(&self) -> Result<usize> {
        Ok(self.0.live()?.graph.len())
    }

    pub fn num_sync_points(&self) -> Result<u32> {
        Ok(self.0.live()?.graph.next_sync_point())
    }

    /// Replays submitted but not yet completed.
    pub fn in_flight(&self) -> Result<u32> {
        Ok(self.0.live()?.in_flight)
    }
}
