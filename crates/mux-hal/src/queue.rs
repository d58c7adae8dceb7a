use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::device::object_id;
use crate::error::{HalError, Result};
use crate::{
    Buffer, CommandType, Context, Device, Event, ExecutionStatus, Operation, Readback, Status,
};

object_id!(QueueId, NEXT_QUEUE_ID);

thread_local! {
    static ON_QUEUE_WORKER: Cell<bool> = const { Cell::new(false) };
}

bitflags! {
    /// `cl_command_queue_properties`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct QueueProperties: u64 {
        const OUT_OF_ORDER_EXEC_MODE_ENABLE = 1 << 0;
        const PROFILING_ENABLE = 1 << 1;
    }
}

/// Runs on the queue worker after the operation finished and before `signal` is published, so
/// anything observing the signal also observes the hook's effects.
pub type CompletionHook = Box<dyn FnOnce(ExecutionStatus) + Send>;

/// One packet of work for a queue.
pub struct Submission {
    pub operation: Operation,
    /// Events that must complete before the operation starts.
    pub wait_list: Vec<Event>,
    pub signal: Event,
    pub on_complete: Option<CompletionHook>,
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("operation", &self.operation.command_type())
            .field("wait_list", &self.wait_list.len())
            .field("signal", &self.signal.id())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

struct QueueInner {
    id: QueueId,
    context: Context,
    device: Device,
    properties: QueueProperties,
    sender: Mutex<Option<mpsc::Sender<Submission>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what was already submitted and exit.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            // Never join from a queue worker: a completion hook dropping this queue may be
            // holding back the event this queue's worker is waiting on.
            if ON_QUEUE_WORKER.with(Cell::get) {
                trace!(queue = %self.id, "detaching queue worker");
                return;
            }
            if worker.join().is_err() {
                warn!(queue = %self.id, "queue worker panicked");
            }
        }
    }
}

/// A command queue backed by one host worker thread.
///
/// The worker executes submissions strictly in submission order, so out-of-order queues are
/// simply allowed more freedom than the host uses. Dependencies between submissions are
/// expressed through wait lists.
#[derive(Clone)]
pub struct Queue(Arc<QueueInner>);

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.0.id)
            .field("context", &self.0.context.id())
            .field("device", &self.0.device.id())
            .field("properties", &self.0.properties)
            .finish()
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Queue {}

impl Queue {
    pub fn new(context: &Context, device: &Device, properties: QueueProperties) -> Result<Self> {
        if !context.contains(device) {
            return Err(HalError::DeviceNotInContext {
                device: device.id(),
                context: context.id(),
            });
        }
        if !device.config().supported_queue_properties.contains(properties) {
            return Err(HalError::UnsupportedQueueProperties {
                device: device.id(),
                properties,
            });
        }

        let id = QueueId::next();
        let (sender, receiver) = mpsc::channel::<Submission>();
        let worker = std::thread::Builder::new()
            .name(format!("mux-queue-{id}"))
            .spawn(move || run_worker(id, receiver))
            .map_err(|_| HalError::QueueShutDown(id))?;

        Ok(Self(Arc::new(QueueInner {
            id,
            context: context.clone(),
            device: device.clone(),
            properties,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })))
    }

    pub fn id(&self) -> QueueId {
        self.0.id
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn device(&self) -> &Device {
        &self.0.device
    }

    pub fn properties(&self) -> QueueProperties {
        self.0.properties
    }

    pub fn is_in_order(&self) -> bool {
        !self
            .0
            .properties
            .contains(QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE)
    }

    pub fn profiling_enabled(&self) -> bool {
        self.0.properties.contains(QueueProperties::PROFILING_ENABLE)
    }

    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// A fresh event for a command of `command_type` on this queue, in the `Queued` status.
    pub fn new_event(&self, command_type: CommandType) -> Event {
        Event::new(
            &self.0.context,
            command_type,
            Some(self.0.id),
            self.profiling_enabled(),
        )
    }

    /// Hands a packet to the worker. The signal event moves to `Submitted`.
    pub fn submit(&self, submission: Submission) -> Result<()> {
        let signal = submission.signal.clone();
        let sent = match self.0.sender.lock() {
            Ok(sender) => sender.as_ref().map(|s| s.send(submission)),
            Err(poisoned) => poisoned.into_inner().as_ref().map(|s| s.send(submission)),
        };
        match sent {
            Some(Ok(())) => {
                signal.set_status(ExecutionStatus::Submitted);
                Ok(())
            }
            _ => Err(HalError::QueueShutDown(self.0.id)),
        }
    }

    fn check_wait_list(&self, wait_list: &[Event]) -> Result<()> {
        if wait_list.iter().any(|e| e.context() != &self.0.context) {
            return Err(HalError::ForeignEvent);
        }
        Ok(())
    }

    /// Enqueues a one-shot operation and returns its event.
    pub fn enqueue(&self, operation: Operation, wait_list: &[Event]) -> Result<Event> {
        self.check_wait_list(wait_list)?;
        if operation.contexts().iter().any(|c| *c != &self.0.context) {
            return Err(HalError::ForeignMemObject);
        }
        let signal = self.new_event(operation.command_type());
        self.submit(Submission {
            operation,
            wait_list: wait_list.to_vec(),
            signal: signal.clone(),
            on_complete: None,
        })?;
        Ok(signal)
    }

    pub fn enqueue_write_buffer(
        &self,
        buffer: &Buffer,
        offset: usize,
        data: &[u8],
        wait_list: &[Event],
    ) -> Result<Event> {
        crate::memory::check_range(offset, data.len(), buffer.size())?;
        self.enqueue(
            Operation::WriteBuffer {
                buffer: buffer.clone(),
                offset,
                data: data.to_vec(),
            },
            wait_list,
        )
    }

    pub fn enqueue_read_buffer(
        &self,
        buffer: &Buffer,
        offset: usize,
        size: usize,
        wait_list: &[Event],
    ) -> Result<(Event, Readback)> {
        crate::memory::check_range(offset, size, buffer.size())?;
        let into = Readback::new();
        let event = self.enqueue(
            Operation::ReadBuffer {
                buffer: buffer.clone(),
                offset,
                size,
                into: into.clone(),
            },
            wait_list,
        )?;
        Ok((event, into))
    }

    /// Blocking read: waits for `wait_list` and everything ahead of the read on this queue.
    pub fn read_buffer(
        &self,
        buffer: &Buffer,
        offset: usize,
        size: usize,
        wait_list: &[Event],
    ) -> Result<Vec<u8>> {
        let (event, into) = self.enqueue_read_buffer(buffer, offset, size, wait_list)?;
        event.wait()?;
        Ok(into.take().unwrap_or_default())
    }

    pub fn enqueue_marker(&self, wait_list: &[Event]) -> Result<Event> {
        self.enqueue(Operation::Marker, wait_list)
    }

    pub fn enqueue_barrier(&self, wait_list: &[Event]) -> Result<Event> {
        self.enqueue(Operation::Barrier, wait_list)
    }

    /// Submission is immediate on the host, so flushing has nothing to do.
    pub fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Blocks until every command submitted so far has finished.
    pub fn finish(&self) -> Result<()> {
        let marker = self.enqueue_marker(&[])?;
        // A failure earlier in the queue does not make `finish` fail.
        let _ = marker.wait();
        Ok(())
    }
}

fn run_worker(id: QueueId, receiver: mpsc::Receiver<Submission>) {
    ON_QUEUE_WORKER.with(|flag| flag.set(true));
    for submission in receiver {
        let Submission {
            operation,
            wait_list,
            signal,
            on_complete,
        } = submission;

        let mut status = ExecutionStatus::Complete;
        for event in &wait_list {
            if event.wait().is_err() {
                status = ExecutionStatus::from_status(Status::ExecStatusErrorForEventsInWaitList);
            }
        }
        drop(wait_list);

        if status == ExecutionStatus::Complete {
            signal.set_status(ExecutionStatus::Running);
            match catch_unwind(AssertUnwindSafe(|| operation.execute())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(queue = %id, event = %signal.id(), "operation failed: {err}");
                    status = ExecutionStatus::from_status(err.status());
                }
                // A faulting kernel body fails its command, not the queue.
                Err(_) => {
                    warn!(queue = %id, event = %signal.id(), "operation panicked");
                    status = ExecutionStatus::from_status(Status::OutOfResources);
                }
            }
        }
        trace!(queue = %id, event = %signal.id(), ?status, "submission retired");

        if let Some(hook) = on_complete {
            hook(status);
        }
        match status {
            ExecutionStatus::Error(code) => signal.set_status(ExecutionStatus::Error(code)),
            _ => signal.set_status(ExecutionStatus::Complete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceConfig;

    fn setup() -> (Context, Device) {
        let dev = Device::new(DeviceConfig::default());
        (Context::new(&[dev.clone()]).unwrap(), dev)
    }

    #[test]
    fn queue_requires_device_in_context_and_supported_properties() {
        let (ctx, _) = setup();
        let stranger = Device::new(DeviceConfig::default());
        assert!(matches!(
            Queue::new(&ctx, &stranger, QueueProperties::empty()),
            Err(HalError::DeviceNotInContext { .. })
        ));

        let limited = Device::new(DeviceConfig {
            supported_queue_properties: QueueProperties::empty(),
            ..Default::default()
        });
        let ctx = Context::new(&[limited.clone()]).unwrap();
        assert!(matches!(
            Queue::new(&ctx, &limited, QueueProperties::PROFILING_ENABLE),
            Err(HalError::UnsupportedQueueProperties { .. })
        ));
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (ctx, dev) = setup();
        let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
        let buf = Buffer::new(&ctx, 4).unwrap();

        queue.enqueue_write_buffer(&buf, 0, &[1; 4], &[]).unwrap();
        queue.enqueue_write_buffer(&buf, 0, &[2; 4], &[]).unwrap();
        assert_eq!(queue.read_buffer(&buf, 0, 4, &[]).unwrap(), vec![2; 4]);
    }

    #[test]
    fn user_event_gates_execution_and_failures_propagate() {
        let (ctx, dev) = setup();
        let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
        let buf = Buffer::new(&ctx, 4).unwrap();

        let gate = Event::user(&ctx);
        let write = queue.enqueue_write_buffer(&buf, 0, &[9; 4], &[gate.clone()]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(buf.to_vec(), vec![0; 4]);
        assert_eq!(write.status(), ExecutionStatus::Submitted);

        gate.set_user_status(ExecutionStatus::Complete).unwrap();
        write.wait().unwrap();
        assert_eq!(buf.to_vec(), vec![9; 4]);

        let failed = Event::user(&ctx);
        failed.set_user_status(ExecutionStatus::Error(-1)).unwrap();
        let dependent = queue.enqueue_marker(&[failed]).unwrap();
        assert!(dependent.wait().is_err());
        assert_eq!(
            dependent.status(),
            ExecutionStatus::Error(Status::ExecStatusErrorForEventsInWaitList.code())
        );
    }

    #[test]
    fn completion_hook_runs_before_signal() {
        let (ctx, dev) = setup();
        let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
        let flag = Arc::new(Mutex::new(None));
        let f = flag.clone();
        let signal = queue.new_event(CommandType::Marker);
        queue
            .submit(Submission {
                operation: Operation::Marker,
                wait_list: Vec::new(),
                signal: signal.clone(),
                on_complete: Some(Box::new(move |status: ExecutionStatus| {
                    *f.lock().unwrap() = Some(status)
                })),
            })
            .unwrap();
        signal.wait().unwrap();
        assert_eq!(*flag.lock().unwrap(), Some(ExecutionStatus::Complete));
    }

    #[test]
    fn panicking_operation_fails_its_event_and_keeps_the_queue() {
        let (ctx, dev) = setup();
        let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
        let kernel = crate::Kernel::builder(&ctx, "fault", 0).build(|_, _| panic!("device fault"));
        let invocation = kernel
            .specialize(crate::NdRange {
                work_dim: 1,
                global_offset: [0; 3],
                global_size: [1, 1, 1],
                local_size: [1, 1, 1],
            })
            .unwrap();

        let ev = queue.enqueue(Operation::Dispatch(invocation), &[]).unwrap();
        assert!(ev.wait().is_err());
        assert_eq!(
            ev.status(),
            ExecutionStatus::Error(Status::OutOfResources.code())
        );
        queue.enqueue_marker(&[]).unwrap().wait().unwrap();
    }

    #[test]
    fn foreign_events_and_objects_are_rejected() {
        let (ctx, dev) = setup();
        let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
        let (other_ctx, _) = setup();
        let foreign = Event::user(&other_ctx);
        assert_eq!(
            queue.enqueue_marker(&[foreign]).unwrap_err(),
            HalError::ForeignEvent
        );
        let foreign_buf = Buffer::new(&other_ctx, 4).unwrap();
        assert_eq!(
            queue
                .enqueue_write_buffer(&foreign_buf, 0, &[0; 4], &[])
                .unwrap_err(),
            HalError::ForeignMemObject
        );
    }

    #[test]
    fn profiling_queue_events_carry_timestamps() {
        let (ctx, dev) = setup();
        let queue = Queue::new(&ctx, &dev, QueueProperties::PROFILING_ENABLE).unwrap();
        let ev = queue.enqueue_marker(&[]).unwrap();
        ev.wait().unwrap();
        let info = ev.profiling_info().unwrap();
        assert!(info.queued <= info.end);
        queue.finish().unwrap();
    }
}
