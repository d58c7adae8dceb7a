use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use crate::device::object_id;
use crate::error::{HalError, Result};
use crate::{Context, QueueId, Status};

object_id!(EventId, NEXT_EVENT_ID);

/// `cl_int` execution status of an event.
///
/// Statuses only move forward: `Queued` → `Submitted` → `Running` → `Complete`, or to an error
/// (a negative code) from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    Error(i32),
}

impl ExecutionStatus {
    pub fn as_raw(self) -> i32 {
        match self {
            ExecutionStatus::Complete => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::Submitted => 2,
            ExecutionStatus::Queued => 3,
            ExecutionStatus::Error(code) => code,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ExecutionStatus::Complete),
            1 => Some(ExecutionStatus::Running),
            2 => Some(ExecutionStatus::Submitted),
            3 => Some(ExecutionStatus::Queued),
            code if code < 0 => Some(ExecutionStatus::Error(code)),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Complete | ExecutionStatus::Error(_))
    }

    /// Whether an event in this status has progressed at least as far as `target`.
    pub fn has_reached(self, target: ExecutionStatus) -> bool {
        self.as_raw() <= target.as_raw()
    }

    pub(crate) fn from_status(status: Status) -> Self {
        ExecutionStatus::Error(status.code())
    }
}

/// `cl_command_type` of the command an event tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    NdRangeKernel,
    ReadBuffer,
    WriteBuffer,
    CopyBuffer,
    CopyBufferRect,
    CopyImage,
    CopyImageToBuffer,
    CopyBufferToImage,
    FillBuffer,
    FillImage,
    Marker,
    Barrier,
    User,
    CommandBuffer,
}

/// `CL_PROFILING_COMMAND_*` timestamps in nanoseconds since the process-local epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilingInfo {
    pub queued: u64,
    pub submit: u64,
    pub start: u64,
    pub end: u64,
}

fn now_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

type Callback = Box<dyn FnOnce(&Event, ExecutionStatus) + Send>;

struct EventState {
    status: ExecutionStatus,
    callbacks: Vec<(ExecutionStatus, Callback)>,
    timestamps: [Option<u64>; 4],
}

struct EventInner {
    id: EventId,
    context: Context,
    command_type: CommandType,
    queue: Option<QueueId>,
    profiling: bool,
    state: Mutex<EventState>,
    changed: Condvar,
}

/// Completion handle for a unit of enqueued work.
///
/// Cloning retains the event and dropping releases it; [`Event::reference_count`] reports the
/// number of live handles.
#[derive(Clone)]
pub struct Event(Arc<EventInner>);

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.0.id)
            .field("command_type", &self.0.command_type)
            .field("status", &self.status())
            .finish()
    }
}

impl Event {
    pub(crate) fn new(
        context: &Context,
        command_type: CommandType,
        queue: Option<QueueId>,
        profiling: bool,
    ) -> Self {
        let mut timestamps = [None; 4];
        let status = if command_type == CommandType::User {
            ExecutionStatus::Submitted
        } else {
            timestamps[0] = profiling.then(now_ns);
            ExecutionStatus::Queued
        };
        Self(Arc::new(EventInner {
            id: EventId::next(),
            context: context.clone(),
            command_type,
            queue,
            profiling,
            state: Mutex::new(EventState {
                status,
                callbacks: Vec::new(),
                timestamps,
            }),
            changed: Condvar::new(),
        }))
    }

    /// `clCreateUserEvent`: an event whose completion is driven by the host.
    pub fn user(context: &Context) -> Self {
        Self::new(context, CommandType::User, None, false)
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        match self.0.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn id(&self) -> EventId {
        self.0.id
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn command_type(&self) -> CommandType {
        self.0.command_type
    }

    /// The queue the event's command was submitted to; `None` for user events.
    pub fn queue(&self) -> Option<QueueId> {
        self.0.queue
    }

    pub fn status(&self) -> ExecutionStatus {
        self.lock().status
    }

    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn same(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Advances the status and runs every callback whose threshold has been reached.
    ///
    /// Regressions (including anything after a terminal status) are ignored.
    pub(crate) fn set_status(&self, status: ExecutionStatus) {
        let ready = {
            let mut state = self.lock();
            if state.status.is_terminal()
                || status == state.status
                || !status.has_reached(state.status)
            {
                return;
            }
            state.status = status;
            if self.0.profiling {
                let now = now_ns();
                let slot = match status {
                    ExecutionStatus::Queued => 0,
                    ExecutionStatus::Submitted => 1,
                    ExecutionStatus::Running => 2,
                    ExecutionStatus::Complete | ExecutionStatus::Error(_) => 3,
                };
                for ts in state.timestamps.iter_mut().take(slot + 1) {
                    ts.get_or_insert(now);
                }
            }
            let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.callbacks)
                .into_iter()
                .partition(|(target, _)| status.has_reached(*target));
            state.callbacks = pending;
            ready
        };
        self.0.changed.notify_all();
        for (target, callback) in ready {
            callback(self, Self::reported_status(target, status));
        }
    }

    /// The status passed to a callback registered for `target` once the event reached `current`.
    ///
    /// Callbacks receive the status they were registered for; an abnormal termination reports the
    /// error code instead so the callback can tell that the command never completed.
    fn reported_status(target: ExecutionStatus, current: ExecutionStatus) -> ExecutionStatus {
        match current {
            ExecutionStatus::Error(_) => current,
            _ => target,
        }
    }

    /// `clSetUserEventStatus`.
    pub fn set_user_status(&self, status: ExecutionStatus) -> Result<()> {
        if self.0.command_type != CommandType::User {
            return Err(HalError::NotUserEvent);
        }
        if !status.is_terminal() {
            return Err(HalError::InvalidExecutionStatus(status.as_raw()));
        }
        if self.status().is_terminal() {
            return Err(HalError::UserEventAlreadySet);
        }
        self.set_status(status);
        Ok(())
    }

    /// `clSetEventCallback`. Only `Submitted`, `Running` and `Complete` are valid thresholds.
    ///
    /// A callback whose threshold has already been reached runs immediately on the calling thread;
    /// otherwise it runs on whichever thread advances the status.
    pub fn on_status(
        &self,
        target: ExecutionStatus,
        callback: impl FnOnce(&Event, ExecutionStatus) + Send + 'static,
    ) -> Result<()> {
        if !matches!(
            target,
            ExecutionStatus::Submitted | ExecutionStatus::Running | ExecutionStatus::Complete
        ) {
            return Err(HalError::InvalidExecutionStatus(target.as_raw()));
        }
        let current = {
            let mut state = self.lock();
            if !state.status.has_reached(target) {
                state.callbacks.push((target, Box::new(callback)));
                return Ok(());
            }
            state.status
        };
        callback(self, Self::reported_status(target, current));
        Ok(())
    }

    /// Blocks until the event is terminal. Fails if it terminated abnormally.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.lock();
        while !state.status.is_terminal() {
            state = match self.0.changed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        match state.status {
            ExecutionStatus::Error(_) => Err(HalError::WaitListFailed),
            _ => Ok(()),
        }
    }

    /// `clWaitForEvents`: waits for every event, then reports whether any failed.
    pub fn wait_all(events: &[Event]) -> Result<()> {
        let mut result = Ok(());
        for event in events {
            if let Err(err) = event.wait() {
                result = Err(err);
            }
        }
        result
    }

    /// `clGetEventProfilingInfo`. Only available once the event completed on a queue created
    /// with profiling enabled.
    pub fn profiling_info(&self) -> Result<ProfilingInfo> {
        let state = self.lock();
        if !self.0.profiling || state.status != ExecutionStatus::Complete {
            return Err(HalError::ProfilingInfoNotAvailable);
        }
        match state.timestamps {
            [Some(queued), Some(submit), Some(start), Some(end)] => Ok(ProfilingInfo {
                queued,
                submit,
                start,
                end,
            }),
            _ => Err(HalError::ProfilingInfoNotAvailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, DeviceConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> Context {
        Context::new(&[Device::new(DeviceConfig::default())]).unwrap()
    }

    #[test]
    fn status_never_regresses() {
        let ev = Event::new(&context(), CommandType::Marker, None, false);
        assert_eq!(ev.status(), ExecutionStatus::Queued);
        ev.set_status(ExecutionStatus::Running);
        ev.set_status(ExecutionStatus::Submitted);
        assert_eq!(ev.status(), ExecutionStatus::Running);
        ev.set_status(ExecutionStatus::Complete);
        ev.set_status(ExecutionStatus::Error(-5));
        assert_eq!(ev.status(), ExecutionStatus::Complete);
    }

    #[test]
    fn callbacks_report_their_registered_threshold() {
        let ev = Event::new(&context(), CommandType::Marker, None, false);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for target in [
            ExecutionStatus::Submitted,
            ExecutionStatus::Running,
            ExecutionStatus::Complete,
        ] {
            let seen = seen.clone();
            ev.on_status(target, move |_, status| seen.lock().unwrap().push(status))
                .unwrap();
        }

        // Jumping straight to Complete fires all three, each with its own threshold.
        ev.set_status(ExecutionStatus::Complete);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|s| s.as_raw());
        assert_eq!(
            seen,
            vec![
                ExecutionStatus::Complete,
                ExecutionStatus::Running,
                ExecutionStatus::Submitted
            ]
        );
    }

    #[test]
    fn late_callback_runs_immediately_and_errors_are_reported() {
        let ev = Event::user(&context());
        ev.set_user_status(ExecutionStatus::Error(-42)).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        ev.on_status(ExecutionStatus::Complete, move |_, status| {
            assert_eq!(status, ExecutionStatus::Error(-42));
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(ev.wait().unwrap_err(), HalError::WaitListFailed);
    }

    #[test]
    fn user_event_rules() {
        let ev = Event::user(&context());
        assert_eq!(ev.status(), ExecutionStatus::Submitted);
        assert_eq!(
            ev.set_user_status(ExecutionStatus::Running).unwrap_err(),
            HalError::InvalidExecutionStatus(1)
        );
        ev.set_user_status(ExecutionStatus::Complete).unwrap();
        assert_eq!(
            ev.set_user_status(ExecutionStatus::Complete).unwrap_err(),
            HalError::UserEventAlreadySet
        );
        ev.wait().unwrap();

        let marker = Event::new(&context(), CommandType::Marker, None, false);
        assert_eq!(
            marker.set_user_status(ExecutionStatus::Complete).unwrap_err(),
            HalError::NotUserEvent
        );
        assert!(ev
            .on_status(ExecutionStatus::Queued, |_, _| {})
            .is_err());
    }

    #[test]
    fn wait_blocks_until_another_thread_completes() {
        let ev = Event::user(&context());
        let signaller = ev.clone();
        assert_eq!(ev.reference_count(), 2);
        let t = std::thread::spawn(move || {
            signaller.set_user_status(ExecutionStatus::Complete).unwrap();
        });
        ev.wait().unwrap();
        t.join().unwrap();
        assert_eq!(ev.reference_count(), 1);
    }

    #[test]
    fn profiling_timestamps_are_ordered() {
        let ev = Event::new(&context(), CommandType::Marker, None, true);
        assert_eq!(
            ev.profiling_info().unwrap_err(),
            HalError::ProfilingInfoNotAvailable
        );
        ev.set_status(ExecutionStatus::Submitted);
        ev.set_status(ExecutionStatus::Running);
        ev.set_status(ExecutionStatus::Complete);
        let info = ev.profiling_info().unwrap();
        assert!(info.queued <= info.submit);
        assert!(info.submit <= info.start);
        assert!(info.start <= info.end);

        let plain = Event::new(&context(), CommandType::Marker, None, false);
        plain.set_status(ExecutionStatus::Complete);
        assert!(plain.profiling_info().is_err());
    }
}
