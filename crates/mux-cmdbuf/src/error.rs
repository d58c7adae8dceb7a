use mux_hal::{HalError, QueueId, Status};
use thiserror::Error;

use crate::{CommandBufferId, CommandBufferState, SyncPointId};

pub type Result<T> = std::result::Result<T, CommandBufferError>;

/// Coarse classification of a [`CommandBufferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Wrong lifecycle state, or the command buffer has been released.
    State,
    /// Dangling or forward sync points, malformed sync-point wait lists.
    Graph,
    /// Offsets, regions, pitches, sizes, overlap and image format checks.
    ResourceBounds,
    /// A queue unsuitable for the command buffer or for substitution.
    Compatibility,
    /// Properties, work-group configuration, contexts, kernel arguments, event wait lists.
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandBufferError {
    #[error("command buffer {0} has been released")]
    Released(CommandBufferId),

    #[error("command buffer is {actual:?}, operation requires {expected}")]
    InvalidState {
        actual: CommandBufferState,
        expected: &'static str,
    },

    #[error("command buffer is in flight and was not created for simultaneous use")]
    AlreadyPending,

    #[error("sync point {sync_point} has not been produced (next is {next})")]
    InvalidSyncPoint { sync_point: SyncPointId, next: u32 },

    #[error("sync-point wait list pointer and count disagree")]
    SyncPointWaitListShape,

    #[error("command buffer has produced every available sync point id")]
    SyncPointsExhausted,

    #[error("command {command} depends on command {dependency}, which is not recorded before it")]
    ForwardDependency { command: usize, dependency: usize },

    #[error("{0} must be non-zero")]
    ZeroSize(&'static str),

    #[error("{what} out of bounds: offset={offset} len={len} size={size}")]
    OutOfBounds {
        what: &'static str,
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("invalid pitch: {0}")]
    InvalidPitch(&'static str),

    #[error("invalid fill pattern size {0}")]
    InvalidPatternSize(usize),

    #[error("fill {what} {value} is not a multiple of the pattern size {pattern_size}")]
    UnalignedFill {
        what: &'static str,
        value: usize,
        pattern_size: usize,
    },

    #[error("invalid image region: {0}")]
    InvalidImageRegion(&'static str),

    #[error("source and destination regions overlap")]
    MemCopyOverlap,

    #[error("source and destination image formats differ")]
    ImageFormatMismatch,

    #[error("queue {index} does not share the first queue's context and device")]
    QueueMismatch { index: usize },

    #[error("queue {queue} cannot be used with command buffers: {reason}")]
    UnsuitableQueue {
        queue: QueueId,
        reason: &'static str,
    },

    #[error("expected {expected} substitute queues, got {actual}")]
    SubstituteCount { expected: usize, actual: usize },

    #[error("substitute queue {index} has a different context or device")]
    SubstituteMismatch { index: usize },

    #[error("substitute queue {index} is incompatible: {reason}")]
    IncompatibleSubstitute { index: usize, reason: &'static str },

    #[error("queue {0} is not one of the command buffer's queues")]
    ForeignQueue(QueueId),

    #[error("command buffer has several queues and the command does not name one")]
    AmbiguousQueue,

    #[error("a command buffer needs at least one queue")]
    EmptyQueueList,

    #[error("invalid command buffer properties: {0}")]
    InvalidProperties(&'static str),

    #[error("property {0} is not supported by the device")]
    UnsupportedProperty(&'static str),

    #[error("object belongs to a different context")]
    ContextMismatch,

    #[error("event wait list pointer and count disagree")]
    EventWaitListShape,

    #[error("queue list pointer and count disagree")]
    QueueListShape,

    #[error("work dimension {0} is outside 1..=3")]
    InvalidWorkDimension(u32),

    #[error("global work size is zero in dimension {0}")]
    InvalidGlobalWorkSize(usize),

    #[error("global offset plus global size overflows in dimension {0}")]
    InvalidGlobalOffset(usize),

    #[error("invalid local work size {size} in dimension {dim}")]
    InvalidWorkItemSize { dim: usize, size: usize },

    #[error("invalid work-group size: {0}")]
    InvalidWorkGroupSize(&'static str),

    #[error("invalid mutable command request: {0}")]
    InvalidMutableRequest(&'static str),

    #[error("mutable command handle does not name a dispatch of this command buffer")]
    InvalidMutableCommand,

    #[error(transparent)]
    Hal(#[from] HalError),
}

impl CommandBufferError {
    /// The OpenCL status code reported for this error.
    pub fn status(&self) -> Status {
        use CommandBufferError::*;
        match self {
            Released(_) => Status::InvalidCommandBuffer,
            InvalidState { .. } | AlreadyPending => Status::InvalidOperation,
            InvalidSyncPoint { .. } | SyncPointWaitListShape | ForwardDependency { .. } => {
                Status::InvalidSyncPointWaitList
            }
            ZeroSize(_)
            | OutOfBounds { .. }
            | InvalidPitch(_)
            | InvalidPatternSize(_)
            | UnalignedFill { .. }
            | InvalidImageRegion(_) => Status::InvalidValue,
            MemCopyOverlap => Status::MemCopyOverlap,
            ImageFormatMismatch => Status::ImageFormatMismatch,
            QueueMismatch { .. } | SubstituteCount { .. } | EmptyQueueList => Status::InvalidValue,
            UnsuitableQueue { .. } | IncompatibleSubstitute { .. } => {
                Status::IncompatibleCommandQueue
            }
            SubstituteMismatch { .. } | ForeignQueue(_) | AmbiguousQueue => {
                Status::InvalidCommandQueue
            }
            InvalidProperties(_) | QueueListShape | InvalidMutableRequest(_) => Status::InvalidValue,
            UnsupportedProperty(_) => Status::InvalidProperty,
            ContextMismatch => Status::InvalidContext,
            EventWaitListShape => Status::InvalidEventWaitList,
            InvalidWorkDimension(_) => Status::InvalidWorkDimension,
            InvalidGlobalWorkSize(_) => Status::InvalidGlobalWorkSize,
            InvalidGlobalOffset(_) => Status::InvalidGlobalOffset,
            InvalidWorkItemSize { .. } => Status::InvalidWorkItemSize,
            InvalidWorkGroupSize(_) => Status::InvalidWorkGroupSize,
            InvalidMutableCommand => Status::InvalidMutableCommand,
            SyncPointsExhausted => Status::OutOfResources,
            Hal(err) => err.status(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use CommandBufferError::*;
        match self {
            Released(_) | InvalidState { .. } | AlreadyPending => ErrorKind::State,
            InvalidSyncPoint { .. }
            | SyncPointWaitListShape
            | ForwardDependency { .. }
            | SyncPointsExhausted => ErrorKind::Graph,
            ZeroSize(_)
            | OutOfBounds { .. }
            | InvalidPitch(_)
            | InvalidPatternSize(_)
            | UnalignedFill { .. }
            | InvalidImageRegion(_)
            | MemCopyOverlap
            | ImageFormatMismatch => ErrorKind::ResourceBounds,
            QueueMismatch { .. }
            | UnsuitableQueue { .. }
            | SubstituteMismatch { .. }
            | IncompatibleSubstitute { .. }
            | ForeignQueue(_)
            | AmbiguousQueue => ErrorKind::Compatibility,
            // A wrong substitute count is an argument error rather than a queue mismatch.
            SubstituteCount { .. }
            | EmptyQueueList
            | InvalidProperties(_)
            | UnsupportedProperty(_)
            | ContextMismatch
            | EventWaitListShape
            | QueueListShape
            | InvalidWorkDimension(_)
            | InvalidGlobalWorkSize(_)
            | InvalidGlobalOffset(_)
            | InvalidWorkItemSize { .. }
            | InvalidWorkGroupSize(_)
            | InvalidMutableRequest(_)
            | InvalidMutableCommand
            | Hal(_) => ErrorKind::Value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_representative_status() {
        let cases = [
            (
                CommandBufferError::AlreadyPending,
                ErrorKind::State,
                Status::InvalidOperation,
            ),
            (
                CommandBufferError::InvalidSyncPoint {
                    sync_point: SyncPointId::new(3),
                    next: 1,
                },
                ErrorKind::Graph,
                Status::InvalidSyncPointWaitList,
            ),
            (
                CommandBufferError::MemCopyOverlap,
                ErrorKind::ResourceBounds,
                Status::MemCopyOverlap,
            ),
            (
                CommandBufferError::IncompatibleSubstitute {
                    index: 0,
                    reason: "profiling",
                },
                ErrorKind::Compatibility,
                Status::IncompatibleCommandQueue,
            ),
            (
                CommandBufferError::SubstituteCount {
                    expected: 1,
                    actual: 2,
                },
                ErrorKind::Value,
                Status::InvalidValue,
            ),
        ];
        for (err, kind, status) in cases {
            assert_eq!(err.kind(), kind, "{err}");
            assert_eq!(err.status(), status, "{err}");
        }
    }

    #[test]
    fn hal_errors_keep_their_status() {
        let err = CommandBufferError::from(HalError::KernelArgsNotSet("k".into()));
        assert_eq!(err.status(), Status::InvalidKernelArgs);
        assert_eq!(err.to_string(), "kernel `k` has unset arguments");
    }
}
