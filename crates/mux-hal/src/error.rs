use thiserror::Error;

use crate::{ContextId, DeviceId, QueueId, QueueProperties, Status};

pub type Result<T> = std::result::Result<T, HalError>;

/// Errors reported by the host HAL.
///
/// Every variant maps onto an OpenCL status via [`HalError::status`] so callers above the HAL can
/// forward failures without inventing their own codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("a context needs at least one device")]
    EmptyContext,

    #[error("device {device} is not part of context {context}")]
    DeviceNotInContext { device: DeviceId, context: ContextId },

    #[error("device {device} does not support queue properties {properties:?}")]
    UnsupportedQueueProperties {
        device: DeviceId,
        properties: QueueProperties,
    },

    #[error("invalid buffer size {0}")]
    InvalidBufferSize(usize),

    #[error("invalid image description: {0}")]
    InvalidImageDesc(&'static str),

    #[error("no device in context {0} supports images")]
    ImagesNotSupported(ContextId),

    #[error("out of bounds: offset={offset} len={len} size={size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("argument index {index} out of range (kernel has {num_args} arguments)")]
    InvalidArgIndex { index: u32, num_args: u32 },

    #[error("kernel `{0}` has unset arguments")]
    KernelArgsNotSet(String),

    #[error("memory object belongs to a different context")]
    ForeignMemObject,

    #[error("event belongs to a different context")]
    ForeignEvent,

    #[error("fill colour does not match the image channel type")]
    FillColorMismatch,

    #[error("not a user event")]
    NotUserEvent,

    #[error("user event status has already been set")]
    UserEventAlreadySet,

    #[error("invalid execution status {0}")]
    InvalidExecutionStatus(i32),

    #[error("profiling information is not available")]
    ProfilingInfoNotAvailable,

    #[error("an event in the wait list terminated abnormally")]
    WaitListFailed,

    #[error("queue {0} has shut down")]
    QueueShutDown(QueueId),
}

impl HalError {
    pub fn status(&self) -> Status {
        match self {
            HalError::EmptyContext => Status::InvalidValue,
            HalError::DeviceNotInContext { .. } => Status::InvalidDevice,
            HalError::UnsupportedQueueProperties { .. } => Status::InvalidQueueProperties,
            HalError::InvalidBufferSize(_) => Status::InvalidValue,
            HalError::InvalidImageDesc(_) => Status::InvalidImageSize,
            HalError::ImagesNotSupported(_) => Status::InvalidOperation,
            HalError::OutOfBounds { .. } => Status::InvalidValue,
            HalError::InvalidArgIndex { .. } => Status::InvalidArgIndex,
            HalError::KernelArgsNotSet(_) => Status::InvalidKernelArgs,
            HalError::ForeignMemObject => Status::InvalidMemObject,
            HalError::ForeignEvent => Status::InvalidContext,
            HalError::FillColorMismatch => Status::InvalidValue,
            HalError::NotUserEvent => Status::InvalidEvent,
            HalError::UserEventAlreadySet => Status::InvalidOperation,
            HalError::InvalidExecutionStatus(_) => Status::InvalidValue,
            HalError::ProfilingInfoNotAvailable => Status::ProfilingInfoNotAvailable,
            HalError::WaitListFailed => Status::ExecStatusErrorForEventsInWaitList,
            HalError::QueueShutDown(_) => Status::InvalidCommandQueue,
        }
    }
}
