/// OpenCL status codes surfaced across the runtime's public boundary.
///
/// Values match the `CL_*` constants (including the `cl_khr_command_buffer` and
/// `cl_khr_command_buffer_mutable_dispatch` additions) so a C entry-point layer can return
/// [`Status::code`] unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    OutOfResources = -5,
    ProfilingInfoNotAvailable = -7,
    MemCopyOverlap = -8,
    ImageFormatMismatch = -9,
    ExecStatusErrorForEventsInWaitList = -14,
    InvalidValue = -30,
    InvalidDevice = -33,
    InvalidContext = -34,
    InvalidQueueProperties = -35,
    InvalidCommandQueue = -36,
    InvalidMemObject = -38,
    InvalidImageSize = -40,
    InvalidKernel = -48,
    InvalidArgIndex = -49,
    InvalidKernelArgs = -52,
    InvalidWorkDimension = -53,
    InvalidWorkGroupSize = -54,
    InvalidWorkItemSize = -55,
    InvalidGlobalOffset = -56,
    InvalidEventWaitList = -57,
    InvalidEvent = -58,
    InvalidOperation = -59,
    InvalidGlobalWorkSize = -63,
    InvalidProperty = -64,
    InvalidCommandBuffer = -1138,
    InvalidSyncPointWaitList = -1139,
    IncompatibleCommandQueue = -1140,
    InvalidMutableCommand = -1141,
}

impl Status {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Status::Success => "CL_SUCCESS",
            Status::OutOfResources => "CL_OUT_OF_RESOURCES",
            Status::ProfilingInfoNotAvailable => "CL_PROFILING_INFO_NOT_AVAILABLE",
            Status::MemCopyOverlap => "CL_MEM_COPY_OVERLAP",
            Status::ImageFormatMismatch => "CL_IMAGE_FORMAT_MISMATCH",
            Status::ExecStatusErrorForEventsInWaitList => {
                "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
            }
            Status::InvalidValue => "CL_INVALID_VALUE",
            Status::InvalidDevice => "CL_INVALID_DEVICE",
            Status::InvalidContext => "CL_INVALID_CONTEXT",
            Status::InvalidQueueProperties => "CL_INVALID_QUEUE_PROPERTIES",
            Status::InvalidCommandQueue => "CL_INVALID_COMMAND_QUEUE",
            Status::InvalidMemObject => "CL_INVALID_MEM_OBJECT",
            Status::InvalidImageSize => "CL_INVALID_IMAGE_SIZE",
            Status::InvalidKernel => "CL_INVALID_KERNEL",
            Status::InvalidArgIndex => "CL_INVALID_ARG_INDEX",
            Status::InvalidKernelArgs => "CL_INVALID_KERNEL_ARGS",
            Status::InvalidWorkDimension => "CL_INVALID_WORK_DIMENSION",
            Status::InvalidWorkGroupSize => "CL_INVALID_WORK_GROUP_SIZE",
            Status::InvalidWorkItemSize => "CL_INVALID_WORK_ITEM_SIZE",
            Status::InvalidGlobalOffset => "CL_INVALID_GLOBAL_OFFSET",
            Status::InvalidEventWaitList => "CL_INVALID_EVENT_WAIT_LIST",
            Status::InvalidEvent => "CL_INVALID_EVENT",
            Status::InvalidOperation => "CL_INVALID_OPERATION",
            Status::InvalidGlobalWorkSize => "CL_INVALID_GLOBAL_WORK_SIZE",
            Status::InvalidProperty => "CL_INVALID_PROPERTY",
            Status::InvalidCommandBuffer => "CL_INVALID_COMMAND_BUFFER_KHR",
            Status::InvalidSyncPointWaitList => "CL_INVALID_SYNC_POINT_WAIT_LIST_KHR",
            Status::IncompatibleCommandQueue => "CL_INCOMPATIBLE_COMMAND_QUEUE_KHR",
            Status::InvalidMutableCommand => "CL_INVALID_MUTABLE_COMMAND_KHR",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_opencl_headers() {
        assert_eq!(Status::InvalidValue.code(), -30);
        assert_eq!(Status::InvalidOperation.code(), -59);
        assert_eq!(Status::MemCopyOverlap.code(), -8);
        assert_eq!(Status::InvalidCommandBuffer.code(), -1138);
        assert_eq!(Status::IncompatibleCommandQueue.code(), -1140);
    }

    #[test]
    fn display_includes_name_and_code() {
        assert_eq!(
            Status::InvalidSyncPointWaitList.to_string(),
            "CL_INVALID_SYNC_POINT_WAIT_LIST_KHR (-1139)"
        );
    }
}
