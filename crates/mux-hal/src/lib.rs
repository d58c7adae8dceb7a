//! Host hardware abstraction layer for the mux runtime.
//!
//! This crate provides the device-facing half of the runtime that the command-buffer layer
//! records against and submits to:
//!
//! - [`Device`] / [`Context`]: host devices described by a [`DeviceConfig`]
//! - [`Buffer`] / [`Image`]: host-memory objects
//! - [`Kernel`]: a compiled kernel with argument slots, executed per work-item on the host
//! - [`Queue`]: a FIFO worker thread consuming [`Submission`]s
//! - [`Event`]: completion tracking with status callbacks and profiling timestamps
//!
//! Everything fallible returns [`HalError`], which maps onto an OpenCL [`Status`].

#![forbid(unsafe_code)]

mod config;
mod device;
mod error;
mod event;
mod kernel;
mod memory;
mod ops;
mod queue;
mod status;

pub use config::DeviceConfig;
pub use device::{CommandBufferCapabilities, Context, ContextId, Device, DeviceId};
pub use error::{HalError, Result};
pub use event::{CommandType, Event, EventId, ExecutionStatus, ProfilingInfo};
pub use kernel::{
    Kernel, KernelArg, KernelBody, KernelBuilder, KernelId, KernelInvocation, NdRange, WorkItem,
};
pub use memory::{
    Buffer, ChannelOrder, ChannelType, FillColor, Image, ImageDesc, ImageFormat, ImageType,
    MemObjectId,
};
pub use ops::{Operation, Readback, RectPitch};
pub use queue::{CompletionHook, Queue, QueueId, QueueProperties, Submission};
pub use status::Status;
