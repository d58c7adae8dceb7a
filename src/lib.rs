//! `muxrt`: a host OpenCL-style runtime with `cl_khr_command_buffer` support.
//!
//! - [`hal`]: devices, contexts, buffers and images, kernels, events and command queues.
//! - [`cmdbuf`]: command buffers recorded once and replayed on those queues.

#![forbid(unsafe_code)]

pub use mux_cmdbuf as cmdbuf;
pub use mux_hal as hal;

pub use mux_cmdbuf::{
    AppendOptions, CommandBuffer, CommandBufferError, CommandBufferFlags, CommandBufferState,
    SyncPointId,
};
pub use mux_hal::{Context, Device, DeviceConfig, Event, Queue, QueueProperties, Status};
