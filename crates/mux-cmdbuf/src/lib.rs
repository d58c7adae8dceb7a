//! Command-buffer execution engine on top of the mux HAL.
//!
//! A [`CommandBuffer`] records device commands (kernel dispatches, buffer and image copies,
//! fills and barriers) with explicit [`SyncPointId`] dependencies, is finalized into an
//! immutable schedule, and can then be enqueued any number of times, optionally on substitute
//! queues checked by [`QueueCompatibilityChecker`]. Each enqueue returns a completion
//! [`mux_hal::Event`].
//!
//! ```text
//! append* (recording) -> finalize (executable) -> enqueue (pending) -> completion (executable)
//! ```

#![forbid(unsafe_code)]

pub mod abi;
mod command;
mod command_buffer;
mod compat;
mod enqueue;
mod error;
mod finalize;
mod mutable;
mod ndrange;
mod properties;
mod sync_point;
mod validate;

pub use command::{
    Command, CopyBuffer, CopyBufferRect, CopyBufferToImage, CopyImage, CopyImageToBuffer,
    Dispatch, FillBuffer, FillImage,
};
pub use command_buffer::{
    AppendOptions, Appended, CommandBuffer, CommandBufferId, CommandBufferState,
};
pub use compat::QueueCompatibilityChecker;
pub use error::{CommandBufferError, ErrorKind, Result};
pub use mutable::{MutableCommand, MutableDispatchUpdate};
pub use properties::{CommandBufferFlags, CommandBufferProperties, COMMAND_BUFFER_FLAGS};
pub use sync_point::{SyncPointGraph, SyncPointId};
