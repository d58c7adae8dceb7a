//! Pointer and count pairs as they arrive from a C entry point.
//!
//! A C array argument is modelled as `(count, Option<&[T]>)`. A list is well formed when both
//! are absent (`0`, `None`) or when a slice holding at least `count` elements is present;
//! anything else is rejected with the status the matching entry point reports.

use mux_hal::{Event, Queue};

use crate::error::{CommandBufferError, Result};
use crate::SyncPointId;

fn shape<T>(count: u32, list: Option<&[T]>) -> Option<&[T]> {
    let count = count as usize;
    match list {
        None if count == 0 => Some(&[]),
        Some(list) if count > 0 && list.len() >= count => Some(&list[..count]),
        _ => None,
    }
}

/// `num_sync_points_in_wait_list` / `sync_point_wait_list`.
pub fn sync_point_wait_list(count: u32, list: Option<&[SyncPointId]>) -> Result<&[SyncPointId]> {
    shape(count, list).ok_or(CommandBufferError::SyncPointWaitListShape)
}

/// `num_events_in_wait_list` / `event_wait_list`.
pub fn event_wait_list(count: u32, list: Option<&[Event]>) -> Result<&[Event]> {
    shape(count, list).ok_or(CommandBufferError::EventWaitListShape)
}

/// `num_queues` / `queues`, as taken by creation and by enqueue with substitutes.
pub fn queue_list(count: u32, list: Option<&[Queue]>) -> Result<&[Queue]> {
    shape(count, list).ok_or(CommandBufferError::QueueListShape)
}
