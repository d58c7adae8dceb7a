use mux_hal::{CommandBufferCapabilities, Queue, QueueProperties};

use crate::error::{CommandBufferError, Result};

/// Why `queue` cannot run command buffers on its device, if it cannot.
pub(crate) fn unsuitable_reason(queue: &Queue) -> Option<&'static str> {
    let config = queue.device().config();
    if !queue
        .properties()
        .contains(config.command_buffer_required_queue_properties)
    {
        return Some("missing properties the device requires for command buffers");
    }
    if !queue.is_in_order()
        && !config
            .command_buffer_capabilities
            .contains(CommandBufferCapabilities::OUT_OF_ORDER)
    {
        return Some("device does not support out-of-order command buffers");
    }
    None
}

/// Validates queues substituted at enqueue time against the queues a command buffer was
/// created with.
#[derive(Debug, Clone, Copy)]
pub struct QueueCompatibilityChecker<'a> {
    originals: &'a [Queue],
}

impl<'a> QueueCompatibilityChecker<'a> {
    pub fn new(originals: &'a [Queue]) -> Self {
        Self { originals }
    }

    /// Returns the queues a replay runs on: the originals when `substitutes` is empty, else the
    /// substitutes after a position-by-position check.
    pub fn resolve(&self, substitutes: &[Queue]) -> Result<Vec<Queue>> {
        if substitutes.is_empty() {
            return Ok(self.originals.to_vec());
        }
        if substitutes.len() != self.originals.len() {
            return Err(CommandBufferError::SubstituteCount {
                expected: self.originals.len(),
                actual: substitutes.len(),
            });
        }
        for (index, (original, substitute)) in self.originals.iter().zip(substitutes).enumerate() {
            Self::check_one(index, original, substitute)?;
        }
        Ok(substitutes.to_vec())
    }

    fn check_one(index: usize, original: &Queue, substitute: &Queue) -> Result<()> {
        if substitute.context() != original.context() || substitute.device() != original.device()
        {
            return Err(CommandBufferError::SubstituteMismatch { index });
        }
        let incompatible = |reason| CommandBufferError::IncompatibleSubstitute { index, reason };
        if original.profiling_enabled()
            && !substitute
                .properties()
                .contains(QueueProperties::PROFILING_ENABLE)
        {
            return Err(incompatible("profiling is not enabled"));
        }
        // The executable graph leaves same-queue edges implicit for in-order queues.
        if original.is_in_order() && !substitute.is_in_order() {
            return Err(incompatible("out-of-order queue replacing an in-order queue"));
        }
        if let Some(reason) = unsuitable_reason(substitute) {
            return Err(incompatible(reason));
        }
        Ok(())
    }
}
