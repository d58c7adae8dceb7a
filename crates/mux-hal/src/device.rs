use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{HalError, Result};
use crate::DeviceConfig;

bitflags! {
    /// `cl_device_command_buffer_capabilities_khr`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CommandBufferCapabilities: u64 {
        const KERNEL_PRINTF = 1 << 0;
        const DEVICE_SIDE_ENQUEUE = 1 << 1;
        const SIMULTANEOUS_USE = 1 << 2;
        const OUT_OF_ORDER = 1 << 3;
    }
}

macro_rules! object_id {
    ($name:ident, $counter:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        static $counter: ::std::sync::atomic::AtomicU64 =
            ::std::sync::atomic::AtomicU64::new(1);

        impl $name {
            pub(crate) fn next() -> Self {
                Self($counter.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed))
            }

            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use object_id;

object_id!(DeviceId, NEXT_DEVICE_ID);
object_id!(ContextId, NEXT_CONTEXT_ID);

#[derive(Debug)]
struct DeviceInner {
    id: DeviceId,
    config: DeviceConfig,
}

/// A host compute device.
#[derive(Debug, Clone)]
pub struct Device(Arc<DeviceInner>);

impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        Self(Arc::new(DeviceInner {
            id: DeviceId::next(),
            config,
        }))
    }

    pub fn id(&self) -> DeviceId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.config.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.0.config
    }

    pub fn command_buffer_capabilities(&self) -> CommandBufferCapabilities {
        self.0.config.command_buffer_capabilities
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Device {}

#[derive(Debug)]
struct ContextInner {
    id: ContextId,
    devices: Vec<Device>,
}

/// A set of devices sharing memory objects, kernels and events.
#[derive(Debug, Clone)]
pub struct Context(Arc<ContextInner>);

impl Context {
    pub fn new(devices: &[Device]) -> Result<Self> {
        if devices.is_empty() {
            return Err(HalError::EmptyContext);
        }
        let mut unique: Vec<Device> = Vec::with_capacity(devices.len());
        for device in devices {
            if !unique.contains(device) {
                unique.push(device.clone());
            }
        }
        Ok(Self(Arc::new(ContextInner {
            id: ContextId::next(),
            devices: unique,
        })))
    }

    pub fn id(&self) -> ContextId {
        self.0.id
    }

    pub fn devices(&self) -> &[Device] {
        &self.0.devices
    }

    pub fn contains(&self, device: &Device) -> bool {
        self.0.devices.contains(device)
    }

    pub fn image_support(&self) -> bool {
        self.0.devices.iter().any(|d| d.config().image_support)
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Context {}
