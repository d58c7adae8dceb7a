use serde::{Deserialize, Serialize};

use crate::{CommandBufferCapabilities, QueueProperties};

/// Limits and capabilities of a host device.
///
/// Missing fields fall back to [`DeviceConfig::default`], so a JSON profile only needs to list
/// what differs from the stock host device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    /// `CL_DEVICE_MAX_WORK_ITEM_SIZES`.
    pub max_work_item_sizes: [usize; 3],
    /// `CL_DEVICE_MAX_WORK_GROUP_SIZE`.
    pub max_work_group_size: usize,
    pub image_support: bool,
    /// Queue properties the device accepts at queue creation.
    pub supported_queue_properties: QueueProperties,
    /// `CL_DEVICE_COMMAND_BUFFER_CAPABILITIES_KHR`.
    pub command_buffer_capabilities: CommandBufferCapabilities,
    /// `CL_DEVICE_COMMAND_BUFFER_REQUIRED_QUEUE_PROPERTIES_KHR`.
    pub command_buffer_required_queue_properties: QueueProperties,
    /// Whether `cl_khr_command_buffer_mutable_dispatch` is exposed.
    pub mutable_dispatch: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "mux host".to_owned(),
            max_work_item_sizes: [1024, 1024, 64],
            max_work_group_size: 1024,
            image_support: true,
            supported_queue_properties: QueueProperties::all(),
            command_buffer_capabilities: CommandBufferCapabilities::SIMULTANEOUS_USE
                | CommandBufferCapabilities::OUT_OF_ORDER,
            command_buffer_required_queue_properties: QueueProperties::empty(),
            mutable_dispatch: true,
        }
    }
}

impl DeviceConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_json_is_the_default_profile() {
        assert_eq!(DeviceConfig::from_json("{}").unwrap(), DeviceConfig::default());
    }

    #[test]
    fn partial_json_overrides_listed_fields() {
        let cfg = DeviceConfig::from_json(
            r#"{
                "name": "tiny",
                "max_work_group_size": 64,
                "image_support": false,
                "command_buffer_capabilities": "",
                "command_buffer_required_queue_properties": "PROFILING_ENABLE"
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.name, "tiny");
        assert_eq!(cfg.max_work_group_size, 64);
        assert!(!cfg.image_support);
        assert_eq!(cfg.command_buffer_capabilities, CommandBufferCapabilities::empty());
        assert_eq!(
            cfg.command_buffer_required_queue_properties,
            QueueProperties::PROFILING_ENABLE
        );
        assert_eq!(cfg.max_work_item_sizes, [1024, 1024, 64]);
    }
}
