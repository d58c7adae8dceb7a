//! `cl_command_buffer_properties_khr` parsing.

use bitflags::bitflags;

use crate::error::{CommandBufferError, Result};

/// `CL_COMMAND_BUFFER_FLAGS_KHR`.
pub const COMMAND_BUFFER_FLAGS: u64 = 0x1293;

bitflags! {
    /// `cl_command_buffer_flags_khr`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct CommandBufferFlags: u64 {
        /// `CL_COMMAND_BUFFER_SIMULTANEOUS_USE_KHR`.
        const SIMULTANEOUS_USE = 1 << 0;
        /// `CL_COMMAND_BUFFER_MUTABLE_KHR`.
        const MUTABLE = 1 << 1;
    }
}

/// Parsed creation properties, together with the list exactly as the caller passed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBufferProperties {
    flags: CommandBufferFlags,
    raw: Vec<u64>,
}

impl CommandBufferProperties {
    /// Parses a zero-terminated key/value list.
    ///
    /// The end of the slice also terminates the list; anything after a terminating zero is not
    /// part of it.
    pub fn parse(list: Option<&[u64]>) -> Result<Self> {
        let Some(list) = list else {
            return Ok(Self::default());
        };

        let mut flags = None;
        let mut pos = 0;
        let mut raw_len = list.len();
        while pos < list.len() {
            let key = list[pos];
            if key == 0 {
                raw_len = pos + 1;
                break;
            }
            let value = *list
                .get(pos + 1)
                .ok_or(CommandBufferError::InvalidProperties("key without a value"))?;
            match key {
                COMMAND_BUFFER_FLAGS => {
                    if flags.is_some() {
                        return Err(CommandBufferError::InvalidProperties("duplicate key"));
                    }
                    let parsed = CommandBufferFlags::from_bits(value)
                        .ok_or(CommandBufferError::InvalidProperties("unknown flag bits"))?;
                    flags = Some(parsed);
                }
                _ => return Err(CommandBufferError::InvalidProperties("unknown key")),
            }
            pos += 2;
        }

        Ok(Self {
            flags: flags.unwrap_or_default(),
            raw: list[..raw_len].to_vec(),
        })
    }

    /// Properties carrying just `flags`, as if the caller passed `[FLAGS, bits, 0]`.
    pub fn from_flags(flags: CommandBufferFlags) -> Self {
        Self {
            flags,
            raw: vec![COMMAND_BUFFER_FLAGS, flags.bits(), 0],
        }
    }

    pub fn flags(&self) -> CommandBufferFlags {
        self.flags
    }

    pub fn simultaneous_use(&self) -> bool {
        self.flags.contains(CommandBufferFlags::SIMULTANEOUS_USE)
    }

    pub fn mutable(&self) -> bool {
        self.flags.contains(CommandBufferFlags::MUTABLE)
    }

    /// `CL_COMMAND_BUFFER_PROPERTIES_ARRAY_KHR`: the list as supplied, empty when none was.
    pub fn raw(&self) -> &[u64] {
        &self.raw
    }
}
