//! Commands that can be recorded into a command buffer.

use mux_hal::{Buffer, CommandType, FillColor, Image, Kernel};

/// `clCommandCopyBufferKHR`.
#[derive(Debug, Clone)]
pub struct CopyBuffer {
    pub src: Buffer,
    pub dst: Buffer,
    pub src_offset: usize,
    pub dst_offset: usize,
    pub size: usize,
}

/// `clCommandCopyBufferRectKHR`. A zero pitch means tightly packed.
#[derive(Debug, Clone)]
pub struct CopyBufferRect {
    pub src: Buffer,
    pub dst: Buffer,
    pub src_origin: [usize; 3],
    pub dst_origin: [usize; 3],
    pub region: [usize; 3],
    pub src_row_pitch: usize,
    pub src_slice_pitch: usize,
    pub dst_row_pitch: usize,
    pub dst_slice_pitch: usize,
}

/// `clCommandCopyImageKHR`.
#[derive(Debug, Clone)]
pub struct CopyImage {
    pub src: Image,
    pub dst: Image,
    pub src_origin: [usize; 3],
    pub dst_origin: [usize; 3],
    pub region: [usize; 3],
}

/// `clCommandCopyBufferToImageKHR`. Buffer data is tightly packed.
#[derive(Debug, Clone)]
pub struct CopyBufferToImage {
    pub src: Buffer,
    pub dst: Image,
    pub src_offset: usize,
    pub dst_origin: [usize; 3],
    pub region: [usize; 3],
}

/// `clCommandCopyImageToBufferKHR`.
#[derive(Debug, Clone)]
pub struct CopyImageToBuffer {
    pub src: Image,
    pub dst: Buffer,
    pub src_origin: [usize; 3],
    pub region: [usize; 3],
    pub dst_offset: usize,
}

/// `clCommandFillBufferKHR`.
#[derive(Debug, Clone)]
pub struct FillBuffer {
    pub buffer: Buffer,
    pub pattern: Vec<u8>,
    pub offset: usize,
    pub size: usize,
}

/// `clCommandFillImageKHR`.
#[derive(Debug, Clone)]
pub struct FillImage {
    pub image: Image,
    pub color: FillColor,
    pub origin: [usize; 3],
    pub region: [usize; 3],
}

/// `clCommandNDRangeKernelKHR`.
///
/// Only the first `work_dim` entries of each array are meaningful. Kernel arguments are captured
/// from the kernel object when the command is appended.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub kernel: Kernel,
    pub work_dim: u32,
    pub global_offset: Option<[usize; 3]>,
    pub global_size: [usize; 3],
    /// `None` lets the runtime pick a work-group size.
    pub local_size: Option<[usize; 3]>,
}

impl Dispatch {
    pub fn new(kernel: &Kernel, work_dim: u32, global_size: [usize; 3]) -> Self {
        Self {
            kernel: kernel.clone(),
            work_dim,
            global_offset: None,
            global_size,
            local_size: None,
        }
    }

    pub fn with_offset(mut self, global_offset: [usize; 3]) -> Self {
        self.global_offset = Some(global_offset);
        self
    }

    pub fn with_local_size(mut self, local_size: [usize; 3]) -> Self {
        self.local_size = Some(local_size);
        self
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    CopyBuffer(CopyBuffer),
    CopyBufferRect(CopyBufferRect),
    CopyImage(CopyImage),
    CopyBufferToImage(CopyBufferToImage),
    CopyImageToBuffer(CopyImageToBuffer),
    FillBuffer(FillBuffer),
    FillImage(FillImage),
    Dispatch(Dispatch),
    /// `clCommandBarrierWithWaitListKHR`.
    Barrier,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::CopyBuffer(_) => CommandType::CopyBuffer,
            Command::CopyBufferRect(_) => CommandType::CopyBufferRect,
            Command::CopyImage(_) => CommandType::CopyImage,
            Command::CopyBufferToImage(_) => CommandType::CopyBufferToImage,
            Command::CopyImageToBuffer(_) => CommandType::CopyImageToBuffer,
            Command::FillBuffer(_) => CommandType::FillBuffer,
            Command::FillImage(_) => CommandType::FillImage,
            Command::Dispatch(_) => CommandType::NdRangeKernel,
            Command::Barrier => CommandType::Barrier,
        }
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Command {
                fn from(payload: $variant) -> Self {
                    Command::$variant(payload)
                }
            }
        )*
    };
}

impl_from_payload!(
    CopyBuffer,
    CopyBufferRect,
    CopyImage,
    CopyBufferToImage,
    CopyImageToBuffer,
    FillBuffer,
    FillImage,
    Dispatch,
);
