//! Device-level operations and their host execution.

use std::sync::{Arc, Mutex};

use crate::error::{HalError, Result};
use crate::memory::check_range;
use crate::{Buffer, CommandType, Context, Image, KernelInvocation};

/// Destination of a [`Operation::ReadBuffer`]; filled in when the read executes.
#[derive(Debug, Clone, Default)]
pub struct Readback(Arc<Mutex<Option<Vec<u8>>>>);

impl Readback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the bytes once the read has completed.
    pub fn take(&self) -> Option<Vec<u8>> {
        match self.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn store(&self, bytes: Vec<u8>) {
        match self.0.lock() {
            Ok(mut guard) => *guard = Some(bytes),
            Err(poisoned) => *poisoned.into_inner() = Some(bytes),
        }
    }
}

/// Resolved pitches for a rectangular buffer access. Both pitches are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectPitch {
    pub row: usize,
    pub slice: usize,
}

impl RectPitch {
    pub fn offset(&self, origin: [usize; 3]) -> usize {
        origin[2] * self.slice + origin[1] * self.row + origin[0]
    }
}

/// One unit of device work. Every operation has already been validated by the layer that built
/// it; execution still bounds-checks and fails the owning event instead of panicking.
#[derive(Debug, Clone)]
pub enum Operation {
    CopyBuffer {
        src: Buffer,
        dst: Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
    },
    CopyBufferRect {
        src: Buffer,
        dst: Buffer,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        src_pitch: RectPitch,
        dst_pitch: RectPitch,
    },
    CopyImage {
        src: Image,
        dst: Image,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
    },
    CopyBufferToImage {
        src: Buffer,
        dst: Image,
        src_offset: usize,
        dst_origin: [usize; 3],
        region: [usize; 3],
    },
    CopyImageToBuffer {
        src: Image,
        dst: Buffer,
        src_origin: [usize; 3],
        region: [usize; 3],
        dst_offset: usize,
    },
    FillBuffer {
        buffer: Buffer,
        pattern: Vec<u8>,
        offset: usize,
        size: usize,
    },
    FillImage {
        image: Image,
        /// One encoded texel.
        texel: Vec<u8>,
        origin: [usize; 3],
        region: [usize; 3],
    },
    Dispatch(KernelInvocation),
    WriteBuffer {
        buffer: Buffer,
        offset: usize,
        data: Vec<u8>,
    },
    ReadBuffer {
        buffer: Buffer,
        offset: usize,
        size: usize,
        into: Readback,
    },
    Marker,
    Barrier,
}

impl Operation {
    pub fn command_type(&self) -> CommandType {
        match self {
            Operation::CopyBuffer { .. } => CommandType::CopyBuffer,
            Operation::CopyBufferRect { .. } => CommandType::CopyBufferRect,
            Operation::CopyImage { .. } => CommandType::CopyImage,
            Operation::CopyBufferToImage { .. } => CommandType::CopyBufferToImage,
            Operation::CopyImageToBuffer { .. } => CommandType::CopyImageToBuffer,
            Operation::FillBuffer { .. } => CommandType::FillBuffer,
            Operation::FillImage { .. } => CommandType::FillImage,
            Operation::Dispatch(_) => CommandType::NdRangeKernel,
            Operation::WriteBuffer { .. } => CommandType::WriteBuffer,
            Operation::ReadBuffer { .. } => CommandType::ReadBuffer,
            Operation::Marker => CommandType::Marker,
            Operation::Barrier => CommandType::Barrier,
        }
    }

    /// Contexts of every memory object and kernel the operation touches.
    pub fn contexts(&self) -> Vec<&Context> {
        match self {
            Operation::CopyBuffer { src, dst, .. } | Operation::CopyBufferRect { src, dst, .. } => {
                vec![src.context(), dst.context()]
            }
            Operation::CopyImage { src, dst, .. } => vec![src.context(), dst.context()],
            Operation::CopyBufferToImage { src, dst, .. } => vec![src.context(), dst.context()],
            Operation::CopyImageToBuffer { src, dst, .. } => vec![src.context(), dst.context()],
            Operation::FillBuffer { buffer, .. }
            | Operation::WriteBuffer { buffer, .. }
            | Operation::ReadBuffer { buffer, .. } => vec![buffer.context()],
            Operation::FillImage { image, .. } => vec![image.context()],
            Operation::Dispatch(invocation) => {
                let mut contexts = vec![invocation.kernel().context()];
                for arg in invocation.args() {
                    if let Some(buffer) = arg.as_buffer() {
                        contexts.push(buffer.context());
                    } else if let Some(image) = arg.as_image() {
                        contexts.push(image.context());
                    }
                }
                contexts
            }
            Operation::Marker | Operation::Barrier => Vec::new(),
        }
    }

    pub(crate) fn execute(&self) -> Result<()> {
        match self {
            Operation::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => copy_rect(
                src,
                dst,
                [*src_offset, 0, 0],
                [*dst_offset, 0, 0],
                [*size, 1, 1],
                RectPitch {
                    row: *size,
                    slice: *size,
                },
                RectPitch {
                    row: *size,
                    slice: *size,
                },
            ),
            Operation::CopyBufferRect {
                src,
                dst,
                src_origin,
                dst_origin,
                region,
                src_pitch,
                dst_pitch,
            } => copy_rect(src, dst, *src_origin, *dst_origin, *region, *src_pitch, *dst_pitch),
            Operation::CopyImage {
                src,
                dst,
                src_origin,
                dst_origin,
                region,
            } => {
                let rows = src.read_region(*src_origin, *region)?;
                dst.write_region(*dst_origin, *region, &rows)
            }
            Operation::CopyBufferToImage {
                src,
                dst,
                src_offset,
                dst_origin,
                region,
            } => {
                let len = region.iter().product::<usize>() * dst.format().element_size();
                let rows = src.read(*src_offset, len)?;
                dst.write_region(*dst_origin, *region, &rows)
            }
            Operation::CopyImageToBuffer {
                src,
                dst,
                src_origin,
                region,
                dst_offset,
            } => {
                let rows = src.read_region(*src_origin, *region)?;
                dst.write(*dst_offset, &rows)
            }
            Operation::FillBuffer {
                buffer,
                pattern,
                offset,
                size,
            } => buffer.with_bytes_mut(|bytes| {
                let range = check_range(*offset, *size, bytes.len())?;
                for chunk in bytes[range].chunks_mut(pattern.len().max(1)) {
                    let n = chunk.len().min(pattern.len());
                    chunk[..n].copy_from_slice(&pattern[..n]);
                }
                Ok(())
            }),
            Operation::FillImage {
                image,
                texel,
                origin,
                region,
            } => {
                let rows = texel.repeat(region.iter().product());
                image.write_region(*origin, *region, &rows)
            }
            Operation::Dispatch(invocation) => {
                invocation.execute();
                Ok(())
            }
            Operation::WriteBuffer {
                buffer,
                offset,
                data,
            } => buffer.write(*offset, data),
            Operation::ReadBuffer {
                buffer,
                offset,
                size,
                into,
            } => {
                into.store(buffer.read(*offset, *size)?);
                Ok(())
            }
            Operation::Marker | Operation::Barrier => Ok(()),
        }
    }
}

/// Row-by-row copy between (possibly identical) buffers.
fn copy_rect(
    src: &Buffer,
    dst: &Buffer,
    src_origin: [usize; 3],
    dst_origin: [usize; 3],
    region: [usize; 3],
    src_pitch: RectPitch,
    dst_pitch: RectPitch,
) -> Result<()> {
    let rows = || {
        (0..region[2]).flat_map(move |z| {
            (0..region[1]).map(move |y| {
                (
                    src_pitch.offset([src_origin[0], src_origin[1] + y, src_origin[2] + z]),
                    dst_pitch.offset([dst_origin[0], dst_origin[1] + y, dst_origin[2] + z]),
                )
            })
        })
    };

    if src.same(dst) {
        return src.with_bytes_mut(|bytes| -> Result<()> {
            for (s, d) in rows() {
                let from = check_range(s, region[0], bytes.len())?;
                check_range(d, region[0], bytes.len())?;
                bytes.copy_within(from, d);
            }
            Ok(())
        });
    }

    // Stage the source so only one buffer lock is held at a time.
    let staged = src.with_bytes_mut(|bytes| -> Result<Vec<(usize, Vec<u8>)>> {
        rows()
            .map(|(s, d)| -> Result<(usize, Vec<u8>)> {
                Ok((d, bytes[check_range(s, region[0], bytes.len())?].to_vec()))
            })
            .collect()
    })?;
    dst.with_bytes_mut(|bytes| {
        for (d, row) in staged {
            let to = check_range(d, row.len(), bytes.len())?;
            bytes[to].copy_from_slice(&row);
        }
        Ok::<(), HalError>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelOrder, ChannelType, Device, DeviceConfig, ImageDesc, ImageFormat};

    fn context() -> Context {
        Context::new(&[Device::new(DeviceConfig::default())]).unwrap()
    }

    #[test]
    fn fill_repeats_pattern() {
        let buf = Buffer::new(&context(), 8).unwrap();
        Operation::FillBuffer {
            buffer: buf.clone(),
            pattern: vec![1, 2],
            offset: 2,
            size: 4,
        }
        .execute()
        .unwrap();
        assert_eq!(buf.to_vec(), vec![0, 0, 1, 2, 1, 2, 0, 0]);
    }

    #[test]
    fn rect_copy_honours_pitches() {
        let ctx = context();
        let src = Buffer::with_data(&ctx, &(0u8..16).collect::<Vec<_>>()).unwrap();
        let dst = Buffer::new(&ctx, 8).unwrap();
        Operation::CopyBufferRect {
            src,
            dst: dst.clone(),
            src_origin: [1, 1, 0],
            dst_origin: [0, 0, 0],
            region: [2, 2, 1],
            src_pitch: RectPitch { row: 4, slice: 16 },
            dst_pitch: RectPitch { row: 2, slice: 4 },
        }
        .execute()
        .unwrap();
        assert_eq!(dst.read(0, 4).unwrap(), vec![5, 6, 9, 10]);
    }

    #[test]
    fn same_buffer_copy_moves_bytes() {
        let buf = Buffer::with_data(&context(), &[1, 2, 3, 4, 0, 0, 0, 0]).unwrap();
        Operation::CopyBuffer {
            src: buf.clone(),
            dst: buf.clone(),
            src_offset: 0,
            dst_offset: 4,
            size: 4,
        }
        .execute()
        .unwrap();
        assert_eq!(buf.to_vec(), vec![1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_execution_fails_instead_of_panicking() {
        let buf = Buffer::new(&context(), 4).unwrap();
        let err = Operation::WriteBuffer {
            buffer: buf,
            offset: 2,
            data: vec![0; 4],
        }
        .execute()
        .unwrap_err();
        assert!(matches!(err, HalError::OutOfBounds { .. }));
    }

    #[test]
    fn image_fill_then_readback_through_buffer() {
        let ctx = context();
        let fmt = ImageFormat::new(ChannelOrder::Rg, ChannelType::UnsignedInt8);
        let img = Image::new(&ctx, fmt, ImageDesc::image_2d(3, 2)).unwrap();
        Operation::FillImage {
            image: img.clone(),
            texel: vec![7, 9],
            origin: [1, 0, 0],
            region: [2, 2, 1],
        }
        .execute()
        .unwrap();

        let out = Buffer::new(&ctx, 12).unwrap();
        Operation::CopyImageToBuffer {
            src: img,
            dst: out.clone(),
            src_origin: [0, 0, 0],
            region: [3, 2, 1],
            dst_offset: 0,
        }
        .execute()
        .unwrap();
        assert_eq!(out.to_vec(), vec![0, 0, 7, 9, 7, 9, 0, 0, 7, 9, 7, 9]);
    }
}
