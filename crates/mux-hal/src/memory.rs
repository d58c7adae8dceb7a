use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::object_id;
use crate::error::{HalError, Result};
use crate::Context;

object_id!(MemObjectId, NEXT_MEM_OBJECT_ID);

fn lock_bytes(bytes: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    match bytes.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn check_range(offset: usize, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(HalError::OutOfBounds { offset, len, size }),
    }
}

#[derive(Debug)]
struct BufferInner {
    id: MemObjectId,
    context: Context,
    bytes: Mutex<Vec<u8>>,
}

/// A linear host-memory buffer.
///
/// Cloning the handle retains the buffer; the storage is freed when the last handle drops.
#[derive(Debug, Clone)]
pub struct Buffer(Arc<BufferInner>);

impl Buffer {
    pub fn new(context: &Context, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(HalError::InvalidBufferSize(size));
        }
        Ok(Self::from_vec(context, vec![0; size]))
    }

    pub fn with_data(context: &Context, data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(HalError::InvalidBufferSize(0));
        }
        Ok(Self::from_vec(context, data.to_vec()))
    }

    fn from_vec(context: &Context, bytes: Vec<u8>) -> Self {
        Self(Arc::new(BufferInner {
            id: MemObjectId::next(),
            context: context.clone(),
            bytes: Mutex::new(bytes),
        }))
    }

    pub fn id(&self) -> MemObjectId {
        self.0.id
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn size(&self) -> usize {
        lock_bytes(&self.0.bytes).len()
    }

    /// Whether both handles name the same buffer.
    pub fn same(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let bytes = lock_bytes(&self.0.bytes);
        let range = check_range(offset, len, bytes.len())?;
        Ok(bytes[range].to_vec())
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut bytes = lock_bytes(&self.0.bytes);
        let range = check_range(offset, data.len(), bytes.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        lock_bytes(&self.0.bytes).clone()
    }

    pub(crate) fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut lock_bytes(&self.0.bytes))
    }
}

/// `cl_mem_object_type` for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Image1D,
    Image1DArray,
    Image2D,
    Image2DArray,
    Image3D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    R,
    Rg,
    Rgba,
    Bgra,
}

impl ChannelOrder {
    pub fn channels(self) -> usize {
        match self {
            ChannelOrder::R => 1,
            ChannelOrder::Rg => 2,
            ChannelOrder::Rgba | ChannelOrder::Bgra => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    UnormInt8,
    SnormInt8,
    UnsignedInt8,
    SignedInt8,
    UnsignedInt16,
    SignedInt16,
    UnsignedInt32,
    SignedInt32,
    HalfFloat,
    Float,
}

impl ChannelType {
    pub fn size(self) -> usize {
        match self {
            ChannelType::UnormInt8
            | ChannelType::SnormInt8
            | ChannelType::UnsignedInt8
            | ChannelType::SignedInt8 => 1,
            ChannelType::UnsignedInt16 | ChannelType::SignedInt16 | ChannelType::HalfFloat => 2,
            ChannelType::UnsignedInt32 | ChannelType::SignedInt32 | ChannelType::Float => 4,
        }
    }
}

/// `cl_image_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    pub order: ChannelOrder,
    pub channel_type: ChannelType,
}

/// Colour used by image fills, matching the `fill_color` variants of `clEnqueueFillImage`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillColor {
    Float([f32; 4]),
    Int([i32; 4]),
    Uint([u32; 4]),
}

impl ImageFormat {
    pub const fn new(order: ChannelOrder, channel_type: ChannelType) -> Self {
        Self {
            order,
            channel_type,
        }
    }

    pub fn element_size(&self) -> usize {
        self.order.channels() * self.channel_type.size()
    }

    /// Encodes `color` as one texel of this format.
    ///
    /// Normalized and floating-point formats take [`FillColor::Float`], signed integer formats
    /// [`FillColor::Int`] and unsigned integer formats [`FillColor::Uint`]; integer values
    /// saturate to the channel width.
    pub fn encode_fill(&self, color: FillColor) -> Result<Vec<u8>> {
        let components: [usize; 4] = match self.order {
            ChannelOrder::Bgra => [2, 1, 0, 3],
            _ => [0, 1, 2, 3],
        };
        let mut out = Vec::with_capacity(self.element_size());
        for &c in components.iter().take(self.order.channels()) {
            match (self.channel_type, color) {
                (ChannelType::UnormInt8, FillColor::Float(v)) => {
                    out.push((v[c].clamp(0.0, 1.0) * 255.0).round() as u8);
                }
                (ChannelType::SnormInt8, FillColor::Float(v)) => {
                    out.push(((v[c].clamp(-1.0, 1.0) * 127.0).round() as i8) as u8);
                }
                (ChannelType::HalfFloat, FillColor::Float(v)) => {
                    out.extend_from_slice(&half::f16::from_f32(v[c]).to_le_bytes());
                }
                (ChannelType::Float, FillColor::Float(v)) => {
                    out.extend_from_slice(&v[c].to_le_bytes());
                }
                (ChannelType::SignedInt8, FillColor::Int(v)) => {
                    out.push(v[c].clamp(i8::MIN.into(), i8::MAX.into()) as i8 as u8);
                }
                (ChannelType::SignedInt16, FillColor::Int(v)) => {
                    let x = v[c].clamp(i16::MIN.into(), i16::MAX.into()) as i16;
                    out.extend_from_slice(&x.to_le_bytes());
                }
                (ChannelType::SignedInt32, FillColor::Int(v)) => {
                    out.extend_from_slice(&v[c].to_le_bytes());
                }
                (ChannelType::UnsignedInt8, FillColor::Uint(v)) => {
                    out.push(v[c].min(u8::MAX.into()) as u8);
                }
                (ChannelType::UnsignedInt16, FillColor::Uint(v)) => {
                    let x = v[c].min(u16::MAX.into()) as u16;
                    out.extend_from_slice(&x.to_le_bytes());
                }
                (ChannelType::UnsignedInt32, FillColor::Uint(v)) => {
                    out.extend_from_slice(&v[c].to_le_bytes());
                }
                _ => return Err(HalError::FillColorMismatch),
            }
        }
        Ok(out)
    }
}

/// `cl_image_desc`, reduced to the fields the host images use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub image_type: ImageType,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub array_size: usize,
}

impl ImageDesc {
    pub fn image_1d(width: usize) -> Self {
        Self {
            image_type: ImageType::Image1D,
            width,
            height: 1,
            depth: 1,
            array_size: 1,
        }
    }

    pub fn image_2d(width: usize, height: usize) -> Self {
        Self {
            image_type: ImageType::Image2D,
            width,
            height,
            depth: 1,
            array_size: 1,
        }
    }

    pub fn image_3d(width: usize, height: usize, depth: usize) -> Self {
        Self {
            image_type: ImageType::Image3D,
            width,
            height,
            depth,
            array_size: 1,
        }
    }

    pub fn image_1d_array(width: usize, array_size: usize) -> Self {
        Self {
            image_type: ImageType::Image1DArray,
            width,
            height: 1,
            depth: 1,
            array_size,
        }
    }

    pub fn image_2d_array(width: usize, height: usize, array_size: usize) -> Self {
        Self {
            image_type: ImageType::Image2DArray,
            width,
            height,
            depth: 1,
            array_size,
        }
    }

    /// Extent in texels as addressed by `origin`/`region` triples. Array layers occupy the
    /// dimension after the last spatial one.
    pub fn extent(&self) -> [usize; 3] {
        match self.image_type {
            ImageType::Image1D => [self.width, 1, 1],
            ImageType::Image1DArray => [self.width, self.array_size, 1],
            ImageType::Image2D => [self.width, self.height, 1],
            ImageType::Image2DArray => [self.width, self.height, self.array_size],
            ImageType::Image3D => [self.width, self.height, self.depth],
        }
    }

    fn validate(&self) -> Result<()> {
        if self.extent().iter().any(|&e| e == 0) {
            return Err(HalError::InvalidImageDesc("image extent must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ImageInner {
    id: MemObjectId,
    context: Context,
    format: ImageFormat,
    desc: ImageDesc,
    bytes: Mutex<Vec<u8>>,
}

/// A host-memory image stored as tightly packed rows and slices.
#[derive(Debug, Clone)]
pub struct Image(Arc<ImageInner>);

impl Image {
    pub fn new(context: &Context, format: ImageFormat, desc: ImageDesc) -> Result<Self> {
        if !context.image_support() {
            return Err(HalError::ImagesNotSupported(context.id()));
        }
        desc.validate()?;
        let [w, h, d] = desc.extent();
        let size = w
            .checked_mul(h)
            .and_then(|x| x.checked_mul(d))
            .and_then(|x| x.checked_mul(format.element_size()))
            .ok_or(HalError::InvalidImageDesc("image size overflows"))?;
        Ok(Self(Arc::new(ImageInner {
            id: MemObjectId::next(),
            context: context.clone(),
            format,
            desc,
            bytes: Mutex::new(vec![0; size]),
        })))
    }

    pub fn id(&self) -> MemObjectId {
        self.0.id
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn format(&self) -> ImageFormat {
        self.0.format
    }

    pub fn desc(&self) -> ImageDesc {
        self.0.desc
    }

    pub fn extent(&self) -> [usize; 3] {
        self.0.desc.extent()
    }

    pub fn row_pitch(&self) -> usize {
        self.0.desc.extent()[0] * self.0.format.element_size()
    }

    pub fn slice_pitch(&self) -> usize {
        self.row_pitch() * self.0.desc.extent()[1]
    }

    pub fn same(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Byte offset of texel `origin`.
    fn texel_offset(&self, origin: [usize; 3]) -> usize {
        origin[2] * self.slice_pitch()
            + origin[1] * self.row_pitch()
            + origin[0] * self.0.format.element_size()
    }

    /// Reads a region as tightly packed rows.
    pub fn read_region(&self, origin: [usize; 3], region: [usize; 3]) -> Result<Vec<u8>> {
        let elem = self.0.format.element_size();
        let row = region[0] * elem;
        let bytes = lock_bytes(&self.0.bytes);
        let mut out = Vec::with_capacity(row * region[1] * region[2]);
        for z in 0..region[2] {
            for y in 0..region[1] {
                let start = self.texel_offset([origin[0], origin[1] + y, origin[2] + z]);
                let range = check_range(start, row, bytes.len())?;
                out.extend_from_slice(&bytes[range]);
            }
        }
        Ok(out)
    }

    /// Writes tightly packed rows into a region.
    pub fn write_region(&self, origin: [usize; 3], region: [usize; 3], data: &[u8]) -> Result<()> {
        let elem = self.0.format.element_size();
        let row = region[0] * elem;
        check_range(0, row * region[1] * region[2], data.len())?;
        let mut bytes = lock_bytes(&self.0.bytes);
        let mut src = 0;
        for z in 0..region[2] {
            for y in 0..region[1] {
                let start = self.texel_offset([origin[0], origin[1] + y, origin[2] + z]);
                let range = check_range(start, row, bytes.len())?;
                bytes[range].copy_from_slice(&data[src..src + row]);
                src += row;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, DeviceConfig};

    fn context() -> Context {
        Context::new(&[Device::new(DeviceConfig::default())]).unwrap()
    }

    #[test]
    fn buffer_bounds_are_checked() {
        let buf = Buffer::new(&context(), 16).unwrap();
        buf.write(12, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.read(12, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(
            buf.write(13, &[0; 4]).unwrap_err(),
            HalError::OutOfBounds {
                offset: 13,
                len: 4,
                size: 16
            }
        );
        assert!(buf.read(usize::MAX, 2).is_err());
        assert_eq!(Buffer::new(&context(), 0).unwrap_err(), HalError::InvalidBufferSize(0));
    }

    #[test]
    fn image_requires_support_and_nonzero_extent() {
        let dev = Device::new(DeviceConfig {
            image_support: false,
            ..Default::default()
        });
        let ctx = Context::new(&[dev]).unwrap();
        let fmt = ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnormInt8);
        assert!(matches!(
            Image::new(&ctx, fmt, ImageDesc::image_2d(4, 4)),
            Err(HalError::ImagesNotSupported(_))
        ));
        assert!(Image::new(&context(), fmt, ImageDesc::image_2d(4, 0)).is_err());
    }

    #[test]
    fn image_region_round_trips_through_packed_rows() {
        let fmt = ImageFormat::new(ChannelOrder::R, ChannelType::UnsignedInt8);
        let img = Image::new(&context(), fmt, ImageDesc::image_2d(4, 3)).unwrap();
        img.write_region([1, 1, 0], [2, 2, 1], &[1, 2, 3, 4]).unwrap();
        assert_eq!(img.read_region([0, 1, 0], [4, 1, 1]).unwrap(), vec![0, 1, 2, 0]);
        assert_eq!(img.read_region([0, 2, 0], [4, 1, 1]).unwrap(), vec![0, 3, 4, 0]);
    }

    #[test]
    fn fill_colours_encode_per_channel_type() {
        let rgba8 = ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnormInt8);
        assert_eq!(
            rgba8.encode_fill(FillColor::Float([1.0, 0.0, 0.5, 2.0])).unwrap(),
            vec![255, 0, 128, 255]
        );

        let bgra8 = ImageFormat::new(ChannelOrder::Bgra, ChannelType::UnormInt8);
        assert_eq!(
            bgra8.encode_fill(FillColor::Float([1.0, 0.0, 0.0, 1.0])).unwrap(),
            vec![0, 0, 255, 255]
        );

        let r16 = ImageFormat::new(ChannelOrder::R, ChannelType::UnsignedInt16);
        assert_eq!(r16.encode_fill(FillColor::Uint([70_000, 0, 0, 0])).unwrap(), vec![0xFF, 0xFF]);

        let rg_half = ImageFormat::new(ChannelOrder::Rg, ChannelType::HalfFloat);
        assert_eq!(
            rg_half.encode_fill(FillColor::Float([1.0, -2.0, 0.0, 0.0])).unwrap(),
            vec![0x00, 0x3C, 0x00, 0xC0]
        );

        assert_eq!(
            r16.encode_fill(FillColor::Float([0.0; 4])).unwrap_err(),
            HalError::FillColorMismatch
        );
    }
}
