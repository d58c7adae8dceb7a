//! Append-time validation of command payloads and their translation into device operations.

use mux_hal::{Buffer, Context, Device, Image, ImageType, Operation, RectPitch};

use crate::command::{
    Command, CopyBuffer, CopyBufferRect, CopyBufferToImage, CopyImage, CopyImageToBuffer,
    FillBuffer, FillImage,
};
use crate::error::{CommandBufferError, Result};
use crate::ndrange;

const FILL_PATTERN_SIZES: [usize; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

/// Validates `command` for recording against `device` and lowers it to the operation replayed on
/// every enqueue. Nothing is mutated on failure.
pub(crate) fn lower(command: &Command, context: &Context, device: &Device) -> Result<Operation> {
    match command {
        Command::CopyBuffer(cmd) => copy_buffer(cmd, context),
        Command::CopyBufferRect(cmd) => copy_buffer_rect(cmd, context),
        Command::CopyImage(cmd) => copy_image(cmd, context),
        Command::CopyBufferToImage(cmd) => copy_buffer_to_image(cmd, context),
        Command::CopyImageToBuffer(cmd) => copy_image_to_buffer(cmd, context),
        Command::FillBuffer(cmd) => fill_buffer(cmd, context),
        Command::FillImage(cmd) => fill_image(cmd, context),
        Command::Dispatch(cmd) => {
            check_context(context, cmd.kernel.context())?;
            let range = ndrange::resolve(cmd, device)?;
            // Argument slots only accept objects from the kernel's own context.
            Ok(Operation::Dispatch(cmd.kernel.specialize(range)?))
        }
        Command::Barrier => Ok(Operation::Barrier),
    }
}

fn check_context(expected: &Context, actual: &Context) -> Result<()> {
    if expected != actual {
        return Err(CommandBufferError::ContextMismatch);
    }
    Ok(())
}

pub(crate) fn check_contexts<'a>(
    expected: &Context,
    actual: impl IntoIterator<Item = &'a Context>,
) -> Result<()> {
    actual
        .into_iter()
        .try_for_each(|ctx| check_context(expected, ctx))
}

fn check_buffer_range(what: &'static str, buffer: &Buffer, offset: usize, len: usize) -> Result<()> {
    let size = buffer.size();
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(CommandBufferError::OutOfBounds {
            what,
            offset,
            len,
            size,
        }),
    }
}

fn ranges_overlap(a: usize, b: usize, len: usize) -> bool {
    a < b.saturating_add(len) && b < a.saturating_add(len)
}

fn copy_buffer(cmd: &CopyBuffer, context: &Context) -> Result<Operation> {
    check_contexts(context, [cmd.src.context(), cmd.dst.context()])?;
    if cmd.size == 0 {
        return Err(CommandBufferError::ZeroSize("copy size"));
    }
    check_buffer_range("source buffer", &cmd.src, cmd.src_offset, cmd.size)?;
    check_buffer_range("destination buffer", &cmd.dst, cmd.dst_offset, cmd.size)?;
    if cmd.src.same(&cmd.dst) && ranges_overlap(cmd.src_offset, cmd.dst_offset, cmd.size) {
        return Err(CommandBufferError::MemCopyOverlap);
    }
    Ok(Operation::CopyBuffer {
        src: cmd.src.clone(),
        dst: cmd.dst.clone(),
        src_offset: cmd.src_offset,
        dst_offset: cmd.dst_offset,
        size: cmd.size,
    })
}

/// Resolves a rect pitch pair, treating zero as tightly packed.
fn rect_pitch(region: [usize; 3], row: usize, slice: usize) -> Result<RectPitch> {
    let row = match row {
        0 => region[0],
        row if row < region[0] => {
            return Err(CommandBufferError::InvalidPitch("row pitch smaller than region width"))
        }
        row => row,
    };
    let min_slice = region[1]
        .checked_mul(row)
        .ok_or(CommandBufferError::InvalidPitch("slice size overflows"))?;
    let slice = match slice {
        0 => min_slice,
        slice if slice < min_slice => {
            return Err(CommandBufferError::InvalidPitch(
                "slice pitch smaller than region height times row pitch",
            ))
        }
        slice if slice % row != 0 => {
            return Err(CommandBufferError::InvalidPitch(
                "slice pitch is not a multiple of the row pitch",
            ))
        }
        slice => slice,
    };
    Ok(RectPitch { row, slice })
}

/// Checks that the rectangle at `origin` lies inside `buffer`.
fn check_rect_extent(
    what: &'static str,
    buffer: &Buffer,
    origin: [usize; 3],
    region: [usize; 3],
    pitch: RectPitch,
) -> Result<()> {
    let start = origin[2]
        .checked_mul(pitch.slice)
        .and_then(|z| origin[1].checked_mul(pitch.row).and_then(|y| z.checked_add(y)))
        .and_then(|zy| zy.checked_add(origin[0]));
    let len = (region[2] - 1)
        .checked_mul(pitch.slice)
        .and_then(|z| (region[1] - 1).checked_mul(pitch.row).and_then(|y| z.checked_add(y)))
        .and_then(|zy| zy.checked_add(region[0]));
    match (start, len) {
        (Some(start), Some(len)) => check_buffer_range(what, buffer, start, len),
        _ => Err(CommandBufferError::OutOfBounds {
            what,
            offset: usize::MAX,
            len: usize::MAX,
            size: buffer.size(),
        }),
    }
}

/// Overlap test for two rectangles sharing one pitch inside the same buffer.
///
/// Beyond comparing the linear extents, two rectangles that interleave without touching (one
/// fits in the gap the other leaves between rows or slices) do not overlap.
pub(crate) fn rects_overlap(
    src_origin: [usize; 3],
    dst_origin: [usize; 3],
    region: [usize; 3],
    pitch: RectPitch,
) -> bool {
    let RectPitch { row, slice } = pitch;
    let slice_size = (region[1] - 1) * row + region[0];
    let block_size = (region[2] - 1) * slice + slice_size;
    let src_start = pitch.offset(src_origin);
    let dst_start = pitch.offset(dst_origin);
    let src_end = src_start + block_size;
    let dst_end = dst_start + block_size;

    if dst_end <= src_start || src_end <= dst_start {
        return false;
    }

    let src_dx = src_origin[0] % row;
    let dst_dx = dst_origin[0] % row;
    if (dst_dx >= src_dx + region[0] && dst_dx + region[0] <= src_dx + row)
        || (src_dx >= dst_dx + region[0] && src_dx + region[0] <= dst_dx + row)
    {
        return false;
    }

    let src_dy = (src_origin[1] * row + src_origin[0]) % slice;
    let dst_dy = (dst_origin[1] * row + dst_origin[0]) % slice;
    if (dst_dy >= src_dy + slice_size && dst_dy + slice_size <= src_dy + slice)
        || (src_dy >= dst_dy + slice_size && src_dy + slice_size <= dst_dy + slice)
    {
        return false;
    }

    true
}

fn copy_buffer_rect(cmd: &CopyBufferRect, context: &Context) -> Result<Operation> {
    check_contexts(context, [cmd.src.context(), cmd.dst.context()])?;
    if cmd.region.contains(&0) {
        return Err(CommandBufferError::ZeroSize("rect region"));
    }
    let src_pitch = rect_pitch(cmd.region, cmd.src_row_pitch, cmd.src_slice_pitch)?;
    let dst_pitch = rect_pitch(cmd.region, cmd.dst_row_pitch, cmd.dst_slice_pitch)?;
    check_rect_extent("source buffer", &cmd.src, cmd.src_origin, cmd.region, src_pitch)?;
    check_rect_extent("destination buffer", &cmd.dst, cmd.dst_origin, cmd.region, dst_pitch)?;

    if cmd.src.same(&cmd.dst) {
        if src_pitch != dst_pitch {
            return Err(CommandBufferError::InvalidPitch(
                "copies within one buffer need equal source and destination pitches",
            ));
        }
        if rects_overlap(cmd.src_origin, cmd.dst_origin, cmd.region, src_pitch) {
            return Err(CommandBufferError::MemCopyOverlap);
        }
    }

    Ok(Operation::CopyBufferRect {
        src: cmd.src.clone(),
        dst: cmd.dst.clone(),
        src_origin: cmd.src_origin,
        dst_origin: cmd.dst_origin,
        region: cmd.region,
        src_pitch,
        dst_pitch,
    })
}

/// Checks `origin`/`region` against the image's type and extent.
fn check_image_region(image: &Image, origin: [usize; 3], region: [usize; 3]) -> Result<()> {
    if region.contains(&0) {
        return Err(CommandBufferError::InvalidImageRegion("region must be non-zero"));
    }
    let unused_dims = match image.desc().image_type {
        ImageType::Image1D => 1..3,
        ImageType::Image1DArray | ImageType::Image2D => 2..3,
        ImageType::Image2DArray | ImageType::Image3D => 3..3,
    };
    for d in unused_dims {
        if origin[d] != 0 || region[d] != 1 {
            return Err(CommandBufferError::InvalidImageRegion(
                "unused dimensions need origin 0 and region 1",
            ));
        }
    }
    let extent = image.extent();
    for d in 0..3 {
        match origin[d].checked_add(region[d]) {
            Some(end) if end <= extent[d] => {}
            _ => {
                return Err(CommandBufferError::InvalidImageRegion(
                    "region exceeds the image extent",
                ))
            }
        }
    }
    Ok(())
}

fn boxes_intersect(a: [usize; 3], b: [usize; 3], region: [usize; 3]) -> bool {
    (0..3).all(|d| ranges_overlap(a[d], b[d], region[d]))
}

fn region_bytes(image: &Image, region: [usize; 3]) -> Result<usize> {
    region
        .iter()
        .try_fold(image.format().element_size(), |acc, &r| acc.checked_mul(r))
        .ok_or(CommandBufferError::InvalidImageRegion("region size overflows"))
}

fn copy_image(cmd: &CopyImage, context: &Context) -> Result<Operation> {
    check_contexts(context, [cmd.src.context(), cmd.dst.context()])?;
    if cmd.src.format() != cmd.dst.format() {
        return Err(CommandBufferError::ImageFormatMismatch);
    }
    check_image_region(&cmd.src, cmd.src_origin, cmd.region)?;
    check_image_region(&cmd.dst, cmd.dst_origin, cmd.region)?;
    if cmd.src.same(&cmd.dst) && boxes_intersect(cmd.src_origin, cmd.dst_origin, cmd.region) {
        return Err(CommandBufferError::MemCopyOverlap);
    }
    Ok(Operation::CopyImage {
        src: cmd.src.clone(),
        dst: cmd.dst.clone(),
        src_origin: cmd.src_origin,
        dst_origin: cmd.dst_origin,
        region: cmd.region,
    })
}

fn copy_buffer_to_image(cmd: &CopyBufferToImage, context: &Context) -> Result<Operation> {
    check_contexts(context, [cmd.src.context(), cmd.dst.context()])?;
    check_image_region(&cmd.dst, cmd.dst_origin, cmd.region)?;
    let len = region_bytes(&cmd.dst, cmd.region)?;
    check_buffer_range("source buffer", &cmd.src, cmd.src_offset, len)?;
    Ok(Operation::CopyBufferToImage {
        src: cmd.src.clone(),
        dst: cmd.dst.clone(),
        src_offset: cmd.src_offset,
        dst_origin: cmd.dst_origin,
        region: cmd.region,
    })
}

fn copy_image_to_buffer(cmd: &CopyImageToBuffer, context: &Context) -> Result<Operation> {
    check_contexts(context, [cmd.src.context(), cmd.dst.context()])?;
    check_image_region(&cmd.src, cmd.src_origin, cmd.region)?;
    let len = region_bytes(&cmd.src, cmd.region)?;
    check_buffer_range("destination buffer", &cmd.dst, cmd.dst_offset, len)?;
    Ok(Operation::CopyImageToBuffer {
        src: cmd.src.clone(),
        dst: cmd.dst.clone(),
        src_origin: cmd.src_origin,
        region: cmd.region,
        dst_offset: cmd.dst_offset,
    })
}

fn fill_buffer(cmd: &FillBuffer, context: &Context) -> Result<Operation> {
    check_context(context, cmd.buffer.context())?;
    let pattern_size = cmd.pattern.len();
    if !FILL_PATTERN_SIZES.contains(&pattern_size) {
        return Err(CommandBufferError::InvalidPatternSize(pattern_size));
    }
    for (what, value) in [("offset", cmd.offset), ("size", cmd.size)] {
        if value % pattern_size != 0 {
            return Err(CommandBufferError::UnalignedFill {
                what,
                value,
                pattern_size,
            });
        }
    }
    if cmd.size == 0 {
        return Err(CommandBufferError::ZeroSize("fill size"));
    }
    check_buffer_range("fill buffer", &cmd.buffer, cmd.offset, cmd.size)?;
    Ok(Operation::FillBuffer {
        buffer: cmd.buffer.clone(),
        pattern: cmd.pattern.clone(),
        offset: cmd.offset,
        size: cmd.size,
    })
}

fn fill_image(cmd: &FillImage, context: &Context) -> Result<Operation> {
    check_context(context, cmd.image.context())?;
    check_image_region(&cmd.image, cmd.origin, cmd.region)?;
    let texel = cmd.image.format().encode_fill(cmd.color)?;
    Ok(Operation::FillImage {
        image: cmd.image.clone(),
        texel,
        origin: cmd.origin,
        region: cmd.region,
    })
}
