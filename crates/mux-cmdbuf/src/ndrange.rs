//! ND-range validation and work-group size selection.

use mux_hal::{Device, NdRange};

use crate::command::Dispatch;
use crate::error::{CommandBufferError, Result};

/// Validates a dispatch shape against `device` and resolves it into a full three-dimensional
/// range. Dimensions past `work_dim` get size 1 and offset 0.
pub(crate) fn resolve(dispatch: &Dispatch, device: &Device) -> Result<NdRange> {
    let work_dim = dispatch.work_dim;
    if !(1..=3).contains(&work_dim) {
        return Err(CommandBufferError::InvalidWorkDimension(work_dim));
    }
    let dims = work_dim as usize;

    let mut global_size = [1; 3];
    let mut global_offset = [0; 3];
    for d in 0..dims {
        global_size[d] = dispatch.global_size[d];
        if global_size[d] == 0 {
            return Err(CommandBufferError::InvalidGlobalWorkSize(d));
        }
        global_offset[d] = dispatch.global_offset.map_or(0, |offset| offset[d]);
        if global_offset[d].checked_add(global_size[d]).is_none() {
            return Err(CommandBufferError::InvalidGlobalOffset(d));
        }
    }

    let required = dispatch.kernel.required_work_group_size();
    let local_size = match dispatch.local_size.or(required) {
        Some(requested) => {
            let mut local = [1; 3];
            local[..dims].copy_from_slice(&requested[..dims]);
            check_local_size(local, global_size, device)?;
            if let Some(required) = required {
                if local != required {
                    return Err(CommandBufferError::InvalidWorkGroupSize(
                        "local size differs from the kernel's required work-group size",
                    ));
                }
            }
            local
        }
        None => pick_local_size(global_size, device),
    };

    Ok(NdRange {
        work_dim,
        global_offset,
        global_size,
        local_size,
    })
}

fn check_local_size(local: [usize; 3], global: [usize; 3], device: &Device) -> Result<()> {
    let limits = device.config().max_work_item_sizes;
    for d in 0..3 {
        if local[d] == 0 || local[d] > limits[d] {
            return Err(CommandBufferError::InvalidWorkItemSize {
                dim: d,
                size: local[d],
            });
        }
    }
    let product = local
        .iter()
        .try_fold(1usize, |acc, &l| acc.checked_mul(l))
        .unwrap_or(usize::MAX);
    if product > device.config().max_work_group_size {
        return Err(CommandBufferError::InvalidWorkGroupSize(
            "work-group size exceeds the device limit",
        ));
    }
    if (0..3).any(|d| global[d] % local[d] != 0) {
        return Err(CommandBufferError::InvalidWorkGroupSize(
            "local size does not divide the global size",
        ));
    }
    Ok(())
}

/// Largest work-group that evenly divides the global size within the device limits, filled
/// greedily from the first dimension.
fn pick_local_size(global: [usize; 3], device: &Device) -> [usize; 3] {
    let limits = device.config().max_work_item_sizes;
    let mut budget = device.config().max_work_group_size.max(1);
    let mut local = [1; 3];
    for d in 0..3 {
        let cap = limits[d].min(budget).min(global[d]).max(1);
        local[d] = largest_divisor_at_most(global[d], cap);
        budget /= local[d];
    }
    local
}

/// Largest divisor of `n` not above `cap`, walking divisor pairs up to `sqrt(n)`.
fn largest_divisor_at_most(n: usize, cap: usize) -> usize {
    if n == 0 {
        return 1;
    }
    let mut best = 1;
    let mut small = 1;
    while small <= n / small {
        if n % small == 0 {
            let large = n / small;
            if large <= cap {
                return best.max(large);
            }
            if small <= cap {
                best = small;
            }
        }
        small += 1;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_hal::{Context, DeviceConfig, Kernel};

    fn device() -> Device {
        Device::new(DeviceConfig {
            max_work_item_sizes: [64, 8, 4],
            max_work_group_size: 128,
            ..Default::default()
        })
    }

    fn kernel(device: &Device, required: Option<[usize; 3]>) -> Kernel {
        let ctx = Context::new(&[device.clone()]).unwrap();
        let builder = Kernel::builder(&ctx, "k", 0);
        match required {
            Some(size) => builder.required_work_group_size(size).build(|_, _| {}),
            None => builder.build(|_, _| {}),
        }
    }

    #[test]
    fn default_local_size_is_the_largest_fitting_divisor() {
        assert_eq!(largest_divisor_at_most(96, 64), 48);
        assert_eq!(largest_divisor_at_most(96, 5), 4);
        assert_eq!(largest_divisor_at_most(49, 49), 49);
        assert_eq!(largest_divisor_at_most(49, 48), 7);
        assert_eq!(largest_divisor_at_most(1, 1), 1);
        // A large prime with large device limits only admits 1 or itself.
        let prime = 2_147_483_647;
        assert_eq!(largest_divisor_at_most(prime, 1 << 30), 1);
        assert_eq!(largest_divisor_at_most(prime, prime), prime);

        let roomy = Device::new(DeviceConfig {
            max_work_item_sizes: [1 << 40, 1, 1],
            max_work_group_size: 1 << 40,
            ..Default::default()
        });
        let range = resolve(
            &Dispatch::new(&kernel(&roomy, None), 1, [prime, 1, 1]),
            &roomy,
        )
        .unwrap();
        assert_eq!(range.local_size, [prime, 1, 1]);
    }

    #[test]
    fn unused_dimensions_are_normalised() {
        let dev = device();
        let range = resolve(
            &Dispatch::new(&kernel(&dev, None), 1, [96, 7, 7]).with_offset([5, 9, 9]),
            &dev,
        )
        .unwrap();
        assert_eq!(range.global_size, [96, 1, 1]);
        assert_eq!(range.global_offset, [5, 0, 0]);
        assert_eq!(range.local_size, [48, 1, 1]);
    }

    #[test]
    fn shape_errors_map_to_their_own_codes() {
        let dev = device();
        let k = kernel(&dev, None);
        let err = |d: Dispatch| resolve(&d, &dev).unwrap_err();

        assert_eq!(
            err(Dispatch::new(&k, 0, [1; 3])),
            CommandBufferError::InvalidWorkDimension(0)
        );
        assert_eq!(
            err(Dispatch::new(&k, 2, [4, 0, 1])),
            CommandBufferError::InvalidGlobalWorkSize(1)
        );
        assert_eq!(
            err(Dispatch::new(&k, 1, [4, 1, 1]).with_offset([usize::MAX, 0, 0])),
            CommandBufferError::InvalidGlobalOffset(0)
        );
        assert_eq!(
            err(Dispatch::new(&k, 2, [16, 16, 1]).with_local_size([1, 16, 1])),
            CommandBufferError::InvalidWorkItemSize { dim: 1, size: 16 }
        );
        assert!(matches!(
            err(Dispatch::new(&k, 2, [64, 8, 1]).with_local_size([64, 8, 1])),
            CommandBufferError::InvalidWorkGroupSize(_)
        ));
        assert!(matches!(
            err(Dispatch::new(&k, 1, [10, 1, 1]).with_local_size([4, 1, 1])),
            CommandBufferError::InvalidWorkGroupSize(_)
        ));
    }

    #[test]
    fn required_work_group_size_is_enforced_and_used_by_default() {
        let dev = device();
        let k = kernel(&dev, Some([4, 2, 1]));
        let range = resolve(&Dispatch::new(&k, 2, [8, 8, 1]), &dev).unwrap();
        assert_eq!(range.local_size, [4, 2, 1]);

        assert!(matches!(
            resolve(&Dispatch::new(&k, 2, [8, 8, 1]).with_local_size([2, 2, 1]), &dev),
            Err(CommandBufferError::InvalidWorkGroupSize(_))
        ));
    }

    #[test]
    fn picked_local_size_respects_every_limit() {
        let dev = device();
        for global in [[1, 1, 1], [97, 1, 1], [128, 64, 8], [360, 12, 6]] {
            let local = pick_local_size(global, &dev);
            check_local_size(local, global, &dev).unwrap();
        }
    }
}
