use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::object_id;
use crate::error::{HalError, Result};
use crate::{Buffer, Context, Image};

object_id!(KernelId, NEXT_KERNEL_ID);

/// A value bound to one kernel argument slot.
#[derive(Debug, Clone)]
pub enum KernelArg {
    Buffer(Buffer),
    Image(Image),
    /// Plain-old-data argument, passed by value.
    Bytes(Vec<u8>),
    /// `__local` allocation of the given size.
    Local(usize),
}

impl KernelArg {
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            KernelArg::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            KernelArg::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            KernelArg::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Reads a by-value `uint` argument.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.as_bytes()?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    pub(crate) fn context(&self) -> Option<&Context> {
        match self {
            KernelArg::Buffer(buffer) => Some(buffer.context()),
            KernelArg::Image(image) => Some(image.context()),
            KernelArg::Bytes(_) | KernelArg::Local(_) => None,
        }
    }
}

/// Position of one work-item inside an ND-range execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub work_dim: u32,
    pub global_id: [usize; 3],
    pub local_id: [usize; 3],
    pub group_id: [usize; 3],
    pub global_size: [usize; 3],
    pub local_size: [usize; 3],
    pub global_offset: [usize; 3],
}

impl WorkItem {
    /// Row-major linear index of the work-item relative to the global offset.
    pub fn linear_global_id(&self) -> usize {
        let x = self.global_id[0] - self.global_offset[0];
        let y = self.global_id[1] - self.global_offset[1];
        let z = self.global_id[2] - self.global_offset[2];
        (z * self.global_size[1] + y) * self.global_size[0] + x
    }
}

/// Fully resolved ND-range shape. Unused dimensions have size 1 and offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    pub work_dim: u32,
    pub global_offset: [usize; 3],
    pub global_size: [usize; 3],
    pub local_size: [usize; 3],
}

impl NdRange {
    pub fn num_groups(&self) -> [usize; 3] {
        let mut groups = [1; 3];
        for (d, group) in groups.iter_mut().enumerate() {
            *group = self.global_size[d] / self.local_size[d].max(1);
        }
        groups
    }
}

/// Host entry point invoked once per work-item.
pub type KernelBody = dyn Fn(&WorkItem, &[KernelArg]) + Send + Sync;

struct KernelInner {
    id: KernelId,
    name: String,
    context: Context,
    num_args: u32,
    required_work_group_size: Option<[usize; 3]>,
    args: Mutex<Vec<Option<KernelArg>>>,
    body: Arc<KernelBody>,
}

/// A compiled kernel as handed out by the compiler collaborator.
///
/// The host flavour executes a Rust closure per work-item. Argument slots behave like
/// `clSetKernelArg`: they are mutable on the kernel object and snapshotted by
/// [`Kernel::specialize`].
#[derive(Clone)]
pub struct Kernel(Arc<KernelInner>);

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("num_args", &self.0.num_args)
            .field("required_work_group_size", &self.0.required_work_group_size)
            .finish_non_exhaustive()
    }
}

pub struct KernelBuilder {
    context: Context,
    name: String,
    num_args: u32,
    required_work_group_size: Option<[usize; 3]>,
}

impl KernelBuilder {
    /// `__attribute__((reqd_work_group_size(x, y, z)))`.
    pub fn required_work_group_size(mut self, size: [usize; 3]) -> Self {
        self.required_work_group_size = Some(size);
        self
    }

    pub fn build(self, body: impl Fn(&WorkItem, &[KernelArg]) + Send + Sync + 'static) -> Kernel {
        Kernel(Arc::new(KernelInner {
            id: KernelId::next(),
            name: self.name,
            context: self.context,
            num_args: self.num_args,
            required_work_group_size: self.required_work_group_size,
            args: Mutex::new(vec![None; self.num_args as usize]),
            body: Arc::new(body),
        }))
    }
}

impl Kernel {
    pub fn builder(context: &Context, name: &str, num_args: u32) -> KernelBuilder {
        KernelBuilder {
            context: context.clone(),
            name: name.to_owned(),
            num_args,
            required_work_group_size: None,
        }
    }

    fn lock_args(&self) -> MutexGuard<'_, Vec<Option<KernelArg>>> {
        match self.0.args.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn id(&self) -> KernelId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn num_args(&self) -> u32 {
        self.0.num_args
    }

    pub fn required_work_group_size(&self) -> Option<[usize; 3]> {
        self.0.required_work_group_size
    }

    pub fn same(&self, other: &Kernel) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Checks that `arg` may be bound to slot `index` of this kernel.
    pub fn check_arg(&self, index: u32, arg: &KernelArg) -> Result<()> {
        if index >= self.0.num_args {
            return Err(HalError::InvalidArgIndex {
                index,
                num_args: self.0.num_args,
            });
        }
        if let Some(ctx) = arg.context() {
            if ctx != &self.0.context {
                return Err(HalError::ForeignMemObject);
            }
        }
        Ok(())
    }

    pub fn set_arg(&self, index: u32, arg: KernelArg) -> Result<()> {
        self.check_arg(index, &arg)?;
        self.lock_args()[index as usize] = Some(arg);
        Ok(())
    }

    /// Captures the current arguments together with an ND-range shape.
    pub fn specialize(&self, range: NdRange) -> Result<KernelInvocation> {
        let args = self
            .lock_args()
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| HalError::KernelArgsNotSet(self.0.name.clone()))?;
        Ok(KernelInvocation {
            kernel: self.clone(),
            args,
            range,
        })
    }
}

/// A kernel bound to an argument snapshot and a resolved ND-range; what a dispatch executes.
#[derive(Debug, Clone)]
pub struct KernelInvocation {
    kernel: Kernel,
    args: Vec<KernelArg>,
    range: NdRange,
}

impl KernelInvocation {
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn args(&self) -> &[KernelArg] {
        &self.args
    }

    pub fn range(&self) -> &NdRange {
        &self.range
    }

    pub fn set_arg(&mut self, index: u32, arg: KernelArg) -> Result<()> {
        self.kernel.check_arg(index, &arg)?;
        self.args[index as usize] = arg;
        Ok(())
    }

    pub fn set_range(&mut self, range: NdRange) {
        self.range = range;
    }

    pub(crate) fn execute(&self) {
        let range = &self.range;
        let groups = range.num_groups();
        let body = &self.kernel.0.body;
        for gz in 0..groups[2] {
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    let group_id = [gx, gy, gz];
                    for lz in 0..range.local_size[2] {
                        for ly in 0..range.local_size[1] {
                            for lx in 0..range.local_size[0] {
                                let local_id = [lx, ly, lz];
                                let mut global_id = [0; 3];
                                for d in 0..3 {
                                    global_id[d] = range.global_offset[d]
                                        + group_id[d] * range.local_size[d]
                                        + local_id[d];
                                }
                                let item = WorkItem {
                                    work_dim: range.work_dim,
                                    global_id,
                                    local_id,
                                    group_id,
                                    global_size: range.global_size,
                                    local_size: range.local_size,
                                    global_offset: range.global_offset,
                                };
                                body(&item, &self.args);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Device, DeviceConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> Context {
        Context::new(&[Device::new(DeviceConfig::default())]).unwrap()
    }

    #[test]
    fn specialize_requires_every_argument() {
        let ctx = context();
        let kernel = Kernel::builder(&ctx, "k", 2).build(|_, _| {});
        let range = NdRange {
            work_dim: 1,
            global_offset: [0; 3],
            global_size: [4, 1, 1],
            local_size: [4, 1, 1],
        };

        kernel.set_arg(0, KernelArg::Bytes(vec![0; 4])).unwrap();
        assert_eq!(
            kernel.specialize(range).unwrap_err(),
            HalError::KernelArgsNotSet("k".into())
        );
        kernel.set_arg(1, KernelArg::Local(16)).unwrap();
        assert_eq!(kernel.specialize(range).unwrap().args().len(), 2);

        assert_eq!(
            kernel.set_arg(2, KernelArg::Local(1)).unwrap_err(),
            HalError::InvalidArgIndex {
                index: 2,
                num_args: 2
            }
        );
    }

    #[test]
    fn foreign_memory_objects_are_rejected() {
        let kernel = Kernel::builder(&context(), "k", 1).build(|_, _| {});
        let other = Buffer::new(&context(), 4).unwrap();
        assert_eq!(
            kernel.set_arg(0, KernelArg::Buffer(other)).unwrap_err(),
            HalError::ForeignMemObject
        );
    }

    #[test]
    fn execute_visits_every_work_item_once() {
        let ctx = context();
        let visits = Arc::new(AtomicUsize::new(0));
        let seen = visits.clone();
        let kernel = Kernel::builder(&ctx, "count", 0).build(move |item, _| {
            assert!(item.linear_global_id() < 24);
            seen.fetch_add(1, Ordering::Relaxed);
        });
        let inv = kernel
            .specialize(NdRange {
                work_dim: 2,
                global_offset: [10, 0, 0],
                global_size: [6, 4, 1],
                local_size: [3, 2, 1],
            })
            .unwrap();
        inv.execute();
        assert_eq!(visits.load(Ordering::Relaxed), 24);
    }
}
