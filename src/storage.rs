use std::borrow::Cow;

use crate::cpu_backend::{CpuDevice, CpuStorage};
use crate::{DType, Device, DeviceKind, OpDesc, Result, TensorMeta};

/// A device-resident buffer, tagged by backend.
#[derive(Clone, Debug)]
pub enum Storage {
    Cpu(CpuStorage),
}

impl Storage {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Cpu(cpu) => cpu.dtype(),
        }
    }

    pub fn elem_count(&self) -> usize {
        match self {
            Self::Cpu(cpu) => cpu.elem_count(),
        }
    }

    pub fn to_cpu_storage(&self) -> Result<Cow<CpuStorage>> {
        match self {
            Self::Cpu(cpu) => cpu.to_cpu_storage(),
        }
    }
}

/// Backend view of a buffer.
pub trait BackendStorage {
    fn dtype(&self) -> DType;
    fn elem_count(&self) -> usize;
    fn to_cpu_storage(&self) -> Result<Cow<CpuStorage>>;
}

/// The operator-kernel and driver contract a backend fulfils. Kernels are
/// opaque to the dispatch engine: metadata inference happens before this
/// trait is ever consulted.
pub trait BackendDevice {
    type Storage: BackendStorage;

    /// Execute one operator against resident buffers, producing the buffer
    /// for `out_meta`. Raises `UnsupportedOperator` for kinds this backend
    /// lacks.
    fn run_op(
        &self,
        op: &OpDesc,
        inputs: &[&Self::Storage],
        metas: &[&TensorMeta],
        out_meta: &TensorMeta,
    ) -> Result<Self::Storage>;

    /// Duplicate a buffer into freshly-owned memory.
    fn copy(&self, src: &Self::Storage) -> Result<Self::Storage>;
}

impl Device {
    pub(crate) fn run_op(
        &self,
        op: &OpDesc,
        inputs: &[&Storage],
        metas: &[&TensorMeta],
        out_meta: &TensorMeta,
    ) -> Result<Storage> {
        match self.kind {
            DeviceKind::Cpu => {
                let inputs = inputs
                    .iter()
                    .map(|s| match s {
                        Storage::Cpu(cpu) => cpu,
                    })
                    .collect::<Vec<_>>();
                Ok(Storage::Cpu(CpuDevice.run_op(op, &inputs, metas, out_meta)?))
            }
        }
    }
}
