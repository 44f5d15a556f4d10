use std::fmt;
use std::sync::Arc;

use crate::graph::Var;
use crate::storage::Storage;
use crate::{DType, Device, DeviceSpec, Error, Result, Shape, TensorMeta, WithDType};

/// Where a handle's data lives: a concrete device buffer now, or a
/// reference to a graph node that has not been computed yet.
#[derive(Clone)]
pub enum DataState {
    Resident(Arc<Storage>),
    Pending(Var),
}

/// A handle to device-resident (or graph-pending) data. Shape, dtype and
/// device are always known, even before the data exists; handles are cheap
/// to clone and share buffers only through the reference count, never by
/// implicit aliasing across devices.
#[derive(Clone)]
pub struct RawTensor {
    meta: TensorMeta,
    state: DataState,
}

impl fmt::Debug for RawTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            DataState::Resident(_) => "resident",
            DataState::Pending(_) => "pending",
        };
        f.debug_struct("RawTensor")
            .field("shape", &self.meta.shape)
            .field("dtype", &self.meta.dtype)
            .field("device", &self.meta.device)
            .field("state", &state)
            .finish()
    }
}

impl RawTensor {
    /// Build a resident tensor from host data; the device spec resolves
    /// against the process default.
    pub fn from_vec<T: WithDType>(
        data: Vec<T>,
        shape: impl Into<Shape>,
        spec: DeviceSpec,
    ) -> Result<Self> {
        let shape = shape.into();
        if shape.elem_count() != data.len() {
            return Err(Error::ShapeMismatch {
                op: "RawTensor::from_vec".to_string(),
                lhs: shape.dims().to_vec(),
                rhs: vec![data.len()],
            });
        }
        let device = spec.resolve();
        let storage = Storage::Cpu(T::to_cpu_storage(data));
        Ok(Self {
            meta: TensorMeta::new(shape, T::DTYPE, device),
            state: DataState::Resident(Arc::new(storage)),
        })
    }

    /// A tensor filled with one value.
    pub fn full<T: WithDType>(value: T, shape: impl Into<Shape>, spec: DeviceSpec) -> Result<Self> {
        let shape = shape.into();
        let data = vec![value; shape.elem_count()];
        Self::from_vec(data, shape, spec)
    }

    pub(crate) fn from_storage_meta(storage: Storage, meta: TensorMeta) -> Self {
        Self {
            meta,
            state: DataState::Resident(Arc::new(storage)),
        }
    }

    /// A handle bound to a not-yet-computed graph node. The node must carry
    /// a fully inferred shape.
    pub(crate) fn pending(var: Var) -> Result<Self> {
        let shape = var
            .shape()
            .ok_or_else(|| {
                Error::msg("pending tensors require a shape inferred at trace time")
            })?
            .clone();
        let meta = TensorMeta::new(shape, var.dtype(), var.device());
        Ok(Self {
            meta,
            state: DataState::Pending(var),
        })
    }

    /// Bind a handle to a symbolic graph value, so graph-built vars can be
    /// fed back through tensor-level dispatch.
    pub fn from_var(var: &Var) -> Result<Self> {
        Self::pending(var.clone())
    }

    pub fn meta(&self) -> &TensorMeta {
        &self.meta
    }

    pub fn shape(&self) -> &Shape {
        &self.meta.shape
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    pub fn device(&self) -> Device {
        self.meta.device
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.state, DataState::Resident(_))
    }

    pub(crate) fn pending_var(&self) -> Option<&Var> {
        match &self.state {
            DataState::Pending(var) => Some(var),
            DataState::Resident(_) => None,
        }
    }

    /// The explicit blocking point: yields the concrete buffer, failing for
    /// handles whose graph has not produced a value yet.
    pub fn storage(&self) -> Result<Arc<Storage>> {
        match &self.state {
            DataState::Resident(storage) => Ok(storage.clone()),
            DataState::Pending(_) => Err(Error::OutputNotReady),
        }
    }

    /// Read the data out as a flat host vector, materializing first.
    pub fn to_flat_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        let storage = self.storage()?;
        let cpu = storage.to_cpu_storage()?;
        Ok(T::cpu_storage_as_slice(&cpu)?.to_vec())
    }

    /// Read out a single-element tensor.
    pub fn to_scalar<T: WithDType>(&self) -> Result<T> {
        let values = self.to_flat_vec::<T>()?;
        if values.len() != 1 {
            return Err(Error::ShapeMismatch {
                op: "RawTensor::to_scalar".to_string(),
                lhs: self.shape().dims().to_vec(),
                rhs: vec![1],
            });
        }
        Ok(values[0])
    }

    /// Copy to another device; always a fresh owned buffer.
    pub fn to_device(&self, device: Device) -> Result<RawTensor> {
        let outputs = crate::apply(&crate::OpDesc::copy(device), &[self.clone()])?;
        Ok(outputs.into_iter().next().expect("copy returns one output"))
    }

    /// Same resident buffer under a fresh handle, severed from any graph
    /// or trace lineage.
    pub fn detach_data(&self) -> Result<RawTensor> {
        let storage = self.storage()?;
        Ok(Self {
            meta: self.meta.clone(),
            state: DataState::Resident(storage),
        })
    }
}
