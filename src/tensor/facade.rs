use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::cpu_backend::CpuStorage;
use crate::tensor::RawTensor;
use crate::{DType, Device, DeviceSpec, Error, OpDesc, Result, Shape, WithDType};

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(0);

type RemapHook = Box<dyn Fn(&str) -> String + Send + Sync>;
static DEVICE_REMAP_HOOK: RwLock<Option<RemapHook>> = RwLock::new(None);

/// Install a hook that rewrites device strings while restoring tensor
/// state, so a snapshot taken on one machine can load on another topology.
pub fn set_device_remap_hook<F>(hook: F)
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    *DEVICE_REMAP_HOOK.write().unwrap() = Some(Box::new(hook));
}

pub fn clear_device_remap_hook() {
    *DEVICE_REMAP_HOOK.write().unwrap() = None;
}

/// Quantization descriptor carried alongside a tensor for serialization
/// round trips; the execution core never interprets it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantDict {
    pub mode: Option<String>,
    pub scale: Option<f64>,
    pub zero_point: Option<f64>,
}

/// Serialized form of a tensor: host data, placement string, dtype string
/// and the quantization dict. Reconstructs through the normal constructor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorState {
    pub data: CpuStorage,
    pub shape: Vec<usize>,
    pub device: String,
    pub dtype: String,
    pub qdict: QuantDict,
}

/// The user-facing value type: one raw handle plus value semantics on top.
/// Hashing and equality go by object identity, not by value, so tensors
/// can key bookkeeping maps even when two of them hold equal data.
#[derive(Clone)]
pub struct Tensor {
    raw: RawTensor,
    q_dict: QuantDict,
    uid: u64,
}

fn fresh_uid() -> u64 {
    NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed)
}

impl Tensor {
    /// Construct from host data. `device` accepts the canonical string
    /// grammar; `None` resolves the process-wide default.
    pub fn new<T: WithDType>(
        data: Vec<T>,
        shape: impl Into<Shape>,
        device: Option<&str>,
    ) -> Result<Self> {
        let spec = match device {
            Some(s) => s.parse::<DeviceSpec>()?,
            None => DeviceSpec::any(),
        };
        Ok(Self::from_raw(RawTensor::from_vec(data, shape, spec)?))
    }

    pub fn from_raw(raw: RawTensor) -> Self {
        Self {
            raw,
            q_dict: QuantDict::default(),
            uid: fresh_uid(),
        }
    }

    pub fn raw(&self) -> &RawTensor {
        &self.raw
    }

    pub fn shape(&self) -> &Shape {
        self.raw.shape()
    }

    pub fn dtype(&self) -> DType {
        self.raw.dtype()
    }

    pub fn device(&self) -> Device {
        self.raw.device()
    }

    pub fn q_dict(&self) -> &QuantDict {
        &self.q_dict
    }

    pub fn q_dict_mut(&mut self) -> &mut QuantDict {
        &mut self.q_dict
    }

    pub fn to_flat_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        self.raw.to_flat_vec()
    }

    pub fn to_scalar<T: WithDType>(&self) -> Result<T> {
        self.raw.to_scalar()
    }

    /// Copy this tensor to another device.
    pub fn to(&self, device: &str) -> Result<Tensor> {
        let device = device.parse::<DeviceSpec>()?.resolve();
        let outputs = crate::apply(&OpDesc::copy(device), &[self.raw.clone()])?;
        Ok(Self::from_raw(
            outputs.into_iter().next().expect("copy returns one output"),
        ))
    }

    /// A new facade over the same resident data, severed from any trace
    /// lineage. Later operations on the original never affect it.
    pub fn detach(&self) -> Result<Tensor> {
        Ok(Self {
            raw: self.raw.detach_data()?,
            q_dict: self.q_dict.clone(),
            uid: fresh_uid(),
        })
    }

    /// Capture the serializable state dict.
    pub fn to_state(&self) -> Result<TensorState> {
        let storage = self.raw.storage()?;
        let data = storage.to_cpu_storage()?.into_owned();
        Ok(TensorState {
            data,
            shape: self.shape().dims().to_vec(),
            device: self.device().to_string(),
            dtype: self.dtype().to_string(),
            qdict: self.q_dict.clone(),
        })
    }

    /// Rebuild a tensor from its state dict, remapping the device string
    /// through the installed hook, if any.
    pub fn from_state(state: TensorState) -> Result<Tensor> {
        let device = match &*DEVICE_REMAP_HOOK.read().unwrap() {
            Some(hook) => hook(&state.device),
            None => state.device.clone(),
        };
        let dtype: DType = state.dtype.parse()?;
        if state.data.dtype() != dtype {
            return Err(Error::DtypeMismatch {
                op: "Tensor::from_state".to_string(),
                expected: dtype.to_string(),
                got: state.data.dtype().to_string(),
            });
        }
        let spec = device.parse::<DeviceSpec>()?;
        let shape = Shape::from(state.shape);
        let mut tensor = match state.data {
            CpuStorage::U8(data) => Tensor::from_raw(RawTensor::from_vec(data, shape, spec)?),
            CpuStorage::I32(data) => Tensor::from_raw(RawTensor::from_vec(data, shape, spec)?),
            CpuStorage::F32(data) => Tensor::from_raw(RawTensor::from_vec(data, shape, spec)?),
            CpuStorage::F64(data) => Tensor::from_raw(RawTensor::from_vec(data, shape, spec)?),
        };
        tensor.q_dict = state.qdict;
        Ok(tensor)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", self.shape())
            .field("dtype", &self.dtype())
            .field("device", &self.device())
            .field("uid", &self.uid)
            .finish()
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for Tensor {}

impl Hash for Tensor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}
