use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{DType, Device, Error, Result, Shape, TensorMeta};

/// An `f64` operator parameter that is `Eq`/`Hash` by bit pattern so
/// descriptors stay usable as cache and dedup keys.
#[derive(Clone, Copy, Debug, PartialOrd)]
pub struct Scalar(pub f64);

impl Scalar {
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElemwiseMode {
    // unary
    Identity,
    Neg,
    Abs,
    Log,
    Exp,
    Relu,
    Sqrt,
    // binary
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
}

impl ElemwiseMode {
    pub fn arity(&self) -> usize {
        match self {
            Self::Identity | Self::Neg | Self::Abs | Self::Log | Self::Exp | Self::Relu
            | Self::Sqrt => 1,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Pow | Self::Max => 2,
        }
    }

    /// Modes whose result is only meaningful on floating-point inputs.
    pub fn float_only(&self) -> bool {
        matches!(self, Self::Log | Self::Exp | Self::Sqrt | Self::Pow)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceMode {
    Sum,
    Mean,
}

/// Immutable, value-compared description of a computation: a closed set of
/// tagged operator variants with their parameters. Two descriptors with the
/// same kind and parameters are interchangeable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpDesc {
    Elemwise {
        mode: ElemwiseMode,
    },
    Reduce {
        mode: ReduceMode,
        axis: Option<usize>,
    },
    TypeCvt {
        dtype: DType,
    },
    Copy {
        device: Device,
    },
    UniformRng {
        seed: u64,
        shape: Shape,
        device: Device,
    },
    GaussianRng {
        seed: u64,
        mean: Scalar,
        std: Scalar,
        shape: Shape,
        device: Device,
    },
}

impl fmt::Display for OpDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elemwise { mode } => write!(f, "Elemwise({mode:?})"),
            Self::Reduce { mode, axis } => match axis {
                Some(axis) => write!(f, "Reduce({mode:?}, axis={axis})"),
                None => write!(f, "Reduce({mode:?})"),
            },
            Self::TypeCvt { dtype } => write!(f, "TypeCvt({dtype})"),
            Self::Copy { device } => write!(f, "Copy({device})"),
            Self::UniformRng { .. } => write!(f, "UniformRng"),
            Self::GaussianRng { .. } => write!(f, "GaussianRng"),
        }
    }
}

impl OpDesc {
    pub fn elemwise(mode: ElemwiseMode) -> Self {
        Self::Elemwise { mode }
    }

    pub fn reduce(mode: ReduceMode, axis: Option<usize>) -> Self {
        Self::Reduce { mode, axis }
    }

    pub fn type_cvt(dtype: DType) -> Self {
        Self::TypeCvt { dtype }
    }

    pub fn copy(device: Device) -> Self {
        Self::Copy { device }
    }

    /// Sampling descriptors resolve the default device once, here, so
    /// inference stays a pure function of the descriptor and later default
    /// changes cannot shift an already-traced node.
    pub fn uniform_rng(seed: u64, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.elem_count() == 0 {
            return Err(Error::invalid_parameter("UniformRng", "empty sample shape"));
        }
        Ok(Self::UniformRng {
            seed,
            shape,
            device: crate::get_default_device(),
        })
    }

    pub fn gaussian_rng(seed: u64, mean: f64, std: f64, shape: impl Into<Shape>) -> Result<Self> {
        if !(std > 0.0) {
            return Err(Error::invalid_parameter(
                "GaussianRng",
                format!("std must be positive, got {std}"),
            ));
        }
        let shape = shape.into();
        if shape.elem_count() == 0 {
            return Err(Error::invalid_parameter(
                "GaussianRng",
                "empty sample shape",
            ));
        }
        Ok(Self::GaussianRng {
            seed,
            mean: Scalar(mean),
            std: Scalar(std),
            shape,
            device: crate::get_default_device(),
        })
    }

    /// Number of input handles the operator consumes.
    pub fn arity(&self) -> usize {
        match self {
            Self::Elemwise { mode } => mode.arity(),
            Self::Reduce { .. } | Self::TypeCvt { .. } | Self::Copy { .. } => 1,
            Self::UniformRng { .. } | Self::GaussianRng { .. } => 0,
        }
    }

    fn check_arity(&self, inputs: &[TensorMeta]) -> Result<()> {
        if inputs.len() != self.arity() {
            return Err(Error::invalid_parameter(
                &self.to_string(),
                format!("expected {} inputs, got {}", self.arity(), inputs.len()),
            ));
        }
        Ok(())
    }

    fn check_same_device(&self, inputs: &[TensorMeta]) -> Result<Device> {
        let first = inputs[0].device;
        for input in &inputs[1..] {
            if input.device != first {
                return Err(Error::DeviceMismatch {
                    lhs: first.to_string(),
                    rhs: input.device.to_string(),
                });
            }
        }
        Ok(first)
    }

    /// Shape/dtype/device inference: a pure function of the descriptor and
    /// the input metadata, shared verbatim by the eager and traced execution
    /// paths so the two always agree.
    pub fn infer(&self, inputs: &[TensorMeta]) -> Result<Vec<TensorMeta>> {
        self.check_arity(inputs)?;
        match self {
            Self::Elemwise { mode } => {
                let device = self.check_same_device(inputs)?;
                let dtype = inputs[0].dtype;
                if (mode.float_only() && dtype.is_integral())
                    || (*mode == ElemwiseMode::Neg && dtype == DType::U8)
                {
                    return Err(Error::UnsupportedOperator {
                        op: self.to_string(),
                        device: format!("{device} ({dtype})"),
                    });
                }
                let shape = if mode.arity() == 2 {
                    if inputs[1].dtype != dtype {
                        return Err(Error::DtypeMismatch {
                            op: self.to_string(),
                            expected: dtype.to_string(),
                            got: inputs[1].dtype.to_string(),
                        });
                    }
                    inputs[0]
                        .shape
                        .broadcast_binary(&inputs[1].shape, &self.to_string())?
                } else {
                    inputs[0].shape.clone()
                };
                Ok(vec![TensorMeta::new(shape, dtype, device)])
            }
            Self::Reduce { axis, .. } => {
                let input = &inputs[0];
                let shape = match axis {
                    Some(axis) => input.shape.remove_axis(*axis)?,
                    None => Shape::scalar(),
                };
                Ok(vec![TensorMeta::new(shape, input.dtype, input.device)])
            }
            Self::TypeCvt { dtype } => Ok(vec![TensorMeta::new(
                inputs[0].shape.clone(),
                *dtype,
                inputs[0].device,
            )]),
            Self::Copy { device } => Ok(vec![TensorMeta::new(
                inputs[0].shape.clone(),
                inputs[0].dtype,
                *device,
            )]),
            Self::UniformRng { shape, device, .. } | Self::GaussianRng { shape, device, .. } => {
                Ok(vec![TensorMeta::new(shape.clone(), DType::F32, *device)])
            }
        }
    }
}
