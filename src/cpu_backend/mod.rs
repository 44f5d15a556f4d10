use std::borrow::Cow;

use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::storage::{BackendDevice, BackendStorage};
use crate::{DType, ElemwiseMode, Error, OpDesc, ReduceMode, Result, TensorMeta, WithDType};

pub struct CpuDevice;

/// Host-memory buffer, tagged by element type. Serializable so tensor
/// state dicts can carry it verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CpuStorage {
    U8(Vec<u8>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl CpuStorage {
    pub fn dtype(&self) -> DType {
        match self {
            Self::U8(_) => DType::U8,
            Self::I32(_) => DType::I32,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    pub fn elem_count(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }
}

impl BackendStorage for CpuStorage {
    fn dtype(&self) -> DType {
        CpuStorage::dtype(self)
    }

    fn elem_count(&self) -> usize {
        CpuStorage::elem_count(self)
    }

    fn to_cpu_storage(&self) -> Result<Cow<CpuStorage>> {
        Ok(Cow::Borrowed(self))
    }
}

fn unary_kernel<T: WithDType>(src: &[T], f: impl Fn(f64) -> f64 + Sync) -> Vec<T> {
    src.into_par_iter()
        .map(|v| T::from_f64(f(v.to_f64())))
        .collect()
}

/// Elementwise binary kernel with single-element broadcast on either side.
fn binary_kernel<T: WithDType>(
    lhs: &[T],
    rhs: &[T],
    out_len: usize,
    f: impl Fn(f64, f64) -> f64 + Sync,
) -> Vec<T> {
    (0..out_len)
        .into_par_iter()
        .map(|i| {
            let l = lhs[if lhs.len() == 1 { 0 } else { i }].to_f64();
            let r = rhs[if rhs.len() == 1 { 0 } else { i }].to_f64();
            T::from_f64(f(l, r))
        })
        .collect()
}

fn reduce_all<T: WithDType>(src: &[T], mode: ReduceMode) -> Vec<T> {
    let sum: f64 = src.iter().map(|v| v.to_f64()).sum();
    let out = match mode {
        ReduceMode::Sum => sum,
        ReduceMode::Mean => sum / src.len() as f64,
    };
    vec![T::from_f64(out)]
}

fn reduce_axis<T: WithDType>(src: &[T], dims: &[usize], axis: usize, mode: ReduceMode) -> Vec<T> {
    let axis_len = dims[axis];
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();
    let mut out = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let mut sum = 0.0;
            for k in 0..axis_len {
                sum += src[(o * axis_len + k) * inner + i].to_f64();
            }
            let v = match mode {
                ReduceMode::Sum => sum,
                ReduceMode::Mean => sum / axis_len as f64,
            };
            out.push(T::from_f64(v));
        }
    }
    out
}

fn elemwise_closure(mode: ElemwiseMode) -> impl Fn(f64, f64) -> f64 + Sync {
    move |a, b| match mode {
        ElemwiseMode::Identity => a,
        ElemwiseMode::Neg => -a,
        ElemwiseMode::Abs => a.abs(),
        ElemwiseMode::Log => a.ln(),
        ElemwiseMode::Exp => a.exp(),
        ElemwiseMode::Relu => a.max(0.0),
        ElemwiseMode::Sqrt => a.sqrt(),
        ElemwiseMode::Add => a + b,
        ElemwiseMode::Sub => a - b,
        ElemwiseMode::Mul => a * b,
        ElemwiseMode::Div => a / b,
        ElemwiseMode::Pow => a.powf(b),
        ElemwiseMode::Max => a.max(b),
    }
}

macro_rules! dispatch_dtype {
    ($storage:expr, $data:ident => $body:expr) => {
        match $storage {
            CpuStorage::U8($data) => CpuStorage::U8($body),
            CpuStorage::I32($data) => CpuStorage::I32($body),
            CpuStorage::F32($data) => CpuStorage::F32($body),
            CpuStorage::F64($data) => CpuStorage::F64($body),
        }
    };
}

fn type_cvt(src: &CpuStorage, dtype: DType) -> CpuStorage {
    fn gather(src: &CpuStorage) -> Vec<f64> {
        match src {
            CpuStorage::U8(v) => v.iter().map(|x| *x as f64).collect(),
            CpuStorage::I32(v) => v.iter().map(|x| *x as f64).collect(),
            CpuStorage::F32(v) => v.iter().map(|x| *x as f64).collect(),
            CpuStorage::F64(v) => v.clone(),
        }
    }
    let values = gather(src);
    match dtype {
        DType::U8 => CpuStorage::U8(values.into_iter().map(|x| x as u8).collect()),
        DType::I32 => CpuStorage::I32(values.into_iter().map(|x| x as i32).collect()),
        DType::F32 => CpuStorage::F32(values.into_iter().map(|x| x as f32).collect()),
        DType::F64 => CpuStorage::F64(values),
    }
}

impl BackendDevice for CpuDevice {
    type Storage = CpuStorage;

    fn run_op(
        &self,
        op: &OpDesc,
        inputs: &[&Self::Storage],
        metas: &[&TensorMeta],
        out_meta: &TensorMeta,
    ) -> Result<Self::Storage> {
        match op {
            OpDesc::Elemwise { mode } => {
                let f = elemwise_closure(*mode);
                if mode.arity() == 1 {
                    Ok(dispatch_dtype!(inputs[0], data => unary_kernel(data, |a| f(a, 0.0))))
                } else {
                    let out_len = out_meta.shape.elem_count();
                    match (inputs[0], inputs[1]) {
                        (CpuStorage::U8(l), CpuStorage::U8(r)) => {
                            Ok(CpuStorage::U8(binary_kernel(l, r, out_len, f)))
                        }
                        (CpuStorage::I32(l), CpuStorage::I32(r)) => {
                            Ok(CpuStorage::I32(binary_kernel(l, r, out_len, f)))
                        }
                        (CpuStorage::F32(l), CpuStorage::F32(r)) => {
                            Ok(CpuStorage::F32(binary_kernel(l, r, out_len, f)))
                        }
                        (CpuStorage::F64(l), CpuStorage::F64(r)) => {
                            Ok(CpuStorage::F64(binary_kernel(l, r, out_len, f)))
                        }
                        (l, r) => Err(Error::DtypeMismatch {
                            op: op.to_string(),
                            expected: l.dtype().to_string(),
                            got: r.dtype().to_string(),
                        }),
                    }
                }
            }
            OpDesc::Reduce { mode, axis } => match axis {
                None => Ok(dispatch_dtype!(inputs[0], data => reduce_all(data, *mode))),
                Some(axis) => {
                    let dims = metas[0].shape.dims();
                    Ok(dispatch_dtype!(inputs[0], data => reduce_axis(data, dims, *axis, *mode)))
                }
            },
            OpDesc::TypeCvt { dtype } => Ok(type_cvt(inputs[0], *dtype)),
            OpDesc::Copy { .. } => self.copy(inputs[0]),
            OpDesc::UniformRng { seed, shape, .. } => {
                let mut rng = rand::rngs::StdRng::seed_from_u64(*seed);
                let data = (0..shape.elem_count()).map(|_| rng.gen::<f32>()).collect();
                Ok(CpuStorage::F32(data))
            }
            OpDesc::GaussianRng {
                seed,
                mean,
                std,
                shape,
                ..
            } => {
                let normal = Normal::new(mean.value(), std.value()).map_err(Error::wrap)?;
                let mut rng = rand::rngs::StdRng::seed_from_u64(*seed);
                let data = (0..shape.elem_count())
                    .map(|_| normal.sample(&mut rng) as f32)
                    .collect();
                Ok(CpuStorage::F32(data))
            }
        }
    }

    fn copy(&self, src: &Self::Storage) -> Result<Self::Storage> {
        Ok(src.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Device;

    fn meta(dims: &[usize], dtype: DType) -> TensorMeta {
        TensorMeta::new(dims, dtype, Device::cpu(0))
    }

    #[test]
    fn binary_broadcast_scalar() {
        let lhs = CpuStorage::F32(vec![1.0, 2.0, 3.0]);
        let rhs = CpuStorage::F32(vec![10.0]);
        let out_meta = meta(&[3], DType::F32);
        let out = CpuDevice
            .run_op(
                &OpDesc::elemwise(ElemwiseMode::Add),
                &[&lhs, &rhs],
                &[&meta(&[3], DType::F32), &meta(&[1], DType::F32)],
                &out_meta,
            )
            .unwrap();
        assert_eq!(out, CpuStorage::F32(vec![11.0, 12.0, 13.0]));
    }

    #[test]
    fn reduce_axis_sum() {
        // 2x3 row-major
        let src = CpuStorage::F32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = CpuDevice
            .run_op(
                &OpDesc::reduce(ReduceMode::Sum, Some(1)),
                &[&src],
                &[&meta(&[2, 3], DType::F32)],
                &meta(&[2], DType::F32),
            )
            .unwrap();
        assert_eq!(out, CpuStorage::F32(vec![6.0, 15.0]));
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let op = OpDesc::uniform_rng(7, [16]).unwrap();
        let out_meta = meta(&[16], DType::F32);
        let a = CpuDevice.run_op(&op, &[], &[], &out_meta).unwrap();
        let b = CpuDevice.run_op(&op, &[], &[], &out_meta).unwrap();
        assert_eq!(a, b);
        if let CpuStorage::F32(v) = a {
            assert!(v.iter().all(|x| (0.0..1.0).contains(x)));
        }
    }
}
