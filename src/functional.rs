//! Thin eager glue over [`apply`]: elementwise ops, reductions and scalar
//! helpers on the tensor facade.

use crate::{apply, DType, ElemwiseMode, OpDesc, RawTensor, ReduceMode, Result, Tensor};

fn apply_facade(op: &OpDesc, inputs: &[&Tensor]) -> Result<Tensor> {
    let raws = inputs.iter().map(|t| t.raw().clone()).collect::<Vec<_>>();
    let outputs = apply(op, &raws)?;
    Ok(Tensor::from_raw(
        outputs
            .into_iter()
            .next()
            .expect("elementwise operators have one output"),
    ))
}

macro_rules! unary_fn {
    ($name:ident, $mode:ident) => {
        pub fn $name(x: &Tensor) -> Result<Tensor> {
            apply_facade(&OpDesc::elemwise(ElemwiseMode::$mode), &[x])
        }
    };
}

macro_rules! binary_fn {
    ($name:ident, $mode:ident) => {
        pub fn $name(x: &Tensor, y: &Tensor) -> Result<Tensor> {
            apply_facade(&OpDesc::elemwise(ElemwiseMode::$mode), &[x, y])
        }
    };
}

unary_fn!(neg, Neg);
unary_fn!(abs, Abs);
unary_fn!(log, Log);
unary_fn!(exp, Exp);
unary_fn!(relu, Relu);
unary_fn!(sqrt, Sqrt);

binary_fn!(add, Add);
binary_fn!(sub, Sub);
binary_fn!(mul, Mul);
binary_fn!(div, Div);
binary_fn!(pow, Pow);
binary_fn!(maximum, Max);

/// A single-element tensor matching `x`'s dtype and device, for scalar
/// broadcasting.
pub fn scalar_like(x: &Tensor, value: f64) -> Result<Tensor> {
    let spec = x.device().into();
    let raw = match x.dtype() {
        DType::U8 => RawTensor::from_vec(vec![value as u8], [1], spec)?,
        DType::I32 => RawTensor::from_vec(vec![value as i32], [1], spec)?,
        DType::F32 => RawTensor::from_vec(vec![value as f32], [1], spec)?,
        DType::F64 => RawTensor::from_vec(vec![value], [1], spec)?,
    };
    Ok(Tensor::from_raw(raw))
}

pub fn add_scalar(x: &Tensor, value: f64) -> Result<Tensor> {
    add(x, &scalar_like(x, value)?)
}

pub fn mul_scalar(x: &Tensor, value: f64) -> Result<Tensor> {
    mul(x, &scalar_like(x, value)?)
}

/// `value - x`, elementwise.
pub fn rsub_scalar(value: f64, x: &Tensor) -> Result<Tensor> {
    sub(&scalar_like(x, value)?, x)
}

/// Mean over all elements, to a single-element tensor.
pub fn mean(x: &Tensor) -> Result<Tensor> {
    apply_facade(&OpDesc::reduce(ReduceMode::Mean, None), &[x])
}

/// Sum over all elements, to a single-element tensor.
pub fn sum(x: &Tensor) -> Result<Tensor> {
    apply_facade(&OpDesc::reduce(ReduceMode::Sum, None), &[x])
}

/// Sum along one axis; the axis disappears from the output shape.
pub fn sum_axis(x: &Tensor, axis: usize) -> Result<Tensor> {
    apply_facade(&OpDesc::reduce(ReduceMode::Sum, Some(axis)), &[x])
}

/// Convert to another dtype.
pub fn astype(x: &Tensor, dtype: DType) -> Result<Tensor> {
    apply_facade(&OpDesc::type_cvt(dtype), &[x])
}
