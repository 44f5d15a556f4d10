//! Loss functions with scalar-mean contracts, built on the functional
//! layer.

use crate::functional::{abs, log, mean, mul, pow, relu, rsub_scalar, scalar_like, sub, sum_axis};
use crate::{Error, Result, Tensor};

/// Mean absolute error between `pred` and `label`.
pub fn l1_loss(pred: &Tensor, label: &Tensor) -> Result<Tensor> {
    let diff = sub(pred, label)?;
    mean(&abs(&diff)?)
}

/// Mean squared error between `pred` and `label`.
pub fn square_loss(pred: &Tensor, label: &Tensor) -> Result<Tensor> {
    let diff = sub(pred, label)?;
    mean(&pow(&diff, &scalar_like(&diff, 2.0)?)?)
}

/// Binary cross entropy over probabilities in `(0, 1)`:
/// `-mean(label * log(pred) + (1 - label) * log(1 - pred))`.
pub fn binary_cross_entropy(pred: &Tensor, label: &Tensor) -> Result<Tensor> {
    let pos = mul(label, &log(pred)?)?;
    let neg = mul(&rsub_scalar(1.0, label)?, &log(&rsub_scalar(1.0, pred)?)?)?;
    let total = mean(&crate::functional::add(&pos, &neg)?)?;
    crate::functional::neg(&total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HingeNorm {
    L1,
    L2,
}

/// Hinge loss over `(N, C)` predictions with -1/1 labels:
/// `mean_i(sum_j(max(0, 1 - pred_ij * label_ij)))`, squared per element
/// for the L2 norm.
pub fn hinge_loss(pred: &Tensor, label: &Tensor, norm: HingeNorm) -> Result<Tensor> {
    if pred.shape().rank() != 2 {
        return Err(Error::invalid_parameter(
            "hinge_loss",
            format!("expected rank-2 predictions, got {:?}", pred.shape()),
        ));
    }
    let margin = relu(&rsub_scalar(1.0, &mul(pred, label)?)?)?;
    let per_element = match norm {
        HingeNorm::L1 => margin,
        HingeNorm::L2 => pow(&margin, &scalar_like(&margin, 2.0)?)?,
    };
    mean(&sum_axis(&per_element, 1)?)
}
