//! Random-distribution sampling through the RNG operators.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::functional::{add_scalar, mul_scalar};
use crate::{apply, Error, OpDesc, Result, Shape, Tensor};

static SEED_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Reset the process-wide seed sequence; subsequent draws are
/// reproducible.
pub fn set_rng_seed(seed: u64) {
    SEED_SEQUENCE.store(seed, Ordering::SeqCst);
}

fn next_seed() -> u64 {
    SEED_SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

fn sample(op: &OpDesc) -> Result<Tensor> {
    let outputs = apply(op, &[])?;
    Ok(Tensor::from_raw(
        outputs
            .into_iter()
            .next()
            .expect("rng operators have one output"),
    ))
}

/// Draw from the Gaussian distribution `N(mean, std^2)`.
pub fn normal(mean: f64, std: f64, shape: impl Into<Shape>) -> Result<Tensor> {
    sample(&OpDesc::gaussian_rng(next_seed(), mean, std, shape)?)
}

/// Draw from the uniform distribution `U(low, high)`, computed as
/// `low + (high - low) * U(0, 1)`.
pub fn uniform(low: f64, high: f64, shape: impl Into<Shape>) -> Result<Tensor> {
    if low >= high {
        return Err(Error::invalid_parameter(
            "uniform",
            format!("not defined for low ({low}) >= high ({high})"),
        ));
    }
    let unit = sample(&OpDesc::uniform_rng(next_seed(), shape)?)?;
    add_scalar(&mul_scalar(&unit, high - low)?, low)
}
