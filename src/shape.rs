use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DType, Device, Error, Result};

/// Runtime tensor shape: an ordered sequence of non-negative extents.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn scalar() -> Self {
        Self(vec![1])
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// The shape with `axis` removed, used by axis reductions.
    pub fn remove_axis(&self, axis: usize) -> Result<Shape> {
        if axis >= self.rank() {
            return Err(Error::invalid_parameter(
                "reduce",
                format!("axis {axis} out of range for rank {}", self.rank()),
            ));
        }
        let mut dims = self.0.clone();
        dims.remove(axis);
        if dims.is_empty() {
            dims.push(1);
        }
        Ok(Shape(dims))
    }

    /// Elementwise broadcast of two operand shapes: either the shapes are
    /// identical, or one operand is a single element and takes the shape of
    /// the other.
    pub fn broadcast_binary(&self, rhs: &Shape, op: &str) -> Result<Shape> {
        if self == rhs {
            Ok(self.clone())
        } else if self.elem_count() == 1 {
            Ok(rhs.clone())
        } else if rhs.elem_count() == 1 {
            Ok(self.clone())
        } else {
            Err(Error::ShapeMismatch {
                op: op.to_string(),
                lhs: self.0.clone(),
                rhs: rhs.0.clone(),
            })
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

impl From<usize> for Shape {
    fn from(dim: usize) -> Self {
        Self(vec![dim])
    }
}

/// The metadata triple every handle and graph node carries: known even for
/// values that have not been computed yet.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorMeta {
    pub shape: Shape,
    pub dtype: DType,
    pub device: Device,
}

impl TensorMeta {
    pub fn new(shape: impl Into<Shape>, dtype: DType, device: Device) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_rules() {
        let a = Shape::from([2, 3]);
        let b = Shape::from([2, 3]);
        assert_eq!(a.broadcast_binary(&b, "add").unwrap(), a);

        let s = Shape::from([1]);
        assert_eq!(a.broadcast_binary(&s, "add").unwrap(), a);
        assert_eq!(s.broadcast_binary(&a, "add").unwrap(), a);

        let c = Shape::from([3, 2]);
        assert!(a.broadcast_binary(&c, "add").is_err());
    }

    #[test]
    fn remove_axis() {
        let s = Shape::from([2, 3]);
        assert_eq!(s.remove_axis(1).unwrap().dims(), &[2]);
        assert_eq!(Shape::from([4]).remove_axis(0).unwrap().dims(), &[1]);
        assert!(s.remove_axis(2).is_err());
    }
}
