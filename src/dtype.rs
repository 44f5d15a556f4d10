use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cpu_backend::CpuStorage;
use crate::{Error, Result};

/// Element type of a tensor, carried at runtime so descriptors and graph
/// nodes can be compared, hashed and serialized by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    U8,
    I32,
    F32,
    F64,
}

impl DType {
    /// Canonical string form, matching the state-dict encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I32 => "int32",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Self::U8 | Self::I32)
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I32 => 4,
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uint8" | "u8" => Ok(Self::U8),
            "int32" | "i32" => Ok(Self::I32),
            "float32" | "f32" => Ok(Self::F32),
            "float64" | "f64" => Ok(Self::F64),
            other => Err(Error::invalid_parameter(
                "dtype",
                format!("unknown dtype string {other:?}"),
            )),
        }
    }
}

/// Rust scalar types usable as tensor elements.
pub trait WithDType:
    Copy + Debug + Display + PartialEq + PartialOrd + Send + Sync + 'static
{
    const DTYPE: DType;

    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;

    fn to_cpu_storage(data: Vec<Self>) -> CpuStorage;
    fn cpu_storage_as_slice(storage: &CpuStorage) -> Result<&[Self]>;
}

macro_rules! with_dtype {
    ($ty:ty, $dtype:ident) => {
        impl WithDType for $ty {
            const DTYPE: DType = DType::$dtype;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(v: f64) -> Self {
                v as $ty
            }

            fn to_cpu_storage(data: Vec<Self>) -> CpuStorage {
                CpuStorage::$dtype(data)
            }

            fn cpu_storage_as_slice(storage: &CpuStorage) -> Result<&[Self]> {
                match storage {
                    CpuStorage::$dtype(data) => Ok(data),
                    other => Err(Error::DtypeMismatch {
                        op: "storage access".to_string(),
                        expected: DType::$dtype.to_string(),
                        got: other.dtype().to_string(),
                    }),
                }
            }
        }
    };
}

with_dtype!(u8, U8);
with_dtype!(i32, I32);
with_dtype!(f32, F32);
with_dtype!(f64, F64);
