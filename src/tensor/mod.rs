mod facade;
mod raw;

pub use facade::{
    clear_device_remap_hook, set_device_remap_hook, QuantDict, Tensor, TensorState,
};
pub use raw::{DataState, RawTensor};
