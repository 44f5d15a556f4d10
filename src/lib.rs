//! Imptensor is an imperative tensor execution bridge: eager, value-level
//! tensor operations that can also be traced into a compiled, reusable
//! dataflow graph.
//!
//! Every operation goes through one dispatch point, [`apply`]. Given an
//! operator descriptor and input handles it either runs the backend kernel
//! immediately (all inputs resident) or inserts an operator node into the
//! graph that owns the pending inputs. Shape and dtype inference is shared
//! between both paths, so a traced program always agrees with its eager
//! counterpart.
//!
//! ## A quick guide
//! - Eager values are [`Tensor`]s (or the lower-level [`RawTensor`]
//!   handles they wrap). Operations on them compute immediately.
//! - A [`Graph`] holds input, operator and output nodes. Feed inputs by
//!   pushing values, or install an [`InputSource`] pull callback; read
//!   outputs by pulling, or install an [`OutputSink`].
//! - [`Graph::compile`] freezes the transitive closure of the chosen
//!   outputs into an [`Executable`] that can run any number of times with
//!   fresh inputs; set a non-zero async exec level to move runs onto a
//!   worker thread and collect them with [`Executable::wait`].
//!
//! ## What can you do with it?
//! ```
//! use imptensor::{apply, ElemwiseMode, OpDesc, Tensor};
//!
//! let x = Tensor::new(vec![1.0f32, 2.0, 3.0], [3], None).unwrap();
//! let op = OpDesc::elemwise(ElemwiseMode::Mul);
//! let outputs = apply(&op, &[x.raw().clone(), x.raw().clone()]).unwrap();
//! let y = Tensor::from_raw(outputs.into_iter().next().unwrap());
//! assert_eq!(y.to_flat_vec::<f32>().unwrap(), vec![1.0, 4.0, 9.0]);
//! ```

mod cpu_backend;
mod device;
mod dispatch;
mod dtype;
mod error;
pub mod functional;
mod graph;
pub mod loss;
mod op;
pub mod random;
mod shape;
mod storage;
mod tensor;

pub use cpu_backend::CpuStorage;
pub use device::{get_default_device, set_default_device, Device, DeviceKind, DeviceSpec};
pub use dispatch::{apply, infer_output_meta};
pub use dtype::{DType, WithDType};
pub use error::{Context, Error, Result};
pub use graph::{
    input_callback, output_callback, AttrOutputNode, Executable, Graph, InputNode, InputSource,
    NodeId, OutputNode, OutputSink, Var, VarFuture,
};
pub use op::{ElemwiseMode, OpDesc, ReduceMode, Scalar};
pub use shape::{Shape, TensorMeta};
pub use storage::{BackendDevice, BackendStorage, Storage};
pub use tensor::{
    clear_device_remap_hook, set_device_remap_hook, DataState, QuantDict, RawTensor, Tensor,
    TensorState,
};
