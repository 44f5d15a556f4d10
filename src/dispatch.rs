use log::debug;

use crate::graph::Var;
use crate::tensor::RawTensor;
use crate::{Error, OpDesc, Result, TensorMeta};

/// Route one operator application either to immediate kernel execution or
/// into the graph that owns its pending inputs. Output count and metadata
/// come from the same inference in both cases, so the paths always agree.
pub fn apply(op: &OpDesc, inputs: &[RawTensor]) -> Result<Vec<RawTensor>> {
    let pending = inputs
        .iter()
        .filter_map(|t| t.pending_var())
        .collect::<Vec<_>>();
    if pending.is_empty() {
        apply_eager(op, inputs)
    } else {
        apply_traced(op, inputs, &pending)
    }
}

fn apply_eager(op: &OpDesc, inputs: &[RawTensor]) -> Result<Vec<RawTensor>> {
    let metas = inputs.iter().map(|t| t.meta().clone()).collect::<Vec<_>>();
    let out_metas = op.infer(&metas)?;
    debug!("apply {op} eager, {} input(s)", inputs.len());

    let storages = inputs
        .iter()
        .map(|t| t.storage())
        .collect::<Result<Vec<_>>>()?;
    let storage_refs = storages.iter().map(|s| s.as_ref()).collect::<Vec<_>>();
    let meta_refs = metas.iter().collect::<Vec<_>>();

    let mut outputs = Vec::with_capacity(out_metas.len());
    for out_meta in out_metas {
        // Kernels run where the inputs live; cross-device copies are the
        // one operator whose output meta names another device.
        let exec_device = match inputs.first() {
            Some(input) => input.device(),
            None => out_meta.device,
        };
        let storage = exec_device.run_op(op, &storage_refs, &meta_refs, &out_meta)?;
        outputs.push(RawTensor::from_storage_meta(storage, out_meta));
    }
    Ok(outputs)
}

fn apply_traced(op: &OpDesc, inputs: &[RawTensor], pending: &[&Var]) -> Result<Vec<RawTensor>> {
    let first = pending[0];
    for var in &pending[1..] {
        if !first.same_graph(var) {
            return Err(Error::ModeConflict(
                "inputs are pending on two different graphs".to_string(),
            ));
        }
    }
    let graph = first.graph_handle();
    debug!("apply {op} traced, {} input(s)", inputs.len());

    // Resident inputs are captured as implicit constant nodes of the
    // active graph.
    let vars = inputs
        .iter()
        .map(|t| match t.pending_var() {
            Some(var) => Ok(var.clone()),
            None => graph.add_const(t.clone()),
        })
        .collect::<Result<Vec<_>>>()?;

    let out_vars = graph.apply_op(op, &vars)?;
    out_vars.into_iter().map(RawTensor::pending).collect()
}

/// Inference-only entry point: the metadata both execution paths would
/// produce, without running anything.
pub fn infer_output_meta(op: &OpDesc, inputs: &[TensorMeta]) -> Result<Vec<TensorMeta>> {
    op.infer(inputs)
}
