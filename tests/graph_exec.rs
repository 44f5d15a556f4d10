use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use imptensor::{
    input_callback, output_callback, DType, Device, DeviceSpec, ElemwiseMode, Error, Graph, OpDesc,
    RawTensor,
};

fn raw_f32(data: Vec<f32>, shape: &[usize]) -> RawTensor {
    RawTensor::from_vec(data, shape, DeviceSpec::any()).unwrap()
}

#[test]
fn callback_input_to_future_output() {
    let graph = Graph::new();
    let x = input_callback(
        || Ok(raw_f32(vec![1.0, 2.0, 3.0], &[3])),
        Device::cpu(0),
        DType::F32,
        &graph,
    )
    .unwrap();
    let y = graph
        .apply_op(&OpDesc::elemwise(ElemwiseMode::Identity), &[x])
        .unwrap()
        .remove(0);
    let (out, future) = graph.add_output_future(&y).unwrap();

    let exe = graph.compile(&[&out]).unwrap();
    exe.execute().unwrap();
    let value = future.wait();
    assert_eq!(value.to_flat_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn sink_output_sees_every_run() {
    let graph = Graph::new();
    let input = graph.add_input(Device::cpu(0), DType::F32).unwrap();
    let doubled = graph
        .apply_op(
            &OpDesc::elemwise(ElemwiseMode::Add),
            &[input.var().clone(), input.var().clone()],
        )
        .unwrap()
        .remove(0);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let out = output_callback(
        move |value: RawTensor| {
            sink_seen
                .lock()
                .unwrap()
                .push(value.to_scalar::<f32>().unwrap());
        },
        &doubled,
    )
    .unwrap();

    let exe = graph.compile(&[&out]).unwrap();
    for v in [1.0f32, 2.0, 3.0] {
        input.set_value(raw_f32(vec![v], &[1])).unwrap();
        exe.execute().unwrap();
    }
    assert_eq!(*seen.lock().unwrap(), vec![2.0, 4.0, 6.0]);
}

#[test]
fn compiled_graph_reuses_plan_fifo() {
    let graph = Graph::new();
    let input = graph.add_input(Device::cpu(0), DType::F32).unwrap();
    let scale = graph.add_const(raw_f32(vec![10.0], &[1])).unwrap();
    let scaled = graph
        .apply_op(
            &OpDesc::elemwise(ElemwiseMode::Mul),
            &[input.var().clone(), scale],
        )
        .unwrap()
        .remove(0);
    let out = graph.add_output(&scaled).unwrap();
    let exe = graph.compile(&[out.var()]).unwrap();

    // Queue all inputs first: deliveries must come back in push order.
    for v in [1.0f32, 2.0, 3.0] {
        input.set_value(raw_f32(vec![v], &[1])).unwrap();
    }
    for _ in 0..3 {
        exe.execute().unwrap();
    }
    let mut got = Vec::new();
    for _ in 0..3 {
        got.push(out.get_value().unwrap().to_scalar::<f32>().unwrap());
    }
    assert_eq!(got, vec![10.0, 20.0, 30.0]);
}

#[test]
fn async_execute_matches_sync() {
    let build = |level: u8| {
        let graph = Graph::new();
        graph.set_async_exec_level(level);
        let input = graph.add_input(Device::cpu(0), DType::F32).unwrap();
        let sq = graph
            .apply_op(
                &OpDesc::elemwise(ElemwiseMode::Mul),
                &[input.var().clone(), input.var().clone()],
            )
            .unwrap()
            .remove(0);
        let out = graph.add_output(&sq).unwrap();
        let exe = graph.compile(&[out.var()]).unwrap();
        (input, out, exe)
    };

    let (sync_in, sync_out, sync_exe) = build(0);
    let (async_in, async_out, async_exe) = build(0b100);

    let mut sync_values = Vec::new();
    let mut async_values = Vec::new();
    for v in [2.0f32, 3.0, 4.0] {
        sync_in.set_value(raw_f32(vec![v], &[1])).unwrap();
        sync_exe.execute().unwrap();
        sync_values.push(sync_out.get_value().unwrap().to_scalar::<f32>().unwrap());

        // Async runs may receive their input after execute(): the worker
        // blocks on the input queue.
        async_exe.execute().unwrap();
        async_in.set_value(raw_f32(vec![v], &[1])).unwrap();
        async_values.push(async_out.get_value().unwrap().to_scalar::<f32>().unwrap());
    }
    async_exe.wait().unwrap();
    assert_eq!(sync_values, async_values);
    assert_eq!(sync_values, vec![4.0, 9.0, 16.0]);
}

#[test]
fn deep_operator_chains_execute() {
    let graph = Graph::new();
    let input = graph.add_input(Device::cpu(0), DType::F32).unwrap();
    let a = graph
        .apply_op(&OpDesc::elemwise(ElemwiseMode::Neg), &[input.var().clone()])
        .unwrap()
        .remove(0);
    let b = graph
        .apply_op(&OpDesc::elemwise(ElemwiseMode::Neg), &[a])
        .unwrap()
        .remove(0);
    let scale = graph.add_const(raw_f32(vec![2.0], &[1])).unwrap();
    let c = graph
        .apply_op(&OpDesc::elemwise(ElemwiseMode::Mul), &[b, scale])
        .unwrap()
        .remove(0);
    let out = graph.add_output(&c).unwrap();

    // Every transitive ancestor must make it into the plan, not just the
    // nodes directly behind the outputs.
    let exe = graph.compile(&[out.var()]).unwrap();
    input.set_value(raw_f32(vec![1.5], &[1])).unwrap();
    exe.execute().unwrap();
    assert_eq!(out.get_value().unwrap().to_scalar::<f32>().unwrap(), 3.0);
}

#[test]
fn failed_run_preserves_prior_deliveries() {
    let graph = Graph::new();
    let pulls = Arc::new(AtomicUsize::new(0));
    let source_pulls = pulls.clone();
    let x = input_callback(
        move || {
            if source_pulls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(raw_f32(vec![7.0], &[1]))
            } else {
                Err(Error::msg("source exhausted"))
            }
        },
        Device::cpu(0),
        DType::F32,
        &graph,
    )
    .unwrap();
    let y = graph
        .apply_op(&OpDesc::elemwise(ElemwiseMode::Identity), &[x])
        .unwrap()
        .remove(0);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let sink = output_callback(
        move |value: RawTensor| {
            sink_seen
                .lock()
                .unwrap()
                .push(value.to_scalar::<f32>().unwrap());
        },
        &y,
    )
    .unwrap();
    let out = graph.add_output(&y).unwrap();
    let exe = graph.compile(&[&sink, out.var()]).unwrap();

    exe.execute().unwrap();
    assert_eq!(out.get_value().unwrap().to_scalar::<f32>().unwrap(), 7.0);

    // The second run fails at the input: the error surfaces from
    // execute(), earlier deliveries stay valid, and nothing new arrives.
    assert!(exe.execute().is_err());
    assert_eq!(*seen.lock().unwrap(), vec![7.0]);
    assert!(matches!(out.get_value(), Err(Error::OutputNotReady)));
}

#[test]
fn async_failure_surfaces_at_wait() {
    let graph = Graph::new();
    graph.set_async_exec_level(0b100);
    let x = input_callback(
        || Err(Error::msg("source exhausted")),
        Device::cpu(0),
        DType::F32,
        &graph,
    )
    .unwrap();
    let y = graph
        .apply_op(&OpDesc::elemwise(ElemwiseMode::Identity), &[x])
        .unwrap()
        .remove(0);
    let out = graph.add_output(&y).unwrap();
    let exe = graph.compile(&[out.var()]).unwrap();

    exe.execute().unwrap();
    assert!(exe.wait().is_err());
    assert!(matches!(out.get_value(), Err(Error::OutputNotReady)));
}

#[test]
fn attr_output_reports_per_run_shapes() {
    let graph = Graph::new();
    let input = graph.add_input(Device::cpu(0), DType::F32).unwrap();
    let neg = graph
        .apply_op(&OpDesc::elemwise(ElemwiseMode::Neg), &[input.var().clone()])
        .unwrap()
        .remove(0);
    let attr = graph.add_attr_output(&neg).unwrap();
    let exe = graph.compile(&[attr.var()]).unwrap();

    for n in [2usize, 3, 5] {
        input.set_value(raw_f32(vec![0.5; n], &[n])).unwrap();
        exe.execute().unwrap();
        let meta = attr.get_value().unwrap();
        assert_eq!(meta.shape.dims(), &[n]);
        assert_eq!(meta.dtype, DType::F32);
        assert_eq!(meta.device, Device::cpu(0));
    }
}

#[test]
fn sync_run_without_input_fails() {
    let graph = Graph::new();
    let input = graph.add_input(Device::cpu(0), DType::F32).unwrap();
    let out = graph.add_output(input.var()).unwrap();
    let exe = graph.compile(&[out.var()]).unwrap();
    assert!(matches!(exe.execute(), Err(Error::InputNotReady)));
}

#[test]
fn output_before_any_run_is_not_ready() {
    let graph = Graph::new();
    let c = graph.add_const(raw_f32(vec![1.0], &[1])).unwrap();
    let out = graph.add_output(&c).unwrap();
    let _exe = graph.compile(&[out.var()]).unwrap();
    assert!(matches!(out.get_value(), Err(Error::OutputNotReady)));
}

#[test]
fn foreign_vars_are_rejected() {
    let g1 = Graph::new();
    let g2 = Graph::new();
    let a = g1.add_const(raw_f32(vec![1.0], &[1])).unwrap();

    assert!(matches!(
        g2.add_output(&a),
        Err(Error::DisconnectedOutput)
    ));
    assert!(matches!(
        g2.apply_op(&OpDesc::elemwise(ElemwiseMode::Neg), &[a.clone()]),
        Err(Error::ModeConflict(_))
    ));

    // compile() only accepts wired output nodes of its own graph.
    assert!(matches!(g1.compile(&[&a]), Err(Error::DisconnectedOutput)));
}

#[test]
fn input_value_is_validated() {
    let graph = Graph::new();
    let input = graph.add_input(Device::cpu(0), DType::F32).unwrap();
    assert!(matches!(
        input.set_value(RawTensor::from_vec(vec![1i32], [1], DeviceSpec::any()).unwrap()),
        Err(Error::DtypeMismatch { .. })
    ));
    assert!(matches!(
        input.set_value(RawTensor::from_vec(vec![1.0f32], [1], "cpu1".parse().unwrap()).unwrap()),
        Err(Error::DeviceMismatch { .. })
    ));
}

#[test]
fn closed_graph_refuses_execution_and_drops_queues() {
    let graph = Graph::new();
    let c = graph.add_const(raw_f32(vec![1.0], &[1])).unwrap();
    let out = graph.add_output(&c).unwrap();
    let exe = graph.compile(&[out.var()]).unwrap();
    exe.execute().unwrap();
    assert_eq!(out.get_value().unwrap().to_scalar::<f32>().unwrap(), 1.0);

    // Leave one undelivered output queued; close() releases it.
    exe.execute().unwrap();
    graph.close();
    assert!(exe.execute().is_err());
    assert!(matches!(out.get_value(), Err(Error::OutputNotReady)));
}
