use imptensor::{
    apply, infer_output_meta, DType, Device, DeviceSpec, ElemwiseMode, Error, Graph, OpDesc,
    RawTensor, ReduceMode, Tensor,
};

fn raw_f32(data: Vec<f32>, shape: &[usize]) -> RawTensor {
    RawTensor::from_vec(data, shape, DeviceSpec::any()).unwrap()
}

#[test]
fn eager_binary_with_broadcast() {
    let lhs = raw_f32(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let rhs = raw_f32(vec![10.0], &[1]);
    let out = apply(&OpDesc::elemwise(ElemwiseMode::Add), &[lhs, rhs]).unwrap();
    assert_eq!(out.len(), 1);
    assert!(out[0].is_resident());
    assert_eq!(out[0].shape().dims(), &[2, 2]);
    assert_eq!(
        out[0].to_flat_vec::<f32>().unwrap(),
        vec![11.0, 12.0, 13.0, 14.0]
    );
}

#[test]
fn eager_reduce_and_type_cvt() {
    let x = raw_f32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let sum = apply(&OpDesc::reduce(ReduceMode::Sum, Some(1)), &[x.clone()]).unwrap();
    assert_eq!(sum[0].to_flat_vec::<f32>().unwrap(), vec![6.0, 15.0]);

    let mean = apply(&OpDesc::reduce(ReduceMode::Mean, None), &[x.clone()]).unwrap();
    assert_eq!(mean[0].shape().dims(), &[1]);
    assert_eq!(mean[0].to_scalar::<f32>().unwrap(), 3.5);

    let as_i32 = apply(&OpDesc::type_cvt(DType::I32), &[x]).unwrap();
    assert_eq!(as_i32[0].dtype(), DType::I32);
    assert_eq!(
        as_i32[0].to_flat_vec::<i32>().unwrap(),
        vec![1, 2, 3, 4, 5, 6]
    );
}

#[test]
fn eager_nullary_rng() {
    let op = OpDesc::uniform_rng(11, [8]).unwrap();
    let a = apply(&op, &[]).unwrap();
    let b = apply(&op, &[]).unwrap();
    assert_eq!(a[0].dtype(), DType::F32);
    assert_eq!(a[0].shape().dims(), &[8]);
    assert_eq!(
        a[0].to_flat_vec::<f32>().unwrap(),
        b[0].to_flat_vec::<f32>().unwrap()
    );
}

#[test]
fn traced_apply_inserts_into_owning_graph() {
    let graph = Graph::new();
    let seed = graph.add_const(raw_f32(vec![1.0, 2.0, 3.0], &[3])).unwrap();
    let pending = RawTensor::from_var(&seed).unwrap();
    assert!(!pending.is_resident());

    // One pending and one resident input: the resident side is captured
    // as an implicit constant of the same graph.
    let resident = raw_f32(vec![10.0], &[1]);
    let out = apply(&OpDesc::elemwise(ElemwiseMode::Mul), &[pending, resident]).unwrap();
    assert_eq!(out.len(), 1);
    assert!(!out[0].is_resident());
    assert_eq!(out[0].shape().dims(), &[3]);
    assert_eq!(out[0].dtype(), DType::F32);

    // Reading data out of a pending handle must fail until the graph runs.
    assert!(matches!(
        out[0].to_flat_vec::<f32>(),
        Err(Error::OutputNotReady)
    ));
}

#[test]
fn eager_and_traced_metadata_agree() {
    let op = OpDesc::elemwise(ElemwiseMode::Add);
    let lhs = raw_f32(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let rhs = raw_f32(vec![5.0], &[1]);
    let inferred = infer_output_meta(&op, &[lhs.meta().clone(), rhs.meta().clone()]).unwrap();

    let eager = apply(&op, &[lhs.clone(), rhs.clone()]).unwrap();
    assert_eq!(eager[0].meta(), &inferred[0]);

    let graph = Graph::new();
    let a = graph.add_const(lhs).unwrap();
    let b = graph.add_const(rhs).unwrap();
    let traced = apply(
        &op,
        &[
            RawTensor::from_var(&a).unwrap(),
            RawTensor::from_var(&b).unwrap(),
        ],
    )
    .unwrap();
    assert_eq!(traced[0].meta(), &inferred[0]);
}

#[test]
fn mixing_two_graphs_is_a_mode_conflict() {
    let g1 = Graph::new();
    let g2 = Graph::new();
    let a = g1.add_const(raw_f32(vec![1.0], &[1])).unwrap();
    let b = g2.add_const(raw_f32(vec![2.0], &[1])).unwrap();
    let err = apply(
        &OpDesc::elemwise(ElemwiseMode::Add),
        &[
            RawTensor::from_var(&a).unwrap(),
            RawTensor::from_var(&b).unwrap(),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, Error::ModeConflict(_)));
}

#[test]
fn errors_produce_no_outputs() {
    let lhs = raw_f32(vec![1.0, 2.0], &[2]);
    let rhs = RawTensor::from_vec(vec![1, 2], [2], DeviceSpec::any()).unwrap();
    assert!(matches!(
        apply(&OpDesc::elemwise(ElemwiseMode::Add), &[lhs, rhs]),
        Err(Error::DtypeMismatch { .. })
    ));
}

#[test]
fn copy_moves_between_ordinals() {
    let x = Tensor::new(vec![1.0f32, 2.0], [2], Some("cpu0")).unwrap();
    let y = x.to("cpu1").unwrap();
    assert_eq!(y.device(), Device::cpu(1));
    assert_eq!(y.to_flat_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    // Always a fresh owned buffer, never aliased across devices.
    assert_eq!(x.device(), Device::cpu(0));
}
