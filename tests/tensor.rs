use std::collections::HashMap;

use imptensor::{
    clear_device_remap_hook, functional, set_device_remap_hook, DType, Error, Tensor, TensorState,
};

#[test]
fn detach_shares_value_but_not_identity() {
    let x = Tensor::new(vec![1.0f32, 2.0, 3.0], [3], None).unwrap();
    let d = x.detach().unwrap();
    assert_eq!(
        d.to_flat_vec::<f32>().unwrap(),
        x.to_flat_vec::<f32>().unwrap()
    );
    assert_eq!(d.dtype(), x.dtype());
    assert_eq!(d.device(), x.device());
    // Identity semantics: a detached tensor is a distinct object.
    assert_ne!(x, d);

    // Later operations on the original leave the detached value alone.
    let _y = functional::add_scalar(&x, 5.0).unwrap();
    assert_eq!(d.to_flat_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn tensors_key_maps_by_identity() {
    let a = Tensor::new(vec![1.0f32], [1], None).unwrap();
    let b = Tensor::new(vec![1.0f32], [1], None).unwrap();
    assert_ne!(a, b);
    // A clone is the same object.
    assert_eq!(a, a.clone());

    let mut grads: HashMap<Tensor, &str> = HashMap::new();
    grads.insert(a.clone(), "grad_a");
    grads.insert(b.clone(), "grad_b");
    assert_eq!(grads.len(), 2);
    assert_eq!(grads.get(&a), Some(&"grad_a"));
    assert_eq!(grads.get(&b), Some(&"grad_b"));
}

#[test]
fn state_dict_round_trip() {
    let mut x = Tensor::new(vec![1, 2, 3, 4], [2, 2], Some("cpu0")).unwrap();
    x.q_dict_mut().mode = Some("asymm".to_string());
    x.q_dict_mut().scale = Some(0.25);
    x.q_dict_mut().zero_point = Some(3.0);

    let state = x.to_state().unwrap();
    assert_eq!(state.dtype, "int32");
    assert_eq!(state.device, "cpu0");
    assert_eq!(state.shape, vec![2, 2]);

    // Through an actual serialized byte stream, as a snapshot would be.
    let bytes = serde_json::to_vec(&state).unwrap();
    let restored: TensorState = serde_json::from_slice(&bytes).unwrap();
    let y = Tensor::from_state(restored).unwrap();

    assert_eq!(y.to_flat_vec::<i32>().unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(y.dtype(), DType::I32);
    assert_eq!(y.shape().dims(), &[2, 2]);
    assert_eq!(y.device().to_string(), "cpu0");
    assert_eq!(y.q_dict().mode.as_deref(), Some("asymm"));
    assert_eq!(y.q_dict().scale, Some(0.25));
    assert_eq!(y.q_dict().zero_point, Some(3.0));

    // The remap hook rewrites the device string during restore.
    let state = x.to_state().unwrap();
    set_device_remap_hook(|_| "cpu1".to_string());
    let remapped = Tensor::from_state(state);
    clear_device_remap_hook();
    assert_eq!(remapped.unwrap().device().to_string(), "cpu1");
}

#[test]
fn state_dict_rejects_inconsistent_dtype() {
    let x = Tensor::new(vec![1.0f32, 2.0], [2], None).unwrap();
    let mut state = x.to_state().unwrap();
    state.dtype = "int32".to_string();
    assert!(matches!(
        Tensor::from_state(state),
        Err(Error::DtypeMismatch { .. })
    ));
}
