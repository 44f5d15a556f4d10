use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{mpsc, Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use log::debug;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::tensor::RawTensor;
use crate::{DType, Device, Error, OpDesc, Result, Shape, TensorMeta};

pub type NodeId = usize;

/// Supplies a fresh resident value every time a compiled graph runs and the
/// input node is due.
pub trait InputSource: Send {
    fn pull(&mut self) -> Result<RawTensor>;
}

impl<F> InputSource for F
where
    F: FnMut() -> Result<RawTensor> + Send,
{
    fn pull(&mut self) -> Result<RawTensor> {
        self()
    }
}

/// Receives a materialized output value on the executing thread.
pub trait OutputSink: Send {
    fn deliver(&mut self, value: RawTensor);
}

impl<F> OutputSink for F
where
    F: FnMut(RawTensor) + Send,
{
    fn deliver(&mut self, value: RawTensor) {
        self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphState {
    Building,
    Compiled,
    Closed,
}

/// Value moved through input/output exchanges: full data, or metadata only
/// for attr outputs.
#[derive(Clone)]
enum Delivered {
    Value(RawTensor),
    Attr(TensorMeta),
}

/// One lock/condvar pair coordinates all pushed inputs, pulled outputs and
/// the count of in-flight runs for a graph. Pushes and pops are transient
/// critical sections; kernel work never holds the lock.
struct RunSync {
    state: Mutex<RunState>,
    cv: Condvar,
}

#[derive(Default)]
struct RunState {
    in_flight: usize,
    queues: HashMap<NodeId, VecDeque<Delivered>>,
}

impl RunSync {
    fn new() -> Self {
        Self {
            state: Mutex::new(RunState::default()),
            cv: Condvar::new(),
        }
    }

    fn push(&self, node: NodeId, value: Delivered) {
        let mut state = self.state.lock().unwrap();
        state.queues.entry(node).or_default().push_back(value);
        self.cv.notify_all();
    }

    fn try_pop(&self, node: NodeId) -> Option<Delivered> {
        let mut state = self.state.lock().unwrap();
        state.queues.get_mut(&node).and_then(|q| q.pop_front())
    }

    /// Blocking pop used by async runs waiting for a pushed input.
    fn pop_wait(&self, node: NodeId) -> Delivered {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(v) = state.queues.get_mut(&node).and_then(|q| q.pop_front()) {
                return v;
            }
            state = self.cv.wait(state).unwrap();
        }
    }

    /// Blocking pop used by output pulls: waits while a run is in flight,
    /// fails once nothing is running and nothing was delivered.
    fn pop_output(&self, node: NodeId) -> Result<Delivered> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(v) = state.queues.get_mut(&node).and_then(|q| q.pop_front()) {
                return Ok(v);
            }
            if state.in_flight == 0 {
                return Err(Error::OutputNotReady);
            }
            state = self.cv.wait(state).unwrap();
        }
    }

    fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.queues.clear();
        self.cv.notify_all();
    }

    fn begin_run(&self) {
        self.state.lock().unwrap().in_flight += 1;
    }

    fn end_run(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        self.cv.notify_all();
    }
}

enum NodeKind {
    Input {
        source: Option<Mutex<Box<dyn InputSource>>>,
    },
    Const {
        value: RawTensor,
    },
    Op {
        desc: OpDesc,
        inputs: Vec<NodeId>,
        // Which of the descriptor's inferred outputs this node carries.
        out_index: usize,
    },
    Output {
        src: NodeId,
        sink: Option<Mutex<Box<dyn OutputSink>>>,
        attr_only: bool,
    },
}

struct Node {
    kind: NodeKind,
    dtype: DType,
    device: Device,
}

pub(crate) struct GraphInner {
    nodes: RwLock<Vec<Node>>,
    state: RwLock<GraphState>,
    async_exec_level: RwLock<u8>,
    sync: RunSync,
}

/// A symbolic value owned by a dataflow graph. Identity is stable for the
/// graph's lifetime.
#[derive(Clone)]
pub struct Var {
    graph: Arc<GraphInner>,
    id: NodeId,
    dtype: DType,
    device: Device,
    shape: Option<Shape>,
}

impl Var {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    pub(crate) fn same_graph(&self, other: &Var) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph)
    }

    pub(crate) fn graph_handle(&self) -> Graph {
        Graph {
            inner: self.graph.clone(),
        }
    }
}

/// An externally fed graph input. Values are either pushed with
/// [`InputNode::set_value`] before (sync) or around (async) each run, or
/// pulled through an [`InputSource`] installed at construction.
pub struct InputNode {
    var: Var,
}

impl InputNode {
    pub fn var(&self) -> &Var {
        &self.var
    }

    /// Queue a resident value for the next run that consumes this input.
    pub fn set_value(&self, value: RawTensor) -> Result<()> {
        if !value.is_resident() {
            return Err(Error::ModeConflict(
                "input values must be resident, not graph-pending".to_string(),
            ));
        }
        if value.dtype() != self.var.dtype {
            return Err(Error::DtypeMismatch {
                op: "InputNode::set_value".to_string(),
                expected: self.var.dtype.to_string(),
                got: value.dtype().to_string(),
            });
        }
        if value.device() != self.var.device {
            return Err(Error::DeviceMismatch {
                lhs: self.var.device.to_string(),
                rhs: value.device().to_string(),
            });
        }
        self.var
            .graph
            .sync
            .push(self.var.id, Delivered::Value(value));
        Ok(())
    }
}

/// A pull-style graph output.
pub struct OutputNode {
    var: Var,
}

impl OutputNode {
    pub fn var(&self) -> &Var {
        &self.var
    }

    /// Take the next delivered value. Blocks while a run is in flight;
    /// fails with `OutputNotReady` when nothing is running and nothing has
    /// been delivered.
    pub fn get_value(&self) -> Result<RawTensor> {
        match self.var.graph.sync.pop_output(self.var.id)? {
            Delivered::Value(v) => Ok(v),
            Delivered::Attr(_) => Err(Error::msg("attr delivered to a value output")),
        }
    }
}

/// A metadata-only graph output: reports shape/dtype/device without forcing
/// a data transfer.
pub struct AttrOutputNode {
    var: Var,
}

impl AttrOutputNode {
    pub fn var(&self) -> &Var {
        &self.var
    }

    pub fn get_value(&self) -> Result<TensorMeta> {
        match self.var.graph.sync.pop_output(self.var.id)? {
            Delivered::Attr(meta) => Ok(meta),
            Delivered::Value(v) => Ok(v.meta().clone()),
        }
    }
}

/// Future-style receiver paired with a sink output; resolves once the run
/// delivering it completes that output.
#[derive(Clone)]
pub struct VarFuture {
    slot: Arc<(Mutex<Option<RawTensor>>, Condvar)>,
}

impl VarFuture {
    fn new() -> Self {
        Self {
            slot: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    fn fill(&self, value: RawTensor) {
        let (lock, cv) = &*self.slot;
        *lock.lock().unwrap() = Some(value);
        cv.notify_all();
    }

    pub fn try_get(&self) -> Option<RawTensor> {
        self.slot.0.lock().unwrap().take()
    }

    /// Block until the value is delivered.
    pub fn wait(&self) -> RawTensor {
        let (lock, cv) = &*self.slot;
        let mut guard = lock.lock().unwrap();
        loop {
            if let Some(v) = guard.take() {
                return v;
            }
            guard = cv.wait(guard).unwrap();
        }
    }
}

/// A reusable dataflow graph: build nodes, compile a subset of outputs into
/// an [`Executable`], then drive it any number of times with fresh inputs.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GraphInner {
                nodes: RwLock::new(Vec::new()),
                state: RwLock::new(GraphState::Building),
                async_exec_level: RwLock::new(0),
                sync: RunSync::new(),
            }),
        }
    }

    /// Bit flags controlling run scheduling: 0 runs synchronously on the
    /// calling thread, any set bit moves runs onto a worker thread.
    pub fn set_async_exec_level(&self, level: u8) {
        *self.inner.async_exec_level.write().unwrap() = level;
    }

    pub fn async_exec_level(&self) -> u8 {
        *self.inner.async_exec_level.read().unwrap()
    }

    fn add_node(&self, node: Node) -> Result<NodeId> {
        let state = *self.inner.state.read().unwrap();
        if state != GraphState::Building {
            return Err(Error::msg(format!("cannot add nodes to a {state:?} graph")));
        }
        let mut nodes = self.inner.nodes.write().unwrap();
        nodes.push(node);
        Ok(nodes.len() - 1)
    }

    fn var_for(&self, id: NodeId, dtype: DType, device: Device, shape: Option<Shape>) -> Var {
        Var {
            graph: self.inner.clone(),
            id,
            dtype,
            device,
            shape,
        }
    }

    /// Create a push-fed input node. Its per-run shape is whatever each
    /// pushed value carries.
    pub fn add_input(&self, device: Device, dtype: DType) -> Result<InputNode> {
        let id = self.add_node(Node {
            kind: NodeKind::Input { source: None },
            dtype,
            device,
        })?;
        Ok(InputNode {
            var: self.var_for(id, dtype, device, None),
        })
    }

    /// Create a pull-fed input node; `source` is called once per run.
    pub fn add_input_source(
        &self,
        device: Device,
        dtype: DType,
        source: Box<dyn InputSource>,
    ) -> Result<Var> {
        let id = self.add_node(Node {
            kind: NodeKind::Input {
                source: Some(Mutex::new(source)),
            },
            dtype,
            device,
        })?;
        Ok(self.var_for(id, dtype, device, None))
    }

    /// Capture a resident value as a constant node.
    pub fn add_const(&self, value: RawTensor) -> Result<Var> {
        if !value.is_resident() {
            return Err(Error::ModeConflict(
                "only resident tensors can be captured as constants".to_string(),
            ));
        }
        let meta = value.meta().clone();
        let id = self.add_node(Node {
            kind: NodeKind::Const { value },
            dtype: meta.dtype,
            device: meta.device,
        })?;
        Ok(self.var_for(id, meta.dtype, meta.device, Some(meta.shape)))
    }

    /// Insert an operator node over symbolic inputs. Dtype and device are
    /// always inferred here; shapes are inferred when every input shape is
    /// already known and deferred to run time otherwise.
    pub fn apply_op(&self, desc: &OpDesc, inputs: &[Var]) -> Result<Vec<Var>> {
        for var in inputs {
            if !Arc::ptr_eq(&var.graph, &self.inner) {
                return Err(Error::ModeConflict(
                    "operator inputs belong to a different graph".to_string(),
                ));
            }
        }
        let shapes_known = inputs.iter().all(|v| v.shape.is_some());
        let metas = inputs
            .iter()
            .map(|v| TensorMeta {
                shape: v.shape.clone().unwrap_or_else(Shape::scalar),
                dtype: v.dtype,
                device: v.device,
            })
            .collect::<Vec<_>>();
        let out_metas = desc.infer(&metas)?;
        debug!("trace {desc} -> {} output(s)", out_metas.len());

        let input_ids = inputs.iter().map(|v| v.id).collect::<Vec<_>>();
        let mut outputs = Vec::with_capacity(out_metas.len());
        for (out_index, meta) in out_metas.into_iter().enumerate() {
            let shape = if shapes_known {
                Some(meta.shape.clone())
            } else {
                None
            };
            let id = self.add_node(Node {
                kind: NodeKind::Op {
                    desc: desc.clone(),
                    inputs: input_ids.clone(),
                    out_index,
                },
                dtype: meta.dtype,
                device: meta.device,
            })?;
            outputs.push(self.var_for(id, meta.dtype, meta.device, shape));
        }
        Ok(outputs)
    }

    fn add_output_node(
        &self,
        src: &Var,
        sink: Option<Box<dyn OutputSink>>,
        attr_only: bool,
    ) -> Result<Var> {
        if !Arc::ptr_eq(&src.graph, &self.inner) {
            return Err(Error::DisconnectedOutput);
        }
        let id = self.add_node(Node {
            kind: NodeKind::Output {
                src: src.id,
                sink: sink.map(Mutex::new),
                attr_only,
            },
            dtype: src.dtype,
            device: src.device,
        })?;
        Ok(self.var_for(id, src.dtype, src.device, src.shape.clone()))
    }

    /// Pull-style data output.
    pub fn add_output(&self, src: &Var) -> Result<OutputNode> {
        let var = self.add_output_node(src, None, false)?;
        Ok(OutputNode { var })
    }

    /// Push-style data output delivered through `sink` on the executing
    /// thread.
    pub fn add_output_sink(&self, src: &Var, sink: Box<dyn OutputSink>) -> Result<Var> {
        self.add_output_node(src, Some(sink), false)
    }

    /// Future-style data output.
    pub fn add_output_future(&self, src: &Var) -> Result<(Var, VarFuture)> {
        let future = VarFuture::new();
        let sink = future.clone();
        let var = self.add_output_node(
            src,
            Some(Box::new(move |value: RawTensor| sink.fill(value))),
            false,
        )?;
        Ok((var, future))
    }

    /// Metadata-only output.
    pub fn add_attr_output(&self, src: &Var) -> Result<AttrOutputNode> {
        let var = self.add_output_node(src, None, true)?;
        Ok(AttrOutputNode { var })
    }

    /// Freeze the transitive input closure of `outputs` into a reusable
    /// executable. Nodes outside the closure are excluded; the graph moves
    /// to the compiled state and accepts no further nodes.
    pub fn compile(&self, outputs: &[&Var]) -> Result<Executable> {
        if outputs.is_empty() {
            return Err(Error::invalid_parameter("compile", "no outputs requested"));
        }
        let nodes = self.inner.nodes.read().unwrap();
        for var in outputs {
            if !Arc::ptr_eq(&var.graph, &self.inner) || var.id >= nodes.len() {
                return Err(Error::DisconnectedOutput);
            }
            if !matches!(nodes[var.id].kind, NodeKind::Output { .. }) {
                return Err(Error::DisconnectedOutput);
            }
        }

        // Transitive closure of the requested outputs, then a topological
        // ordering over it. Visited tracking is separate from the graph
        // itself: add_edge inserts the parent node, which must not count
        // as having been expanded.
        let mut dep_graph = DiGraphMap::<NodeId, ()>::new();
        let mut visited = HashSet::new();
        let mut stack = outputs.iter().map(|v| v.id).collect::<Vec<_>>();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            dep_graph.add_node(id);
            let parents: Vec<NodeId> = match &nodes[id].kind {
                NodeKind::Input { .. } | NodeKind::Const { .. } => vec![],
                NodeKind::Op { inputs, .. } => inputs.clone(),
                NodeKind::Output { src, .. } => vec![*src],
            };
            for parent in parents {
                dep_graph.add_edge(parent, id, ());
                stack.push(parent);
            }
        }
        let plan =
            toposort(&dep_graph, None).map_err(|_| Error::msg("cycle detected in dataflow graph"))?;
        drop(nodes);

        let mut state = self.inner.state.write().unwrap();
        if *state == GraphState::Closed {
            return Err(Error::msg("cannot compile a closed graph"));
        }
        *state = GraphState::Compiled;
        drop(state);

        let run_async = self.async_exec_level() != 0;
        debug!("compiled plan of {} node(s), async={run_async}", plan.len());
        let worker = if run_async {
            Some(Worker::spawn(self.inner.clone(), plan.clone()))
        } else {
            None
        };
        Ok(Executable {
            graph: self.inner.clone(),
            plan,
            worker,
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// Release executor resources: queued input and output exchanges are
    /// dropped and any further compile or execute fails. Worker threads
    /// are joined when their [`Executable`] drops.
    pub fn close(&self) {
        *self.inner.state.write().unwrap() = GraphState::Closed;
        self.inner.sync.clear();
    }
}

/// Pull-fed input from a closure, in one call.
pub fn input_callback<F>(f: F, device: Device, dtype: DType, graph: &Graph) -> Result<Var>
where
    F: FnMut() -> Result<RawTensor> + Send + 'static,
{
    graph.add_input_source(device, dtype, Box::new(f))
}

/// Push-fed output into a closure, in one call.
pub fn output_callback<F>(f: F, src: &Var) -> Result<Var>
where
    F: FnMut(RawTensor) + Send + 'static,
{
    src.graph_handle().add_output_sink(src, Box::new(f))
}

fn run_plan(graph: &GraphInner, plan: &[NodeId], blocking_inputs: bool) -> Result<()> {
    let nodes = graph.nodes.read().unwrap();
    let mut values: HashMap<NodeId, RawTensor> = HashMap::new();

    for &id in plan {
        let node = &nodes[id];
        match &node.kind {
            NodeKind::Input { source } => {
                let value = match source {
                    Some(source) => source.lock().unwrap().pull()?,
                    None if blocking_inputs => match graph.sync.pop_wait(id) {
                        Delivered::Value(v) => v,
                        Delivered::Attr(_) => return Err(Error::InputNotReady),
                    },
                    None => match graph.sync.try_pop(id) {
                        Some(Delivered::Value(v)) => v,
                        _ => return Err(Error::InputNotReady),
                    },
                };
                if value.dtype() != node.dtype {
                    return Err(Error::DtypeMismatch {
                        op: "input node".to_string(),
                        expected: node.dtype.to_string(),
                        got: value.dtype().to_string(),
                    });
                }
                if value.device() != node.device {
                    return Err(Error::DeviceMismatch {
                        lhs: node.device.to_string(),
                        rhs: value.device().to_string(),
                    });
                }
                values.insert(id, value);
            }
            NodeKind::Const { value } => {
                values.insert(id, value.clone());
            }
            NodeKind::Op {
                desc,
                inputs,
                out_index,
            } => {
                let in_values = inputs
                    .iter()
                    .map(|i| {
                        values.get(i).cloned().ok_or_else(|| {
                            Error::msg("operator input missing from the execution plan")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let metas = in_values
                    .iter()
                    .map(|v| v.meta().clone())
                    .collect::<Vec<_>>();
                // Re-infer with the run-time shapes; dtype and device were
                // already checked at trace time.
                let mut out_metas = desc.infer(&metas)?;
                if *out_index >= out_metas.len() {
                    return Err(Error::msg("operator output index out of range"));
                }
                let out_meta = out_metas.swap_remove(*out_index);
                let storages = in_values
                    .iter()
                    .map(|v| v.storage())
                    .collect::<Result<Vec<_>>>()?;
                let storage_refs = storages.iter().map(|s| s.as_ref()).collect::<Vec<_>>();
                let meta_refs = metas.iter().collect::<Vec<_>>();
                let out = node
                    .device
                    .run_op(desc, &storage_refs, &meta_refs, &out_meta)?;
                values.insert(id, RawTensor::from_storage_meta(out, out_meta));
            }
            NodeKind::Output {
                src,
                sink,
                attr_only,
            } => {
                let value = values
                    .get(src)
                    .cloned()
                    .ok_or_else(|| Error::msg("output source missing from the execution plan"))?;
                match sink {
                    Some(sink) => sink.lock().unwrap().deliver(value),
                    None if *attr_only => {
                        graph.sync.push(id, Delivered::Attr(value.meta().clone()))
                    }
                    None => graph.sync.push(id, Delivered::Value(value)),
                }
            }
        }
    }
    Ok(())
}

struct Job {
    done: mpsc::Sender<Result<()>>,
}

struct Worker {
    tx: Option<mpsc::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(graph: Arc<GraphInner>, plan: Vec<NodeId>) -> Worker {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = std::thread::spawn(move || {
            // Jobs are processed in submission order: FIFO completion.
            while let Ok(job) = rx.recv() {
                let result = run_plan(&graph, &plan, true);
                graph.sync.end_run();
                let _ = job.done.send(result);
            }
        });
        Worker {
            tx: Some(tx),
            handle: Some(handle),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The compiled, repeatedly runnable artifact for one set of outputs.
/// Re-running refreshes data buffers only; the node plan is fixed.
pub struct Executable {
    graph: Arc<GraphInner>,
    plan: Vec<NodeId>,
    worker: Option<Worker>,
    pending: Mutex<VecDeque<mpsc::Receiver<Result<()>>>>,
}

impl Executable {
    /// Schedule one run. Synchronous executables (async level 0) block
    /// until every output is delivered; asynchronous ones return
    /// immediately and surface failures at [`Executable::wait`].
    pub fn execute(&self) -> Result<()> {
        if *self.graph.state.read().unwrap() == GraphState::Closed {
            return Err(Error::msg("graph is closed"));
        }
        self.graph.sync.begin_run();
        match &self.worker {
            None => {
                let result = run_plan(&self.graph, &self.plan, false);
                self.graph.sync.end_run();
                result
            }
            Some(worker) => {
                let (done_tx, done_rx) = mpsc::channel();
                let tx = worker.tx.as_ref().expect("worker channel");
                if tx.send(Job { done: done_tx }).is_err() {
                    self.graph.sync.end_run();
                    return Err(Error::msg("executor worker is gone"));
                }
                self.pending.lock().unwrap().push_back(done_rx);
                Ok(())
            }
        }
    }

    /// Block until every previously scheduled run has completed; returns
    /// the first failure, if any.
    pub fn wait(&self) -> Result<()> {
        let mut receivers = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        let mut first_err = None;
        for rx in receivers.drain(..) {
            match rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    first_err.get_or_insert(Error::msg("executor worker is gone"));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
