//! Filter graph: node arena, wiring and evaluation entry points
//!
//! The graph owns every node and the analysis cache they share. Nodes are
//! reference counted: the host holds one reference from `add_node()`, and every
//! input bound to one of a node's streams holds another. A node is destroyed
//! when its count reaches zero, which in turn releases its own upstream bindings.
//!
//! Evaluation order is the caller's business; `refresh()` evaluates exactly one
//! node against whatever its upstream streams currently hold.

use super::buffer::DataLocation;
use super::dispatch::{ComputeQueue, HostComputeQueue};
use super::errors::FilterError;
use super::node::{EvalContext, FilterNode, InputSet};
use super::registry;
use super::stream::StreamDescriptor;
use super::watchdog::DEFAULT_STALL_THRESHOLD;
use super::waveform::Waveform;
use crate::analysis::cache::AnalysisCache;
use crate::analysis::simd::{SimdLevel, effective_simd_level};
use crate::{GraphError, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Unique identifier for a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution settings for a graph
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Let GPU-capable filters use the compute queue in `refresh_accelerated()`
    pub gpu_filters_enabled: bool,
    /// Cap on the vector level used by CPU kernels (`None` = best available)
    pub simd_override: Option<SimdLevel>,
    /// How long a blocking device wait may take before it is reported
    pub stall_threshold: Duration,
}

impl ExecOptions {
    pub fn with_gpu_filters(mut self, enabled: bool) -> Self {
        self.gpu_filters_enabled = enabled;
        self
    }

    pub fn with_simd_level(mut self, level: SimdLevel) -> Self {
        self.simd_override = Some(level);
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            gpu_filters_enabled: false,
            simd_override: None,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }
}

struct NodeSlot {
    /// `None` only while the node is being evaluated
    node: Option<Box<dyn FilterNode>>,
    refcount: usize,
}

/// Arena of filter nodes plus the state they share
pub struct FilterGraph {
    next_node_id: usize,
    nodes: HashMap<NodeId, NodeSlot>,
    cache: AnalysisCache,
    options: ExecOptions,
    simd: SimdLevel,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::with_options(ExecOptions::default())
    }

    pub fn with_options(options: ExecOptions) -> Self {
        let simd = effective_simd_level(options.simd_override);
        debug!("Filter graph using {} kernels", simd);
        Self {
            next_node_id: 0,
            nodes: HashMap::new(),
            cache: AnalysisCache::new(),
            options,
            simd,
        }
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ExecOptions) {
        self.simd = effective_simd_level(options.simd_override);
        self.options = options;
    }

    /// Vector level CPU kernels run at
    pub fn simd_level(&self) -> SimdLevel {
        self.simd
    }

    /// Host compute queue configured from this graph's options
    pub fn host_queue(&self) -> HostComputeQueue {
        HostComputeQueue::new().with_stall_threshold(self.options.stall_threshold)
    }

    /// Take ownership of a node; the caller holds the initial reference
    pub fn add_node(&mut self, node: Box<dyn FilterNode>) -> NodeId {
        let id = NodeId::new(self.next_node_id);
        self.next_node_id += 1;
        info!("Added {} '{}' as {}", node.protocol_name(), node.name(), id);
        self.nodes.insert(
            id,
            NodeSlot {
                node: Some(node),
                refcount: 1,
            },
        );
        id
    }

    pub fn add<N: FilterNode + 'static>(&mut self, node: N) -> NodeId {
        self.add_node(Box::new(node))
    }

    /// Create a node through the filter registry
    pub fn create(&mut self, protocol: &str) -> Result<NodeId> {
        let node = registry::create_filter(protocol).ok_or_else(|| GraphError::UnknownProtocol(protocol.to_string()))?;
        Ok(self.add_node(node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&dyn FilterNode> {
        self.nodes.get(&id).and_then(|s| s.node.as_deref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut (dyn FilterNode + 'static)> {
        self.nodes.get_mut(&id).and_then(|s| s.node.as_deref_mut())
    }

    fn node_ref(&self, id: NodeId) -> Result<&dyn FilterNode> {
        match self.nodes.get(&id) {
            None => Err(GraphError::UnknownNode(id)),
            Some(slot) => slot.node.as_deref().ok_or(GraphError::NodeBusy(id)),
        }
    }

    fn node_ref_mut(&mut self, id: NodeId) -> Result<&mut (dyn FilterNode + 'static)> {
        match self.nodes.get_mut(&id) {
            None => Err(GraphError::UnknownNode(id)),
            Some(slot) => slot.node.as_deref_mut().ok_or(GraphError::NodeBusy(id)),
        }
    }

    pub fn refcount(&self, id: NodeId) -> Option<usize> {
        self.nodes.get(&id).map(|s| s.refcount)
    }

    pub fn add_ref(&mut self, id: NodeId) -> Result<usize> {
        let slot = self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))?;
        slot.refcount += 1;
        Ok(slot.refcount)
    }

    /// Drop one reference; destroys the node (and releases its inputs) at zero
    pub fn release(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::UnknownNode(id));
        }

        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(slot) = self.nodes.get_mut(&id) else {
                continue;
            };
            slot.refcount = slot.refcount.saturating_sub(1);
            if slot.refcount > 0 {
                continue;
            }

            if let Some(slot) = self.nodes.remove(&id)
                && let Some(node) = slot.node
            {
                info!("Destroyed '{}' ({})", node.name(), id);
                pending.extend(node.base().inputs().iter().filter_map(|i| i.binding).map(|d| d.node));
            }
        }
        Ok(())
    }

    pub fn input_count(&self, id: NodeId) -> Result<usize> {
        Ok(self.node_ref(id)?.base().input_count())
    }

    pub fn input(&self, id: NodeId, index: usize) -> Result<Option<StreamDescriptor>> {
        let node = self.node_ref(id)?;
        let count = node.base().input_count();
        if index >= count {
            return Err(GraphError::InputOutOfRange { node: id, index, count });
        }
        Ok(node.base().input_binding(index))
    }

    /// Bind input `index` of `id` to an upstream stream (or disconnect it)
    pub fn set_input(&mut self, id: NodeId, index: usize, desc: Option<StreamDescriptor>) -> Result<()> {
        let node = self.node_ref(id)?;
        let count = node.base().input_count();
        if index >= count {
            return Err(GraphError::InputOutOfRange { node: id, index, count });
        }

        // Disconnecting is always allowed
        if let Some(desc) = desc {
            let upstream = self.node_ref(desc.node)?;
            let stream = upstream
                .base()
                .stream(desc.stream)
                .ok_or(GraphError::StreamOutOfRange(desc))?;
            if !node.validate_channel(index, &stream.info()) {
                return Err(GraphError::InvalidInput { node: id, index, desc });
            }
            if self.is_upstream_of(id, desc.node) {
                return Err(GraphError::Cycle { node: id, desc });
            }
            self.add_ref(desc.node)?;
        }

        let old = self.node_ref_mut(id)?.base_mut().bind_input(index, desc);
        if let Some(old) = old {
            self.release(old.node)?;
        }
        self.update_default_name(id);
        Ok(())
    }

    /// True if `candidate` is `id` or depends on `id` through its inputs
    fn is_upstream_of(&self, id: NodeId, candidate: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![candidate];
        while let Some(n) = stack.pop() {
            if n == id {
                return true;
            }
            if !seen.insert(n) {
                continue;
            }
            if let Some(node) = self.node(n) {
                stack.extend(node.base().inputs().iter().filter_map(|i| i.binding).map(|d| d.node));
            }
        }
        false
    }

    fn update_default_name(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        if !node.base().is_using_default_name() {
            return;
        }

        let names: Vec<String> = node
            .base()
            .inputs()
            .iter()
            .filter_map(|i| i.binding)
            .map(|d| self.stream_display_name(d))
            .collect();
        let name = node.base().default_name(node.protocol_name(), &names);
        if let Some(node) = self.node_mut(id) {
            node.base_mut().set_default_name(name);
        }
    }

    fn stream_display_name(&self, desc: StreamDescriptor) -> String {
        let Some(n) = self.node(desc.node) else {
            return "?".to_string();
        };
        let Some(stream) = n.base().stream(desc.stream) else {
            return n.name().to_string();
        };

        // Sources are named after their channels
        if n.base().input_count() == 0 {
            stream.name.clone()
        } else if n.base().stream_count() > 1 {
            format!("{}.{}", n.name(), stream.name)
        } else {
            n.name().to_string()
        }
    }

    pub fn set_parameter(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        self.node_ref_mut(id)?.base_mut().parameters.set(name, value)?;
        Ok(())
    }

    pub fn parameter(&self, id: NodeId, name: &str) -> Result<String> {
        Ok(self.node_ref(id)?.base().parameters.value_string(name)?)
    }

    pub fn needs_config(&self, id: NodeId) -> Result<bool> {
        Ok(self.node_ref(id)?.needs_config())
    }

    /// Current waveform of a stream
    pub fn waveform(&self, desc: StreamDescriptor) -> Option<&Waveform> {
        self.node(desc.node)?.base().data(desc.stream)
    }

    /// Hand a waveform to a stream from outside the graph (e.g. a capture)
    pub fn publish(&mut self, desc: StreamDescriptor, mut waveform: Waveform) -> Result<()> {
        let node = self.node_ref_mut(desc.node)?;
        if desc.stream >= node.base().stream_count() {
            return Err(GraphError::StreamOutOfRange(desc));
        }
        waveform.meta_mut().revision += 1;
        node.base_mut().set_data(desc.stream, Some(waveform));
        Ok(())
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    pub fn clear_analysis_cache(&self) {
        self.cache.clear();
    }

    /// Evaluate one node on the CPU
    ///
    /// Filter-level failures are not errors here: the node's outputs are nulled
    /// and the call succeeds. Only graph-level problems are returned.
    pub fn refresh(&mut self, id: NodeId) -> Result<()> {
        self.evaluate(id, None)
    }

    /// Evaluate one node with access to a compute queue
    pub fn refresh_accelerated(&mut self, id: NodeId, queue: &mut dyn ComputeQueue) -> Result<()> {
        self.evaluate(id, Some(queue))
    }

    /// Evaluate several nodes in the given (dependency) order
    ///
    /// Starts a new pass: crossings cached by earlier passes are dropped.
    pub fn refresh_all(&mut self, order: &[NodeId]) -> Result<()> {
        self.cache.clear();
        for &id in order {
            self.refresh(id)?;
        }
        Ok(())
    }

    fn evaluate(&mut self, id: NodeId, queue: Option<&mut dyn ComputeQueue>) -> Result<()> {
        let slot = self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))?;
        let mut node = slot.node.take().ok_or(GraphError::NodeBusy(id))?;

        let mut inputs = self.lend_inputs(node.as_ref());
        match node.input_location() {
            DataLocation::Cpu => inputs.prepare_for_cpu(),
            DataLocation::Gpu => inputs.prepare_for_gpu(),
            DataLocation::DontCare => {}
        }

        let ctx = EvalContext {
            cache: &self.cache,
            simd: self.simd,
            gpu_filters_enabled: self.options.gpu_filters_enabled,
        };

        trace!("Refreshing '{}' ({})", node.name(), id);
        let result = match queue {
            Some(queue) => node.refresh_accelerated(&mut inputs, &ctx, queue),
            None => node.refresh(&mut inputs, &ctx),
        };

        if let Err(e) = result {
            match &e {
                FilterError::Dispatch(_) => error!("[{}] {}", node.name(), e),
                _ => debug!("[{}] no output: {}", node.name(), e),
            }
            node.base_mut().clear_outputs();
        }

        self.return_inputs(inputs);
        if let Some(slot) = self.nodes.get_mut(&id) {
            slot.node = Some(node);
        }
        Ok(())
    }

    /// Move upstream waveforms into an input set for the duration of one evaluation
    fn lend_inputs(&mut self, node: &dyn FilterNode) -> InputSet {
        let mut set = InputSet::with_capacity(node.base().input_count());
        for slot in node.base().inputs() {
            let Some(desc) = slot.binding else {
                set.push_unbound();
                continue;
            };
            if let Some(entry) = set.entry_for(desc) {
                set.push_shared(entry);
                continue;
            }
            let waveform = self
                .node_mut(desc.node)
                .and_then(|upstream| upstream.base_mut().take_data(desc.stream));
            set.push_lent(desc, waveform);
        }
        set
    }

    fn return_inputs(&mut self, inputs: InputSet) {
        for (desc, waveform) in inputs.into_lent() {
            if let Some(upstream) = self.node_mut(desc.node) {
                upstream.base_mut().restore_data(desc.stream, waveform);
            }
        }
    }
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{CaptureSource, ThresholdFilter};
    use crate::runtime::stream::Unit;
    use crate::runtime::waveform::{UniformAnalogWaveform, WaveformShape};

    fn source_graph() -> (FilterGraph, NodeId) {
        let mut graph = FilterGraph::new();
        let src = graph.add(CaptureSource::new().with_analog_stream("CH1", Unit::Volts));
        (graph, src)
    }

    #[test]
    fn test_refcounts() {
        let (mut graph, src) = source_graph();
        let thresh = graph.add(ThresholdFilter::new());
        graph.set_input(thresh, 0, Some(StreamDescriptor::new(src, 0))).unwrap();
        assert_eq!(graph.refcount(src), Some(2));

        // Host drops its reference; the binding keeps the source alive
        graph.release(src).unwrap();
        assert!(graph.contains(src));

        graph.release(thresh).unwrap();
        assert!(!graph.contains(thresh));
        assert!(!graph.contains(src));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_rebinding_releases_old_upstream() {
        let (mut graph, a) = source_graph();
        let b = graph.add(CaptureSource::new().with_analog_stream("CH2", Unit::Volts));
        let t = graph.add(ThresholdFilter::new());

        graph.set_input(t, 0, Some(StreamDescriptor::new(a, 0))).unwrap();
        graph.set_input(t, 0, Some(StreamDescriptor::new(b, 0))).unwrap();
        assert_eq!(graph.refcount(a), Some(1));
        assert_eq!(graph.refcount(b), Some(2));

        graph.set_input(t, 0, None).unwrap();
        assert_eq!(graph.refcount(b), Some(1));
    }

    #[test]
    fn test_wiring_errors() {
        let (mut graph, src) = source_graph();
        let t = graph.add(ThresholdFilter::new());

        assert!(matches!(
            graph.set_input(t, 3, None),
            Err(GraphError::InputOutOfRange { index: 3, .. })
        ));
        assert!(matches!(
            graph.set_input(t, 0, Some(StreamDescriptor::new(src, 5))),
            Err(GraphError::StreamOutOfRange(_))
        ));
        assert!(matches!(
            graph.set_input(t, 0, Some(StreamDescriptor::new(NodeId::new(99), 0))),
            Err(GraphError::UnknownNode(_))
        ));

        // A threshold output is digital; a threshold input only takes analog
        let t2 = graph.add(ThresholdFilter::new());
        assert!(matches!(
            graph.set_input(t2, 0, Some(StreamDescriptor::new(t, 0))),
            Err(GraphError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_refresh_and_null_output() {
        let (mut graph, src) = source_graph();
        let t = graph.add(ThresholdFilter::new());
        graph.set_input(t, 0, Some(StreamDescriptor::new(src, 0))).unwrap();

        // No upstream data: evaluation succeeds, output is null
        graph.refresh(t).unwrap();
        assert!(graph.waveform(StreamDescriptor::new(t, 0)).is_none());

        let w = UniformAnalogWaveform::from_samples(100, vec![0.0, 1.0, 0.0]);
        graph.publish(StreamDescriptor::new(src, 0), w.into()).unwrap();
        graph.refresh(t).unwrap();

        let out = graph.waveform(StreamDescriptor::new(t, 0)).unwrap();
        assert_eq!(out.shape(), WaveformShape::UniformDigital);
        assert_eq!(out.len(), 3);

        // Upstream data was handed back after evaluation
        assert!(graph.waveform(StreamDescriptor::new(src, 0)).is_some());
    }

    #[test]
    fn test_cache_bounded_across_passes() {
        let (mut graph, src) = source_graph();
        let freq = graph.add(crate::nodes::FrequencyMeasurement::new());
        graph.set_input(freq, 0, Some(StreamDescriptor::new(src, 0))).unwrap();

        for pass in 0..50 {
            let samples = (0..64).map(|i| if (i + pass) % 8 < 4 { 1.0 } else { -1.0 }).collect();
            let w = UniformAnalogWaveform::from_samples(100, samples);
            graph.publish(StreamDescriptor::new(src, 0), w.into()).unwrap();
            graph.refresh_all(&[src, freq]).unwrap();
            assert!(graph.waveform(StreamDescriptor::new(freq, 0)).is_some());
            assert_eq!(graph.cache().len(), 1, "pass {pass}");
        }
        assert_eq!(graph.cache().stats().misses, 50);
    }

    #[test]
    fn test_parameters_by_name() {
        let (mut graph, _) = source_graph();
        let t = graph.add(ThresholdFilter::new());
        graph.set_parameter(t, "Threshold", "0.25").unwrap();
        assert_eq!(graph.parameter(t, "Threshold").unwrap(), "0.25");
        assert!(matches!(
            graph.set_parameter(t, "Bogus", "1"),
            Err(GraphError::Parameter(_))
        ));
        assert!(graph.needs_config(t).unwrap());
    }

    #[test]
    fn test_default_name_follows_inputs() {
        let (mut graph, src) = source_graph();
        let t = graph.add(ThresholdFilter::new());
        graph.set_input(t, 0, Some(StreamDescriptor::new(src, 0))).unwrap();
        assert_eq!(graph.node(t).unwrap().name(), "Threshold_1(CH1)");
    }

    #[test]
    fn test_cycle_rejected() {
        let (mut graph, src) = source_graph();
        let a = graph.add(crate::nodes::FirFilter::new());
        let b = graph.add(crate::nodes::FirFilter::new());
        graph.set_input(a, 0, Some(StreamDescriptor::new(src, 0))).unwrap();
        graph.set_input(b, 0, Some(StreamDescriptor::new(a, 0))).unwrap();
        assert!(matches!(
            graph.set_input(a, 0, Some(StreamDescriptor::new(b, 0))),
            Err(GraphError::Cycle { .. })
        ));
    }
}
