//! Filter node contract
//!
//! Defines the [`FilterNode`] trait every filter implements, the shared
//! [`FilterBase`] state (inputs, streams, parameters, output lifecycle) and the
//! [`InputSet`] through which a node reads its upstream waveforms while it is
//! being evaluated.

use super::buffer::DataLocation;
use super::dispatch::ComputeQueue;
use super::errors::{FilterError, FilterResult};
use super::parameter::ParameterSet;
use super::stream::{Stream, StreamDescriptor, StreamInfo, StreamType, Unit};
use super::waveform::{
    SparseAnalogWaveform, SparseDigitalWaveform, SparseWaveform, Timebase, UniformAnalogWaveform,
    UniformDigitalWaveform, Waveform, WaveformMeta, WaveformVariant,
};
use crate::analysis::cache::AnalysisCache;
use crate::analysis::simd::SimdLevel;

/// Per-evaluation context handed to every node by the graph
pub struct EvalContext<'a> {
    /// Edge cache shared by every node of the graph
    pub cache: &'a AnalysisCache,
    /// Vector instruction level kernels may use
    pub simd: SimdLevel,
    /// Whether GPU-capable filters should take their accelerated path
    pub gpu_filters_enabled: bool,
}

/// A filter in the processing graph
///
/// - Sources have 0 inputs and publish waveforms the host hands them
/// - Filters have N inputs and M output streams
///
/// `refresh()` must always validate its inputs before touching them. Returning
/// `Err` is the normal way to report "no output this cycle"; the graph then
/// clears every output stream of the node.
pub trait FilterNode: Send {
    /// Registry key of this filter type
    fn protocol_name(&self) -> &'static str;

    fn base(&self) -> &FilterBase;

    fn base_mut(&mut self) -> &mut FilterBase;

    /// Display name of this instance
    fn name(&self) -> &str {
        self.base().display_name()
    }

    /// Whether the stream described by `stream` may be bound to input `i`
    fn validate_channel(&self, i: usize, stream: &StreamInfo) -> bool;

    /// Evaluate on the CPU
    fn refresh(&mut self, inputs: &mut InputSet, ctx: &EvalContext) -> FilterResult<()>;

    /// Evaluate with access to a compute queue
    ///
    /// The default runs the CPU path and flags every output as written from the host.
    fn refresh_accelerated(
        &mut self,
        inputs: &mut InputSet,
        ctx: &EvalContext,
        _queue: &mut dyn ComputeQueue,
    ) -> FilterResult<()> {
        self.refresh(inputs, ctx)?;
        self.base_mut().mark_outputs_modified_from_cpu();
        Ok(())
    }

    /// Where input sample data must be resident when this node is invoked
    fn input_location(&self) -> DataLocation {
        DataLocation::Cpu
    }

    /// Whether the host should show a configuration dialog on creation
    fn needs_config(&self) -> bool {
        !self.base().parameters.is_empty() || self.base().input_count() > 1
    }

    /// Whether the output is a single measurement rather than a time series
    fn is_scalar_output(&self) -> bool {
        false
    }
}

/// One named input of a node and the upstream stream it is bound to, if any
#[derive(Debug, Clone)]
pub struct InputSlot {
    pub name: String,
    pub binding: Option<StreamDescriptor>,
}

/// State shared by every filter node
#[derive(Debug)]
pub struct FilterBase {
    display_name: String,
    using_default_name: bool,
    instance: usize,
    inputs: Vec<InputSlot>,
    streams: Vec<Stream>,
    pub parameters: ParameterSet,
}

impl FilterBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            display_name: name.into(),
            using_default_name: true,
            instance: 0,
            inputs: Vec::new(),
            streams: Vec::new(),
            parameters: ParameterSet::new(),
        }
    }

    /// Declare an input
    pub fn add_input(&mut self, name: impl Into<String>) {
        self.inputs.push(InputSlot {
            name: name.into(),
            binding: None,
        });
    }

    /// Declare an output stream
    pub fn add_stream(&mut self, name: impl Into<String>, stream_type: StreamType, unit: Unit) {
        self.streams.push(Stream::new(name, stream_type, unit));
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Set a user-chosen display name; automatic renaming stops afterwards
    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
        self.using_default_name = false;
    }

    pub fn is_using_default_name(&self) -> bool {
        self.using_default_name
    }

    pub(crate) fn set_default_name(&mut self, name: String) {
        if self.using_default_name {
            self.display_name = name;
        }
    }

    /// Per-protocol instance number assigned by the registry
    pub fn instance(&self) -> usize {
        self.instance
    }

    pub(crate) fn set_instance(&mut self, instance: usize) {
        self.instance = instance;
    }

    /// Default display name: alphanumeric protocol name, 1-based instance, input names
    pub fn default_name(&self, protocol: &str, input_names: &[String]) -> String {
        let alnum: String = protocol.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        format!("{}_{}({})", alnum, self.instance + 1, input_names.join(","))
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn inputs(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn input_name(&self, i: usize) -> Option<&str> {
        self.inputs.get(i).map(|s| s.name.as_str())
    }

    pub fn input_binding(&self, i: usize) -> Option<StreamDescriptor> {
        self.inputs.get(i).and_then(|s| s.binding)
    }

    /// Replace the binding of input `i`, returning the previous one
    pub(crate) fn bind_input(&mut self, i: usize, desc: Option<StreamDescriptor>) -> Option<StreamDescriptor> {
        std::mem::replace(&mut self.inputs[i].binding, desc)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, i: usize) -> Option<&Stream> {
        self.streams.get(i)
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn data(&self, stream: usize) -> Option<&Waveform> {
        self.streams.get(stream).and_then(|s| s.waveform.as_ref())
    }

    pub fn data_mut(&mut self, stream: usize) -> Option<&mut Waveform> {
        self.streams.get_mut(stream).and_then(|s| s.waveform.as_mut())
    }

    /// Replace (or clear) the waveform of a stream
    pub fn set_data(&mut self, stream: usize, waveform: Option<Waveform>) {
        self.streams[stream].waveform = waveform;
    }

    pub(crate) fn take_data(&mut self, stream: usize) -> Option<Waveform> {
        self.streams.get_mut(stream).and_then(|s| s.waveform.take())
    }

    pub(crate) fn restore_data(&mut self, stream: usize, waveform: Option<Waveform>) {
        if let Some(s) = self.streams.get_mut(stream) {
            s.waveform = waveform;
        }
    }

    /// Null every output
    pub fn clear_outputs(&mut self) {
        for s in &mut self.streams {
            s.waveform = None;
        }
    }

    pub fn mark_outputs_modified_from_cpu(&mut self) {
        for w in self.streams.iter_mut().filter_map(|s| s.waveform.as_mut()) {
            w.mark_modified_from_cpu();
        }
    }

    /// Reuse the stream's waveform if it already has shape `V`, otherwise bind a
    /// fresh one. Copies timebase and capture time from `din` and bumps the revision.
    fn setup_output<V: WaveformVariant>(&mut self, din: &WaveformMeta, stream: usize, clear: bool) -> &mut V {
        let slot = &mut self.streams[stream].waveform;
        if slot.as_ref().map(Waveform::shape) != Some(V::SHAPE) {
            *slot = Some(V::empty().into_waveform());
        }

        let w = slot
            .as_mut()
            .and_then(V::from_waveform_mut)
            .expect("output waveform was just set to the requested shape");

        let meta = w.meta_mut();
        meta.copy_timebase_from(din);
        meta.revision += 1;

        if clear {
            w.clear();
        }
        w
    }

    pub fn setup_empty_uniform_analog_output(
        &mut self,
        din: &WaveformMeta,
        stream: usize,
        clear: bool,
    ) -> &mut UniformAnalogWaveform {
        self.setup_output(din, stream, clear)
    }

    pub fn setup_empty_sparse_analog_output(
        &mut self,
        din: &WaveformMeta,
        stream: usize,
        clear: bool,
    ) -> &mut SparseAnalogWaveform {
        self.setup_output(din, stream, clear)
    }

    /// Digital outputs are always cleared
    pub fn setup_empty_uniform_digital_output(&mut self, din: &WaveformMeta, stream: usize) -> &mut UniformDigitalWaveform {
        self.setup_output(din, stream, true)
    }

    pub fn setup_empty_sparse_digital_output(&mut self, din: &WaveformMeta, stream: usize) -> &mut SparseDigitalWaveform {
        self.setup_output(din, stream, true)
    }

    /// Sparse analog output sharing `din`'s sample timing, minus `skip_start`
    /// leading and `skip_end` trailing samples
    pub fn setup_sparse_analog_output<T: Timebase>(
        &mut self,
        din: &T,
        stream: usize,
        skip_start: usize,
        skip_end: usize,
    ) -> &mut SparseAnalogWaveform {
        let w: &mut SparseAnalogWaveform = self.setup_output(din.meta(), stream, false);
        copy_timebase(w, din, skip_start, skip_end);
        w
    }

    pub fn setup_sparse_digital_output<T: Timebase>(
        &mut self,
        din: &T,
        stream: usize,
        skip_start: usize,
        skip_end: usize,
    ) -> &mut SparseDigitalWaveform {
        let w: &mut SparseDigitalWaveform = self.setup_output(din.meta(), stream, true);
        copy_timebase(w, din, skip_start, skip_end);
        w
    }

    /// Fit the display range of an analog stream to its current contents
    pub fn autoscale_vertical(&mut self, stream: usize, scalar: bool) {
        let Some(s) = self.streams.get_mut(stream) else {
            return;
        };
        let Some(w) = s.waveform.as_mut() else {
            return;
        };
        w.prepare_for_cpu_access();
        let samples: &[f32] = match w {
            Waveform::UniformAnalog(u) => u.samples.as_slice(),
            Waveform::SparseAnalog(sp) => sp.samples.as_slice(),
            _ => return,
        };
        let Some((vmin, vmax)) = crate::analysis::min_max(samples) else {
            return;
        };

        let range = if scalar { vmax * 0.05 } else { vmax - vmin };
        s.range = range * 1.05;
        s.offset = -(vmin + vmax) / 2.0;
    }

    /// Display range of a stream, autoscaling on first use
    pub fn voltage_range(&mut self, stream: usize, scalar: bool) -> f32 {
        match self.streams.get(stream) {
            None => return 1.0,
            Some(s) if s.range == 0.0 => {
                if s.waveform.is_none() {
                    return 1.0;
                }
                self.autoscale_vertical(stream, scalar);
            }
            Some(_) => {}
        }
        self.streams[stream].range
    }

    /// Display offset of a stream, autoscaling on first use
    pub fn offset(&mut self, stream: usize, scalar: bool) -> f32 {
        match self.streams.get(stream) {
            None => return 0.0,
            Some(s) if s.range == 0.0 => {
                if s.waveform.is_none() {
                    return 0.0;
                }
                self.autoscale_vertical(stream, scalar);
            }
            Some(_) => {}
        }
        self.streams[stream].offset
    }

    pub fn set_voltage_range(&mut self, stream: usize, range: f32) {
        self.streams[stream].range = range;
    }

    pub fn set_offset(&mut self, stream: usize, offset: f32) {
        self.streams[stream].offset = offset;
    }
}

fn copy_timebase<S: Copy + Default, T: Timebase>(w: &mut SparseWaveform<S>, din: &T, skip_start: usize, skip_end: usize) {
    let len = din.len().saturating_sub(skip_start + skip_end);
    w.resize(len);
    w.prepare_for_cpu_access();
    for (k, i) in (skip_start..skip_start + len).enumerate() {
        w.offsets.as_mut_slice()[k] = din.offset(i);
        w.durations.as_mut_slice()[k] = din.duration(i);
    }
    w.mark_timestamps_modified_from_cpu();
}

struct InputEntry {
    source: Option<StreamDescriptor>,
    waveform: Option<Waveform>,
}

/// Upstream waveforms lent to a node for the duration of one evaluation
///
/// Inputs bound to the same upstream stream share one entry.
pub struct InputSet {
    slots: Vec<Option<usize>>,
    entries: Vec<InputEntry>,
}

impl InputSet {
    pub(crate) fn with_capacity(inputs: usize) -> Self {
        Self {
            slots: Vec::with_capacity(inputs),
            entries: Vec::new(),
        }
    }

    /// Build an input set directly from waveforms (no graph involved)
    ///
    /// `None` entries are left unconnected.
    pub fn from_waveforms(waveforms: Vec<Option<Waveform>>) -> Self {
        let mut set = Self::with_capacity(waveforms.len());
        for w in waveforms {
            match w {
                Some(w) => {
                    set.slots.push(Some(set.entries.len()));
                    set.entries.push(InputEntry {
                        source: None,
                        waveform: Some(w),
                    });
                }
                None => set.push_unbound(),
            }
        }
        set
    }

    /// Entry index for a bound upstream stream, if already lent
    pub(crate) fn entry_for(&self, desc: StreamDescriptor) -> Option<usize> {
        self.entries.iter().position(|e| e.source == Some(desc))
    }

    pub(crate) fn push_unbound(&mut self) {
        self.slots.push(None);
    }

    pub(crate) fn push_shared(&mut self, entry: usize) {
        self.slots.push(Some(entry));
    }

    pub(crate) fn push_lent(&mut self, desc: StreamDescriptor, waveform: Option<Waveform>) {
        self.slots.push(Some(self.entries.len()));
        self.entries.push(InputEntry {
            source: Some(desc),
            waveform,
        });
    }

    /// Give every lent waveform back, paired with the stream it came from
    pub(crate) fn into_lent(self) -> impl Iterator<Item = (StreamDescriptor, Option<Waveform>)> {
        self.entries
            .into_iter()
            .filter_map(|e| e.source.map(|desc| (desc, e.waveform)))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_connected(&self, i: usize) -> bool {
        matches!(self.slots.get(i), Some(Some(_)))
    }

    pub fn get(&self, i: usize) -> Option<&Waveform> {
        let entry = (*self.slots.get(i)?)?;
        self.entries[entry].waveform.as_ref()
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Waveform> {
        let entry = (*self.slots.get(i)?)?;
        self.entries[entry].waveform.as_mut()
    }

    /// Input `i` is connected and has a waveform (non-empty unless `allow_empty`)
    pub fn verify_input_ok(&self, i: usize, allow_empty: bool) -> FilterResult<&Waveform> {
        if !self.is_connected(i) {
            return Err(FilterError::InputNotConnected(i));
        }
        let w = self.get(i).ok_or(FilterError::NoWaveform(i))?;
        if !allow_empty && w.is_empty() {
            return Err(FilterError::EmptyWaveform(i));
        }
        Ok(w)
    }

    pub fn verify_all_inputs_ok(&self, allow_empty: bool) -> FilterResult<()> {
        for i in 0..self.len() {
            self.verify_input_ok(i, allow_empty)?;
        }
        Ok(())
    }

    /// Like [`InputSet::verify_all_inputs_ok`] but tolerates unconnected inputs
    pub fn verify_all_inputs_ok_or_null(&self, allow_empty: bool) -> FilterResult<()> {
        for i in 0..self.len() {
            if self.is_connected(i) {
                self.verify_input_ok(i, allow_empty)?;
            }
        }
        Ok(())
    }

    pub fn require_uniform_analog(&self, i: usize) -> FilterResult<&UniformAnalogWaveform> {
        let w = self.verify_input_ok(i, false)?;
        w.as_uniform_analog().ok_or(FilterError::WrongShape {
            index: i,
            expected: "uniform analog",
            actual: w.shape(),
        })
    }

    pub fn require_uniform_analog_mut(&mut self, i: usize) -> FilterResult<&mut UniformAnalogWaveform> {
        let shape = self.verify_input_ok(i, false)?.shape();
        self.get_mut(i)
            .and_then(Waveform::as_uniform_analog_mut)
            .ok_or(FilterError::WrongShape {
                index: i,
                expected: "uniform analog",
                actual: shape,
            })
    }

    /// Optional sparse digital input
    ///
    /// Unconnected inputs, inputs with no waveform yet and waveforms of any
    /// other shape all read as absent.
    pub fn optional_sparse_digital(&self, i: usize) -> Option<&SparseDigitalWaveform> {
        self.get(i).and_then(Waveform::as_sparse_digital)
    }

    /// Make every lent waveform readable from the host
    pub fn prepare_for_cpu(&mut self) {
        for w in self.entries.iter_mut().filter_map(|e| e.waveform.as_mut()) {
            w.prepare_for_cpu_access();
        }
    }

    /// Make every lent waveform readable from the device
    pub fn prepare_for_gpu(&mut self) {
        for w in self.entries.iter_mut().filter_map(|e| e.waveform.as_mut()) {
            w.prepare_for_gpu_access();
        }
    }
}
