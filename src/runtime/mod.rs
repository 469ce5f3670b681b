//! Runtime support for filter graphs

pub mod buffer;
pub mod dispatch;
pub mod errors;
pub mod graph;
pub mod node;
pub mod parameter;
pub mod registry;
pub mod stream;
pub mod watchdog;
pub mod waveform;

pub use buffer::{AcceleratorBuffer, DataLocation, UsageHint};
pub use dispatch::{CommandBuffer, ComputeKernel, ComputeQueue, HostComputeQueue, compute_block_count};
pub use errors::{DispatchError, FilterError, FilterResult, ParameterError};
pub use graph::{ExecOptions, FilterGraph, NodeId};
pub use node::{EvalContext, FilterBase, FilterNode, InputSet, InputSlot};
pub use parameter::{FilterParameter, ParameterSet, ParameterValue};
pub use registry::{create_filter, enum_protocols, register_filter};
pub use stream::{Stream, StreamDescriptor, StreamInfo, StreamType, Unit};
pub use watchdog::StallMonitor;
pub use waveform::{
    FS_PER_SECOND, SparseAnalogWaveform, SparseDigitalWaveform, SparseWaveform, Timebase,
    UniformAnalogWaveform, UniformDigitalWaveform, UniformWaveform, Waveform, WaveformData,
    WaveformId, WaveformMeta, WaveformShape,
};
