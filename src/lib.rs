//! Filter-graph signal processing for oscilloscope captures
//!
//! Waveforms flow through a graph of filter nodes. Each node reads the
//! waveforms on its bound inputs, runs its algorithm and publishes new
//! waveforms on its output streams.
//!
//! # Architecture
//!
//! - **Waveforms**: uniform or sparse, analog or digital, in femtosecond ticks
//! - **FilterGraph**: node arena, wiring, reference counts and the shared edge cache
//! - **Analysis**: edge detection, interpolation and SIMD helpers used by filters
//! - **Filters**: threshold, frequency, PLL clock recovery, FIR
//! - **Dispatch**: command buffers run on a [`runtime::ComputeQueue`]
//!
//! # Example
//!
//! ```no_run
//! use scopegraph::{CaptureSource, FilterGraph, StreamDescriptor, Unit, UniformAnalogWaveform};
//!
//! let mut graph = FilterGraph::new();
//! let scope = graph.add(CaptureSource::new().with_analog_stream("CH1", Unit::Volts));
//! let pll = graph.create("Clock Recovery (PLL)")?;
//! graph.set_input(pll, 0, Some(StreamDescriptor::new(scope, 0)))?;
//!
//! let capture = UniformAnalogWaveform::from_samples(100_000, vec![0.0; 1024]);
//! graph.publish(StreamDescriptor::new(scope, 0), capture.into())?;
//! graph.refresh(pll)?;
//! # Ok::<(), scopegraph::GraphError>(())
//! ```

use thiserror::Error;

pub mod analysis;
pub mod nodes;
pub mod runtime;

pub use analysis::{AnalysisCache, SimdLevel, find_zero_crossings};

pub use nodes::{CaptureSource, ClockRecoveryFilter, FirFilter, FirFilterType, FrequencyMeasurement, ThresholdFilter};

pub use runtime::{
    ComputeQueue, ExecOptions, FilterError, FilterGraph, FilterNode, HostComputeQueue, NodeId,
    ParameterError, SparseAnalogWaveform, SparseDigitalWaveform, StreamDescriptor, Unit,
    UniformAnalogWaveform, UniformDigitalWaveform, Waveform, create_filter, enum_protocols,
    register_filter,
};

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Unknown filter protocol '{0}'")]
    UnknownProtocol(String),

    #[error("Input {index} out of range for node {node} ({count} inputs)")]
    InputOutOfRange { node: NodeId, index: usize, count: usize },

    #[error("No such stream: {0}")]
    StreamOutOfRange(StreamDescriptor),

    #[error("Stream {desc} is not valid for input {index} of node {node}")]
    InvalidInput {
        node: NodeId,
        index: usize,
        desc: StreamDescriptor,
    },

    #[error("Binding {desc} to node {node} would create a cycle")]
    Cycle { node: NodeId, desc: StreamDescriptor },

    #[error("Node {0} is being evaluated")]
    NodeBusy(NodeId),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),
}

pub type Result<T> = std::result::Result<T, GraphError>;
