//! Error types for the runtime system

use super::waveform::WaveformShape;

/// Reasons a filter evaluation produced no output.
///
/// These never escape to the host as failures: the graph turns any of them into
/// null outputs on the node's streams. They exist so node code can use `?`.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Input {0} is not connected")]
    InputNotConnected(usize),

    #[error("Input {0} has no waveform")]
    NoWaveform(usize),

    #[error("Input {0} has an empty waveform")]
    EmptyWaveform(usize),

    #[error("Input {index} is {actual:?}, expected {expected}")]
    WrongShape {
        index: usize,
        expected: &'static str,
        actual: WaveformShape,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Compute dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Error type for compute dispatch operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Binding slot {slot} out of range for kernel '{kernel}' ({count} slots)")]
    SlotOutOfRange {
        kernel: String,
        slot: usize,
        count: usize,
    },

    #[error("Kernel '{0}' dispatched without an output binding")]
    MissingOutput(String),

    #[error("Kernel '{kernel}' dispatched with input slot {slot} unbound")]
    UnboundInput { kernel: String, slot: usize },

    #[error("Input slot {slot} of kernel '{kernel}' is not resident on the device")]
    InputNotResident { kernel: String, slot: usize },

    #[error("Command buffer has no dispatch recorded")]
    NothingRecorded,

    #[error("Device worker terminated before signalling completion")]
    DeviceLost,
}

/// Error type for parameter access
#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    #[error("Parameter '{0}' not found")]
    NotFound(String),

    #[error("Cannot parse '{value}' for parameter '{name}'")]
    Parse { name: String, value: String },

    #[error("'{value}' is not a valid choice for parameter '{name}'")]
    UnknownEnumValue { name: String, value: String },
}

/// Result type for filter evaluation
pub type FilterResult<T = ()> = Result<T, FilterError>;
