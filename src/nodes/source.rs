//! Capture source node
//!
//! Holds waveforms handed to the graph from outside (an instrument driver, a
//! file loader, a test). It has no inputs and evaluating it changes nothing.

use crate::runtime::errors::FilterResult;
use crate::runtime::node::{EvalContext, FilterBase, FilterNode, InputSet};
use crate::runtime::stream::{StreamInfo, StreamType, Unit};

pub struct CaptureSource {
    base: FilterBase,
}

impl CaptureSource {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new("Capture"),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base.set_display_name(name);
        self
    }

    pub fn with_analog_stream(mut self, name: impl Into<String>, unit: Unit) -> Self {
        self.base.add_stream(name, StreamType::Analog, unit);
        self
    }

    pub fn with_digital_stream(mut self, name: impl Into<String>) -> Self {
        self.base.add_stream(name, StreamType::Digital, Unit::Counts);
        self
    }
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterNode for CaptureSource {
    fn protocol_name(&self) -> &'static str {
        "Capture"
    }

    fn base(&self) -> &FilterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FilterBase {
        &mut self.base
    }

    fn validate_channel(&self, _i: usize, _stream: &StreamInfo) -> bool {
        false
    }

    fn refresh(&mut self, _inputs: &mut InputSet, _ctx: &EvalContext) -> FilterResult<()> {
        Ok(())
    }

    fn needs_config(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams() {
        let src = CaptureSource::new()
            .with_name("scope")
            .with_analog_stream("CH1", Unit::Volts)
            .with_digital_stream("D0");
        assert_eq!(src.base().stream_count(), 2);
        assert_eq!(src.base().stream(1).unwrap().stream_type, StreamType::Digital);
        assert_eq!(src.name(), "scope");
        assert_eq!(src.base().input_count(), 0);
    }
}
