//! Output streams and the descriptors that bind filter inputs to them

use super::graph::NodeId;
use super::waveform::Waveform;
use std::fmt;

/// Physical unit of a stream's values or a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Femtoseconds,
    Seconds,
    Hertz,
    Volts,
    Amps,
    Degrees,
    Decibels,
    Counts,
    SampleDepth,
    Dimensionless,
}

impl Unit {
    /// Symbol appended when formatting values, if any
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Femtoseconds => "fs",
            Unit::Seconds => "s",
            Unit::Hertz => "Hz",
            Unit::Volts => "V",
            Unit::Amps => "A",
            Unit::Degrees => "°",
            Unit::Decibels => "dB",
            Unit::Counts => "",
            Unit::SampleDepth => "pts",
            Unit::Dimensionless => "",
        }
    }

    /// Parse a value written with an optional SI prefix and unit symbol,
    /// e.g. `"1.25 GHz"`, `"100M"`, `"-3.5mV"` or `"1e9"`.
    pub fn parse_value(&self, text: &str) -> Option<f64> {
        let mut s = text.trim();
        let symbol = self.symbol();
        if !symbol.is_empty()
            && let Some(stripped) = s.strip_suffix(symbol)
        {
            s = stripped.trim_end();
        }

        if let Ok(v) = s.parse::<f64>() {
            return Some(v);
        }

        let last = s.chars().last()?;
        let scale = match last {
            'f' => 1e-15,
            'p' => 1e-12,
            'n' => 1e-9,
            'u' | 'µ' => 1e-6,
            'm' => 1e-3,
            'k' | 'K' => 1e3,
            'M' => 1e6,
            'G' => 1e9,
            'T' => 1e12,
            _ => return None,
        };
        let mantissa = s[..s.len() - last.len_utf8()].trim_end();
        mantissa.parse::<f64>().ok().map(|v| v * scale)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Kind of data a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Analog,
    Digital,
    /// A single scalar measurement rather than a time series
    AnalogScalar,
}

/// Reference to one output stream of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamDescriptor {
    pub node: NodeId,
    pub stream: usize,
}

impl StreamDescriptor {
    pub fn new(node: NodeId, stream: usize) -> Self {
        Self { node, stream }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.stream)
    }
}

/// What an input validator gets to see about a candidate upstream stream
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    pub stream_type: StreamType,
    pub unit: Unit,
}

/// One output of a filter node
///
/// A stream exclusively owns at most one waveform. Consumers only ever read it;
/// the owning node replaces or republishes it on each evaluation.
#[derive(Debug)]
pub struct Stream {
    pub name: String,
    pub unit: Unit,
    pub stream_type: StreamType,
    pub(crate) waveform: Option<Waveform>,
    /// Display range; 0 means not yet autoscaled
    pub(crate) range: f32,
    pub(crate) offset: f32,
}

impl Stream {
    pub fn new(name: impl Into<String>, stream_type: StreamType, unit: Unit) -> Self {
        Self {
            name: name.into(),
            unit,
            stream_type,
            waveform: None,
            range: 0.0,
            offset: 0.0,
        }
    }

    pub fn waveform(&self) -> Option<&Waveform> {
        self.waveform.as_ref()
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            stream_type: self.stream_type,
            unit: self.unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_scientific() {
        assert_eq!(Unit::Hertz.parse_value("1250000000"), Some(1.25e9));
        assert_eq!(Unit::Hertz.parse_value("1.25e9"), Some(1.25e9));
    }

    #[test]
    fn test_parse_si_prefix() {
        assert_eq!(Unit::Hertz.parse_value("100 MHz"), Some(100e6));
        assert_eq!(Unit::Hertz.parse_value("1.5G"), Some(1.5e9));
        let mv = Unit::Volts.parse_value("-250mV").unwrap();
        assert!((mv + 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(Unit::Volts.parse_value("fast"), None);
        assert_eq!(Unit::Volts.parse_value(""), None);
    }
}
