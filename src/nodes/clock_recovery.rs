//! Bang-bang PLL clock recovery
//!
//! Recovers a sampling clock from the transitions of a serial data signal. An
//! NCO free-runs at the nominal symbol period; every data edge that lands in
//! the current unit interval nudges its phase and period by a fixed step in the
//! direction of the error. An optional gate input suppresses the clock while
//! low and re-syncs the NCO to the data when it opens again.

use crate::analysis::events::advance_to_timestamp_scaled;
use crate::analysis::find_zero_crossings;
use crate::runtime::errors::{FilterError, FilterResult};
use crate::runtime::node::{EvalContext, FilterBase, FilterNode, InputSet};
use crate::runtime::parameter::FilterParameter;
use crate::runtime::stream::{StreamInfo, StreamType, Unit};
use crate::runtime::waveform::{FS_PER_SECOND_F64, SparseDigitalWaveform, Timebase};
use tracing::{trace, warn};

const SYMBOL_RATE: &str = "Symbol rate";
const THRESHOLD: &str = "Threshold";

/// Period correction per edge, as a fraction of the period
const PERIOD_GAIN: i64 = 40_000;
/// Phase correction per edge, as a fraction of the period
const PHASE_GAIN: i64 = 400;

/// Outcome of one PLL run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockStats {
    /// NCO period (fs) when the run ended
    pub final_period: i64,
    /// Mean absolute phase error (fs) over all input edges
    pub average_phase_error: i64,
    /// Signed phase error (fs) seen at each compared data edge
    pub phase_errors: Vec<i64>,
    /// Set if the loop was driven below the Nyquist limit and gave up
    pub aborted: bool,
}

/// The NCO and loop filter, independent of any graph plumbing
#[derive(Debug, Clone, Copy)]
pub struct BangBangPll {
    nominal_period: i64,
    nyquist: i64,
}

impl BangBangPll {
    /// `nominal_period` and `nyquist` (the shortest period the input can
    /// represent) are in femtoseconds
    pub fn new(nominal_period: i64, nyquist: i64) -> Self {
        Self {
            nominal_period,
            nyquist,
        }
    }

    /// Track `edges` (fs, ascending) up to `tend`, appending one recovered clock
    /// transition per unit interval to `out`
    ///
    /// `out` is expected to have a 1 fs timescale and zero trigger phase. Fewer
    /// than two edges produce no output.
    pub fn run(
        &self,
        edges: &[i64],
        tend: i64,
        gate: Option<&SparseDigitalWaveform>,
        out: &mut SparseDigitalWaveform,
    ) -> LockStats {
        let mut stats = LockStats {
            final_period: self.nominal_period,
            ..LockStats::default()
        };
        if edges.len() < 2 {
            return stats;
        }

        let mut period = self.nominal_period;
        let mut edgepos = edges[0];
        let mut nedge = 1;
        let mut value = false;
        let mut total_error: i64 = 0;
        let mut igate = 0;
        let mut gating = false;

        out.reserve(edges.len());
        stats.phase_errors.reserve(edges.len());

        while edgepos < tend && nedge < edges.len() - 1 {
            let center = period / 2;

            let was_gating = gating;
            if let Some(gate) = gate
                && !gate.is_empty()
            {
                advance_to_timestamp_scaled(gate, &mut igate, edgepos);
                let start = gate.offset_scaled(igate);
                let end = start + gate.duration_scaled(igate);
                if (start..=end).contains(&edgepos) {
                    gating = !gate.samples.as_slice()[igate];
                }
            }

            // Any number of data edges may fall in this UI if the frequency is way off
            let mut tnext = edges[nedge];
            while tnext + center < edgepos && nedge + 1 < edges.len() {
                let delta = (edgepos - tnext) - period;
                total_error += delta.abs();
                stats.phase_errors.push(delta);

                if was_gating && !gating {
                    edgepos = tnext + period;
                } else {
                    let cperiod = period;
                    if delta > 0 {
                        period -= cperiod / PERIOD_GAIN;
                        edgepos -= cperiod / PHASE_GAIN;
                    } else {
                        period += cperiod / PERIOD_GAIN;
                        edgepos += cperiod / PHASE_GAIN;
                    }
                }

                nedge += 1;
                tnext = edges[nedge];

                if period < self.nyquist {
                    warn!(
                        "PLL attempted to lock to a period of {} fs, below the input Nyquist limit of {} fs",
                        period, self.nyquist
                    );
                    stats.aborted = true;
                    nedge = edges.len();
                    break;
                }
            }

            if !gating {
                value = !value;
                out.push(edgepos + period / 2, period, value);
            }
            edgepos += period;
        }

        stats.final_period = period;
        stats.average_phase_error = total_error / edges.len() as i64;
        stats
    }
}

pub struct ClockRecoveryFilter {
    base: FilterBase,
    last_lock: Option<LockStats>,
}

impl ClockRecoveryFilter {
    pub fn new() -> Self {
        let mut base = FilterBase::new("Clock Recovery (PLL)");
        base.add_input("data");
        base.add_input("gate");
        base.add_stream("clk", StreamType::Digital, Unit::Counts);
        base.parameters.add(SYMBOL_RATE, FilterParameter::float(1.25e9, Unit::Hertz));
        base.parameters.add(THRESHOLD, FilterParameter::float(0.0, Unit::Volts));
        Self { base, last_lock: None }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.base.set_display_name(name);
        self
    }

    pub fn with_symbol_rate(mut self, hz: f64) -> Self {
        if let Some(p) = self.base.parameters.get_mut(SYMBOL_RATE) {
            p.set_float(hz);
        }
        self
    }

    pub fn with_threshold(mut self, volts: f32) -> Self {
        if let Some(p) = self.base.parameters.get_mut(THRESHOLD) {
            p.set_float(volts as f64);
        }
        self
    }

    /// Loop statistics of the most recent successful evaluation
    pub fn last_lock(&self) -> Option<&LockStats> {
        self.last_lock.as_ref()
    }
}

impl Default for ClockRecoveryFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterNode for ClockRecoveryFilter {
    fn protocol_name(&self) -> &'static str {
        "Clock Recovery (PLL)"
    }

    fn base(&self) -> &FilterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FilterBase {
        &mut self.base
    }

    fn validate_channel(&self, i: usize, stream: &StreamInfo) -> bool {
        match i {
            0 => matches!(stream.stream_type, StreamType::Analog | StreamType::Digital),
            1 => stream.stream_type == StreamType::Digital,
            _ => false,
        }
    }

    fn refresh(&mut self, inputs: &mut InputSet, ctx: &EvalContext) -> FilterResult<()> {
        self.last_lock = None;

        let din = inputs.verify_input_ok(0, false)?;
        let gate = inputs.optional_sparse_digital(1);

        let threshold = self.base.parameters.float(THRESHOLD) as f32;
        let edges = find_zero_crossings(ctx.cache, din, threshold);
        if edges.len() < 2 {
            return Err(FilterError::InsufficientData(format!(
                "{} data edges, need at least 2",
                edges.len()
            )));
        }

        let rate = self.base.parameters.float(SYMBOL_RATE);
        if rate <= 0.0 {
            return Err(FilterError::InvalidConfig(format!("symbol rate {rate} Hz")));
        }
        let period = (FS_PER_SECOND_F64 / rate).round() as i64;
        let nyquist = 2 * din.timescale();
        if period < nyquist {
            return Err(FilterError::InvalidConfig(format!(
                "symbol period {period} fs is below the input Nyquist limit of {nyquist} fs"
            )));
        }

        let tend = din.offset_scaled(din.len() - 1);

        let cap = self.base.setup_empty_sparse_digital_output(din.meta(), 0);
        cap.meta.trigger_phase = 0;
        cap.meta.timescale = 1;
        cap.prepare_for_cpu_access();

        let stats = BangBangPll::new(period, nyquist).run(&edges, tend, gate, cap);
        cap.mark_modified_from_cpu();

        trace!(
            "[{}] {} clock edges, final period {} fs, average phase error {} fs",
            self.base.display_name(),
            self.base.data(0).map_or(0, |w| w.len()),
            stats.final_period,
            stats.average_phase_error
        );
        self.last_lock = Some(stats);
        Ok(())
    }
}
