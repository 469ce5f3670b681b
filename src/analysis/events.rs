//! Walking a waveform's sample boundaries in time order

use crate::runtime::waveform::Timebase;

/// Start time (fs) of the sample after `i`, or `tend` if `i` is the last one
pub fn next_event_timestamp_scaled<T: Timebase>(w: &T, i: usize, tend: i64) -> i64 {
    if i + 1 < w.len() {
        w.offset_scaled(i + 1)
    } else {
        tend
    }
}

/// Advance `i` to the last sample starting at or before `timestamp` (fs)
///
/// Never moves backwards, so repeated calls with increasing timestamps walk the
/// waveform once in total.
pub fn advance_to_timestamp_scaled<T: Timebase>(w: &T, i: &mut usize, timestamp: i64) {
    while *i + 1 < w.len() && w.offset_scaled(*i + 1) <= timestamp {
        *i += 1;
    }
}
