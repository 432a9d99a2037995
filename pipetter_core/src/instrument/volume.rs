//! Piecewise-linear volume to plunger-distance conversion.

use pipetter_config::VolumeBreakpoint;

use crate::error::{HardwareError, Result, fail};
use crate::util::round6;

/// ul per mm at `ul`: `slope * ul + intercept` of the first row whose ceiling
/// is at or above `ul`. Volumes beyond the last ceiling are an error.
pub fn piecewise(ul: f64, table: &[VolumeBreakpoint]) -> Result<f64> {
    let Some(row) = table.iter().find(|b| b.ceiling_ul >= ul) else {
        return fail(HardwareError::VolumeConversion { ul });
    };
    let v = row.slope * ul + row.intercept;
    if !v.is_finite() || v <= 0.0 {
        return fail(HardwareError::VolumeConversion { ul });
    }
    Ok(v)
}

/// Plunger travel in mm for `ul`; zero volume is zero travel.
pub fn ul_to_mm(ul: f64, table: &[VolumeBreakpoint]) -> Result<f64> {
    if ul == 0.0 {
        return Ok(0.0);
    }
    Ok(ul / piecewise(ul, table)?)
}

/// Plunger speed in mm/s for a flow rate in ul/s, scaled at `max_volume`.
pub fn plunger_speed(ul_per_s: f64, max_volume: f64, table: &[VolumeBreakpoint]) -> Result<f64> {
    Ok(round6(ul_per_s / piecewise(max_volume, table)?))
}

/// Inverse of [`plunger_speed`].
pub fn plunger_flow_rate(mm_per_s: f64, max_volume: f64, table: &[VolumeBreakpoint]) -> Result<f64> {
    Ok(round6(mm_per_s * piecewise(max_volume, table)?))
}
