//! Scan geometry and timing planning.
//!
//! A [`ScanSpec`] describes what the user asked for: the galvo voltage
//! region, the pixel grid edge length, the per-pixel dwell, and optionally a
//! z sweep for volumetric acquisition. [`RasterPlan::compute`] converts the
//! request plus [`HardwareLimits`] into a concrete sampling plan that the
//! waveform synthesizer and the acquisition backends share.
//!
//! The planner clamps rather than fails: when the requested resolution would
//! exceed what the output hardware can sustain at the line-rate limit, the
//! sample rate is capped and the achieved dwell is longer than the requested
//! one.

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rectangular scan region in galvo command volts.
///
/// Descending ranges (`start > end`) are permitted; the fast axis simply
/// sweeps in the other direction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRegion {
    pub x_start: f64,
    pub y_start: f64,
    pub x_end: f64,
    pub y_end: f64,
}

impl ScanRegion {
    /// Square region of half-width `area` around `(x_offset, y_offset)`.
    ///
    /// This is the "basic" scan entry mode: start corners at offset + area,
    /// end corners at offset - area.
    pub fn centered(area: f64, x_offset: f64, y_offset: f64) -> Self {
        Self {
            x_start: x_offset + area,
            y_start: y_offset + area,
            x_end: x_offset - area,
            y_end: y_offset - area,
        }
    }

    /// True when every corner voltage lies within `[min, max]`.
    pub fn within(&self, min: f64, max: f64) -> bool {
        [self.x_start, self.y_start, self.x_end, self.y_end]
            .iter()
            .all(|v| (min..=max).contains(v))
    }
}

/// Z-axis sweep for volumetric scans: one plane per position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZSweep {
    pub start: f64,
    pub increment: f64,
    pub stop: f64,
}

impl ZSweep {
    pub fn validate(&self) -> ScanResult<()> {
        if self.increment <= 0.0 {
            return Err(ScanError::Configuration(
                "z increment must be positive".to_string(),
            ));
        }
        if self.stop < self.start {
            return Err(ScanError::Configuration(
                "z stop must not be below z start".to_string(),
            ));
        }
        Ok(())
    }

    /// Plane positions `start, start + inc, ...`, inclusive of `stop`.
    pub fn positions(&self) -> Vec<f64> {
        let mut positions = Vec::new();
        let mut z = self.start;
        // half-increment slack keeps the stop plane despite float accumulation
        while z <= self.stop + self.increment * 0.5 {
            positions.push(z);
            z += self.increment;
        }
        positions
    }
}

/// Immutable description of one scan request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSpec {
    /// Galvo voltage region to cover
    pub region: ScanRegion,
    /// Square grid edge length in pixels
    pub pixels: u32,
    /// Requested integration time per pixel, in milliseconds
    pub dwell_ms: f64,
    /// Optional z sweep; present for volumetric scans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_sweep: Option<ZSweep>,
}

impl ScanSpec {
    pub fn validate(&self) -> ScanResult<()> {
        if self.pixels == 0 {
            return Err(ScanError::Configuration(
                "pixel count must be positive".to_string(),
            ));
        }
        if self.dwell_ms <= 0.0 {
            return Err(ScanError::Configuration(
                "dwell time must be positive".to_string(),
            ));
        }
        if let Some(sweep) = &self.z_sweep {
            sweep.validate()?;
        }
        Ok(())
    }

    /// Requested dwell in seconds.
    pub fn dwell_seconds(&self) -> f64 {
        self.dwell_ms / 1000.0
    }

    /// Empirical wall-clock estimate for a process-driven scan of this spec.
    ///
    /// The 1.65 factor absorbs per-line turnaround overhead observed on the
    /// deployed scanner.
    pub fn estimated_duration(&self) -> Duration {
        let seconds = (self.pixels as f64).powi(2) * self.dwell_seconds() * 1.65;
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Hardware rate limits, supplied by configuration and never mutated here.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HardwareLimits {
    /// Maximum line rate the fast-axis actuator sustains (Hz)
    pub max_line_rate_hz: f64,
    /// Dead time at the start of each line
    #[serde(with = "humantime_serde")]
    pub settling_time: Duration,
    /// Maximum output sample rate of the DAQ hardware (Hz)
    pub max_sample_rate_hz: f64,
}

/// Concrete sampling plan derived from a [`ScanSpec`] and [`HardwareLimits`].
///
/// Invariants: `sample_rate_hz <= max_sample_rate_hz`,
/// `settling_samples = ceil(settling_time * sample_rate)`,
/// `samples_per_line = pixels + settling_samples`,
/// `total_samples = pixels * samples_per_line`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterPlan {
    /// Shared sample clock rate for output and counter tasks (Hz)
    pub sample_rate_hz: f64,
    /// Samples held at the line start while the fast axis settles
    pub settling_samples: usize,
    /// Pixels per line (grid edge length)
    pub pixels: usize,
    /// Settling prefix plus active pixels
    pub samples_per_line: usize,
    /// Samples across the whole frame
    pub total_samples: usize,
}

impl RasterPlan {
    /// Derive the sampling plan for `spec` under `limits`.
    ///
    /// The line period is pinned to the actuator limit: settling time is
    /// subtracted from the minimum line period, the remainder is divided
    /// among the pixels, and the resulting rate is clamped to the DAQ
    /// maximum.
    pub fn compute(spec: &ScanSpec, limits: &HardwareLimits) -> ScanResult<Self> {
        spec.validate()?;
        if limits.max_line_rate_hz <= 0.0 || limits.max_sample_rate_hz <= 0.0 {
            return Err(ScanError::Configuration(
                "hardware rate limits must be positive".to_string(),
            ));
        }

        let min_line_period = 1.0 / limits.max_line_rate_hz;
        let settling = limits.settling_time.as_secs_f64();
        let active_scan_time = min_line_period - settling;
        if active_scan_time <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "settling time {:?} leaves no active scan time in a {:.3} ms line period",
                limits.settling_time,
                min_line_period * 1e3
            )));
        }

        let desired_dwell = active_scan_time / spec.pixels as f64;
        let sample_rate_hz = limits.max_sample_rate_hz.min(1.0 / desired_dwell);
        let settling_samples = (settling * sample_rate_hz).ceil() as usize;
        let pixels = spec.pixels as usize;
        let samples_per_line = pixels + settling_samples;

        Ok(Self {
            sample_rate_hz,
            settling_samples,
            pixels,
            samples_per_line,
            total_samples: pixels * samples_per_line,
        })
    }

    /// Achieved per-pixel dwell, `1 / sample_rate`.
    pub fn actual_dwell(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate_hz)
    }

    /// Nominal duration of the full frame at the planned rate.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_samples as f64 / self.sample_rate_hz)
    }

    /// Deadline for the blocking counter read: twice the nominal frame
    /// duration plus a fixed margin.
    pub fn read_timeout(&self, margin: Duration) -> Duration {
        self.frame_duration() * 2 + margin
    }
}
