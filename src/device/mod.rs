//! Device collaborator capability traits.
//!
//! The acquisition core never talks to a vendor API directly; it drives the
//! capability set below. A real driver implements these against its DAQ
//! library; [`mock::MockScanDevice`] implements them against a synthetic
//! specimen for tests and the demo CLI path.
//!
//! Synchronization contract: the counter task's sample clock is derived
//! from the output task's clock terminal and both tasks arm on one start
//! trigger, so the detector samples exactly once per output step. Software
//! polling cannot guarantee that alignment.

pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sample clock acquisition mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockMode {
    /// Acquire a fixed number of samples, then stop
    Finite,
    /// Free-running until stopped
    Continuous,
}

/// Which signal edge the counter input counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgePolarity {
    Rising,
    Falling,
}

/// Output voltage range for the galvo command channels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoltageRange {
    pub min: f64,
    pub max: f64,
}

/// Clocked multi-channel analog output task.
#[async_trait]
pub trait WaveformOutput: Send + Sync {
    /// Claim the output channels and set their voltage range.
    async fn configure_output(&mut self, channels: &[String], range: VoltageRange) -> Result<()>;

    /// Program the task's sample clock.
    async fn program_clock(&mut self, rate_hz: f64, samples: usize, mode: ClockMode)
        -> Result<()>;

    /// Terminal the task's sample clock is exported on, for other tasks to
    /// derive from.
    fn sample_clock_terminal(&self) -> String;

    /// Push the interleaved per-tick sample buffer without starting.
    async fn write_samples(&mut self, interleaved: &[f64]) -> Result<()>;

    /// Arm the task on a start-trigger terminal.
    async fn arm_trigger(&mut self, terminal: &str) -> Result<()>;

    /// Start (or release to the armed trigger).
    async fn start(&mut self) -> Result<()>;

    /// Stop and release the channels.
    async fn stop(&mut self) -> Result<()>;
}

/// Clocked edge-counting input task.
#[async_trait]
pub trait EdgeCounting: Send + Sync {
    /// Claim the counter channel and route its count source terminal.
    async fn configure_input(
        &mut self,
        channel: &str,
        edge: EdgePolarity,
        source_terminal: &str,
    ) -> Result<()>;

    /// Derive this task's sample clock from another task's clock terminal,
    /// so both advance in lockstep.
    async fn derive_clock_from(
        &mut self,
        clock_terminal: &str,
        rate_hz: f64,
        samples: usize,
    ) -> Result<()>;

    /// Arm the task on a start-trigger terminal.
    async fn arm_trigger(&mut self, terminal: &str) -> Result<()>;

    /// Start (or release to the armed trigger).
    async fn start(&mut self) -> Result<()>;

    /// Blocking bounded read of `samples` cumulative counter values.
    async fn read_counts(&mut self, samples: usize, timeout: Duration) -> Result<Vec<u32>>;

    /// Stop and release the channel.
    async fn stop(&mut self) -> Result<()>;
}

/// Translation stage used to step between planes in volumetric scans.
#[async_trait]
pub trait StageControl: Send + Sync {
    /// Move to an absolute position and wait for the move to complete.
    async fn move_to(&mut self, position: f64, timeout: Duration) -> Result<()>;
}
