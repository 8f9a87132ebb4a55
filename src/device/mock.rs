//! Mock scan device generating synthetic detector data.
//!
//! The mock models one physical card exposing an analog-output task and an
//! edge-counting task that share state: counts are synthesized from the
//! beam positions written to the output task, so a full acquisition against
//! the mock exercises the same protocol ordering a real driver needs
//! (configure, derive clock, arm, start, read). Deterministic on purpose —
//! no RNG, the specimen is a fixed Gaussian spot.

use super::{ClockMode, EdgeCounting, EdgePolarity, StageControl, VoltageRange, WaveformOutput};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Synthetic specimen: photon rate per sample tick at a beam position.
type Specimen = dyn Fn(f64, f64) -> f64 + Send + Sync;

/// Default specimen, a bright Gaussian spot at the origin on a dim field.
fn gaussian_spot(x: f64, y: f64) -> f64 {
    let r2 = x * x + y * y;
    (1000.0 * (-r2 / 0.2).exp()) + 5.0
}

#[derive(Default)]
struct SharedState {
    output_configured: bool,
    output_clock: Option<(f64, usize)>,
    counter_configured: bool,
    derived_from: Option<String>,
    counter_samples: usize,
    output_armed: Option<String>,
    counter_armed: Option<String>,
    output_started: bool,
    counter_started: bool,
    positions: Vec<(f64, f64)>,
}

/// Builder for a paired mock output task and counter task.
pub struct MockScanDevice {
    state: Arc<Mutex<SharedState>>,
    specimen: Arc<Specimen>,
    read_delay: Duration,
}

impl Default for MockScanDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScanDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SharedState::default())),
            specimen: Arc::new(gaussian_spot),
            read_delay: Duration::ZERO,
        }
    }

    /// Replace the synthetic specimen.
    pub fn with_specimen<F>(mut self, specimen: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.specimen = Arc::new(specimen);
        self
    }

    /// Delay every counter read, for exercising timeout handling.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Split into the two task handles the acquisition backend expects.
    pub fn into_tasks(self) -> (MockOutputTask, MockCounterTask) {
        let output = MockOutputTask {
            state: Arc::clone(&self.state),
        };
        let counter = MockCounterTask {
            state: self.state,
            specimen: self.specimen,
            read_delay: self.read_delay,
        };
        (output, counter)
    }
}

/// Mock analog-output task handle.
pub struct MockOutputTask {
    state: Arc<Mutex<SharedState>>,
}

/// Mock edge-counting task handle.
pub struct MockCounterTask {
    state: Arc<Mutex<SharedState>>,
    specimen: Arc<Specimen>,
    read_delay: Duration,
}

const MOCK_CLOCK_TERMINAL: &str = "/Mock/ao/SampleClock";

#[async_trait]
impl WaveformOutput for MockOutputTask {
    async fn configure_output(&mut self, channels: &[String], range: VoltageRange) -> Result<()> {
        if channels.len() != 2 {
            return Err(anyhow!("mock output expects 2 channels, got {}", channels.len()));
        }
        if range.min >= range.max {
            return Err(anyhow!("inverted voltage range"));
        }
        info!("mock output configured on {:?}", channels);
        self.state.lock().map_err(poisoned)?.output_configured = true;
        Ok(())
    }

    async fn program_clock(
        &mut self,
        rate_hz: f64,
        samples: usize,
        mode: ClockMode,
    ) -> Result<()> {
        if mode != ClockMode::Finite {
            return Err(anyhow!("mock output supports only finite acquisition"));
        }
        let mut state = self.state.lock().map_err(poisoned)?;
        if !state.output_configured {
            return Err(anyhow!("clock programmed before channels were configured"));
        }
        state.output_clock = Some((rate_hz, samples));
        Ok(())
    }

    fn sample_clock_terminal(&self) -> String {
        MOCK_CLOCK_TERMINAL.to_string()
    }

    async fn write_samples(&mut self, interleaved: &[f64]) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let Some((_, samples)) = state.output_clock else {
            return Err(anyhow!("samples written before the clock was programmed"));
        };
        if interleaved.len() != samples * 2 {
            return Err(anyhow!(
                "buffer holds {} values, clock was programmed for {} ticks of 2 channels",
                interleaved.len(),
                samples
            ));
        }
        state.positions = interleaved.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        debug!("mock output buffered {} ticks", state.positions.len());
        Ok(())
    }

    async fn arm_trigger(&mut self, terminal: &str) -> Result<()> {
        self.state.lock().map_err(poisoned)?.output_armed = Some(terminal.to_string());
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if state.positions.is_empty() {
            return Err(anyhow!("output started with no samples buffered"));
        }
        state.output_started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.output_started = false;
        Ok(())
    }
}

#[async_trait]
impl EdgeCounting for MockCounterTask {
    async fn configure_input(
        &mut self,
        channel: &str,
        edge: EdgePolarity,
        source_terminal: &str,
    ) -> Result<()> {
        if edge != EdgePolarity::Rising {
            return Err(anyhow!("mock counter counts rising edges only"));
        }
        info!("mock counter configured on {} (source {})", channel, source_terminal);
        self.state.lock().map_err(poisoned)?.counter_configured = true;
        Ok(())
    }

    async fn derive_clock_from(
        &mut self,
        clock_terminal: &str,
        _rate_hz: f64,
        samples: usize,
    ) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if !state.counter_configured {
            return Err(anyhow!("clock derived before the counter was configured"));
        }
        state.derived_from = Some(clock_terminal.to_string());
        state.counter_samples = samples;
        Ok(())
    }

    async fn arm_trigger(&mut self, terminal: &str) -> Result<()> {
        self.state.lock().map_err(poisoned)?.counter_armed = Some(terminal.to_string());
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        match state.derived_from.as_deref() {
            None => return Err(anyhow!("counter started without a derived sample clock")),
            Some(terminal) if terminal != MOCK_CLOCK_TERMINAL => {
                return Err(anyhow!(
                    "counter clock derived from unknown terminal {}",
                    terminal
                ))
            }
            Some(_) => {}
        }
        if let (Some(out), Some(ctr)) = (&state.output_armed, &state.counter_armed) {
            if out != ctr {
                return Err(anyhow!(
                    "output and counter armed on different trigger terminals"
                ));
            }
        }
        state.counter_started = true;
        Ok(())
    }

    async fn read_counts(&mut self, samples: usize, _timeout: Duration) -> Result<Vec<u32>> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        let positions = {
            let state = self.state.lock().map_err(poisoned)?;
            if !(state.counter_started && state.output_started) {
                return Err(anyhow!("read before both tasks were started"));
            }
            if samples != state.counter_samples {
                return Err(anyhow!(
                    "read of {} samples, clock was derived for {}",
                    samples,
                    state.counter_samples
                ));
            }
            state.positions.clone()
        };
        if positions.len() != samples {
            return Err(anyhow!(
                "output buffered {} ticks but {} were requested",
                positions.len(),
                samples
            ));
        }

        let mut total = 0u64;
        let counts = positions
            .iter()
            .map(|&(x, y)| {
                total += (self.specimen)(x, y).max(0.0) as u64;
                total as u32
            })
            .collect();
        Ok(counts)
    }

    async fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.counter_started = false;
        Ok(())
    }
}

/// Stage mock recording every commanded position.
#[derive(Default)]
pub struct MockStage {
    moves: Vec<f64>,
}

impl MockStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions commanded so far, in order.
    pub fn moves(&self) -> &[f64] {
        &self.moves
    }
}

#[async_trait]
impl StageControl for MockStage {
    async fn move_to(&mut self, position: f64, _timeout: Duration) -> Result<()> {
        info!("mock stage moving to {}", position);
        self.moves.push(position);
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow!("mock device state poisoned")
}
