//! Hardware-driven acquisition backend.
//!
//! Drives a clocked analog-output task and an edge-counting task as one
//! sample-synchronous pair: the counter's clock is derived from the output
//! task's clock terminal and both tasks arm on the same start trigger, so
//! every detector sample lands on exactly one beam position. The read
//! deadline is twice the nominal frame duration plus a configured margin.

use super::{AcquisitionBackend, RawScan};
use crate::config::HardwareSettings;
use crate::device::{ClockMode, EdgeCounting, EdgePolarity, VoltageRange, WaveformOutput};
use crate::error::{ScanError, ScanResult};
use crate::plan::{RasterPlan, ScanSpec};
use crate::stream::ScanProgress;
use crate::waveform::ScanWaveform;
use async_trait::async_trait;
use log::debug;
use tokio::sync::watch;

/// Acquisition over a [`WaveformOutput`] / [`EdgeCounting`] task pair.
pub struct HardwareAcquisition<O, C> {
    output: O,
    counter: C,
    settings: HardwareSettings,
    plan: Option<RasterPlan>,
}

impl<O, C> HardwareAcquisition<O, C> {
    pub fn new(output: O, counter: C, settings: HardwareSettings) -> Self {
        Self {
            output,
            counter,
            settings,
            plan: None,
        }
    }
}

#[async_trait]
impl<O, C> AcquisitionBackend for HardwareAcquisition<O, C>
where
    O: WaveformOutput,
    C: EdgeCounting,
{
    async fn configure(
        &mut self,
        spec: &ScanSpec,
        plan: &RasterPlan,
        _z: Option<f64>,
    ) -> ScanResult<()> {
        let range = VoltageRange {
            min: self.settings.voltage_min,
            max: self.settings.voltage_max,
        };
        if !spec.region.within(range.min, range.max) {
            return Err(ScanError::Configuration(format!(
                "scan region exceeds the output range [{}, {}] V",
                range.min, range.max
            )));
        }

        self.output
            .configure_output(&self.settings.ao_channels, range)
            .await?;
        self.output
            .program_clock(plan.sample_rate_hz, plan.total_samples, ClockMode::Finite)
            .await?;

        self.counter
            .configure_input(
                &self.settings.counter_channel,
                EdgePolarity::Rising,
                &self.settings.counter_source_terminal,
            )
            .await?;
        // lockstep: the counter samples on the output task's clock
        self.counter
            .derive_clock_from(
                &self.output.sample_clock_terminal(),
                plan.sample_rate_hz,
                plan.total_samples,
            )
            .await?;

        let waveform = ScanWaveform::synthesize(plan, &spec.region);
        self.output.write_samples(&waveform.interleaved()).await?;

        self.output
            .arm_trigger(&self.settings.trigger_terminal)
            .await?;
        self.counter
            .arm_trigger(&self.settings.trigger_terminal)
            .await?;

        self.plan = Some(*plan);
        Ok(())
    }

    async fn start(&mut self) -> ScanResult<()> {
        self.output.start().await?;
        self.counter.start().await?;
        Ok(())
    }

    async fn wait(&mut self, progress: &watch::Sender<ScanProgress>) -> ScanResult<RawScan> {
        let plan = self.plan.ok_or_else(|| {
            ScanError::Configuration("hardware backend was not configured".to_string())
        })?;
        let deadline = plan.read_timeout(self.settings.read_margin);
        debug!(
            "reading {} counter samples (deadline {:?})",
            plan.total_samples, deadline
        );

        let read = self.counter.read_counts(plan.total_samples, deadline);
        match tokio::time::timeout(deadline, read).await {
            Ok(Ok(samples)) => {
                progress.send_replace(ScanProgress {
                    decoded_lines: plan.total_samples,
                    expected_lines: Some(plan.total_samples),
                    fraction: 1.0,
                });
                Ok(RawScan::Counts(samples))
            }
            Ok(Err(e)) => Err(ScanError::Device(e)),
            Err(_) => Err(ScanError::Timeout { waited: deadline }),
        }
    }

    async fn teardown(&mut self) {
        // best effort, errors are not recoverable at this point
        if let Err(e) = self.counter.stop().await {
            log::warn!("counter stop failed during teardown: {e}");
        }
        if let Err(e) = self.output.stop().await {
            log::warn!("output stop failed during teardown: {e}");
        }
        self.plan = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Coordinator;
    use crate::config::Settings;
    use crate::device::mock::MockScanDevice;
    use crate::plan::{HardwareLimits, ScanRegion};
    use std::time::Duration;

    fn limits() -> HardwareLimits {
        HardwareLimits {
            max_line_rate_hz: 175.0,
            settling_time: Duration::from_micros(300),
            max_sample_rate_hz: 500_000.0,
        }
    }

    fn spec(pixels: u32) -> ScanSpec {
        ScanSpec {
            region: ScanRegion::centered(1.0, 0.0, 0.0),
            pixels,
            dwell_ms: 1.0,
            z_sweep: None,
        }
    }

    #[tokio::test]
    async fn mock_scan_produces_square_frame() {
        let (output, counter) = MockScanDevice::new().into_tasks();
        let backend = HardwareAcquisition::new(output, counter, Settings::default().hardware);
        let mut coordinator = Coordinator::new(backend, limits());

        let frame = coordinator.scan(&spec(8)).await.unwrap();
        let grid = frame.original();
        assert_eq!((grid.rows(), grid.cols()), (8, 8));
        // counter deltas can never be negative
        let (min, _) = grid.intensity_range();
        assert!(min >= 0.0);
    }

    #[tokio::test]
    async fn bright_center_outshines_corner() {
        let (output, counter) = MockScanDevice::new().into_tasks();
        let backend = HardwareAcquisition::new(output, counter, Settings::default().hardware);
        let mut coordinator = Coordinator::new(backend, limits());

        let frame = coordinator.scan(&spec(9)).await.unwrap();
        let grid = frame.original();
        let center = grid.value(4, 4);
        let corner = grid.value(0, 0);
        assert!(
            center > corner,
            "expected the Gaussian specimen's center ({center}) above the corner ({corner})"
        );
    }

    #[tokio::test]
    async fn flat_specimen_yields_uniform_deltas() {
        let (output, counter) = MockScanDevice::new()
            .with_specimen(|_, _| 7.0)
            .into_tasks();
        let backend = HardwareAcquisition::new(output, counter, Settings::default().hardware);
        let mut coordinator = Coordinator::new(backend, limits());

        let frame = coordinator.scan(&spec(4)).await.unwrap();
        let grid = frame.original();
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(grid.value(r, c), 7.0);
            }
        }
    }

    #[tokio::test]
    async fn region_outside_output_range_is_rejected() {
        let (output, counter) = MockScanDevice::new().into_tasks();
        let backend = HardwareAcquisition::new(output, counter, Settings::default().hardware);
        let mut coordinator = Coordinator::new(backend, limits());

        let mut spec = spec(4);
        spec.region = ScanRegion::centered(20.0, 0.0, 0.0);
        let err = coordinator.scan(&spec).await.unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[tokio::test]
    async fn slow_read_times_out() {
        let (output, counter) = MockScanDevice::new()
            .with_read_delay(Duration::from_secs(30))
            .into_tasks();
        let mut settings = Settings::default().hardware;
        settings.read_margin = Duration::from_millis(10);
        let backend = HardwareAcquisition::new(output, counter, settings);
        let mut coordinator = Coordinator::new(backend, limits());

        let err = coordinator.scan(&spec(2)).await.unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));
        assert_eq!(
            coordinator.state(),
            crate::acquisition::SessionState::TimedOut
        );
    }
}
