//! Process-driven acquisition backend.
//!
//! Runs the external scanner executable with the scan geometry on its
//! command line and tails the append-only result stream it writes,
//! publishing a progress snapshot per poll tick until the process exits.
//! The child's exit status and stderr are surfaced in the log but not
//! interpreted; the stream content is the source of truth. The deadline is
//! twice the empirical scan-time estimate plus a configured margin.

use super::{AcquisitionBackend, RawScan};
use crate::config::ScannerSettings;
use crate::error::{ScanError, ScanResult};
use crate::plan::{RasterPlan, ScanSpec};
use crate::stream::{ScanProgress, StreamCursor};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Acquisition through the external scanner process.
pub struct ProcessAcquisition {
    settings: ScannerSettings,
    args: Option<Vec<String>>,
    cursor: Option<StreamCursor>,
    child: Option<Child>,
    deadline: Duration,
}

impl ProcessAcquisition {
    pub fn new(settings: ScannerSettings) -> Self {
        Self {
            settings,
            args: None,
            cursor: None,
            child: None,
            deadline: Duration::ZERO,
        }
    }

    fn scan_args(spec: &ScanSpec, z: Option<f64>) -> Vec<String> {
        let region = &spec.region;
        let mut args = vec![
            "-xs".to_string(),
            region.x_start.to_string(),
            "-ys".to_string(),
            region.y_start.to_string(),
            "-xe".to_string(),
            region.x_end.to_string(),
            "-ye".to_string(),
            region.y_end.to_string(),
            "-st".to_string(),
            spec.pixels.to_string(),
            "-dw".to_string(),
            spec.dwell_ms.to_string(),
        ];
        if let Some(z) = z {
            args.push("-z".to_string());
            args.push(z.to_string());
        }
        args
    }
}

#[async_trait]
impl AcquisitionBackend for ProcessAcquisition {
    async fn configure(
        &mut self,
        spec: &ScanSpec,
        _plan: &RasterPlan,
        z: Option<f64>,
    ) -> ScanResult<()> {
        // a stale stream from an earlier scan must not be decoded as this one
        match tokio::fs::remove_file(&self.settings.stream_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.args = Some(Self::scan_args(spec, z));
        self.cursor = Some(StreamCursor::new(spec.pixels as usize));
        self.deadline = spec.estimated_duration() * 2 + self.settings.deadline_margin;
        Ok(())
    }

    async fn start(&mut self) -> ScanResult<()> {
        let args = self.args.take().ok_or_else(|| {
            ScanError::Configuration("process backend was not configured".to_string())
        })?;
        info!(
            "spawning scanner {} {}",
            self.settings.program.display(),
            args.join(" ")
        );
        let mut child = Command::new(&self.settings.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("scanner: {line}");
                }
            });
        }
        self.child = Some(child);
        Ok(())
    }

    async fn wait(&mut self, progress: &watch::Sender<ScanProgress>) -> ScanResult<RawScan> {
        let mut child = self.child.take().ok_or_else(|| {
            ScanError::Configuration("process backend was not started".to_string())
        })?;
        let mut cursor = self.cursor.take().ok_or_else(|| {
            ScanError::Configuration("process backend was not configured".to_string())
        })?;

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = interval.tick() => {
                    let snapshot = cursor.poll_file(&self.settings.stream_path)?;
                    progress.send_replace(snapshot);
                    debug!(
                        "stream progress: {}/{} lines",
                        snapshot.decoded_lines,
                        snapshot
                            .expected_lines
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "?".to_string())
                    );
                }
                _ = &mut deadline => {
                    warn!("scanner exceeded its {:?} deadline, killing it", self.deadline);
                    let _ = child.start_kill();
                    return Err(ScanError::Timeout { waited: self.deadline });
                }
            }
        };

        // drain whatever arrived between the last tick and process exit
        let snapshot = cursor.poll_file(&self.settings.stream_path)?;
        progress.send_replace(snapshot);
        if !status.success() {
            warn!("scanner exited with {status}");
        } else {
            info!("scanner exited cleanly");
        }

        let rows = cursor.into_grid()?;
        Ok(RawScan::Grid(rows))
    }

    async fn teardown(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
        self.args = None;
        self.cursor = None;
    }
}
