//! Acquisition session lifecycle.
//!
//! The [`Coordinator`] owns a scan session from configuration to teardown
//! and drives one of two interchangeable backends behind
//! [`AcquisitionBackend`]: direct hardware (synchronized output + counter
//! tasks) or an external scan process reporting through a text stream. The
//! state machine is:
//!
//! ```text
//! Idle -> Configuring -> Armed -> Running -> Draining
//!      -> { Completed, Failed, TimedOut }
//! ```
//!
//! Sessions are single-shot: nothing is retried, a failed or timed-out
//! session tears its channels down, and a new request while one is active
//! is rejected. For volumetric scans the coordinator runs one session per
//! z-plane in sequence, moving the stage before arming each plane; the
//! first failing plane aborts the remainder so an incomplete volume is
//! never silently produced.

pub mod hardware;
pub mod process;

use crate::device::StageControl;
use crate::error::{ScanError, ScanResult};
use crate::frame::{assemble_counts, Frame, Grid};
use crate::plan::{HardwareLimits, RasterPlan, ScanSpec};
use crate::stream::ScanProgress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

pub use hardware::HardwareAcquisition;
pub use process::ProcessAcquisition;

/// Lifecycle state of an acquisition session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No session has run yet, or the last one finished
    Idle,
    /// Channels are being claimed and programmed
    Configuring,
    /// Both tasks armed on the shared trigger, not yet started
    Armed,
    /// Acquisition in flight
    Running,
    /// Data obtained, assembling the frame
    Draining,
    /// Session produced a complete frame
    Completed,
    /// Session failed (device fault or malformed data)
    Failed,
    /// Session exceeded its deadline
    TimedOut,
}

impl SessionState {
    /// True while a session holds the hardware or the external process.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Configuring
                | SessionState::Armed
                | SessionState::Running
                | SessionState::Draining
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Configuring => "configuring",
            SessionState::Armed => "armed",
            SessionState::Running => "running",
            SessionState::Draining => "draining",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// Raw acquisition output before frame assembly.
#[derive(Clone, Debug)]
pub enum RawScan {
    /// Cumulative counter samples from the hardware backend
    Counts(Vec<u32>),
    /// Decoded row grid from the process backend
    Grid(Vec<Vec<f64>>),
}

/// Transient record of one in-flight session.
#[derive(Clone, Debug)]
pub struct AcquisitionSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub z: Option<f64>,
}

/// One acquisition strategy: hardware-driven or process-driven.
///
/// The coordinator calls `configure`, `start`, `wait` in order and
/// `teardown` unconditionally afterwards.
#[async_trait]
pub trait AcquisitionBackend: Send {
    /// Claim and program resources for the session. No acquisition starts.
    async fn configure(
        &mut self,
        spec: &ScanSpec,
        plan: &RasterPlan,
        z: Option<f64>,
    ) -> ScanResult<()>;

    /// Begin acquisition on the shared start edge.
    async fn start(&mut self) -> ScanResult<()>;

    /// Block until the session's data is complete, publishing progress
    /// snapshots along the way.
    async fn wait(&mut self, progress: &watch::Sender<ScanProgress>) -> ScanResult<RawScan>;

    /// Release resources. Called on every exit path.
    async fn teardown(&mut self);
}

/// Owns the session lifecycle for one output/input channel pair.
pub struct Coordinator<B> {
    backend: B,
    limits: HardwareLimits,
    state: SessionState,
    session: Option<AcquisitionSession>,
    progress_tx: watch::Sender<ScanProgress>,
}

impl<B: AcquisitionBackend> Coordinator<B> {
    pub fn new(backend: B, limits: HardwareLimits) -> Self {
        let (progress_tx, _) = watch::channel(ScanProgress::default());
        Self {
            backend,
            limits,
            state: SessionState::Idle,
            session: None,
            progress_tx,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The in-flight session, if any.
    pub fn session(&self) -> Option<&AcquisitionSession> {
        self.session.as_ref()
    }

    /// Subscribe to progress snapshots for the current and future sessions.
    pub fn subscribe_progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Run a single-plane scan session to completion.
    pub async fn scan(&mut self, spec: &ScanSpec) -> ScanResult<Frame> {
        self.scan_plane(spec, None).await
    }

    /// Run one scan session, optionally tagged with a z-plane position.
    pub async fn scan_plane(&mut self, spec: &ScanSpec, z: Option<f64>) -> ScanResult<Frame> {
        if self.state.is_active() {
            return Err(ScanError::SessionBusy);
        }
        // geometry and timing are rejected before any hardware action
        let plan = RasterPlan::compute(spec, &self.limits)?;

        let session = AcquisitionSession {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            z,
        };
        info!(
            "session {}: {}x{} px at {:.1} Hz sample clock ({} settling samples/line){}",
            session.id,
            plan.pixels,
            plan.pixels,
            plan.sample_rate_hz,
            plan.settling_samples,
            z.map(|z| format!(", z = {z}")).unwrap_or_default()
        );
        self.session = Some(session);
        self.progress_tx.send_replace(ScanProgress::default());

        let driven = self.drive(spec, &plan, z).await;
        self.backend.teardown().await;
        self.session = None;

        let raw = match driven {
            Ok(raw) => raw,
            Err(e) => {
                self.set_state(match e {
                    ScanError::Timeout { .. } => SessionState::TimedOut,
                    _ => SessionState::Failed,
                });
                error!("scan session aborted: {e}");
                return Err(e);
            }
        };

        let assembled = match raw {
            RawScan::Counts(samples) => assemble_counts(&plan, &samples),
            RawScan::Grid(rows) => Grid::from_rows(rows),
        };
        match assembled {
            Ok(grid) => {
                self.set_state(SessionState::Completed);
                info!("scan session completed: {}x{} frame", grid.rows(), grid.cols());
                Ok(Frame::new(spec.clone(), z, grid))
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                error!("frame assembly failed: {e}");
                Err(e)
            }
        }
    }

    /// Run one session per z-plane, in sweep order.
    ///
    /// The stage move always completes before the plane is armed; a plane
    /// failure aborts the remaining sequence. `on_frame` runs after each
    /// completed plane, before the next stage move (persistence hook).
    pub async fn scan_volume<S, F>(
        &mut self,
        spec: &ScanSpec,
        stage: &mut S,
        stage_timeout: Duration,
        mut on_frame: F,
    ) -> ScanResult<Vec<Frame>>
    where
        S: StageControl,
        F: FnMut(&Frame) -> ScanResult<()> + Send,
    {
        let sweep = spec.z_sweep.ok_or_else(|| {
            ScanError::Configuration("volumetric scan requires a z sweep".to_string())
        })?;
        sweep.validate()?;

        let mut frames = Vec::new();
        for z in sweep.positions() {
            info!("moving stage to z = {z}");
            stage
                .move_to(z, stage_timeout)
                .await
                .map_err(|e| ScanError::Stage(e.to_string()))?;
            let frame = self.scan_plane(spec, Some(z)).await?;
            on_frame(&frame)?;
            frames.push(frame);
        }
        Ok(frames)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("session state: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    async fn drive(
        &mut self,
        spec: &ScanSpec,
        plan: &RasterPlan,
        z: Option<f64>,
    ) -> ScanResult<RawScan> {
        self.set_state(SessionState::Configuring);
        self.backend.configure(spec, plan, z).await?;
        self.set_state(SessionState::Armed);
        self.backend.start().await?;
        self.set_state(SessionState::Running);
        let raw = self.backend.wait(&self.progress_tx).await?;
        self.set_state(SessionState::Draining);
        Ok(raw)
    }
}
