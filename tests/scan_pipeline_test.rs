//! End-to-end pipeline tests against the mock device pair and, on unix, a
//! stand-in scanner process feeding the live stream decoder.

use qscope::acquisition::{Coordinator, HardwareAcquisition, ProcessAcquisition, SessionState};
use qscope::config::Settings;
use qscope::device::mock::{MockCounterTask, MockOutputTask, MockScanDevice, MockStage};
use qscope::device::StageControl;
use qscope::error::ScanError;
use qscope::frame::Orientation;
use qscope::plan::{ScanRegion, ScanSpec, ZSweep};
use qscope::scanfile::{self, ScanFileName};
use std::time::Duration;

fn spec(pixels: u32) -> ScanSpec {
    ScanSpec {
        region: ScanRegion {
            x_start: 1.0,
            y_start: 1.0,
            x_end: -1.0,
            y_end: -1.0,
        },
        pixels,
        dwell_ms: 1.0,
        z_sweep: None,
    }
}

fn mock_coordinator(
    settings: &Settings,
) -> Coordinator<HardwareAcquisition<MockOutputTask, MockCounterTask>> {
    let (output, counter) = MockScanDevice::new().into_tasks();
    let backend = HardwareAcquisition::new(output, counter, settings.hardware.clone());
    Coordinator::new(backend, settings.limits())
}

#[tokio::test]
async fn mock_hardware_scan_saves_a_parseable_file() {
    let settings = Settings::default();
    let mut coordinator = mock_coordinator(&settings);

    let frame = coordinator.scan(&spec(16)).await.unwrap();
    assert_eq!(coordinator.state(), SessionState::Completed);
    assert_eq!(frame.original().rows(), 16);

    let dir = tempfile::tempdir().unwrap();
    let path = scanfile::autosave(&frame, dir.path(), "scan").unwrap();
    let meta = ScanFileName::parse(path.file_name().unwrap().to_str().unwrap()).unwrap();
    assert_eq!(meta.step, 16);
    assert_eq!(meta.region, frame.spec.region);
    assert_eq!(scanfile::read_grid(&path).unwrap(), *frame.original());
}

#[tokio::test]
async fn transforms_on_an_acquired_frame_replay_and_reset() {
    let settings = Settings::default();
    let mut coordinator = mock_coordinator(&settings);
    let mut frame = coordinator.scan(&spec(8)).await.unwrap();

    let as_acquired = frame.original().clone();
    frame.apply(Orientation::RotateClockwise);
    frame.apply(Orientation::RotateClockwise);
    frame.apply(Orientation::RotateClockwise);
    frame.apply(Orientation::RotateClockwise);
    assert_eq!(frame.current(), as_acquired);

    frame.apply(Orientation::FlipHorizontal);
    assert_ne!(frame.current(), as_acquired);
    frame.reset();
    assert_eq!(frame.current(), as_acquired);
}

#[tokio::test]
async fn volumetric_scan_moves_stage_before_each_plane() {
    let settings = Settings::default();
    let mut coordinator = mock_coordinator(&settings);
    let mut stage = MockStage::new();

    let mut spec = spec(4);
    spec.z_sweep = Some(ZSweep {
        start: 0.0,
        increment: 0.5,
        stop: 1.0,
    });

    let mut seen = Vec::new();
    let frames = coordinator
        .scan_volume(&spec, &mut stage, Duration::from_secs(1), |frame| {
            seen.push(frame.z);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(stage.moves(), &[0.0, 0.5, 1.0]);
    assert_eq!(seen, vec![Some(0.0), Some(0.5), Some(1.0)]);
    assert_eq!(frames.len(), 3);
}

#[tokio::test]
async fn stage_failure_aborts_the_remaining_planes() {
    struct StickyStage {
        moves: usize,
    }

    #[async_trait::async_trait]
    impl StageControl for StickyStage {
        async fn move_to(&mut self, _position: f64, _timeout: Duration) -> anyhow::Result<()> {
            self.moves += 1;
            if self.moves >= 2 {
                anyhow::bail!("axis stalled");
            }
            Ok(())
        }
    }

    let settings = Settings::default();
    let mut coordinator = mock_coordinator(&settings);
    let mut stage = StickyStage { moves: 0 };

    let mut spec = spec(4);
    spec.z_sweep = Some(ZSweep {
        start: 0.0,
        increment: 1.0,
        stop: 3.0,
    });

    let mut completed = 0usize;
    let err = coordinator
        .scan_volume(&spec, &mut stage, Duration::from_secs(1), |_| {
            completed += 1;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Stage(_)));
    // the first plane completed, the stalled move stopped everything after it
    assert_eq!(completed, 1);
    assert_eq!(stage.moves, 2);
}

#[cfg(unix)]
mod process_mode {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Stand-in scanner: appends `lines` two-token rows to the stream with a
    /// short delay, then the completion sentinel, ignoring its arguments.
    fn write_producer_script(dir: &Path, stream: &Path, lines: usize, delay: &str) -> std::path::PathBuf {
        let path = dir.join("fake_scanner.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "#!/bin/sh\ni=0\nwhile [ $i -lt {lines} ]; do\n  a=$((i*2+1)); b=$((i*2+2))\n  echo \"0.000000 $a.000000 $b.000000\" >> \"{stream}\"\n  sleep {delay}\n  i=$((i+1))\ndone\necho \"2D Voltage Scan Completed.\" >> \"{stream}\"\n",
            stream = stream.display(),
        )
        .unwrap();
        let mut permissions = file.metadata().unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).unwrap();
        path
    }

    #[tokio::test]
    async fn live_stream_is_tailed_to_a_full_frame() {
        let dir = tempfile::tempdir().unwrap();
        let stream = dir.path().join("lua_output.txt");

        let mut settings = Settings::default();
        settings.scanner.program = write_producer_script(dir.path(), &stream, 8, "0.02");
        settings.scanner.stream_path = stream;
        settings.scanner.poll_interval = Duration::from_millis(20);

        let backend = ProcessAcquisition::new(settings.scanner.clone());
        let mut coordinator = Coordinator::new(backend, settings.limits());
        let progress_rx = coordinator.subscribe_progress();

        // 4x4 grid from 8 lines of 2 tokens each
        let frame = coordinator.scan(&spec(4)).await.unwrap();
        assert_eq!(coordinator.state(), SessionState::Completed);

        let grid = frame.original();
        for row in 0..4 {
            for col in 0..4 {
                assert_eq!(grid.value(row, col), (row * 4 + col + 1) as f64);
            }
        }
        let last = *progress_rx.borrow();
        assert_eq!(last.fraction, 1.0);
        assert_eq!(last.expected_lines, Some(8));
    }

    #[tokio::test]
    async fn hung_scanner_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let stream = dir.path().join("lua_output.txt");

        // producer that writes nothing and sleeps past any deadline
        let program = dir.path().join("hung_scanner.sh");
        std::fs::write(&program, "#!/bin/sh\nsleep 60\n").unwrap();
        let mut permissions = std::fs::metadata(&program).unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&program, permissions).unwrap();

        let mut settings = Settings::default();
        settings.scanner.program = program;
        settings.scanner.stream_path = stream;
        settings.scanner.poll_interval = Duration::from_millis(20);
        settings.scanner.deadline_margin = Duration::from_millis(200);

        let backend = ProcessAcquisition::new(settings.scanner.clone());
        let mut coordinator = Coordinator::new(backend, settings.limits());

        let mut spec = spec(2);
        spec.dwell_ms = 0.01; // keep the estimate, and with it the deadline, small
        let err = coordinator.scan(&spec).await.unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));
        assert_eq!(coordinator.state(), SessionState::TimedOut);
    }

    #[tokio::test]
    async fn inconsistent_stream_fails_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let stream = dir.path().join("lua_output.txt");

        // second line carries a different token count than the first
        let program = dir.path().join("bad_scanner.sh");
        std::fs::write(
            &program,
            format!(
                "#!/bin/sh\necho \"1.0 2.0\" >> \"{stream}\"\necho \"3.0 4.0 5.0\" >> \"{stream}\"\n",
                stream = stream.display()
            ),
        )
        .unwrap();
        let mut permissions = std::fs::metadata(&program).unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&program, permissions).unwrap();

        let mut settings = Settings::default();
        settings.scanner.program = program;
        settings.scanner.stream_path = stream;
        settings.scanner.poll_interval = Duration::from_millis(20);

        let backend = ProcessAcquisition::new(settings.scanner.clone());
        let mut coordinator = Coordinator::new(backend, settings.limits());

        let err = coordinator.scan(&spec(4)).await.unwrap_err();
        assert!(matches!(err, ScanError::Decode(_)));
        assert_eq!(coordinator.state(), SessionState::Failed);
    }
}
