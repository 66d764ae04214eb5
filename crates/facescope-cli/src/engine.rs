use crate::config::Config;
use facescope_core::{FacePipeline, FrameReport, RunningGaussian, ScrfdDetector, ScrfdOptions};
use facescope_hw::{Camera, CaptureRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] facescope_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] facescope_core::detector::DetectorError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread panicked")]
    Panicked,
}

/// Latest completed frame, or `None` before the first one.
pub type LatestReport = Option<Arc<FrameReport>>;

/// Build a pipeline from config. A missing or broken detector model is fatal.
pub fn build_pipeline(config: &Config) -> Result<FacePipeline, EngineError> {
    let detector: Option<Box<dyn facescope_core::FaceDetector>> = if config.detector_enabled {
        let path = config.scrfd_model_path();
        let options = ScrfdOptions {
            confidence_threshold: config.confidence_threshold,
            ..Default::default()
        };
        let detector = ScrfdDetector::load(&path, options)?;
        tracing::info!(path = %path.display(), "SCRFD detector loaded");
        Some(Box::new(detector))
    } else {
        tracing::info!("face detection disabled; running background analysis only");
        None
    };

    Ok(FacePipeline::new(
        config.pipeline_options(),
        Box::new(RunningGaussian::new()),
        detector,
    ))
}

/// Handle to the running capture thread.
pub struct EngineHandle {
    reports: watch::Receiver<LatestReport>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<Result<u64, EngineError>>>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl EngineHandle {
    /// Receiver that always holds the newest report.
    pub fn subscribe(&self) -> watch::Receiver<LatestReport> {
        self.reports.clone()
    }

    /// Raise the stop flag and wait for the capture thread to finish.
    /// Returns the number of frames captured.
    pub async fn shutdown(mut self) -> Result<u64, EngineError> {
        self.stop.store(true, Ordering::Relaxed);
        let Some(thread) = self.thread.take() else {
            return Ok(0);
        };
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|_| EngineError::Panicked)?
            .map_err(|_| EngineError::Panicked)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera and builds the pipeline synchronously (fail-fast), then
/// streams frames: each one runs through the pipeline to completion before
/// its capture buffer is recycled, and the resulting report replaces the
/// previous one in the watch channel.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let request = CaptureRequest {
        width: config.capture_width,
        height: config.capture_height,
    };
    let camera = Camera::open(&config.camera_device, request)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let mut pipeline = build_pipeline(config)?;
    let (tx, rx) = watch::channel::<LatestReport>(None);
    let stop = Arc::new(AtomicBool::new(false));
    let (frame_width, frame_height) = (camera.width, camera.height);

    let thread_stop = Arc::clone(&stop);
    let thread = std::thread::Builder::new()
        .name("facescope-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = camera.stream(&thread_stop, |frame| {
                match pipeline.process_frame(frame.data, frame.width, frame.height) {
                    Ok(report) => {
                        tx.send_replace(Some(Arc::new(report)));
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(seq = frame.sequence, error = %e, "frame skipped");
                    }
                    Err(e) => {
                        tracing::error!(seq = frame.sequence, error = %e, "frame failed");
                    }
                }
                // Keep streaming while anyone is listening.
                !tx.is_closed()
            });

            let stats = pipeline.stats();
            tracing::info!(
                processed = stats.frames_processed,
                skipped = stats.frames_skipped,
                faces = stats.faces_found,
                detector_errors = stats.detector_errors,
                reallocations = stats.reallocations,
                "engine thread exiting"
            );
            result.map_err(EngineError::from)
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        reports: rx,
        stop,
        thread: Some(thread),
        frame_width,
        frame_height,
    })
}
