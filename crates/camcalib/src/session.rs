//! Frame loops: selection, batch calibration, rectification and AR.
//!
//! Per-frame failures (no board, degenerate pose) never end a loop; the
//! frame is shown unmodified. Only [`CalibrationError::InsufficientData`]
//! aborts, and only the calibration phase.

use crate::frames::{Command, CommandSource, DisplaySink, FrameError, FrameSource};
use crate::io::{CalibrationRecord, PipelineConfig};
use camcalib_chessboard::{ChessboardDetection, ChessboardDetector, ChessboardParams, DetectError};
use camcalib_core::{CameraModel, CorrespondenceSet, PatternSpec, Pose, RgbImage};
use camcalib_optim::{
    CalibrationError, CalibrationResult, IntrinsicCalibrator, PoseEstimator, PoseOptions,
};
use camcalib_render::{
    build_and_project, draw_corners, ArGeometry, CylinderError, CylinderSpec, UndistortError,
    UndistortParams, UndistortionCache,
};
use log::{debug, info, warn};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Undistort(#[from] UndistortError),
    #[error(transparent)]
    Cylinder(#[from] CylinderError),
}

/// Detect the board in an RGB frame.
pub fn detect_board(
    frame: &RgbImage,
    pattern: &PatternSpec,
    detector: &ChessboardDetector,
) -> Result<ChessboardDetection, DetectError> {
    let gray = frame.to_gray();
    detector.detect(&gray.view(), pattern)
}

/// Copy of `frame` with the detection drawn on it: the ordered corners when
/// the board was found, the raw saddle candidates otherwise.
pub fn detection_preview(
    frame: &RgbImage,
    pattern: &PatternSpec,
    detector: &ChessboardDetector,
) -> (RgbImage, Option<ChessboardDetection>) {
    let gray = frame.to_gray();
    let mut out = frame.clone();
    match detector.detect(&gray.view(), pattern) {
        Ok(det) => {
            draw_corners(&mut out, &det.image_points(), pattern.cols as usize, true);
            (out, Some(det))
        }
        Err(err) => {
            debug!("no board: {err}");
            let raw: Vec<_> = detector
                .detect_corners(&gray.view())
                .iter()
                .map(|c| c.position_f64())
                .collect();
            draw_corners(&mut out, &raw, pattern.cols as usize, false);
            (out, None)
        }
    }
}

/// Run through `source`, showing every frame with a `NSelect: n` counter,
/// and keep the frames for which a [`Command::SelectFrame`] arrives.
pub fn select_frames(
    source: &mut impl FrameSource,
    commands: &mut impl CommandSource,
    display: &mut impl DisplaySink,
) -> Result<Vec<RgbImage>, FrameError> {
    let mut selected = Vec::new();
    let mut index = 0;
    while let Some(frame) = source.next_frame()? {
        display.show(&frame, Some(&format!("NSelect: {}", selected.len())));
        let cmds = commands.poll(index);
        if cmds.contains(&Command::SelectFrame) {
            selected.push(frame);
        }
        index += 1;
        if cmds.contains(&Command::Stop) {
            break;
        }
    }
    info!("selected {} of {index} frames", selected.len());
    Ok(selected)
}

/// Calibration plus the bookkeeping needed to write a record.
#[derive(Clone, Debug)]
pub struct CalibrationOutcome {
    pub result: CalibrationResult,
    pub image_size: (usize, usize),
    /// Indices of the input frames that contributed a view.
    pub used_frames: Vec<usize>,
}

impl CalibrationOutcome {
    pub fn record(&self) -> CalibrationRecord {
        CalibrationRecord::from_result(&self.result, self.image_size)
    }
}

/// Detect the board in every frame and calibrate from the complete views.
///
/// The calibration image size is the most common frame size, ties going to
/// the size seen first. Frames without a complete board, or of another
/// size, are skipped with a warning.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all, fields(frames = frames.len())))]
pub fn calibrate_frames(
    frames: &[RgbImage],
    config: &PipelineConfig,
) -> Result<CalibrationOutcome, SessionError> {
    let Some(image_size) = dominant_size(frames) else {
        return Err(CalibrationError::InsufficientData.into());
    };
    let detector = ChessboardDetector::new(config.detector.clone());

    let mut sets: Vec<CorrespondenceSet> = Vec::with_capacity(frames.len());
    let mut used_frames = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        if (frame.width, frame.height) != image_size {
            warn!(
                "frame {i}: size {}x{} differs from {}x{}, skipped",
                frame.width, frame.height, image_size.0, image_size.1
            );
            continue;
        }
        let detection = match detect_board(frame, &config.pattern, &detector) {
            Ok(det) => det,
            Err(err) => {
                warn!("frame {i}: {err}, skipped");
                continue;
            }
        };
        match CorrespondenceSet::from_pattern(&config.pattern, detection.image_points()) {
            Ok(set) => {
                sets.push(set);
                used_frames.push(i);
            }
            Err(err) => warn!("frame {i}: {err}, skipped"),
        }
    }
    info!("{} of {} frames have a complete board", sets.len(), frames.len());

    let calibrator = IntrinsicCalibrator::new(config.calib_flags.clone());
    let result = calibrator.calibrate(&sets, image_size)?;
    Ok(CalibrationOutcome {
        result,
        image_size,
        used_frames,
    })
}

/// Most frequent `(width, height)`; the earliest wins a tie.
fn dominant_size(frames: &[RgbImage]) -> Option<(usize, usize)> {
    let mut counts: Vec<((usize, usize), usize)> = Vec::new();
    for frame in frames {
        let size = (frame.width, frame.height);
        match counts.iter_mut().find(|(s, _)| *s == size) {
            Some((_, n)) => *n += 1,
            None => counts.push((size, 1)),
        }
    }
    counts
        .iter()
        .fold(None, |best: Option<((usize, usize), usize)>, &(size, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((size, n)),
        })
        .map(|(size, _)| size)
}

/// Rectification loop state: the camera model, the memoised map and the
/// on/off switch.
#[derive(Debug)]
pub struct RectifySession {
    model: CameraModel,
    params: UndistortParams,
    cache: UndistortionCache,
    rectify: bool,
}

impl RectifySession {
    /// Starts with rectification on.
    pub fn new(model: CameraModel, params: UndistortParams) -> Self {
        Self {
            model,
            params,
            cache: UndistortionCache::new(),
            rectify: true,
        }
    }

    pub fn model(&self) -> &CameraModel {
        &self.model
    }

    pub fn is_rectifying(&self) -> bool {
        self.rectify
    }

    pub fn toggle(&mut self) {
        self.rectify = !self.rectify;
        debug!("rectification {}", if self.rectify { "on" } else { "off" });
    }

    /// Number of undistortion maps built so far.
    pub fn map_builds(&self) -> usize {
        self.cache.builds()
    }

    /// The frame to show and its overlay label.
    pub fn process_frame(
        &mut self,
        frame: &RgbImage,
    ) -> Result<(RgbImage, &'static str), UndistortError> {
        if !self.rectify {
            return Ok((frame.clone(), "Original"));
        }
        let map = self
            .cache
            .get_or_build(&self.model, (frame.width, frame.height), &self.params)?;
        Ok((map.remap_rgb(frame), "Rectified"))
    }

    /// Run the loop to the end of `source` or a [`Command::Stop`]; returns
    /// the number of frames shown.
    pub fn run(
        &mut self,
        source: &mut impl FrameSource,
        commands: &mut impl CommandSource,
        display: &mut impl DisplaySink,
    ) -> Result<usize, SessionError> {
        let mut index = 0;
        while let Some(frame) = source.next_frame()? {
            let mut stop = false;
            for cmd in commands.poll(index) {
                match cmd {
                    Command::ToggleRectify => self.toggle(),
                    Command::Stop => stop = true,
                    Command::SelectFrame => {}
                }
            }
            let (out, label) = self.process_frame(&frame)?;
            display.show(&out, Some(label));
            index += 1;
            if stop {
                break;
            }
        }
        Ok(index)
    }
}

/// Result of one AR frame.
#[derive(Clone, Debug)]
pub struct ArFrame {
    pub frame: RgbImage,
    pub pose: Option<Pose>,
    pub geometry: Option<ArGeometry>,
    /// `XYZ: [x y z]` camera position in board coordinates.
    pub overlay: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArStats {
    pub frames: usize,
    pub augmented: usize,
}

/// Per-frame pose estimation and cylinder rendering.
pub struct ArSession {
    model: CameraModel,
    pattern: PatternSpec,
    detector: ChessboardDetector,
    estimator: PoseEstimator,
    cylinder: CylinderSpec,
}

impl ArSession {
    pub fn new(
        model: CameraModel,
        pattern: PatternSpec,
        detector: ChessboardParams,
        pose: PoseOptions,
        cylinder: CylinderSpec,
    ) -> Result<Self, CylinderError> {
        cylinder.validate()?;
        Ok(Self {
            model,
            pattern,
            detector: ChessboardDetector::new(detector),
            estimator: PoseEstimator::new(pose),
            cylinder,
        })
    }

    pub fn from_config(model: CameraModel, config: &PipelineConfig) -> Result<Self, CylinderError> {
        Self::new(
            model,
            config.pattern,
            config.detector.clone(),
            config.pose.clone(),
            config.cylinder,
        )
    }

    /// Board pose in this frame, if the board is found and the pose is
    /// well conditioned.
    pub fn estimate_pose(&self, frame: &RgbImage) -> Option<Pose> {
        let detection = match detect_board(frame, &self.pattern, &self.detector) {
            Ok(det) => det,
            Err(err) => {
                debug!("no board: {err}");
                return None;
            }
        };
        let set = CorrespondenceSet::from_pattern(&self.pattern, detection.image_points()).ok()?;
        match self.estimator.estimate(&set, &self.model) {
            Ok(est) => Some(est.pose),
            Err(err) => {
                debug!("no pose: {err}");
                None
            }
        }
    }

    /// Draw the cylinder when a pose is available; otherwise the frame
    /// passes through untouched.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = frame.width, height = frame.height))
    )]
    pub fn process_frame(&self, frame: &RgbImage) -> ArFrame {
        let mut out = ArFrame {
            frame: frame.clone(),
            pose: None,
            geometry: None,
            overlay: None,
        };
        let Some(pose) = self.estimate_pose(frame) else {
            return out;
        };
        let geometry =
            match build_and_project(&pose, &self.model, &self.cylinder, self.pattern.cell_size) {
                Ok(geo) => geo,
                Err(err) => {
                    warn!("cylinder not drawn: {err}");
                    return out;
                }
            };
        geometry.draw(&mut out.frame);
        let c = pose.camera_center();
        out.overlay = Some(format!("XYZ: [{:.3} {:.3} {:.3}]", c.x, c.y, c.z));
        out.pose = Some(pose);
        out.geometry = Some(geometry);
        out
    }

    pub fn run(
        &self,
        source: &mut impl FrameSource,
        commands: &mut impl CommandSource,
        display: &mut impl DisplaySink,
    ) -> Result<ArStats, FrameError> {
        let mut stats = ArStats::default();
        while let Some(frame) = source.next_frame()? {
            let stop = commands.poll(stats.frames).contains(&Command::Stop);
            let ar = self.process_frame(&frame);
            if ar.pose.is_some() {
                stats.augmented += 1;
            }
            display.show(&ar.frame, ar.overlay.as_deref());
            stats.frames += 1;
            if stop {
                break;
            }
        }
        info!("augmented {} of {} frames", stats.augmented, stats.frames);
        Ok(stats)
    }
}
