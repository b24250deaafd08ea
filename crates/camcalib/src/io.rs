//! JSON pipeline configuration and the calibration record.

use camcalib_chessboard::ChessboardParams;
use camcalib_core::{
    CameraModel, DistortionCoeffs, IntrinsicMatrix, ModelError, PatternError, PatternSpec,
};
use camcalib_optim::{CalibrationFlags, CalibrationResult, PoseOptions};
use camcalib_render::{CylinderError, CylinderSpec, UndistortParams};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),
    #[error("invalid cylinder: {0}")]
    Cylinder(#[from] CylinderError),
    #[error("invalid camera model: {0}")]
    Model(#[from] ModelError),
    #[error("balance must lie in [0, 1], got {0}")]
    Balance(f64),
}

fn default_balance() -> f64 {
    UndistortParams::default().balance
}

/// Everything the calibrate, rectify and AR stages need besides frames.
///
/// Only `pattern` is required in the JSON file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pattern: PatternSpec,
    #[serde(default)]
    pub calib_flags: CalibrationFlags,
    #[serde(default)]
    pub detector: ChessboardParams,
    #[serde(default)]
    pub pose: PoseOptions,
    #[serde(default)]
    pub cylinder: CylinderSpec,
    #[serde(default = "default_balance")]
    pub balance: f64,
}

impl PipelineConfig {
    pub fn new(pattern: PatternSpec) -> Self {
        Self {
            pattern,
            calib_flags: CalibrationFlags::default(),
            detector: ChessboardParams::default(),
            pose: PoseOptions::default(),
            cylinder: CylinderSpec::default(),
            balance: default_balance(),
        }
    }

    pub fn validate(&self) -> Result<(), IoError> {
        self.pattern.validate()?;
        self.cylinder.validate()?;
        if !(0.0..=1.0).contains(&self.balance) {
            return Err(IoError::Balance(self.balance));
        }
        Ok(())
    }

    pub fn undistort_params(&self) -> UndistortParams {
        UndistortParams {
            balance: self.balance,
        }
    }

    /// Load and validate a JSON config.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// The artifact handed from calibration to the rectify and AR stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub rms: f64,
    /// `(width, height)` of the calibration frames.
    pub image_size: (usize, usize),
    pub intrinsics: IntrinsicMatrix,
    pub distortion: DistortionCoeffs,
}

impl CalibrationRecord {
    pub fn from_result(result: &CalibrationResult, image_size: (usize, usize)) -> Self {
        Self {
            rms: result.rms,
            image_size,
            intrinsics: result.model.intrinsics,
            distortion: result.model.distortion,
        }
    }

    pub fn model(&self) -> Result<CameraModel, ModelError> {
        CameraModel::new(self.intrinsics, self.distortion)
    }

    /// Load a record; the camera model it describes must be valid.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        let record: Self = serde_json::from_str(&raw)?;
        record.model()?;
        Ok(record)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
