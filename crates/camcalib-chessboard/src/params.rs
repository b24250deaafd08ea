use chess_corners::{ChessConfig, RefinementMethod, ThresholdMode};
use serde::{Deserialize, Serialize};

/// ChESS candidate detection, run through `chess-corners`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CornerParams {
    /// Threshold as a fraction of the strongest response in the frame.
    pub threshold_rel: f32,
    /// Non-maximum suppression radius (in pixels).
    pub nms_radius: u32,
    /// Minimum count of positive-response pixels in the NMS window.
    pub min_cluster_size: u32,
    /// Sub-pixel refiner applied to every candidate.
    pub refiner: RefinementMethod,
    /// Candidates closer than this (pixels) collapse into the strongest.
    pub merge_radius: f32,
}

impl Default for CornerParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            min_cluster_size: 2,
            refiner: RefinementMethod::SaddlePoint,
            merge_radius: 3.0,
        }
    }
}

impl CornerParams {
    /// Single-scale `chess-corners` configuration for these parameters.
    pub fn chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.threshold_mode = ThresholdMode::Relative;
        cfg.threshold_value = self.threshold_rel;
        cfg.nms_radius = self.nms_radius;
        cfg.min_cluster_size = self.min_cluster_size;
        cfg.refiner.kind = self.refiner;
        cfg
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
    /// Accepted edge length as a multiple of the median nearest-neighbour
    /// distance: `[lo, hi]`.
    pub spacing_window: [f32; 2],
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 400.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
            spacing_window: [0.5, 2.2],
        }
    }
}

/// Parameters for the chessboard extractor.
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    pub corners: CornerParams,
    pub grid: GridGraphParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_params_map_onto_chess_config() {
        let params = CornerParams {
            threshold_rel: 0.1,
            nms_radius: 3,
            min_cluster_size: 4,
            refiner: RefinementMethod::Forstner,
            merge_radius: 2.0,
        };
        let cfg = params.chess_config();
        assert_eq!(cfg.threshold_mode, ThresholdMode::Relative);
        assert_eq!(cfg.threshold_value, 0.1);
        assert_eq!(cfg.nms_radius, 3);
        assert_eq!(cfg.min_cluster_size, 4);
        assert_eq!(cfg.refiner.kind, RefinementMethod::Forstner);
        assert_eq!(cfg.pyramid_levels, 1);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let params: ChessboardParams =
            serde_json::from_str(r#"{"corners": {"refiner": "forstner"}}"#).unwrap();
        assert_eq!(params.corners.refiner, RefinementMethod::Forstner);
        assert_eq!(params.corners.nms_radius, 2);
        assert_eq!(params.grid, GridGraphParams::default());
    }
}
