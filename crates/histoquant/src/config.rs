use serde::{Deserialize, Serialize};

use crate::stain::StainMatrix;

/// Tunables for one extraction engine.
///
/// The defaults reproduce the constants the measurements were calibrated
/// against: a 100-unit spatial grid cell, a 50-pixel neighbor radius, and
/// the Ruifrok & Johnston H&E reference stain vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Edge length of one uniform-grid bucket, in image units.
    pub cell_size: f64,
    /// Hard radius for the neighbor count, in image units.
    pub neighbor_radius: f64,
    /// Reference stain matrix, rows = RGB optical-density vectors.
    pub stain_matrix: StainMatrix,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            cell_size: 100.0,
            neighbor_radius: 50.0,
            stain_matrix: StainMatrix::default(),
        }
    }
}
