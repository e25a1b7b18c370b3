//! # Histoquant
//!
//! Per-region feature extraction for H&E-stained histopathology images.
//! Given an image and its already-delineated regions (vessels, nuclei,
//! cytoplasm, cells), the engine produces one fixed 47-scalar feature
//! vector per region, combining shape descriptors, intensity statistics,
//! stain-channel statistics, and spatial-relationship measurements.
//!
//! ## Core Components
//!
//! - **Stain separation**: per-pixel optical-density deconvolution of the
//!   RGB image into hematoxylin, eosin, and residual channels
//! - **Spatial index**: uniform-grid nearest-vessel and neighbor queries
//!   over region centroids
//! - **Region statistics**: geometric and intensity descriptors per region
//! - **Extraction engine**: per-image orchestration with a write-once
//!   feature cache and parallel region fan-out
//!
//! ## Quick Start
//!
//! ```rust
//! use histoquant::{
//!     Boundary, ExtractionConfig, FeatureExtractionEngine, Region, RegionKind, RegionSet,
//! };
//! use image::{DynamicImage, RgbImage};
//!
//! let engine = FeatureExtractionEngine::new(ExtractionConfig::default())?;
//!
//! let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, image::Rgb([230, 180, 200])));
//! let regions = RegionSet {
//!     nuclei: vec![Region::new(
//!         "nucleus_1",
//!         RegionKind::Nucleus,
//!         Boundary::Polygon(vec![[10.0, 10.0], [20.0, 10.0], [20.0, 20.0], [10.0, 20.0]]),
//!     )],
//!     ..Default::default()
//! };
//!
//! let extraction = engine.extract("slide_01", &image, &regions);
//! assert_eq!(extraction.features.len(), 1);
//! # Ok::<(), histoquant::FeatureError>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod spatial;
pub mod stain;
pub mod stats;
pub mod types;

// Re-exports for convenience
pub use config::ExtractionConfig;
pub use engine::{Extraction, FeatureCache, FeatureExtractionEngine, RegionSet};
pub use error::{FeatureError, RegionFailure, Result};
pub use features::{Feature, FeatureVector, SpatialFeatures, FEATURE_COUNT, FEATURE_NAMES};
pub use spatial::{SpatialEntry, SpatialGrid};
pub use stain::{StainMatrix, StainSeparator};
pub use stats::{measure_intensity, measure_region, IntensityStats, RegionDescriptors};
pub use types::{Boundary, PixelMask, Region, RegionKey, RegionKind, StainChannelSet};
