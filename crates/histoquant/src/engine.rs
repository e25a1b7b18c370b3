use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, GrayImage};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ExtractionConfig;
use crate::error::{RegionFailure, Result};
use crate::features::{FeatureVector, SpatialFeatures, FEATURE_COUNT, FEATURE_NAMES};
use crate::spatial::SpatialGrid;
use crate::stain::StainSeparator;
use crate::stats::{self, IntensityStats};
use crate::types::{Region, RegionKey, RegionKind, StainChannelSet};

/// The four region collections of one image, as delivered by segmentation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionSet {
    pub vessels: Vec<Region>,
    pub nuclei: Vec<Region>,
    pub cytoplasm: Vec<Region>,
    pub cells: Vec<Region>,
}

impl RegionSet {
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.nuclei
            .iter()
            .chain(self.cytoplasm.iter())
            .chain(self.cells.iter())
            .chain(self.vessels.iter())
    }

    pub fn len(&self) -> usize {
        self.vessels.len() + self.nuclei.len() + self.cytoplasm.len() + self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write-once feature store keyed by `(image, region)`.
///
/// Values are inserted as fully-built `Arc`s, so a reader sees either no
/// entry or a complete vector, never a partial one.
#[derive(Debug, Default)]
pub struct FeatureCache {
    map: RwLock<HashMap<RegionKey, Arc<FeatureVector>>>,
}

impl FeatureCache {
    pub fn get(&self, key: &RegionKey) -> Option<Arc<FeatureVector>> {
        self.map.read().get(key).cloned()
    }

    /// Insert unless present; the first writer wins and later callers get
    /// the stored value.
    pub fn insert_if_absent(&self, key: RegionKey, vector: FeatureVector) -> Arc<FeatureVector> {
        self.map
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(vector))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }
}

/// Result of one extraction pass: the feature table plus the regions that
/// had to be skipped, with their reasons.
#[derive(Debug, Default)]
pub struct Extraction {
    pub features: HashMap<RegionKey, Arc<FeatureVector>>,
    pub failures: Vec<RegionFailure>,
}

/// Per-image spatial indexes, immutable once built.
#[derive(Debug)]
struct GridSet {
    vessels: SpatialGrid,
    nuclei: SpatialGrid,
    cells: SpatialGrid,
}

impl GridSet {
    fn build(regions: &RegionSet, cell_size: f64) -> Self {
        Self {
            vessels: SpatialGrid::from_regions(&regions.vessels, cell_size),
            // Nucleus centroids only; cytoplasm regions query this index and
            // are matched to nuclei through the shared instance id.
            nuclei: SpatialGrid::from_regions(&regions.nuclei, cell_size),
            cells: SpatialGrid::from_regions(&regions.cells, cell_size),
        }
    }

    fn for_kind(&self, kind: RegionKind) -> &SpatialGrid {
        match kind {
            RegionKind::Nucleus | RegionKind::Cytoplasm => &self.nuclei,
            RegionKind::Cell => &self.cells,
            RegionKind::Vessel => &self.vessels,
        }
    }
}

/// Orchestrates feature extraction for whole images: one stain separation
/// and one set of spatial indexes per image, then a parallel per-region
/// pass combining spatial, geometric, intensity, and stain features into
/// cached vectors.
pub struct FeatureExtractionEngine {
    config: ExtractionConfig,
    separator: StainSeparator,
    cache: FeatureCache,
    channels: RwLock<Option<Arc<StainChannelSet>>>,
    grids: RwLock<Option<Arc<GridSet>>>,
    computed: AtomicUsize,
}

impl FeatureExtractionEngine {
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        let separator = StainSeparator::new(config.stain_matrix)?;
        Ok(Self {
            config,
            separator,
            cache: FeatureCache::default(),
            channels: RwLock::new(None),
            grids: RwLock::new(None),
            computed: AtomicUsize::new(0),
        })
    }

    /// Extract one feature vector per region of `image`.
    ///
    /// Regions already cached under `(image_id, name)` are reused without
    /// recomputation. A region that cannot be computed is skipped and
    /// reported in `failures`; the batch never aborts.
    pub fn extract(
        &self,
        image_id: &str,
        image: &DynamicImage,
        regions: &RegionSet,
    ) -> Extraction {
        let started = Instant::now();
        let channels = Arc::new(self.separator.separate(image));
        *self.channels.write() = Some(channels.clone());
        let gray = image.to_luma8();
        let grids = Arc::new(GridSet::build(regions, self.config.cell_size));
        *self.grids.write() = Some(grids.clone());
        debug!(
            image_id,
            vessels = regions.vessels.len(),
            nuclei = regions.nuclei.len(),
            cytoplasm = regions.cytoplasm.len(),
            cells = regions.cells.len(),
            separated = channels.separated,
            "extraction setup complete"
        );

        let work: Vec<&Region> = regions.iter().collect();
        let results: Vec<(RegionKey, Result<Arc<FeatureVector>>)> = work
            .par_iter()
            .map(|region| {
                let key = RegionKey::new(image_id, region.name.clone());
                if let Some(hit) = self.cache.get(&key) {
                    return (key, Ok(hit));
                }
                match self.compute_vector(region, &gray, &channels, &grids) {
                    Ok(vector) => {
                        self.computed.fetch_add(1, Ordering::Relaxed);
                        let stored = self.cache.insert_if_absent(key.clone(), vector);
                        (key, Ok(stored))
                    }
                    Err(error) => (key, Err(error)),
                }
            })
            .collect();

        let mut extraction = Extraction::default();
        for (key, result) in results {
            match result {
                Ok(vector) => {
                    extraction.features.insert(key, vector);
                }
                Err(error) => {
                    debug!(key = %key, %error, "skipping region");
                    extraction.failures.push(RegionFailure { key, error });
                }
            }
        }
        info!(
            image_id,
            regions = extraction.features.len(),
            skipped = extraction.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "feature extraction complete"
        );
        extraction
    }

    fn compute_vector(
        &self,
        region: &Region,
        gray: &GrayImage,
        channels: &StainChannelSet,
        grids: &GridSet,
    ) -> Result<FeatureVector> {
        let spatial = self.spatial_features(region, grids);
        let shape = stats::measure_region(region, gray)?;
        let (hema, eosin) = if channels.separated {
            (
                stats::measure_intensity(region, &channels.hematoxylin),
                stats::measure_intensity(region, &channels.eosin),
            )
        } else {
            (IntensityStats::ZERO, IntensityStats::ZERO)
        };
        Ok(FeatureVector::assemble(
            &spatial,
            &shape,
            &hema,
            &eosin,
            region.ignored,
        ))
    }

    fn spatial_features(&self, region: &Region, grids: &GridSet) -> SpatialFeatures {
        let (x, y) = (region.center_x(), region.center_y());

        let (vessel_distance, closest_vessel) =
            match grids.vessels.nearest_reference(x, y, &region.name) {
                Some((distance, entry)) => (distance, Some(entry.id.clone())),
                None => (-1.0, None),
            };

        let summary =
            grids
                .for_kind(region.kind)
                .neighborhood(x, y, self.config.neighbor_radius, &region.name);
        let (closest_neighbor_distance, closest_neighbor) = match summary.nearest {
            Some((distance, id)) => (distance, Some(id)),
            None => (-1.0, None),
        };

        SpatialFeatures {
            vessel_distance,
            closest_vessel,
            neighbor_count: summary.count as f64,
            closest_neighbor_distance,
            closest_neighbor,
        }
    }

    /// The stable feature schema, for consistent column ordering across
    /// runs and tools.
    pub fn feature_names() -> &'static [&'static str; FEATURE_COUNT] {
        &FEATURE_NAMES
    }

    /// Whether the most recent image was RGB-compatible for separation.
    pub fn is_stain_separation_available(&self) -> bool {
        self.channels
            .read()
            .as_ref()
            .map_or(false, |c| c.separated)
    }

    /// Derived stain channels of the most recent image.
    pub fn stain_channels(&self) -> Option<Arc<StainChannelSet>> {
        self.channels.read().clone()
    }

    pub fn hematoxylin(&self) -> Option<GrayImage> {
        self.channels.read().as_ref().map(|c| c.hematoxylin.clone())
    }

    pub fn eosin(&self) -> Option<GrayImage> {
        self.channels.read().as_ref().map(|c| c.eosin.clone())
    }

    /// Spatial features of one region against the most recently built
    /// indexes, for inspection and debugging.
    pub fn spatial_summary(&self, region: &Region) -> Option<SpatialFeatures> {
        let grids = self.grids.read().clone()?;
        Some(self.spatial_features(region, &grids))
    }

    /// Distance and identity of the closest vessel to `region`, if any.
    pub fn closest_vessel_of(&self, region: &Region) -> Option<(f64, String)> {
        let grids = self.grids.read().clone()?;
        grids
            .vessels
            .nearest_reference(region.center_x(), region.center_y(), &region.name)
            .map(|(distance, entry)| (distance, entry.id.clone()))
    }

    /// Number of vectors computed (cache misses) over the engine lifetime.
    pub fn computed_count(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop all cached vectors, e.g. between sessions.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
