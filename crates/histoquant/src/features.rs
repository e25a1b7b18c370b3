use serde::ser::{Serialize, SerializeMap, Serializer};
use strum::EnumIter;

use crate::stats::{IntensityStats, RegionDescriptors};

/// Number of scalar features per region. The ordered names are a public
/// contract consumed by export and reporting.
pub const FEATURE_COUNT: usize = 47;

/// Feature names in schema order.
pub static FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // spatial
    "vessel_distance",
    "neighbor_count",
    "closest_neighbor_distance",
    // basic geometry
    "area",
    "x",
    "y",
    "xm",
    "ym",
    "perim",
    "bx",
    "by",
    "width",
    "height",
    // shape
    "major",
    "minor",
    "angle",
    "circ",
    "feret",
    "feretangle",
    "minferet",
    "ar",
    "round",
    "solidity",
    // intensity, original image
    "mean",
    "stddev",
    "mode",
    "min",
    "max",
    "median",
    "skew",
    "kurt",
    // hematoxylin channel
    "hema_mean",
    "hema_stddev",
    "hema_mode",
    "hema_min",
    "hema_max",
    "hema_median",
    "hema_skew",
    "hema_kurt",
    // eosin channel
    "eosin_mean",
    "eosin_stddev",
    "eosin_mode",
    "eosin_min",
    "eosin_max",
    "eosin_median",
    "eosin_skew",
    "eosin_kurt",
];

/// Named index into a [`FeatureVector`]. Variant order matches
/// [`FEATURE_NAMES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[repr(usize)]
pub enum Feature {
    VesselDistance,
    NeighborCount,
    ClosestNeighborDistance,
    Area,
    X,
    Y,
    Xm,
    Ym,
    Perim,
    Bx,
    By,
    Width,
    Height,
    Major,
    Minor,
    Angle,
    Circ,
    Feret,
    FeretAngle,
    MinFeret,
    AspectRatio,
    Round,
    Solidity,
    Mean,
    StdDev,
    Mode,
    Min,
    Max,
    Median,
    Skew,
    Kurt,
    HemaMean,
    HemaStdDev,
    HemaMode,
    HemaMin,
    HemaMax,
    HemaMedian,
    HemaSkew,
    HemaKurt,
    EosinMean,
    EosinStdDev,
    EosinMode,
    EosinMin,
    EosinMax,
    EosinMedian,
    EosinSkew,
    EosinKurt,
}

impl Feature {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        FEATURE_NAMES[self as usize]
    }
}

/// Spatial-relationship features of one region, with the identities of the
/// matched structures. Unresolved distances are the -1 sentinel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpatialFeatures {
    pub vessel_distance: f64,
    pub closest_vessel: Option<String>,
    pub neighbor_count: f64,
    pub closest_neighbor_distance: f64,
    pub closest_neighbor: Option<String>,
}

impl SpatialFeatures {
    /// Sentinel block for a region with no resolvable spatial references.
    pub fn unresolved() -> Self {
        Self {
            vessel_distance: -1.0,
            closest_vessel: None,
            neighbor_count: 0.0,
            closest_neighbor_distance: -1.0,
            closest_neighbor: None,
        }
    }
}

/// The fixed 47-scalar feature record of one region.
///
/// Always fully populated by construction; the matched vessel/neighbor
/// identities and the upstream "ignored" flag ride alongside the scalars.
/// Serializes as an ordered name-to-value map in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
    pub closest_vessel: Option<String>,
    pub closest_neighbor: Option<String>,
    pub ignored: bool,
}

impl FeatureVector {
    /// Assemble a vector from its blocks. Stain blocks are zeroed by the
    /// caller when separation was unavailable.
    pub fn assemble(
        spatial: &SpatialFeatures,
        shape: &RegionDescriptors,
        hema: &IntensityStats,
        eosin: &IntensityStats,
        ignored: bool,
    ) -> Self {
        let i = &shape.intensity;
        let values = [
            spatial.vessel_distance,
            spatial.neighbor_count,
            spatial.closest_neighbor_distance,
            shape.area,
            shape.x,
            shape.y,
            shape.xm,
            shape.ym,
            shape.perim,
            shape.bx,
            shape.by,
            shape.width,
            shape.height,
            shape.major,
            shape.minor,
            shape.angle,
            shape.circ,
            shape.feret,
            shape.feret_angle,
            shape.min_feret,
            shape.ar,
            shape.round,
            shape.solidity,
            i.mean,
            i.stddev,
            i.mode,
            i.min,
            i.max,
            i.median,
            i.skew,
            i.kurt,
            hema.mean,
            hema.stddev,
            hema.mode,
            hema.min,
            hema.max,
            hema.median,
            hema.skew,
            hema.kurt,
            eosin.mean,
            eosin.stddev,
            eosin.mode,
            eosin.min,
            eosin.max,
            eosin.median,
            eosin.skew,
            eosin.kurt,
        ];
        Self {
            values,
            closest_vessel: spatial.closest_vessel.clone(),
            closest_neighbor: spatial.closest_neighbor.clone(),
            ignored,
        }
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    /// Iterate `(name, value)` pairs in schema order.
    pub fn pairs(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT + 3))?;
        for (name, value) in self.pairs() {
            map.serialize_entry(name, &value)?;
        }
        map.serialize_entry("closest_vessel", &self.closest_vessel)?;
        map.serialize_entry("closest_neighbor", &self.closest_neighbor)?;
        map.serialize_entry("ignore", &self.ignored)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    fn sample_vector() -> FeatureVector {
        let spatial = SpatialFeatures {
            vessel_distance: 12.5,
            closest_vessel: Some("vessel_2".to_string()),
            neighbor_count: 3.0,
            closest_neighbor_distance: 7.25,
            closest_neighbor: Some("4".to_string()),
        };
        let mut shape = RegionDescriptors::default();
        shape.area = 100.0;
        shape.solidity = 0.9;
        shape.intensity.mean = 42.0;
        FeatureVector::assemble(
            &spatial,
            &shape,
            &IntensityStats::ZERO,
            &IntensityStats::ZERO,
            true,
        )
    }

    #[test]
    fn schema_has_47_unique_names() {
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
        let unique: HashSet<&str> = FEATURE_NAMES.iter().copied().collect();
        assert_eq!(unique.len(), FEATURE_COUNT);
    }

    #[test]
    fn enum_order_matches_name_table() {
        assert_eq!(Feature::iter().count(), FEATURE_COUNT);
        assert_eq!(Feature::VesselDistance.name(), "vessel_distance");
        assert_eq!(Feature::Solidity.name(), "solidity");
        assert_eq!(Feature::AspectRatio.name(), "ar");
        assert_eq!(Feature::EosinKurt.name(), "eosin_kurt");
        assert_eq!(Feature::EosinKurt.index(), FEATURE_COUNT - 1);
    }

    #[test]
    fn assemble_places_blocks_at_schema_slots() {
        let vector = sample_vector();
        assert_eq!(vector.get(Feature::VesselDistance), 12.5);
        assert_eq!(vector.get(Feature::NeighborCount), 3.0);
        assert_eq!(vector.get(Feature::Area), 100.0);
        assert_eq!(vector.get(Feature::Solidity), 0.9);
        assert_eq!(vector.get(Feature::Mean), 42.0);
        assert_eq!(vector.get(Feature::HemaMean), 0.0);
        assert_eq!(vector.closest_vessel.as_deref(), Some("vessel_2"));
        assert!(vector.ignored);
    }

    #[test]
    fn serializes_as_ordered_map() {
        let json = serde_json::to_string(&sample_vector()).expect("serialize");
        let vessel = json.find("\"vessel_distance\"").expect("first feature");
        let area = json.find("\"area\"").expect("area");
        let eosin = json.find("\"eosin_kurt\"").expect("last feature");
        let ignore = json.find("\"ignore\"").expect("ignore flag");
        assert!(vessel < area && area < eosin && eosin < ignore);
    }
}
