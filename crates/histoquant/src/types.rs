use std::fmt;

use geo_types::{Coord, LineString, Polygon};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// The four biological structure classes produced by segmentation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash,
    Serialize, Deserialize,
    Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegionKind {
    Vessel,
    Nucleus,
    Cytoplasm,
    Cell,
}

/// Dense byte mask with its image-space origin. Non-zero bytes are inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelMask {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelMask {
    /// Number of set pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Mean coordinate of the set pixels, in image space.
    pub fn centroid(&self) -> Option<[f64; 2]> {
        let mut n = 0usize;
        let (mut sx, mut sy) = (0.0f64, 0.0f64);
        for (i, &v) in self.data.iter().enumerate() {
            if v != 0 {
                n += 1;
                sx += (i % self.width as usize) as f64;
                sy += (i / self.width as usize) as f64;
            }
        }
        (n > 0).then(|| {
            [
                self.x as f64 + sx / n as f64,
                self.y as f64 + sy / n as f64,
            ]
        })
    }
}

/// A region boundary as delivered by the segmentation stage.
///
/// Polygons are rasterized for pixel-domain statistics; masks are traced to
/// a contour polygon for boundary-domain geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Boundary {
    Polygon(Vec<[f64; 2]>),
    Mask(PixelMask),
}

impl Boundary {
    /// Axis-aligned bounding box as (min x, min y, width, height).
    pub fn bounding_box(&self) -> Option<[f64; 4]> {
        match self {
            Boundary::Polygon(points) => {
                if points.is_empty() {
                    return None;
                }
                let mut min = [f64::INFINITY; 2];
                let mut max = [f64::NEG_INFINITY; 2];
                for &[x, y] in points {
                    min[0] = min[0].min(x);
                    min[1] = min[1].min(y);
                    max[0] = max[0].max(x);
                    max[1] = max[1].max(y);
                }
                Some([min[0], min[1], max[0] - min[0], max[1] - min[1]])
            }
            Boundary::Mask(mask) => Some([
                mask.x as f64,
                mask.y as f64,
                mask.width as f64,
                mask.height as f64,
            ]),
        }
    }

    /// Convert a polygon boundary to a geo-types polygon for geometric
    /// operations. Mask boundaries have no direct polygon form.
    pub fn to_geo_polygon(&self) -> Option<Polygon<f64>> {
        match self {
            Boundary::Polygon(points) if points.len() >= 3 => {
                let coords: Vec<Coord<f64>> =
                    points.iter().map(|&[x, y]| Coord { x, y }).collect();
                Some(Polygon::new(LineString::new(coords), vec![]))
            }
            _ => None,
        }
    }
}

/// A delineated biological structure. Produced upstream, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub kind: RegionKind,
    pub boundary: Boundary,
    pub area: f64,
    pub centroid: [f64; 2],
    pub ignored: bool,
}

impl Region {
    /// Build a region, deriving area and centroid from the boundary.
    pub fn new(name: impl Into<String>, kind: RegionKind, boundary: Boundary) -> Self {
        use geo::{Area, Centroid};

        let (area, centroid) = match &boundary {
            Boundary::Polygon(_) => {
                let poly = boundary.to_geo_polygon();
                let area = poly.as_ref().map_or(0.0, |p| p.unsigned_area());
                let centroid = poly
                    .as_ref()
                    .and_then(|p| p.centroid())
                    .map(|c| [c.x(), c.y()]);
                (area, centroid)
            }
            Boundary::Mask(mask) => (mask.count() as f64, mask.centroid()),
        };
        let centroid = centroid.or_else(|| {
            boundary
                .bounding_box()
                .map(|[x, y, w, h]| [x + w / 2.0, y + h / 2.0])
        });

        Self {
            name: name.into(),
            kind,
            boundary,
            area,
            centroid: centroid.unwrap_or([0.0, 0.0]),
            ignored: false,
        }
    }

    /// Build a region with upstream-supplied metrics, bypassing derivation.
    pub fn with_metrics(
        name: impl Into<String>,
        kind: RegionKind,
        boundary: Boundary,
        area: f64,
        centroid: [f64; 2],
        ignored: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            boundary,
            area,
            centroid,
            ignored,
        }
    }

    pub fn center_x(&self) -> f64 {
        self.centroid[0]
    }

    pub fn center_y(&self) -> f64 {
        self.centroid[1]
    }
}

/// Composite key of one feature vector: image identifier plus region name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionKey {
    pub image: String,
    pub region: String,
}

impl RegionKey {
    pub fn new(image: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.image, self.region)
    }
}

/// The three derived stain channels of one image.
///
/// Immutable once built; `separated` is false when the input was not RGB and
/// the channels are plain grayscale fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct StainChannelSet {
    pub hematoxylin: GrayImage,
    pub eosin: GrayImage,
    pub residual: GrayImage,
    pub separated: bool,
}
