use std::collections::HashMap;

use crate::types::{Region, RegionKind};

/// Default edge length of one grid bucket, in image units.
pub const DEFAULT_CELL_SIZE: f64 = 100.0;

/// Ring radius used to seed nearest-reference lookups before falling back
/// to an exhaustive scan.
const NEAREST_SEED_RING: i32 = 2;

/// Lightweight projection of a region held by one grid bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialEntry {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub area: f64,
    pub kind: RegionKind,
}

impl SpatialEntry {
    pub fn from_region(region: &Region) -> Self {
        Self {
            id: region.name.clone(),
            x: region.center_x(),
            y: region.center_y(),
            area: region.area,
            kind: region.kind,
        }
    }
}

/// Instance identity of a region name: the part after the last underscore,
/// or the whole name when no interior underscore exists.
///
/// A nucleus and its cytoplasm share a suffix and are treated as the same
/// biological instance. Names outside the `<type>_<id>` convention fall
/// back to full-name identity.
pub fn instance_id(name: &str) -> &str {
    match name.rfind('_') {
        Some(i) if i > 0 && i < name.len() - 1 => &name[i + 1..],
        _ => name,
    }
}

/// Closest neighbor within a grid candidate block, plus the count of
/// candidates inside the hard radius.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NeighborSummary {
    pub count: usize,
    /// Minimum-distance candidate and its instance id; may lie outside the
    /// counting radius.
    pub nearest: Option<(f64, String)>,
}

/// Uniform grid over region centroids.
///
/// Buckets are keyed by `(floor(x/cell), floor(y/cell))`; queries return
/// overscan candidate sets and leave exact filtering to the caller.
/// Immutable once built; rebuilt per image.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<SpatialEntry>>,
    len: usize,
}

impl SpatialGrid {
    pub fn build(entries: Vec<SpatialEntry>, cell_size: f64) -> Self {
        let cell_size = if cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        let len = entries.len();
        let mut cells: HashMap<(i64, i64), Vec<SpatialEntry>> = HashMap::new();
        for entry in entries {
            let key = cell_key(entry.x, entry.y, cell_size);
            cells.entry(key).or_default().push(entry);
        }
        Self {
            cell_size,
            cells,
            len,
        }
    }

    pub fn from_regions<'a>(
        regions: impl IntoIterator<Item = &'a Region>,
        cell_size: f64,
    ) -> Self {
        Self::build(
            regions.into_iter().map(SpatialEntry::from_region).collect(),
            cell_size,
        )
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All entries in the `(2 ring + 1)^2` block of buckets centered on the
    /// query point's bucket. An overscan set: callers filter by distance.
    pub fn query_candidates(&self, x: f64, y: f64, ring: i32) -> Vec<&SpatialEntry> {
        let (cx, cy) = cell_key(x, y, self.cell_size);
        let mut out = Vec::new();
        for dx in -ring..=ring {
            for dy in -ring..=ring {
                if let Some(bucket) = self.cells.get(&(cx + dx as i64, cy + dy as i64)) {
                    out.extend(bucket.iter());
                }
            }
        }
        out
    }

    /// Distance and entry of the closest reference structure, excluding the
    /// query's own name.
    ///
    /// Seeds from a small ring and falls back to scanning every entry when
    /// the ring is empty, so a non-empty index always resolves. `None` only
    /// for an empty index or one holding nothing but the querying region.
    pub fn nearest_reference(
        &self,
        x: f64,
        y: f64,
        exclude_name: &str,
    ) -> Option<(f64, &SpatialEntry)> {
        if self.is_empty() {
            return None;
        }
        let candidates = self.query_candidates(x, y, NEAREST_SEED_RING);
        let candidates = if candidates.is_empty() {
            self.cells.values().flatten().collect()
        } else {
            candidates
        };

        let mut best: Option<(f64, &SpatialEntry)> = None;
        for entry in candidates {
            if entry.id == exclude_name {
                continue;
            }
            let distance = ((entry.x - x).powi(2) + (entry.y - y).powi(2)).sqrt();
            if best.as_ref().map_or(true, |(min, _)| distance < *min) {
                best = Some((distance, entry));
            }
        }
        best
    }

    /// Neighbor count within `radius` plus the overall closest candidate,
    /// excluding entries that share the query's instance id.
    ///
    /// The ring is sized so the true radius-neighborhood is a subset of the
    /// candidate block; the reported nearest candidate may still lie
    /// outside the radius.
    pub fn neighborhood(&self, x: f64, y: f64, radius: f64, self_name: &str) -> NeighborSummary {
        let ring = (radius / self.cell_size).ceil() as i32 + 1;
        let self_id = instance_id(self_name);

        let mut summary = NeighborSummary::default();
        for entry in self.query_candidates(x, y, ring) {
            let other_id = instance_id(&entry.id);
            if other_id == self_id {
                continue;
            }
            let distance = ((entry.x - x).powi(2) + (entry.y - y).powi(2)).sqrt();
            if distance <= radius {
                summary.count += 1;
            }
            if summary
                .nearest
                .as_ref()
                .map_or(true, |(min, _)| distance < *min)
            {
                summary.nearest = Some((distance, other_id.to_string()));
            }
        }
        summary
    }
}

fn cell_key(x: f64, y: f64, cell_size: f64) -> (i64, i64) {
    ((x / cell_size).floor() as i64, (y / cell_size).floor() as i64)
}
