//! Per-region geometric and intensity descriptors.
//!
//! All entry points are total: malformed or degenerate boundaries resolve to
//! documented bounding-box fallbacks, and only a region with no boundary at
//! all is reported as an error.

mod geometry;
mod intensity;

use image::GrayImage;
use serde::Serialize;
use tracing::debug;

use crate::error::{FeatureError, Result};
use crate::types::Region;

use geometry::{rasterize_polygon, MaskWindow};
use intensity::IntensityAccum;
pub use intensity::IntensityStats;

/// The full descriptor block of one region measured against one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RegionDescriptors {
    pub area: f64,
    /// Geometric centroid.
    pub x: f64,
    pub y: f64,
    /// Intensity-weighted centroid (center of mass).
    pub xm: f64,
    pub ym: f64,
    pub bx: f64,
    pub by: f64,
    pub width: f64,
    pub height: f64,
    pub perim: f64,
    pub major: f64,
    pub minor: f64,
    pub angle: f64,
    pub circ: f64,
    pub feret: f64,
    pub feret_x: f64,
    pub feret_y: f64,
    pub feret_angle: f64,
    pub min_feret: f64,
    pub ar: f64,
    pub round: f64,
    pub solidity: f64,
    /// Integrated density: area times mean intensity.
    pub intden: f64,
    pub intensity: IntensityStats,
}

/// Measure every geometric and intensity descriptor of `region` against
/// `image`.
///
/// Degenerate boundaries fall back to bounding-box-derived values; the only
/// error is a boundary with nothing to measure at all.
pub fn measure_region(region: &Region, image: &GrayImage) -> Result<RegionDescriptors> {
    let contour = geometry::contour_points(&region.boundary);
    let window = geometry::rasterize(&region.boundary);
    if contour.is_empty() && window.is_none() {
        return Err(FeatureError::EmptyBoundary {
            name: region.name.clone(),
        });
    }

    let Some(window) = window else {
        debug!(region = %region.name, "boundary too degenerate to rasterize, using fallbacks");
        return Ok(fallback_descriptors(region));
    };
    let Some(scan) = scan_window(&window, image) else {
        debug!(region = %region.name, "no pixels inside the image, using fallbacks");
        return Ok(fallback_descriptors(region));
    };

    let stats = scan.intensity.finish();
    let n = scan.intensity.count() as f64;
    let area = n;
    let x = scan.sx / n;
    let y = scan.sy / n;
    let (xm, ym) = if scan.intensity.sum() > 0.0 {
        (scan.wx / scan.intensity.sum(), scan.wy / scan.intensity.sum())
    } else {
        (x, y)
    };

    let bx = scan.min_x as f64;
    let by = scan.min_y as f64;
    let width = (scan.max_x - scan.min_x + 1) as f64;
    let height = (scan.max_y - scan.min_y + 1) as f64;

    let perim = if contour.len() >= 3 {
        geometry::polygon_perimeter(&contour)
    } else {
        2.0 * (width + height)
    };
    let circ = if perim > 0.0 {
        4.0 * std::f64::consts::PI * area / (perim * perim)
    } else {
        1.0
    };

    let (major, minor, angle) = fit_ellipse(&scan, area, width, height);
    let ar = if minor > 0.0 { major / minor } else { 1.0 };
    let round = if major > 0.0 { minor / major } else { 1.0 };

    let hull = geometry::convex_hull(&contour);
    let feret = geometry::feret_measures(&hull).unwrap_or(geometry::FeretMeasures {
        feret: width.max(height),
        feret_x: x,
        feret_y: y,
        feret_angle: 0.0,
        min_feret: width.min(height),
    });
    let solidity = solidity(area, &hull);

    Ok(RegionDescriptors {
        area,
        x,
        y,
        xm,
        ym,
        bx,
        by,
        width,
        height,
        perim,
        major,
        minor,
        angle,
        circ,
        feret: feret.feret,
        feret_x: feret.feret_x,
        feret_y: feret.feret_y,
        feret_angle: feret.feret_angle,
        min_feret: feret.min_feret,
        ar,
        round,
        solidity,
        intden: area * stats.mean,
        intensity: stats,
    })
}

/// Intensity statistics only, for the derived stain channels.
pub fn measure_intensity(region: &Region, image: &GrayImage) -> IntensityStats {
    geometry::rasterize(&region.boundary)
        .and_then(|window| scan_window(&window, image))
        .map(|scan| scan.intensity.finish())
        .unwrap_or(IntensityStats::ZERO)
}

/// Single pass over the masked pixels of one image window.
struct WindowScan {
    intensity: IntensityAccum,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    wx: f64,
    wy: f64,
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

fn scan_window(window: &MaskWindow, image: &GrayImage) -> Option<WindowScan> {
    let (img_w, img_h) = (image.width() as i64, image.height() as i64);
    let mut scan = WindowScan {
        intensity: IntensityAccum::new(),
        sx: 0.0,
        sy: 0.0,
        sxx: 0.0,
        syy: 0.0,
        sxy: 0.0,
        wx: 0.0,
        wy: 0.0,
        min_x: i64::MAX,
        min_y: i64::MAX,
        max_x: i64::MIN,
        max_y: i64::MIN,
    };

    for (wy, row) in window.mask.rows().enumerate() {
        let iy = window.y0 + wy as i64;
        if iy < 0 || iy >= img_h {
            continue;
        }
        for (wx, pixel) in row.enumerate() {
            if pixel.0[0] == 0 {
                continue;
            }
            let ix = window.x0 + wx as i64;
            if ix < 0 || ix >= img_w {
                continue;
            }
            let value = image.get_pixel(ix as u32, iy as u32).0[0];
            let (fx, fy) = (ix as f64, iy as f64);
            scan.intensity.push(value);
            scan.sx += fx;
            scan.sy += fy;
            scan.sxx += fx * fx;
            scan.syy += fy * fy;
            scan.sxy += fx * fy;
            scan.wx += value as f64 * fx;
            scan.wy += value as f64 * fy;
            scan.min_x = scan.min_x.min(ix);
            scan.min_y = scan.min_y.min(iy);
            scan.max_x = scan.max_x.max(ix);
            scan.max_y = scan.max_y.max(iy);
        }
    }

    (scan.intensity.count() > 0).then_some(scan)
}

/// Best-fit ellipse from second-order central moments, normalized so the
/// ellipse area equals the region area. Angle in degrees, y-up, [0, 180).
fn fit_ellipse(scan: &WindowScan, area: f64, width: f64, height: f64) -> (f64, f64, f64) {
    let n = scan.intensity.count() as f64;
    let (cx, cy) = (scan.sx / n, scan.sy / n);
    // 1/12 is the second moment of a unit pixel about its own center.
    let uxx = scan.sxx / n - cx * cx + 1.0 / 12.0;
    let uyy = scan.syy / n - cy * cy + 1.0 / 12.0;
    let uxy = scan.sxy / n - cx * cy;

    let common = ((uxx - uyy).powi(2) + 4.0 * uxy * uxy).sqrt();
    let major_raw = (2.0 * (uxx + uyy + common)).max(0.0).sqrt();
    let minor_raw = (2.0 * (uxx + uyy - common)).max(0.0).sqrt();
    if major_raw <= 0.0 || minor_raw <= 0.0 {
        return (width.max(height), width.min(height), 0.0);
    }

    let raw_area = std::f64::consts::PI / 4.0 * major_raw * minor_raw;
    let scale = (area / raw_area).sqrt();
    let major = major_raw * scale;
    let minor = minor_raw * scale;

    // Negated cross moment flips image coordinates to the y-up convention.
    let mut angle = (0.5 * (2.0 * -uxy).atan2(uxx - uyy)).to_degrees();
    if angle < 0.0 {
        angle += 180.0;
    }
    if angle >= 180.0 {
        angle -= 180.0;
    }
    (major, minor, angle)
}

/// Region area over the pixel area of its convex hull, both measured in the
/// same rasterized domain. 1.0 whenever the hull cannot be constructed.
fn solidity(area: f64, hull: &[[f64; 2]]) -> f64 {
    if hull.len() < 3 {
        return 1.0;
    }
    let hull_area = rasterize_polygon(hull)
        .map(|window| window.mask.pixels().filter(|p| p.0[0] != 0).count() as f64)
        .unwrap_or(0.0);
    if hull_area > 0.0 {
        area / hull_area
    } else {
        1.0
    }
}

/// Conservative bounding-box descriptors for degenerate regions.
fn fallback_descriptors(region: &Region) -> RegionDescriptors {
    let [bx, by, width, height] = region
        .boundary
        .bounding_box()
        .unwrap_or([region.center_x(), region.center_y(), 0.0, 0.0]);
    let cx = bx + width / 2.0;
    let cy = by + height / 2.0;
    let long = width.max(height);
    let short = width.min(height);

    RegionDescriptors {
        area: 0.0,
        x: cx,
        y: cy,
        xm: cx,
        ym: cy,
        bx,
        by,
        width,
        height,
        perim: 2.0 * (width + height),
        major: long,
        minor: short,
        angle: 0.0,
        circ: 1.0,
        feret: long,
        feret_x: cx,
        feret_y: cy,
        feret_angle: 0.0,
        min_feret: short,
        ar: if short > 0.0 { long / short } else { 1.0 },
        round: if long > 0.0 { short / long } else { 1.0 },
        solidity: 1.0,
        intden: 0.0,
        intensity: IntensityStats::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{Boundary, RegionKind};

    use super::*;

    fn gray(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, image::Luma([value]))
    }

    fn square_region(x: f64, y: f64, side: f64) -> Region {
        Region::new(
            "nucleus_1",
            RegionKind::Nucleus,
            Boundary::Polygon(vec![
                [x, y],
                [x + side, y],
                [x + side, y + side],
                [x, y + side],
            ]),
        )
    }

    #[test]
    fn square_has_expected_geometry() {
        let region = square_region(10.0, 10.0, 10.0);
        let d = measure_region(&region, &gray(40, 40, 100)).expect("measurable");

        // 11x11 inclusive pixel fill.
        assert_eq!(d.area, 121.0);
        assert!((d.x - 15.0).abs() < 1e-9);
        assert!((d.y - 15.0).abs() < 1e-9);
        assert_eq!(d.bx, 10.0);
        assert_eq!(d.by, 10.0);
        assert_eq!(d.width, 11.0);
        assert_eq!(d.height, 11.0);
        assert!((d.perim - 40.0).abs() < 1e-9);
        assert!((d.circ - 4.0 * std::f64::consts::PI * 121.0 / 1600.0).abs() < 1e-9);
        // Symmetric: axes nearly equal, aspect ratio ~1.
        assert!((d.ar - 1.0).abs() < 1e-6);
        assert!((d.round - 1.0).abs() < 1e-6);
        assert!((d.solidity - 1.0).abs() < 1e-9);
        assert!((d.feret - 200.0f64.sqrt()).abs() < 1e-9);
        assert!((d.min_feret - 10.0).abs() < 1e-9);
        // Uniform intensity.
        assert_eq!(d.intensity.mean, 100.0);
        assert_eq!(d.intensity.stddev, 0.0);
        assert_eq!(d.intden, 121.0 * 100.0);
        assert!((d.xm - d.x).abs() < 1e-9);
    }

    #[test]
    fn elongated_region_reports_axis_and_angle() {
        let region = Region::new(
            "cell_2",
            RegionKind::Cell,
            Boundary::Polygon(vec![[0.0, 0.0], [30.0, 0.0], [30.0, 4.0], [0.0, 4.0]]),
        );
        let d = measure_region(&region, &gray(40, 10, 50)).expect("measurable");
        assert!(d.major > d.minor);
        assert!(d.ar > 3.0);
        // Horizontal major axis.
        assert!(d.angle < 1.0 || d.angle > 179.0);
        assert!((d.major * d.minor * std::f64::consts::PI / 4.0 - d.area).abs() < 1e-6);
    }

    #[test]
    fn zero_area_region_uses_fallback_constants() {
        let region = Region::new(
            "cell_3",
            RegionKind::Cell,
            Boundary::Polygon(vec![[5.0, 5.0], [9.0, 5.0]]),
        );
        let d = measure_region(&region, &gray(20, 20, 10)).expect("fallback");
        assert_eq!(d.area, 0.0);
        assert_eq!(d.circ, 1.0);
        assert_eq!(d.solidity, 1.0);
        assert!(d.ar.is_finite() && d.round.is_finite());
        assert_eq!(d.intensity, IntensityStats::ZERO);
        let serialized = serde_json::to_string(&d).expect("serializable");
        assert!(!serialized.contains("NaN"));
    }

    #[test]
    fn empty_boundary_is_an_error() {
        let region = Region::new("cell_4", RegionKind::Cell, Boundary::Polygon(vec![]));
        assert!(matches!(
            measure_region(&region, &gray(5, 5, 0)),
            Err(FeatureError::EmptyBoundary { .. })
        ));
    }

    #[test]
    fn region_outside_the_image_falls_back() {
        let region = square_region(100.0, 100.0, 5.0);
        let d = measure_region(&region, &gray(20, 20, 10)).expect("fallback");
        assert_eq!(d.area, 0.0);
        assert_eq!(d.solidity, 1.0);
    }

    #[test]
    fn concave_region_has_reduced_solidity() {
        // An L-shape: half the bounding square.
        let region = Region::new(
            "cell_5",
            RegionKind::Cell,
            Boundary::Polygon(vec![
                [0.0, 0.0],
                [20.0, 0.0],
                [20.0, 10.0],
                [10.0, 10.0],
                [10.0, 20.0],
                [0.0, 20.0],
            ]),
        );
        let d = measure_region(&region, &gray(30, 30, 10)).expect("measurable");
        assert!(d.solidity < 0.95);
        assert!(d.solidity > 0.5);
    }

    #[test]
    fn weighted_centroid_tracks_bright_pixels() {
        let mut image = gray(30, 30, 0);
        // Bright column on the right half of the region.
        for y in 0..30 {
            for x in 15..30 {
                image.put_pixel(x, y, image::Luma([200]));
            }
        }
        let region = square_region(5.0, 5.0, 20.0);
        let d = measure_region(&region, &image).expect("measurable");
        assert!(d.xm > d.x);
        assert!((d.ym - d.y).abs() < 1e-9);
    }

    #[test]
    fn intensity_only_measurement_matches_full_measurement() {
        let image = gray(40, 40, 77);
        let region = square_region(10.0, 10.0, 10.0);
        let full = measure_region(&region, &image).expect("measurable");
        let fast = measure_intensity(&region, &image);
        assert_eq!(full.intensity, fast);
    }

    #[test]
    fn mask_boundary_measures_like_its_polygon() {
        let mask = crate::types::PixelMask {
            x: 10,
            y: 10,
            width: 11,
            height: 11,
            data: vec![1; 121],
        };
        let region = Region::new("nucleus_9", RegionKind::Nucleus, Boundary::Mask(mask));
        let d = measure_region(&region, &gray(40, 40, 100)).expect("measurable");
        assert_eq!(d.area, 121.0);
        assert!((d.x - 15.0).abs() < 1e-9);
        assert_eq!(d.intensity.mean, 100.0);
    }
}
