use geo::ConvexHull;
use geo_types::{Coord, LineString, Polygon};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use crate::types::{Boundary, PixelMask};

/// A region rasterized into a byte mask window, with the window's origin in
/// image coordinates.
#[derive(Debug, Clone)]
pub(crate) struct MaskWindow {
    pub x0: i64,
    pub y0: i64,
    pub mask: GrayImage,
}

/// Boundary polygon of a region in image coordinates.
///
/// Polygon boundaries are cleaned (non-finite points dropped, consecutive
/// duplicates and the closing vertex removed); mask boundaries are traced
/// with the longest outer contour.
pub(crate) fn contour_points(boundary: &Boundary) -> Vec<[f64; 2]> {
    match boundary {
        Boundary::Polygon(points) => clean_polygon(points),
        Boundary::Mask(mask) => trace_mask(mask),
    }
}

fn clean_polygon(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut out: Vec<[f64; 2]> = Vec::with_capacity(points.len());
    for &p in points {
        if !p[0].is_finite() || !p[1].is_finite() {
            continue;
        }
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    if out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

fn trace_mask(mask: &PixelMask) -> Vec<[f64; 2]> {
    let Some(canvas) = mask_to_image(mask) else {
        return Vec::new();
    };
    let contours = find_contours::<i32>(&canvas);
    contours
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .max_by_key(|c| c.points.len())
        .map(|c| {
            c.points
                .iter()
                .map(|p| [(p.x as i64 + mask.x) as f64, (p.y as i64 + mask.y) as f64])
                .collect()
        })
        .unwrap_or_default()
}

fn mask_to_image(mask: &PixelMask) -> Option<GrayImage> {
    if mask.width == 0 || mask.height == 0 {
        return None;
    }
    if mask.data.len() != (mask.width * mask.height) as usize {
        return None;
    }
    let data = mask
        .data
        .iter()
        .map(|&v| if v != 0 { 255 } else { 0 })
        .collect();
    GrayImage::from_raw(mask.width, mask.height, data)
}

/// Rasterize a boundary into a filled mask window. `None` when the boundary
/// is too degenerate to cover any pixels (fewer than three distinct
/// vertices, zero-sized mask).
pub(crate) fn rasterize(boundary: &Boundary) -> Option<MaskWindow> {
    match boundary {
        Boundary::Polygon(points) => rasterize_polygon(&clean_polygon(points)),
        Boundary::Mask(mask) => mask_to_image(mask).map(|canvas| MaskWindow {
            x0: mask.x,
            y0: mask.y,
            mask: canvas,
        }),
    }
}

pub(crate) fn rasterize_polygon(points: &[[f64; 2]]) -> Option<MaskWindow> {
    if points.len() < 3 {
        return None;
    }
    let min_x = points.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min).floor() as i64;
    let min_y = points.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min).floor() as i64;
    let max_x = points.iter().map(|p| p[0]).fold(f64::NEG_INFINITY, f64::max).ceil() as i64;
    let max_y = points.iter().map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max).ceil() as i64;
    let width = (max_x - min_x + 1).max(1) as u32;
    let height = (max_y - min_y + 1).max(1) as u32;

    // Integer vertices for the scanline fill; duplicates introduced by
    // rounding would trip the fill, so drop them again.
    let mut vertices: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for p in points {
        let v = Point::new(
            (p[0].round() as i64 - min_x) as i32,
            (p[1].round() as i64 - min_y) as i32,
        );
        if vertices.last() != Some(&v) {
            vertices.push(v);
        }
    }
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    if vertices.len() < 3 {
        return None;
    }

    let mut mask = GrayImage::new(width, height);
    draw_polygon_mut(&mut mask, &vertices, Luma([255u8]));
    Some(MaskWindow {
        x0: min_x,
        y0: min_y,
        mask,
    })
}

/// Closed arc length of a polygon.
pub(crate) fn polygon_perimeter(points: &[[f64; 2]]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for window in points.windows(2) {
        let dx = window[1][0] - window[0][0];
        let dy = window[1][1] - window[0][1];
        total += (dx * dx + dy * dy).sqrt();
    }
    let first = points[0];
    let last = points[points.len() - 1];
    let (dx, dy) = (first[0] - last[0], first[1] - last[1]);
    total + (dx * dx + dy * dy).sqrt()
}

/// Convex hull vertices of a point set, open ring.
pub(crate) fn convex_hull(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let coords: Vec<Coord<f64>> = points.iter().map(|&[x, y]| Coord { x, y }).collect();
    let polygon = Polygon::new(LineString::new(coords), vec![]);
    let mut hull: Vec<[f64; 2]> = polygon
        .convex_hull()
        .exterior()
        .coords()
        .map(|c| [c.x, c.y])
        .collect();
    if hull.len() > 1 && hull.first() == hull.last() {
        hull.pop();
    }
    hull
}

/// Maximum-caliper measurements of a hull: longest diameter, its defining
/// start point and angle, and the minimum caliper width.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FeretMeasures {
    pub feret: f64,
    pub feret_x: f64,
    pub feret_y: f64,
    pub feret_angle: f64,
    pub min_feret: f64,
}

pub(crate) fn feret_measures(hull: &[[f64; 2]]) -> Option<FeretMeasures> {
    if hull.len() < 2 {
        return None;
    }

    let mut feret = 0.0f64;
    let mut start = hull[0];
    let mut end = hull[0];
    for i in 0..hull.len() {
        for j in (i + 1)..hull.len() {
            let dx = hull[j][0] - hull[i][0];
            let dy = hull[j][1] - hull[i][1];
            let distance = (dx * dx + dy * dy).sqrt();
            if distance > feret {
                feret = distance;
                start = hull[i];
                end = hull[j];
            }
        }
    }

    // Angle reported y-up in [0, 180).
    let mut feret_angle = (-(end[1] - start[1])).atan2(end[0] - start[0]).to_degrees();
    if feret_angle < 0.0 {
        feret_angle += 180.0;
    }
    if feret_angle >= 180.0 {
        feret_angle -= 180.0;
    }

    // Rotating calipers: the minimum width is attained across a hull edge.
    let mut min_feret = f64::INFINITY;
    if hull.len() >= 3 {
        for i in 0..hull.len() {
            let a = hull[i];
            let b = hull[(i + 1) % hull.len()];
            let (ex, ey) = (b[0] - a[0], b[1] - a[1]);
            let len = (ex * ex + ey * ey).sqrt();
            if len < 1e-12 {
                continue;
            }
            let (nx, ny) = (-ey / len, ex / len);
            let width = hull
                .iter()
                .map(|p| ((p[0] - a[0]) * nx + (p[1] - a[1]) * ny).abs())
                .fold(0.0f64, f64::max);
            min_feret = min_feret.min(width);
        }
    }
    if !min_feret.is_finite() {
        min_feret = 0.0;
    }

    Some(FeretMeasures {
        feret,
        feret_x: start[0],
        feret_y: start[1],
        feret_angle,
        min_feret,
    })
}
