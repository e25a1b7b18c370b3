use histoquant::{Boundary, Extraction, FeatureVector, Region, RegionKey, RegionKind};
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::Arc;

/// Install a test subscriber once; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Uniform pink slide, the typical H&E background tone.
pub fn rgb_slide(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([230, 180, 200])))
}

/// Square region of `side` pixels centered on `(cx, cy)`.
pub fn square_region(name: &str, kind: RegionKind, cx: f64, cy: f64, side: f64) -> Region {
    let h = side / 2.0;
    Region::new(
        name,
        kind,
        Boundary::Polygon(vec![
            [cx - h, cy - h],
            [cx + h, cy - h],
            [cx + h, cy + h],
            [cx - h, cy + h],
        ]),
    )
}

pub fn fetch<'a>(extraction: &'a Extraction, image: &str, region: &str) -> &'a Arc<FeatureVector> {
    extraction
        .features
        .get(&RegionKey::new(image, region))
        .unwrap_or_else(|| panic!("missing feature vector for {image}_{region}"))
}
