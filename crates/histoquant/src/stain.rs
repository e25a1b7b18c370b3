use image::{DynamicImage, GrayImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FeatureError, Result};
use crate::types::StainChannelSet;

/// Optical-density cutoff: pixel values at or below 1/255 transmittance map
/// to zero density instead of -infinity.
pub const OD_EPSILON: f64 = 1.0 / 255.0;

/// Reference stain matrix, rows = RGB optical-density vectors for stain A
/// (hematoxylin), stain B (eosin), and the residual.
///
/// An all-zero residual row is derived as the cross product of the first two
/// rows; all rows are L2-normalized before inversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StainMatrix {
    pub rows: [[f64; 3]; 3],
}

impl Default for StainMatrix {
    /// Ruifrok & Johnston H&E reference vectors.
    fn default() -> Self {
        Self {
            rows: [
                [0.650, 0.704, 0.286],
                [0.072, 0.990, 0.105],
                [0.000, 0.000, 0.000],
            ],
        }
    }
}

impl StainMatrix {
    /// Complete the residual row and L2-normalize every row.
    pub fn normalized(&self) -> Self {
        let mut rows = self.rows;
        if rows[2] == [0.0; 3] {
            rows[2] = cross(rows[0], rows[1]);
        }
        for row in &mut rows {
            let norm = (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt();
            if norm > 0.0 {
                let inv = 1.0 / norm;
                for v in row.iter_mut() {
                    *v *= inv;
                }
            }
        }
        Self { rows }
    }

    /// Invert via Gauss-Jordan elimination with partial pivoting.
    fn inverse(&self) -> Result<[[f64; 3]; 3]> {
        let mut m = self.rows;
        let mut inv = [[0.0; 3]; 3];
        for (i, row) in inv.iter_mut().enumerate() {
            row[i] = 1.0;
        }

        for col in 0..3 {
            let pivot = (col..3)
                .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
                .unwrap_or(col);
            if m[pivot][col].abs() < 1e-12 {
                return Err(FeatureError::SingularStainMatrix);
            }
            m.swap(col, pivot);
            inv.swap(col, pivot);

            let factor = 1.0 / m[col][col];
            for k in 0..3 {
                m[col][k] *= factor;
                inv[col][k] *= factor;
            }
            for row in 0..3 {
                if row != col {
                    let factor = m[row][col];
                    for k in 0..3 {
                        m[row][k] -= factor * m[col][k];
                        inv[row][k] -= factor * inv[col][k];
                    }
                }
            }
        }
        Ok(inv)
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Pure per-pixel transform unmixing an RGB image into stain channels.
///
/// The inverse matrix is computed once at construction; `separate` is
/// referentially transparent and bit-reproducible for identical input.
#[derive(Debug, Clone)]
pub struct StainSeparator {
    matrix: StainMatrix,
    inverse: [[f64; 3]; 3],
}

impl StainSeparator {
    pub fn new(matrix: StainMatrix) -> Result<Self> {
        let matrix = matrix.normalized();
        let inverse = matrix.inverse()?;
        Ok(Self { matrix, inverse })
    }

    /// The normalized reference stain vectors in use.
    pub fn stain_vectors(&self) -> [[f64; 3]; 3] {
        self.matrix.rows
    }

    /// Unmix an image into hematoxylin, eosin, and residual channels.
    ///
    /// Non-RGB input degrades to a grayscale conversion in all three
    /// channels with `separated = false`; this never fails.
    pub fn separate(&self, image: &DynamicImage) -> StainChannelSet {
        let rgb = match image {
            DynamicImage::ImageRgb8(rgb) => rgb,
            _ => {
                warn!("input is not 8-bit RGB, using grayscale fallback channels");
                let gray = image.to_luma8();
                return StainChannelSet {
                    hematoxylin: gray.clone(),
                    eosin: gray.clone(),
                    residual: gray,
                    separated: false,
                };
            }
        };

        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            warn!("image has no pixels, nothing to separate");
            let empty = GrayImage::new(width, height);
            return StainChannelSet {
                hematoxylin: empty.clone(),
                eosin: empty.clone(),
                residual: empty,
                separated: true,
            };
        }
        let raw = rgb.as_raw();
        let mut hematoxylin = GrayImage::new(width, height);
        let mut eosin = GrayImage::new(width, height);
        let mut residual = GrayImage::new(width, height);

        // Row-parallel: pixels are independent and each output byte is a
        // pure function of one input pixel, so scheduling order cannot
        // change the result.
        let row_len = width as usize;
        (&mut *hematoxylin)
            .par_chunks_mut(row_len)
            .zip((&mut *eosin).par_chunks_mut(row_len))
            .zip((&mut *residual).par_chunks_mut(row_len))
            .enumerate()
            .for_each(|(row, ((h_row, e_row), r_row))| {
                let offset = row * row_len * 3;
                for col in 0..row_len {
                    let i = offset + col * 3;
                    let [h, e, r] =
                        self.unmix_pixel([raw[i], raw[i + 1], raw[i + 2]]);
                    h_row[col] = h;
                    e_row[col] = e;
                    r_row[col] = r;
                }
            });

        debug!(width, height, "stain separation complete");
        StainChannelSet {
            hematoxylin,
            eosin,
            residual,
            separated: true,
        }
    }

    #[inline]
    fn unmix_pixel(&self, rgb: [u8; 3]) -> [u8; 3] {
        let od = optical_density(rgb);
        let conc = self.unmix_densities(od);
        [
            transmittance_u8(conc[0]),
            transmittance_u8(conc[1]),
            transmittance_u8(conc[2]),
        ]
    }

    /// Stain concentrations for one optical-density vector.
    pub fn unmix_densities(&self, od: [f64; 3]) -> [f64; 3] {
        let mut conc = [0.0; 3];
        for (c, row) in conc.iter_mut().zip(&self.inverse) {
            *c = row[0] * od[0] + row[1] * od[1] + row[2] * od[2];
        }
        conc
    }
}

/// Per-channel optical density of one RGB pixel.
pub fn optical_density(rgb: [u8; 3]) -> [f64; 3] {
    let mut od = [0.0; 3];
    for (d, &v) in od.iter_mut().zip(&rgb) {
        let t = v as f64 / 255.0;
        *d = if t > OD_EPSILON { -t.log10() } else { 0.0 };
    }
    od
}

/// Concentration back to an 8-bit transmittance value, round half up.
#[inline]
fn transmittance_u8(concentration: f64) -> u8 {
    let t = 10f64.powf(-concentration);
    if t >= 1.0 {
        255
    } else if t <= 0.0 {
        0
    } else {
        (t * 255.0 + 0.5) as u8
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn separator() -> StainSeparator {
        StainSeparator::new(StainMatrix::default()).expect("default matrix inverts")
    }

    fn checkerboard() -> DynamicImage {
        let mut img = image::RgbImage::new(2, 2);
        img.put_pixel(0, 0, Rgb([200, 120, 80]));
        img.put_pixel(1, 0, Rgb([90, 160, 210]));
        img.put_pixel(0, 1, Rgb([90, 160, 210]));
        img.put_pixel(1, 1, Rgb([200, 120, 80]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn residual_row_is_unit_cross_product() {
        let rows = separator().stain_vectors();
        for row in rows {
            let norm: f64 = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
        }
        let dot0: f64 = (0..3).map(|i| rows[0][i] * rows[2][i]).sum();
        let dot1: f64 = (0..3).map(|i| rows[1][i] * rows[2][i]).sum();
        assert!(dot0.abs() < 1e-12 && dot1.abs() < 1e-12);
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let matrix = StainMatrix::default().normalized();
        let inv = matrix.inverse().expect("invertible");
        for i in 0..3 {
            for j in 0..3 {
                let dot: f64 = (0..3).map(|k| inv[i][k] * matrix.rows[k][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9, "entry ({i},{j}) = {dot}");
            }
        }
    }

    #[test]
    fn all_zero_matrix_is_rejected() {
        let result = StainSeparator::new(StainMatrix { rows: [[0.0; 3]; 3] });
        assert!(matches!(result, Err(FeatureError::SingularStainMatrix)));
    }

    #[test]
    fn separation_is_deterministic() {
        let sep = separator();
        let image = checkerboard();
        let a = sep.separate(&image);
        let b = sep.separate(&image);
        assert_eq!(a.hematoxylin.as_raw(), b.hematoxylin.as_raw());
        assert_eq!(a.eosin.as_raw(), b.eosin.as_raw());
        assert_eq!(a.residual.as_raw(), b.residual.as_raw());
        assert!(a.separated);
    }

    #[test]
    fn epsilon_boundary_density_is_zero() {
        assert_eq!(optical_density([1, 1, 1]), [0.0; 3]);
        // Zero transmittance is clamped the same way.
        assert_eq!(optical_density([0, 0, 0]), [0.0; 3]);
        // One step above the cutoff is a genuine density.
        assert!(optical_density([2, 2, 2])[0] > 0.0);
    }

    #[test]
    fn zero_density_pixel_maps_to_full_transmittance() {
        let sep = separator();
        let mut img = image::RgbImage::new(1, 1);
        img.put_pixel(0, 0, Rgb([1, 1, 1]));
        let channels = sep.separate(&DynamicImage::ImageRgb8(img));
        assert_eq!(channels.hematoxylin.get_pixel(0, 0).0[0], 255);
        assert_eq!(channels.eosin.get_pixel(0, 0).0[0], 255);
        assert_eq!(channels.residual.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn densities_round_trip_through_unmixing() {
        let sep = separator();
        let rows = sep.stain_vectors();
        let image = checkerboard().to_rgb8();
        for pixel in image.pixels() {
            let od = optical_density(pixel.0);
            let conc = sep.unmix_densities(od);
            // Applying the normalized matrix to the concentrations must
            // recover the densities.
            for ch in 0..3 {
                let rebuilt: f64 = (0..3).map(|k| rows[ch][k] * conc[k]).sum();
                assert!((rebuilt - od[ch]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn non_rgb_input_degrades_to_grayscale() {
        let sep = separator();
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, image::Luma([7])));
        let channels = sep.separate(&gray);
        assert!(!channels.separated);
        assert_eq!(channels.hematoxylin, channels.eosin);
        assert_eq!(channels.hematoxylin.get_pixel(1, 1).0[0], 7);
    }
}
