use serde::{Deserialize, Serialize};

/// First- through fourth-order intensity statistics of one region against
/// one 8-bit image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IntensityStats {
    pub mean: f64,
    pub stddev: f64,
    pub mode: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub skew: f64,
    pub kurt: f64,
}

impl IntensityStats {
    /// Zero block, used for regions with no measurable pixels and for the
    /// stain features of images where separation was unavailable.
    pub const ZERO: Self = Self {
        mean: 0.0,
        stddev: 0.0,
        mode: 0.0,
        min: 0.0,
        max: 0.0,
        median: 0.0,
        skew: 0.0,
        kurt: 0.0,
    };
}

/// Streaming accumulator: 256-bin histogram plus raw power sums.
#[derive(Debug, Clone)]
pub(crate) struct IntensityAccum {
    histogram: [u64; 256],
    n: u64,
    s1: f64,
    s2: f64,
    s3: f64,
    s4: f64,
}

impl IntensityAccum {
    pub(crate) fn new() -> Self {
        Self {
            histogram: [0; 256],
            n: 0,
            s1: 0.0,
            s2: 0.0,
            s3: 0.0,
            s4: 0.0,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, value: u8) {
        self.histogram[value as usize] += 1;
        let v = value as f64;
        let v2 = v * v;
        self.n += 1;
        self.s1 += v;
        self.s2 += v2;
        self.s3 += v2 * v;
        self.s4 += v2 * v2;
    }

    pub(crate) fn count(&self) -> u64 {
        self.n
    }

    pub(crate) fn sum(&self) -> f64 {
        self.s1
    }

    pub(crate) fn finish(&self) -> IntensityStats {
        if self.n == 0 {
            return IntensityStats::ZERO;
        }
        let n = self.n as f64;
        let mean = self.s1 / n;

        // Sample standard deviation; higher moments use the population
        // variance, with zero-variance regions defined as skew = kurt = 0.
        let stddev = if self.n > 1 {
            let ss = (n * self.s2 - self.s1 * self.s1) / n;
            if ss > 0.0 {
                (ss / (n - 1.0)).sqrt()
            } else {
                0.0
            }
        } else {
            0.0
        };
        let variance = (self.s2 / n - mean * mean).max(0.0);
        let sd = variance.sqrt();
        let (skew, kurt) = if sd > 1e-10 {
            let skew =
                ((self.s3 - 3.0 * mean * self.s2) / n + 2.0 * mean * mean * mean) / (variance * sd);
            let kurt = ((self.s4 - 4.0 * mean * self.s3 + 6.0 * mean * mean * self.s2) / n
                - 3.0 * mean * mean * mean * mean)
                / (variance * variance)
                - 3.0;
            (skew, kurt)
        } else {
            (0.0, 0.0)
        };

        let mut min = 255usize;
        let mut max = 0usize;
        let mut mode = 0usize;
        let mut mode_count = 0u64;
        for (level, &count) in self.histogram.iter().enumerate() {
            if count == 0 {
                continue;
            }
            min = min.min(level);
            max = max.max(level);
            if count > mode_count {
                mode_count = count;
                mode = level;
            }
        }

        let half = self.n / 2;
        let mut cumulative = 0u64;
        let mut median = 0usize;
        for (level, &count) in self.histogram.iter().enumerate() {
            cumulative += count;
            if cumulative > half {
                median = level;
                break;
            }
        }

        IntensityStats {
            mean,
            stddev,
            mode: mode as f64,
            min: min as f64,
            max: max as f64,
            median: median as f64,
            skew,
            kurt,
        }
    }
}
