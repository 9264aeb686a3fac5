// Welford online accumulator
// Single-pass running mean/variance; the baseline arenas hold one of these
// per entity, per (entity, hour) and per (entity, weekday)

use serde::{Deserialize, Serialize};

/// Z-score assigned when a constant history meets a deviating observation.
pub const Z_SATURATION: f64 = 1_000.0;

const SPREAD_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Sample standard deviation; needs at least two samples.
    pub fn sample_stddev(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        Some((self.m2 / (self.count - 1) as f64).sqrt())
    }

    /// Z-score of `value` against the samples pushed so far. None with fewer
    /// than two samples; a zero-spread history saturates rather than divides.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        let stddev = self.sample_stddev()?;
        if stddev > SPREAD_EPSILON {
            return Some((value - self.mean) / stddev);
        }
        let deviation = value - self.mean;
        if deviation.abs() <= SPREAD_EPSILON * self.mean.abs().max(1.0) {
            Some(0.0)
        } else {
            Some(deviation.signum() * Z_SATURATION)
        }
    }
}
