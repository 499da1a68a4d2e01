use super::FilterError;

/// Minimum samples before rejection is attempted; below this the running
/// standard deviation is too noisy to trust.
const WARMUP_SAMPLES: usize = 5;

/// Peirce's criterion threshold (in standard deviations) for rejecting a
/// single doubtful observation among `n` samples, for `n` in `[5, 20]`.
/// Values beyond 20 are linearly extrapolated towards the `n = 60` bound;
/// Peirce's table flattens out in that range and the exact value matters
/// far less than simply not over-rejecting as the window grows.
const TABLE_5_20: [f64; 16] = [
    1.509, 1.610, 1.693, 1.763, 1.824, 1.878, 1.925, 1.969, 2.007, 2.043, 2.076, 2.106, 2.134,
    2.161, 2.185, 2.209,
];
const TABLE_20_VALUE: f64 = 2.209;
const TABLE_60_VALUE: f64 = 2.64;

fn rejection_threshold(n: usize) -> f64 {
    let n = n.clamp(WARMUP_SAMPLES, 60);
    if n <= 20 {
        TABLE_5_20[n - WARMUP_SAMPLES]
    } else {
        let t = (n - 20) as f64 / (60 - 20) as f64;
        TABLE_20_VALUE + t * (TABLE_60_VALUE - TABLE_20_VALUE)
    }
}

/// Outlier filter based on Peirce's criterion: samples more than the
/// table-indexed number of standard deviations from the running mean are
/// rejected and replaced in the window by a value pulled towards the mean
/// (weighted by `outlier_weighting`) rather than discarded outright, so a
/// single bad sample does not leave a hole in the running statistics.
#[derive(Debug, Clone)]
pub struct Peirce {
    outlier_weighting: f64,
    buffer: Vec<f64>,
    write_index: usize,
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl Peirce {
    /// `max_samples` must be in `[5, 60]`; `outlier_weighting` in `[0, 1]`
    /// (0 = replace rejected samples with the mean, 1 = accept them as-is
    /// into the window while still reporting the rejection).
    pub fn new(max_samples: usize, outlier_weighting: f64) -> Self {
        let max_samples = max_samples.clamp(5, 60);
        Peirce {
            outlier_weighting: outlier_weighting.clamp(0.0, 1.0),
            buffer: vec![0.0; max_samples],
            write_index: 0,
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = (self.sum_sq / self.count as f64 - mean * mean).max(0.0);
        variance.sqrt()
    }

    fn insert(&mut self, x: f64) {
        if self.count == self.buffer.len() {
            let old = self.buffer[self.write_index];
            self.sum -= old;
            self.sum_sq -= old * old;
        } else {
            self.count += 1;
        }
        self.buffer[self.write_index] = x;
        self.sum += x;
        self.sum_sq += x * x;
        self.write_index = (self.write_index + 1) % self.buffer.len();
    }

    /// Feed a new sample. `Ok(())` means it was accepted as-is; `Err` means
    /// it was judged an outlier and a mean-pulled replacement was inserted
    /// into the window instead.
    pub fn update(&mut self, x: f64) -> Result<(), FilterError> {
        if self.count < WARMUP_SAMPLES {
            self.insert(x);
            return Ok(());
        }

        let mean = self.mean();
        let sd = self.stddev();
        if sd <= f64::EPSILON {
            self.insert(x);
            return Ok(());
        }

        let z = (x - mean).abs() / sd;
        let threshold = rejection_threshold(self.count);
        if z > threshold {
            let replacement = mean + self.outlier_weighting * (x - mean);
            self.insert(replacement);
            Err(FilterError::OutOfRange)
        } else {
            self.insert(x);
            Ok(())
        }
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.count = 0;
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_rejects_below_warmup() {
        let mut filter = Peirce::new(10, 0.0);
        for x in [1.0, 100.0, -50.0, 2.0] {
            assert!(filter.update(x).is_ok());
        }
    }

    #[test]
    fn rejects_gross_outlier_after_warmup() {
        let mut filter = Peirce::new(20, 0.0);
        for _ in 0..10 {
            filter.update(10.0).unwrap();
        }
        assert!(filter.update(10_000.0).is_err());
    }

    #[test]
    fn accepts_consistent_samples_after_warmup() {
        let mut filter = Peirce::new(20, 0.0);
        for _ in 0..10 {
            assert!(filter.update(10.0).is_ok());
        }
        assert!(filter.update(10.2).is_ok());
    }

    #[test]
    fn reset_clears_statistics() {
        let mut filter = Peirce::new(10, 0.0);
        for _ in 0..6 {
            filter.update(5.0).unwrap();
        }
        filter.reset();
        assert_eq!(filter.mean(), 0.0);
        assert!(filter.update(1.0).is_ok());
    }
}
