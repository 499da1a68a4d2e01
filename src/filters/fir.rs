/// Ring-buffer mean filter ("stiffness" samples wide).
///
/// `stiffness` of 1 passes values through unchanged; larger values trade
/// responsiveness for smoothing. Mirrors the accumulate-then-average shape
/// of a moving average, but keeps only the configured number of slots so
/// memory use is bounded regardless of how long the filter has been running.
#[derive(Debug, Clone)]
pub struct Fir {
    buffer: Vec<f64>,
    write_index: usize,
    count: usize,
}

impl Fir {
    pub fn new(stiffness: usize) -> Self {
        let stiffness = stiffness.max(1);
        Fir {
            buffer: vec![0.0; stiffness],
            write_index: 0,
            count: 0,
        }
    }

    pub fn stiffness(&self) -> usize {
        self.buffer.len()
    }

    /// Insert `delta` and return the mean of the filled slots.
    pub fn update(&mut self, delta: f64) -> f64 {
        self.buffer[self.write_index] = delta;
        self.write_index = (self.write_index + 1) % self.buffer.len();
        if self.count < self.buffer.len() {
            self.count += 1;
        }
        let sum: f64 = self.buffer.iter().take(self.count).sum();
        sum / self.count as f64
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.count = 0;
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_at_stiffness_one() {
        let mut fir = Fir::new(1);
        assert_eq!(fir.update(5.0), 5.0);
        assert_eq!(fir.update(-3.0), -3.0);
    }

    #[test]
    fn mean_of_filled_slots_before_full() {
        let mut fir = Fir::new(4);
        assert_eq!(fir.update(4.0), 4.0);
        assert_eq!(fir.update(8.0), 6.0);
        assert_eq!(fir.update(0.0), 4.0);
    }

    #[test]
    fn mean_rolls_off_oldest_once_full() {
        let mut fir = Fir::new(2);
        fir.update(10.0);
        fir.update(20.0);
        // buffer full: [10, 20] -> mean 15
        assert_eq!(fir.update(0.0), 10.0); // [0, 20] (10 overwritten)
    }

    #[test]
    fn reset_clears_state() {
        let mut fir = Fir::new(3);
        fir.update(100.0);
        fir.reset();
        assert_eq!(fir.update(0.0), 0.0);
    }
}
