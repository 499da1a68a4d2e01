use std::time::{Duration, Instant};

/// Age-weighted smallest-of-window filter, used for path delay: true wire
/// delay is a lower bound, so noise only ever pushes a measurement up, and
/// the minimum observed over a recent window is the best available estimate.
#[derive(Debug, Clone)]
pub struct SmallestOfWindow {
    max_samples: usize,
    timeout: Duration,
    ageing_coefficient: f64,
    entries: Vec<(f64, Instant)>,
}

impl SmallestOfWindow {
    pub fn new(max_samples: usize, timeout: Duration, ageing_coefficient: f64) -> Self {
        SmallestOfWindow {
            max_samples: max_samples.clamp(1, 25),
            timeout,
            ageing_coefficient,
            entries: Vec::new(),
        }
    }

    /// Insert `sample` observed at `now`, evict entries older than the
    /// configured timeout (and the oldest entry if the window is still
    /// full), then return the age-penalized minimum over the window.
    pub fn update(&mut self, sample: f64, now: Instant) -> f64 {
        self.entries
            .retain(|(_, inserted)| now.duration_since(*inserted) <= self.timeout);

        if self.entries.len() >= self.max_samples {
            // Oldest first since entries are pushed in arrival order.
            self.entries.remove(0);
        }
        self.entries.push((sample, now));

        self.entries
            .iter()
            .map(|(delay, inserted)| {
                *delay + self.ageing_coefficient * now.duration_since(*inserted).as_secs_f64()
            })
            .fold(f64::INFINITY, f64::min)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
