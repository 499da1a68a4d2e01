use std::time::Instant;

/// Proportional-integral-derivative controller producing a frequency
/// correction from a phase/period error.
///
/// Interval-aware: when fed a monotonic timestamp alongside each sample, it
/// tracks a rolling average update interval and clamps any single interval
/// that is more than double the average (a burst of delayed ticks) down to
/// the average, so a backlog of queued samples does not get double-counted
/// into the integral term.
#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    i_max: f64,
    configured_interval: f64,

    integral: f64,
    previous_delta: f64,
    last_update: Option<Instant>,
    average_interval: f64,
}

impl Pid {
    /// `i_max <= 0.0` disables integral clamping.
    pub fn new(kp: f64, ki: f64, kd: f64, i_max: f64, configured_interval_secs: f64) -> Self {
        Pid {
            kp,
            ki,
            kd,
            i_max,
            configured_interval: configured_interval_secs.max(f64::EPSILON),
            integral: 0.0,
            previous_delta: 0.0,
            last_update: None,
            average_interval: configured_interval_secs.max(f64::EPSILON),
        }
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_delta = 0.0;
        self.last_update = None;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Feed a new error sample. `time`, when given, is used to derive the
    /// actual elapsed interval for the integral and derivative terms;
    /// without it the configured nominal interval is assumed.
    pub fn update(&mut self, delta: f64, time: Option<Instant>) -> f64 {
        let interval = match (time, self.last_update) {
            (Some(now), Some(prev)) => {
                let raw = (now - prev).as_secs_f64().max(f64::EPSILON);
                // Smooth the interval estimate, then reject bursts that are
                // more than double the rolling average.
                self.average_interval = 0.9 * self.average_interval + 0.1 * raw;
                if raw > 2.0 * self.average_interval {
                    self.average_interval
                } else {
                    raw
                }
            }
            _ => self.configured_interval,
        };
        if let Some(now) = time {
            self.last_update = Some(now);
        }

        let p = self.kp * delta;

        self.integral += self.ki * delta * interval;
        if self.i_max > 0.0 {
            self.integral = self.integral.clamp(-self.i_max, self.i_max);
        }

        let d = self.kd * (delta - self.previous_delta) / interval;
        self.previous_delta = delta;

        p + self.integral + d
    }
}
