//! Shared cascade servo used by both the PTP port engine and the PPS
//! module: outlier rejection on path delay, smallest-of-window, FIR
//! smoothing, PID control, saturation, and the clock-step decision.
//!
//! The proportional/integral math here used to be this file's entire
//! content, as a standalone `PiServo`; it now lives inside `filters::Pid`
//! (with a derivative term and interval awareness added) and is just the
//! middle stage of the cascade assembled below.

use crate::filters::{Fir, Peirce, Pid, SmallestOfWindow};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepMode {
    SlewOnly,
    SlewAndStep,
    StepAtStartup,
    StepForwardOnly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServoConfig {
    pub stiffness: usize,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub i_max_ppb: f64,
    pub max_ppb: f64,
    pub step_threshold_ns: i64,
    pub step_mode: StepMode,
    pub nominal_interval_secs: f64,
    pub path_delay_outlier_window: usize,
    pub path_delay_outlier_weighting: f64,
    pub path_delay_window_samples: usize,
    pub path_delay_window_timeout: Duration,
    pub path_delay_ageing_coefficient: f64,
    pub convergence_window: Duration,
    pub convergence_threshold_ns: i64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        ServoConfig {
            stiffness: 4,
            kp: 0.5,
            ki: 0.05,
            kd: 0.0,
            i_max_ppb: 100_000.0,
            max_ppb: 500_000.0,
            step_threshold_ns: 1_000_000_000,
            step_mode: StepMode::SlewAndStep,
            nominal_interval_secs: 1.0,
            path_delay_outlier_window: 20,
            path_delay_outlier_weighting: 0.0,
            path_delay_window_samples: 8,
            path_delay_window_timeout: Duration::from_secs(16),
            path_delay_ageing_coefficient: 0.0,
            convergence_window: Duration::from_secs(30),
            convergence_threshold_ns: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoAction {
    /// Step the local clock by `-offset_ns`.
    Step { offset_ns: i64 },
    AdjustFrequency { ppb: f64 },
}

pub struct Servo {
    config: ServoConfig,
    fir: Fir,
    pid: Pid,
    path_delay_outlier: Peirce,
    path_delay_window: SmallestOfWindow,
    frequency_correction_ppb: f64,
    frequency_adjustment_ppb: f64,
    clock_control_enabled: bool,
    clock_steps: u64,
    convergence_started: Option<Instant>,
    synchronized: bool,
}

impl Servo {
    pub fn new(config: ServoConfig) -> Self {
        let pid = Pid::new(
            config.kp,
            config.ki,
            config.kd,
            config.i_max_ppb,
            config.nominal_interval_secs,
        );
        Servo {
            fir: Fir::new(config.stiffness),
            pid,
            path_delay_outlier: Peirce::new(
                config.path_delay_outlier_window,
                config.path_delay_outlier_weighting,
            ),
            path_delay_window: SmallestOfWindow::new(
                config.path_delay_window_samples,
                config.path_delay_window_timeout,
                config.path_delay_ageing_coefficient,
            ),
            frequency_correction_ppb: 0.0,
            frequency_adjustment_ppb: 0.0,
            clock_control_enabled: true,
            clock_steps: 0,
            convergence_started: None,
            synchronized: false,
            config,
        }
    }

    pub fn set_clock_control(&mut self, enabled: bool) {
        self.clock_control_enabled = enabled;
    }

    pub fn clock_steps(&self) -> u64 {
        self.clock_steps
    }

    pub fn synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn frequency_correction(&self) -> f64 {
        self.frequency_correction_ppb
    }

    pub fn set_frequency_correction(&mut self, ppb: f64) {
        self.frequency_correction_ppb = ppb;
    }

    /// Fold the currently applied adjustment into the persisted baseline
    /// (called on `SaveState`, and before a clock step so the post-step
    /// frequency doesn't regress to zero).
    pub fn commit_frequency_correction(&mut self) {
        self.frequency_correction_ppb += self.frequency_adjustment_ppb;
        self.frequency_adjustment_ppb = 0.0;
    }

    /// Feed a raw path-delay measurement through the outlier + smallest-of-
    /// window stages; the port/PPS engine folds the result into the offset
    /// it then passes to `process`.
    pub fn filter_path_delay(&mut self, raw_path_delay_ns: f64, now: Instant) -> f64 {
        let _ = self.path_delay_outlier.update(raw_path_delay_ns);
        let mean = self.path_delay_outlier.mean();
        let sd = self.path_delay_outlier.stddev().max(1.0);
        let candidate = if (raw_path_delay_ns - mean).abs() > sd * 8.0 {
            mean
        } else {
            raw_path_delay_ns
        };
        self.path_delay_window.update(candidate, now)
    }

    fn should_step(&self, offset_ns: i64) -> bool {
        if !self.clock_control_enabled {
            return false;
        }
        if offset_ns.unsigned_abs() as i64 <= self.config.step_threshold_ns {
            return false;
        }
        match self.config.step_mode {
            StepMode::SlewOnly => false,
            StepMode::SlewAndStep => true,
            StepMode::StepAtStartup => self.clock_steps == 0,
            StepMode::StepForwardOnly => offset_ns < 0,
        }
    }

    fn reset_filters(&mut self) {
        self.fir.reset();
        self.pid.reset();
        self.path_delay_outlier.reset();
        self.path_delay_window.reset();
        self.convergence_started = None;
        self.synchronized = false;
    }

    fn track_convergence(&mut self, offset_ns: i64, now: Instant) {
        if offset_ns.unsigned_abs() as i64 > self.config.convergence_threshold_ns {
            self.convergence_started = None;
            self.synchronized = false;
            return;
        }
        match self.convergence_started {
            None => self.convergence_started = Some(now),
            Some(start) => {
                if now.duration_since(start) >= self.config.convergence_window {
                    self.synchronized = true;
                }
            }
        }
    }

    /// Run the full cascade on a phase-offset sample (local - master,
    /// positive when the local clock is ahead).
    pub fn process(&mut self, offset_ns: i64, now: Instant) -> ServoAction {
        if self.should_step(offset_ns) {
            self.commit_frequency_correction();
            self.reset_filters();
            self.clock_steps += 1;
            debug!(
                "servo: stepping clock by {} ns (step #{})",
                -offset_ns,
                self.clock_steps
            );
            return ServoAction::Step { offset_ns };
        }

        let smoothed = self.fir.update(-offset_ns as f64);
        let pid_out = self.pid.update(smoothed, Some(now));
        let saturated = pid_out.clamp(-self.config.max_ppb, self.config.max_ppb);
        self.frequency_adjustment_ppb = saturated;
        self.track_convergence(offset_ns, now);

        let total = self.frequency_correction_ppb + saturated;
        debug!(
            "servo: offset={offset_ns}ns fir={smoothed:.3} pid={saturated:.3} total={total:.3}ppb"
        );
        ServoAction::AdjustFrequency { ppb: total }
    }
}
