//! OS clock primitives (§6), abstracted behind traits so the servo can be
//! driven by either a system clock or a NIC's hardware clock without
//! caring which. Only a Linux backend is provided; cross-OS portability
//! beyond POSIX-like semantics is out of scope.

pub mod linux;

use anyhow::Result;
use std::cmp::Ordering;
use std::time::{Duration, SystemTime};

/// A clock the servo can read and discipline.
pub trait SystemClock {
    fn now(&self) -> Result<SystemTime>;

    /// Step the clock by `offset`, in the direction given by `sign`
    /// (positive steps forward, negative steps backward).
    fn step_clock(&mut self, offset: Duration, sign: i8) -> Result<()>;

    /// Apply a frequency correction, in parts-per-billion, on top of
    /// whatever baseline this clock is currently running at.
    fn adjust_frequency(&mut self, ppb: f64) -> Result<()>;

    /// Currently applied frequency correction (ppb).
    fn freq_correction(&self) -> f64;

    /// Persist `ppb` as this clock's baseline frequency correction, so a
    /// future restart resumes near the converged rate instead of 0.
    fn save_freq_correction(&self, ppb: f64) -> Result<()>;

    /// Maximum frequency adjustment this clock accepts (ppb), symmetric.
    fn max_freq_adjustment(&self) -> f64;

    /// Compare this clock's notion of now against another clock's,
    /// returning an `Ordering` (Less = this clock reads earlier).
    fn compare(&self, other: &dyn SystemClock) -> Result<Ordering> {
        let a = self.now()?;
        let b = other.now()?;
        Ok(a.cmp(&b))
    }
}

/// A clock that can additionally source 1-PPS edges, kept separate so a
/// `SystemClock` implementation without PPS hardware isn't forced to stub
/// it out.
pub trait PpsSource {
    fn pps_enable(&mut self) -> Result<()>;
    fn pps_disable(&mut self) -> Result<()>;

    /// Block (up to `timeout`) for the next PPS assert edge, returning its
    /// kernel-reported timestamp.
    fn pps_fetch(&mut self, timeout: Duration) -> Result<SystemTime>;

    /// Raw file descriptor, for use in an external poll/select wait set.
    fn pps_fd(&self) -> i32;
}
