//! Linux backend: `adjtimex`/`settimeofday` for the system clock, and the
//! kernel PPS API (`/dev/ppsN`) for 1-PPS edges.

use super::{PpsSource, SystemClock};
use anyhow::{anyhow, Result};
use libc::{self, adjtimex, settimeofday, timeval, timex, ADJ_FREQUENCY};
use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// ppm -> raw `adjtimex` freq units is `* 65536`; ppb is ppm/1000.
const PPB_TO_ADJTIMEX: f64 = 65.536;

pub struct LinuxClock {
    original_freq_raw: i64,
    correction_ppb: f64,
    max_freq_adjustment_ppb: f64,
    persistence_path: PathBuf,
}

impl LinuxClock {
    pub fn new(max_freq_adjustment_ppb: f64, persistence_path: PathBuf) -> Result<Self> {
        let mut tx: timex = unsafe { mem::zeroed() };
        tx.modes = 0; // query mode, no changes
        let ret = unsafe { adjtimex(&mut tx) };
        if ret < 0 {
            return Err(anyhow!("adjtimex query failed (are you root?)"));
        }

        let correction_ppb = std::fs::read_to_string(&persistence_path)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(LinuxClock {
            original_freq_raw: tx.freq,
            correction_ppb,
            max_freq_adjustment_ppb,
            persistence_path,
        })
    }
}

impl SystemClock for LinuxClock {
    fn now(&self) -> Result<SystemTime> {
        Ok(SystemTime::now())
    }

    fn adjust_frequency(&mut self, ppb: f64) -> Result<()> {
        let clamped = ppb.clamp(-self.max_freq_adjustment_ppb, self.max_freq_adjustment_ppb);
        let freq_raw = (clamped * PPB_TO_ADJTIMEX) as i64;

        let mut tx: timex = unsafe { mem::zeroed() };
        tx.modes = ADJ_FREQUENCY;
        tx.freq = freq_raw;

        let ret = unsafe { adjtimex(&mut tx) };
        if ret < 0 {
            return Err(anyhow!("adjtimex failed to set frequency"));
        }
        self.correction_ppb = clamped;
        Ok(())
    }

    fn step_clock(&mut self, offset: Duration, sign: i8) -> Result<()> {
        let mut tv: timeval = unsafe { mem::zeroed() };
        unsafe { libc::gettimeofday(&mut tv, std::ptr::null_mut()) };

        let offset_sec = offset.as_secs() as i64;
        let offset_usec = offset.subsec_micros() as i64;

        if sign > 0 {
            tv.tv_sec += offset_sec;
            tv.tv_usec += offset_usec;
        } else {
            tv.tv_sec -= offset_sec;
            tv.tv_usec -= offset_usec;
        }

        while tv.tv_usec >= 1_000_000 {
            tv.tv_sec += 1;
            tv.tv_usec -= 1_000_000;
        }
        while tv.tv_usec < 0 {
            tv.tv_sec -= 1;
            tv.tv_usec += 1_000_000;
        }

        let ret = unsafe { settimeofday(&tv, std::ptr::null()) };
        if ret < 0 {
            return Err(anyhow!(
                "settimeofday failed: errno={}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(())
    }

    fn freq_correction(&self) -> f64 {
        self.correction_ppb
    }

    fn save_freq_correction(&self, ppb: f64) -> Result<()> {
        if let Some(parent) = self.persistence_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.persistence_path, format!("{ppb}\n"))?;
        Ok(())
    }

    fn max_freq_adjustment(&self) -> f64 {
        self.max_freq_adjustment_ppb
    }

    fn compare(&self, other: &dyn SystemClock) -> Result<Ordering> {
        Ok(self.now()?.cmp(&other.now()?))
    }
}

impl Drop for LinuxClock {
    fn drop(&mut self) {
        let mut tx: timex = unsafe { mem::zeroed() };
        tx.modes = ADJ_FREQUENCY;
        tx.freq = self.original_freq_raw;
        unsafe {
            adjtimex(&mut tx);
        }
    }
}

// Linux kernel PPS API (uapi/linux/pps.h), reproduced in the field layout
// the kernel expects; not exposed by `libc` or `nix`.
#[repr(C)]
#[derive(Clone, Copy)]
struct PpsKtime {
    sec: i64,
    nsec: i32,
    flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PpsKinfo {
    assert_sequence: u32,
    clear_sequence: u32,
    assert_tu: PpsKtime,
    clear_tu: PpsKtime,
    current_mode: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PpsFdata {
    info: PpsKinfo,
    timeout: PpsKtime,
}

const PPS_IOC_MAGIC: u8 = b'p';

nix::ioctl_readwrite!(pps_fetch_ioctl, PPS_IOC_MAGIC, 0xa4, PpsFdata);

pub struct LinuxPps {
    file: File,
    enabled: bool,
}

impl LinuxPps {
    pub fn open(device: &str) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(device)?;
        Ok(LinuxPps {
            file,
            enabled: false,
        })
    }
}

impl PpsSource for LinuxPps {
    fn pps_enable(&mut self) -> Result<()> {
        self.enabled = true;
        Ok(())
    }

    fn pps_disable(&mut self) -> Result<()> {
        self.enabled = false;
        Ok(())
    }

    fn pps_fetch(&mut self, timeout: Duration) -> Result<SystemTime> {
        if !self.enabled {
            return Err(anyhow!("pps source not enabled"));
        }
        let mut data = PpsFdata {
            info: PpsKinfo {
                assert_sequence: 0,
                clear_sequence: 0,
                assert_tu: PpsKtime {
                    sec: 0,
                    nsec: 0,
                    flags: 0,
                },
                clear_tu: PpsKtime {
                    sec: 0,
                    nsec: 0,
                    flags: 0,
                },
                current_mode: 0,
            },
            timeout: PpsKtime {
                sec: timeout.as_secs() as i64,
                nsec: timeout.subsec_nanos() as i32,
                flags: 1, // PPS_TIME_INVALID cleared => relative timeout requested
            },
        };

        let fd: RawFd = self.file.as_raw_fd();
        unsafe { pps_fetch_ioctl(fd, &mut data) }
            .map_err(|e| anyhow!("PPS_FETCH ioctl failed: {e}"))?;

        let assert = &data.info.assert_tu;
        Ok(UNIX_EPOCH + Duration::new(assert.sec as u64, assert.nsec as u32))
    }

    fn pps_fd(&self) -> i32 {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppm_to_freq_val_conversion() {
        fn ppb_to_freq_val(ppb: f64) -> i64 {
            (ppb * PPB_TO_ADJTIMEX) as i64
        }

        assert_eq!(ppb_to_freq_val(0.0), 0);
        let freq_100ppm = ppb_to_freq_val(100_000.0);
        assert!((freq_100ppm - 6_553_600).abs() <= 1, "got {freq_100ppm}");
        let freq_neg100ppm = ppb_to_freq_val(-100_000.0);
        assert!((freq_neg100ppm + 6_553_600).abs() <= 1, "got {freq_neg100ppm}");
    }

    #[test]
    fn tv_usec_normalization() {
        fn normalize_timeval(tv_sec: &mut i64, tv_usec: &mut i64) {
            while *tv_usec >= 1_000_000 {
                *tv_sec += 1;
                *tv_usec -= 1_000_000;
            }
            while *tv_usec < 0 {
                *tv_sec -= 1;
                *tv_usec += 1_000_000;
            }
        }

        let (mut sec, mut usec) = (10, 1_500_000);
        normalize_timeval(&mut sec, &mut usec);
        assert_eq!((sec, usec), (11, 500_000));

        let (mut sec, mut usec) = (10, -500_000);
        normalize_timeval(&mut sec, &mut usec);
        assert_eq!((sec, usec), (9, 500_000));
    }

    #[test]
    fn step_offset_calculation() {
        fn apply_step(base_sec: i64, base_usec: i64, offset: Duration, sign: i8) -> (i64, i64) {
            let offset_sec = offset.as_secs() as i64;
            let offset_usec = offset.subsec_micros() as i64;
            let (mut tv_sec, mut tv_usec) = (base_sec, base_usec);
            if sign > 0 {
                tv_sec += offset_sec;
                tv_usec += offset_usec;
            } else {
                tv_sec -= offset_sec;
                tv_usec -= offset_usec;
            }
            while tv_usec >= 1_000_000 {
                tv_sec += 1;
                tv_usec -= 1_000_000;
            }
            while tv_usec < 0 {
                tv_sec -= 1;
                tv_usec += 1_000_000;
            }
            (tv_sec, tv_usec)
        }

        let (sec, usec) = apply_step(100, 250_000, Duration::from_micros(1_500_000), 1);
        assert_eq!((sec, usec), (101, 750_000));
        let (sec, usec) = apply_step(100, 250_000, Duration::from_micros(1_500_000), -1);
        assert_eq!((sec, usec), (98, 750_000));
    }
}
