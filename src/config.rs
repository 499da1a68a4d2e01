//! On-disk configuration (§6): a plain serde/JSON document loaded once at
//! startup. Parsing the file from a path and validating CLI overrides is
//! `main`'s job; this module only defines the shape and its defaults.

use crate::servo::{ServoConfig, StepMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One physical clock this daemon may discipline (a NIC's PHC, or the
/// system clock). Named so port/PPS configs can reference it and the
/// engine can refuse to bind two active ports to the same clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    pub name: String,
    /// `/dev/ptp0`-style device, or "system" for `CLOCK_REALTIME`.
    pub device: String,
    pub max_freq_adjustment_ppb: f64,
    /// Where the persisted frequency-correction baseline is read/written.
    pub persistence_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlFlagDefaults {
    pub clock_control: bool,
    pub timestamp_processing: bool,
}

impl Default for ControlFlagDefaults {
    fn default() -> Self {
        ControlFlagDefaults {
            clock_control: true,
            timestamp_processing: true,
        }
    }
}

/// Per-port IEEE 1588 configuration: identity, intervals (as
/// `logMessageInterval`-style powers of two seconds), and the servo it
/// drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtpPortConfig {
    pub interface: String,
    pub clock_name: String,
    pub domain_number: u8,
    pub priority1: u8,
    pub priority2: u8,
    pub slave_only: bool,
    pub log_announce_interval: i8,
    pub log_sync_interval: i8,
    pub log_min_delay_req_interval: i8,
    pub log_min_pdelay_req_interval: i8,
    pub announce_receipt_timeout: u8,
    /// Consecutive hybrid (unicast) delay-resp losses tolerated before
    /// falling back to multicast delay request/response.
    pub hybrid_fallback_threshold: u32,
    pub servo: ServoConfig,
}

impl Default for PtpPortConfig {
    fn default() -> Self {
        PtpPortConfig {
            interface: "eth0".to_string(),
            clock_name: "eth0".to_string(),
            domain_number: 0,
            priority1: 128,
            priority2: 128,
            slave_only: true,
            log_announce_interval: 1,
            log_sync_interval: 0,
            log_min_delay_req_interval: 0,
            log_min_pdelay_req_interval: 0,
            announce_receipt_timeout: 3,
            hybrid_fallback_threshold: 3,
            servo: ServoConfig {
                step_threshold_ns: 1_000_000_000,
                step_mode: StepMode::SlewAndStep,
                ..ServoConfig::default()
            },
        }
    }
}

/// Per-instance PPS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpsConfig {
    pub device: String,
    pub clock_name: String,
    /// Name of the sync-module instance supplying time-of-day fusion.
    pub tod_source: String,
    pub notch_midpoint_ns: f64,
    pub notch_width_ns: f64,
    pub servo: ServoConfig,
}

impl Default for PpsConfig {
    fn default() -> Self {
        PpsConfig {
            device: "/dev/pps0".to_string(),
            clock_name: "system".to_string(),
            tod_source: "ntp0".to_string(),
            notch_midpoint_ns: 1.0e9,
            notch_width_ns: 1.0e8,
            servo: ServoConfig {
                step_threshold_ns: 500_000_000,
                step_mode: StepMode::SlewAndStep,
                ..ServoConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtpConfig {
    pub name: String,
    pub server: String,
    pub poll_interval_secs: u64,
}

impl Default for NtpConfig {
    fn default() -> Self {
        NtpConfig {
            name: "ntp0".to_string(),
            server: "pool.ntp.org".to_string(),
            poll_interval_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub clocks: Vec<ClockConfig>,
    pub ptp_ports: Vec<PtpPortConfig>,
    pub pps: Vec<PpsConfig>,
    pub ntp: Vec<NtpConfig>,
    pub control_flags: ControlFlagDefaults,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            clocks: vec![ClockConfig {
                name: "eth0".to_string(),
                device: "/dev/ptp0".to_string(),
                max_freq_adjustment_ppb: 500_000.0,
                persistence_path: PathBuf::from("/var/lib/syncored/eth0.freq"),
            }],
            ptp_ports: vec![PtpPortConfig::default()],
            pps: Vec::new(),
            ntp: vec![NtpConfig::default()],
            control_flags: ControlFlagDefaults::default(),
        }
    }
}

impl SystemConfig {
    pub fn clock(&self, name: &str) -> Option<&ClockConfig> {
        self.clocks.iter().find(|c| c.name == name)
    }

    /// Load from a JSON file; unset fields fall back to `Default`-derived
    /// structs only if present as empty objects, per `serde`'s usual rules
    /// for missing vs. explicit-empty.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SystemConfig = serde_json::from_str(&text)?;
        Ok(config)
    }
}
