use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Soft alarms (§7): never fatal, never change port state by
    /// themselves, clear automatically once their condition has ceased for
    /// one full interval.
    #[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Alarms: u32 {
        const NO_SYNC_PKTS       = 1 << 0;
        const NO_FOLLOW_UPS      = 1 << 1;
        const NO_DELAY_RESPS     = 1 << 2;
        const SERVO_FAIL         = 1 << 3;
        const NO_INTERFACE       = 1 << 4;
        const NO_TX_TIMESTAMPS   = 1 << 5;
        const NO_RX_TIMESTAMPS   = 1 << 6;
        const NO_PPS_SIGNAL      = 1 << 7;
        /// PPS period measurement fell outside the notch filter's band;
        /// clears once three consecutive periods land back inside it.
        const PPS_BAD_SIGNAL     = 1 << 8;
    }
}

/// Status of a single sync module instance (one PTP port, or one PPS
/// instance), as shared read-only with the engine thread and external
/// consumers via an atomically-swapped snapshot.
///
/// This is the per-instance record; the full `Status` an engine publishes
/// is a `Vec` of these. Field names match the persistent-state keys
/// written on `SaveState` (`clock-name`, `clock-id`, ...).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InstanceStatus {
    /// Human-readable name of the clock this instance disciplines.
    pub clock_name: String,

    /// 8-octet clock identity of the underlying physical clock.
    pub clock_id: [u8; 8],

    /// Port/module state, e.g. "Slave", "Master", "Listening".
    pub state: String,

    /// Soft alarm bitfield; see `Alarms`.
    pub alarms: Alarms,

    /// Control flags currently in effect; see `message::ControlFlags`.
    pub control_flags: u32,

    /// Name of the bound network interface, or PPS device path.
    pub interface: String,

    /// Current phase offset from the selected master/reference (ns).
    pub offset_from_master_ns: i64,

    /// Frequency adjustment currently applied to the clock (ppb).
    pub freq_adjustment_ppb: f64,

    /// True once the servo has held `offset_from_master_ns` within the
    /// configured convergence threshold for the configured window.
    pub in_sync: bool,

    /// BMCA clustering/quality score, used by `WriteTopology`.
    pub clustering_score: f64,

    /// Unix timestamp (seconds) of the last update to this record.
    pub updated_unix_secs: u64,

    /// Count of clock steps applied since this instance started.
    pub clock_steps: u64,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        InstanceStatus {
            clock_name: String::new(),
            clock_id: [0; 8],
            state: "Initializing".to_string(),
            alarms: Alarms::empty(),
            control_flags: 0,
            interface: String::new(),
            offset_from_master_ns: 0,
            freq_adjustment_ppb: 0.0,
            in_sync: false,
            clustering_score: 0.0,
            updated_unix_secs: 0,
            clock_steps: 0,
        }
    }
}

impl InstanceStatus {
    /// Render as the plain-text block written on `SaveState` (§6).
    pub fn to_persistent_text(&self) -> String {
        format!(
            "clock-name: {}\nclock-id: {}\nstate: {}\nalarms: {:#x}\ncontrol-flags: {:#x}\ninterface: {}\noffset-from-master: {}\nfreq-adjustment-ppb: {}\nin-sync: {}\nclustering-score: {}\n",
            self.clock_name,
            self.clock_id
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":"),
            self.state,
            self.alarms.bits(),
            self.control_flags,
            self.interface,
            self.offset_from_master_ns,
            self.freq_adjustment_ppb,
            self.in_sync,
            self.clustering_score,
        )
    }
}

/// Aggregate status across every sync-module instance the engine owns.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Status {
    pub instances: Vec<InstanceStatus>,
}

impl Status {
    pub fn find(&self, clock_name: &str) -> Option<&InstanceStatus> {
        self.instances.iter().find(|i| i.clock_name == clock_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_status_default() {
        let status = InstanceStatus::default();
        assert_eq!(status.offset_from_master_ns, 0);
        assert!(!status.in_sync);
        assert_eq!(status.state, "Initializing");
    }

    #[test]
    fn instance_status_serde_roundtrip() {
        let mut status = InstanceStatus {
            clock_name: "eth0".to_string(),
            ..InstanceStatus::default()
        };
        status.in_sync = true;
        status.state = "Slave".to_string();
        status.alarms = Alarms::NO_PPS_SIGNAL;
        status.offset_from_master_ns = 150;

        let json = serde_json::to_string(&status).expect("serialize failed");
        let restored: InstanceStatus = serde_json::from_str(&json).expect("deserialize failed");

        assert_eq!(restored.in_sync, true);
        assert_eq!(restored.state, "Slave");
        assert_eq!(restored.alarms, Alarms::NO_PPS_SIGNAL);
        assert_eq!(restored.offset_from_master_ns, 150);
    }

    #[test]
    fn persistent_text_contains_expected_keys() {
        let status = InstanceStatus {
            clock_name: "eth0".to_string(),
            clock_id: [0xAA; 8],
            ..InstanceStatus::default()
        };
        let text = status.to_persistent_text();
        assert!(text.contains("clock-name: eth0"));
        assert!(text.contains("clock-id: aa:aa:aa:aa:aa:aa:aa:aa"));
        assert!(text.contains("in-sync: false"));
    }

    #[test]
    fn status_finds_instance_by_name() {
        let status = Status {
            instances: vec![InstanceStatus {
                clock_name: "eth0".to_string(),
                ..InstanceStatus::default()
            }],
        };
        assert!(status.find("eth0").is_some());
        assert!(status.find("eth1").is_none());
    }
}
