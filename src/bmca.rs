//! Best Master Clock Algorithm (IEEE 1588-2008/2019 §9.3): dataset
//! comparison (Figure 27/28) and state decision (Figure 26).

use crate::foreign_master::{ForeignMasterDataset, ForeignMasterRecord};
use crate::ptp::{ClockIdentity, ClockQuality, PortIdentity};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Our own clock's comparable dataset, built from local configuration
/// (IEEE 1588's `defaultDS`/`currentDS`/`parentDS`/`timePropertiesDS`).
#[derive(Debug, Clone, Copy)]
pub struct LocalDataset {
    pub priority1: u8,
    pub clock_identity: ClockIdentity,
    pub clock_quality: ClockQuality,
    pub priority2: u8,
    pub steps_removed: u16,
    pub slave_only: bool,
    pub has_ever_locked: bool,
    /// Port identity of our current parent, if we are a Slave; used to
    /// break topology ties in the "steps differ by 1" case.
    pub parent_port_identity: Option<PortIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Initializing,
    Faulty,
    Disabled,
    Listening,
    PreMaster,
    Master,
    Passive,
    Uncalibrated,
    Slave,
}

/// A candidate in the comparison: either a foreign record or our own
/// dataset presented as a virtual Announce.
struct Candidate<'a> {
    grandmaster_identity: ClockIdentity,
    priority1: u8,
    clock_quality: ClockQuality,
    priority2: u8,
    steps_removed: u16,
    sender_port_identity: PortIdentity,
    source: CandidateSource<'a>,
}

enum CandidateSource<'a> {
    Foreign(usize, &'a ForeignMasterRecord),
    Local,
}

fn local_candidate(local: &LocalDataset) -> Candidate<'static> {
    Candidate {
        grandmaster_identity: local.clock_identity,
        priority1: local.priority1,
        clock_quality: local.clock_quality,
        priority2: local.priority2,
        steps_removed: local.steps_removed,
        sender_port_identity: PortIdentity {
            clock_identity: local.clock_identity,
            port_number: 0,
        },
        source: CandidateSource::Local,
    }
}

fn foreign_candidate(index: usize, record: &ForeignMasterRecord) -> Candidate<'_> {
    Candidate {
        grandmaster_identity: record.announce.grandmaster_identity,
        priority1: record.announce.grandmaster_priority1,
        clock_quality: record.announce.grandmaster_clock_quality,
        priority2: record.announce.grandmaster_priority2,
        steps_removed: record.announce.steps_removed,
        sender_port_identity: record.port_identity,
        source: CandidateSource::Foreign(index, record),
    }
}

/// Dataset comparison per IEEE 1588 Figure 27/28. `Ordering::Less` means `a`
/// is a better master than `b`.
fn dataset_comparison(a: &Candidate, b: &Candidate, local: &LocalDataset) -> Ordering {
    if a.grandmaster_identity != b.grandmaster_identity {
        return a
            .priority1
            .cmp(&b.priority1)
            .then_with(|| a.clock_quality.clock_class.cmp(&b.clock_quality.clock_class))
            .then_with(|| {
                a.clock_quality
                    .clock_accuracy
                    .0
                    .cmp(&b.clock_quality.clock_accuracy.0)
            })
            .then_with(|| {
                a.clock_quality
                    .offset_scaled_log_variance
                    .cmp(&b.clock_quality.offset_scaled_log_variance)
            })
            .then_with(|| a.priority2.cmp(&b.priority2))
            .then_with(|| a.grandmaster_identity.0.cmp(&b.grandmaster_identity.0));
    }

    // Same grandmaster: topology comparison.
    let step_diff = a.steps_removed as i32 - b.steps_removed as i32;
    if step_diff.abs() > 1 {
        return a.steps_removed.cmp(&b.steps_removed);
    }
    if step_diff == 1 {
        // `a` is one hop further than `b`; `b` wins on raw step count
        // unless `a`'s sender is our current parent, in which case we keep
        // tracking it rather than flap to a marginally-shorter-path master.
        if Some(a.sender_port_identity) == local.parent_port_identity {
            return Ordering::Less;
        }
        return Ordering::Greater;
    }
    if step_diff == -1 {
        if Some(b.sender_port_identity) == local.parent_port_identity {
            return Ordering::Greater;
        }
        return Ordering::Less;
    }

    a.sender_port_identity
        .clock_identity
        .0
        .cmp(&b.sender_port_identity.clock_identity.0)
        .then_with(|| {
            a.sender_port_identity
                .port_number
                .cmp(&b.sender_port_identity.port_number)
        })
}

/// Result of running BMCA once.
pub struct BmcaResult {
    pub state: PortState,
    pub best_index: Option<usize>,
    /// Indices of qualified-but-not-selected records, eligible for removal
    /// to reclaim dataset space.
    pub unselected_qualified: Vec<usize>,
}

/// Run BMCA over `dataset`'s currently qualified records plus `local`.
/// `discriminator_threshold_ns`, when set, additionally disqualifies any
/// foreign master whose recorded offset from a configured discriminator
/// exceeds the threshold.
pub fn run(
    dataset: &ForeignMasterDataset,
    local: &LocalDataset,
    now: Instant,
    qualification_window: Duration,
    discriminator_threshold_ns: Option<i64>,
) -> BmcaResult {
    let qualified: Vec<(usize, &ForeignMasterRecord)> = dataset
        .records()
        .filter(|(_, r)| {
            r.is_qualified(
                now,
                dataset.qualification_threshold(),
                qualification_window,
                discriminator_threshold_ns,
            )
        })
        .collect();

    if qualified.is_empty() {
        // No reachable master: a slave-only port has nothing to track and
        // falls back to LISTENING regardless of whether it was previously
        // synchronized; a master-capable clock becomes its own grandmaster.
        let state = if local.slave_only {
            PortState::Listening
        } else {
            PortState::Master
        };
        return BmcaResult {
            state,
            best_index: None,
            unselected_qualified: Vec::new(),
        };
    }

    let local_c = local_candidate(local);
    let mut best = foreign_candidate(qualified[0].0, qualified[0].1);

    for &(idx, record) in &qualified[1..] {
        let candidate = foreign_candidate(idx, record);
        if dataset_comparison(&candidate, &best, local) == Ordering::Less {
            best = candidate;
        }
    }

    let best_vs_local = dataset_comparison(&best, &local_c, local);
    let best_index = match best.source {
        CandidateSource::Foreign(idx, _) => Some(idx),
        CandidateSource::Local => None,
    };

    let unselected_qualified: Vec<usize> = qualified
        .iter()
        .map(|(idx, _)| *idx)
        .filter(|idx| Some(*idx) != best_index)
        .collect();

    let state = state_decision(local, best_vs_local);

    BmcaResult {
        state,
        best_index,
        unselected_qualified,
    }
}

/// State decision, IEEE 1588 §9.3.3 Figure 26. `best_vs_local` is the
/// dataset comparison result of the best foreign candidate against our own
/// virtual Announce (`Less` = foreign wins).
fn state_decision(local: &LocalDataset, best_vs_local: Ordering) -> PortState {
    if local.slave_only {
        // A qualified best candidate exists (this is only reached from the
        // non-empty branch of `run`): track it. SLAVE once this clock has
        // calibrated against some master before; UNCALIBRATED the first
        // time, until the port engine completes its first offset
        // computation and promotes it (see `Port::handle_delay_resp`).
        return if local.has_ever_locked {
            PortState::Slave
        } else {
            PortState::Uncalibrated
        };
    }

    match best_vs_local {
        Ordering::Less => {
            // Foreign master is better than us.
            if local.clock_quality.clock_class < 128 {
                PortState::Passive
            } else if local.has_ever_locked {
                PortState::Slave
            } else {
                PortState::Uncalibrated
            }
        }
        Ordering::Greater | Ordering::Equal => PortState::Master,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptp::{
        AnnounceBody, ClockAccuracy, ClockIdentity, ControlField, Header, HeaderFlags,
        MessageType, Timestamp,
    };
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 319))
    }

    fn local(priority1: u8, clock_class: u8, slave_only: bool) -> LocalDataset {
        LocalDataset {
            priority1,
            clock_identity: ClockIdentity::from_mac([0, 0, 0, 0, 0, 1]),
            clock_quality: ClockQuality {
                clock_class,
                clock_accuracy: ClockAccuracy::UNKNOWN,
                offset_scaled_log_variance: 0xFFFF,
            },
            priority2: 128,
            steps_removed: 0,
            slave_only,
            has_ever_locked: false,
            parent_port_identity: None,
        }
    }

    fn insert_master(
        dataset: &mut ForeignMasterDataset,
        mac: u8,
        priority1: u8,
        now: Instant,
    ) -> PortIdentity {
        let pi = PortIdentity {
            clock_identity: ClockIdentity::from_mac([mac; 6]),
            port_number: 1,
        };
        let header = Header {
            message_type: MessageType::Announce,
            version: 2,
            message_length: 64,
            domain_number: 0,
            flags: HeaderFlags::empty(),
            correction_field: 0,
            source_port_identity: pi,
            sequence_id: 1,
            control_field: ControlField::Other,
            log_message_interval: 1,
        };
        let announce = AnnounceBody {
            origin_timestamp: Timestamp::from_nanos(0),
            current_utc_offset: 37,
            grandmaster_priority1: priority1,
            grandmaster_clock_quality: ClockQuality {
                clock_class: 6,
                clock_accuracy: ClockAccuracy::UNKNOWN,
                offset_scaled_log_variance: 0xFFFF,
            },
            grandmaster_priority2: 128,
            grandmaster_identity: pi.clock_identity,
            steps_removed: 0,
            time_source: 0x20,
        };
        dataset.insert(pi, header, announce.clone(), addr(), now);
        dataset.insert(pi, header, announce, addr(), now); // reach qualification threshold 2
        pi
    }

    #[test]
    fn selects_lower_priority1_as_best() {
        let mut ds = ForeignMasterDataset::new(8, 2);
        let now = Instant::now();
        insert_master(&mut ds, 1, 200, now);
        let better = insert_master(&mut ds, 2, 100, now);

        let local = local(128, 248, true);
        let result = run(&ds, &local, now, Duration::from_secs(100), None);
        let best = ds.get(result.best_index.unwrap()).unwrap();
        assert_eq!(best.port_identity, better);
        assert_eq!(result.state, PortState::Uncalibrated);
    }

    #[test]
    fn slave_only_port_goes_slave_once_it_has_locked_before() {
        let mut ds = ForeignMasterDataset::new(8, 2);
        let now = Instant::now();
        insert_master(&mut ds, 1, 100, now);

        let mut local = local(128, 248, true);
        local.has_ever_locked = true;
        let result = run(&ds, &local, now, Duration::from_secs(100), None);
        assert_eq!(result.state, PortState::Slave);
    }

    #[test]
    fn no_qualified_masters_gives_listening_for_slave_only() {
        let ds = ForeignMasterDataset::new(8, 2);
        let local = local(128, 248, true);
        let now = Instant::now();
        let result = run(&ds, &local, now, Duration::from_secs(100), None);
        assert_eq!(result.state, PortState::Listening);
        assert!(result.best_index.is_none());
    }

    #[test]
    fn no_qualified_masters_gives_master_for_master_capable_clock() {
        let ds = ForeignMasterDataset::new(8, 2);
        let local = local(128, 6, false);
        let now = Instant::now();
        let result = run(&ds, &local, now, Duration::from_secs(100), None);
        assert_eq!(result.state, PortState::Master);
    }

    #[test]
    fn better_foreign_master_beats_master_capable_local_clock() {
        let mut ds = ForeignMasterDataset::new(8, 2);
        let now = Instant::now();
        insert_master(&mut ds, 3, 50, now);
        let local = local(128, 6, false);
        let result = run(&ds, &local, now, Duration::from_secs(100), None);
        assert_eq!(result.state, PortState::Passive);
    }
}
