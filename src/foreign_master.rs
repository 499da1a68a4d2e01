//! Bounded table of observed foreign masters (IEEE 1588 §9.3.2's
//! `foreignMasterDS`). Sized to avoid heap churn on the port's hot path:
//! insertion, ageing and qualification all operate on a fixed-capacity
//! array rather than growing a `Vec` per Announce.

use crate::ptp::{AnnounceBody, Header, PortIdentity};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_RECORDS: usize = 16;
pub const DEFAULT_QUALIFICATION_THRESHOLD: usize = 2;
const ANNOUNCE_RING_SIZE: usize = 4;
/// IEEE 1588 §9.3.2.5: FOREIGN_MASTER_TIME_WINDOW, in announce intervals.
pub const FOREIGN_MASTER_TIME_WINDOW: u32 = 4;

#[derive(Debug, Clone)]
pub struct ForeignMasterRecord {
    pub port_identity: PortIdentity,
    pub header: Header,
    pub announce: AnnounceBody,
    pub source_addr: SocketAddr,
    pub steps_removed: u16,
    /// Offset vs the active discriminator, when one is configured; `None`
    /// means no discriminator check applies to this record.
    pub discriminator_offset_ns: Option<i64>,

    announce_times: [Option<Instant>; ANNOUNCE_RING_SIZE],
    announce_write: usize,
    announce_count: usize,
}

impl ForeignMasterRecord {
    fn new(
        port_identity: PortIdentity,
        header: Header,
        announce: AnnounceBody,
        source_addr: SocketAddr,
        now: Instant,
    ) -> Self {
        let mut record = ForeignMasterRecord {
            port_identity,
            steps_removed: announce.steps_removed,
            header,
            announce,
            source_addr,
            discriminator_offset_ns: None,
            announce_times: [None; ANNOUNCE_RING_SIZE],
            announce_write: 0,
            announce_count: 0,
        };
        record.record_announce(now);
        record
    }

    fn record_announce(&mut self, now: Instant) {
        self.announce_times[self.announce_write] = Some(now);
        self.announce_write = (self.announce_write + 1) % ANNOUNCE_RING_SIZE;
        if self.announce_count < ANNOUNCE_RING_SIZE {
            self.announce_count += 1;
        }
    }

    fn earliest_announce(&self) -> Option<Instant> {
        self.announce_times.iter().flatten().min().copied()
    }

    fn latest_announce(&self) -> Option<Instant> {
        self.announce_times.iter().flatten().max().copied()
    }

    pub fn announce_count(&self) -> usize {
        self.announce_count
    }

    /// §3 qualification invariant.
    pub fn is_qualified(
        &self,
        now: Instant,
        threshold: usize,
        window: Duration,
        discriminator_threshold_ns: Option<i64>,
    ) -> bool {
        if self.announce_count < threshold {
            return false;
        }
        if self.steps_removed >= 255 {
            return false;
        }
        let Some(earliest) = self.earliest_announce() else {
            return false;
        };
        if now.duration_since(earliest) > window {
            return false;
        }
        if let (Some(offset), Some(max)) = (self.discriminator_offset_ns, discriminator_threshold_ns)
        {
            if offset.unsigned_abs() as i64 >= max {
                return false;
            }
        }
        true
    }
}

/// Bounded array of foreign-master records with eviction that never
/// overwrites the currently-selected best master.
pub struct ForeignMasterDataset {
    records: Vec<Option<ForeignMasterRecord>>,
    write_index: usize,
    best_index: Option<usize>,
    qualification_threshold: usize,
}

impl ForeignMasterDataset {
    pub fn new(max_records: usize, qualification_threshold: usize) -> Self {
        ForeignMasterDataset {
            records: vec![None; max_records.max(1)],
            write_index: 0,
            best_index: None,
            qualification_threshold: qualification_threshold.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn count(&self) -> usize {
        self.records.iter().filter(|r| r.is_some()).count()
    }

    pub fn best_index(&self) -> Option<usize> {
        self.best_index
    }

    pub fn set_best_index(&mut self, index: Option<usize>) {
        self.best_index = index;
    }

    pub fn records(&self) -> impl Iterator<Item = (usize, &ForeignMasterRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i, r)))
    }

    pub fn get(&self, index: usize) -> Option<&ForeignMasterRecord> {
        self.records.get(index).and_then(|r| r.as_ref())
    }

    fn find_index(&self, port_identity: &PortIdentity) -> Option<usize> {
        // Scan starting at best_index: the currently-selected master is the
        // most likely sender of the next Announce.
        let start = self.best_index.unwrap_or(0);
        let len = self.records.len();
        (0..len)
            .map(|i| (start + i) % len)
            .find(|&i| matches!(&self.records[i], Some(r) if r.port_identity == *port_identity))
    }

    /// Insert or update a record for `port_identity`. Returns the index the
    /// record now lives at.
    pub fn insert(
        &mut self,
        port_identity: PortIdentity,
        header: Header,
        announce: AnnounceBody,
        source_addr: SocketAddr,
        now: Instant,
    ) -> usize {
        if let Some(idx) = self.find_index(&port_identity) {
            let record = self.records[idx].as_mut().expect("checked present");
            record.header = header;
            record.steps_removed = announce.steps_removed;
            record.announce = announce;
            record.source_addr = source_addr;
            record.record_announce(now);
            return idx;
        }

        let idx = self.next_write_index();
        self.records[idx] = Some(ForeignMasterRecord::new(
            port_identity,
            header,
            announce,
            source_addr,
            now,
        ));
        self.write_index = (idx + 1) % self.records.len();
        idx
    }

    fn next_write_index(&self) -> usize {
        let len = self.records.len();
        let mut idx = self.write_index;
        // Never overwrite best_index; if we'd land there, skip past it.
        if Some(idx) == self.best_index {
            idx = (idx + 1) % len;
        }
        idx
    }

    /// Remove records whose latest Announce predates `threshold` ago,
    /// keeping `best_index` pointed at the same logical record.
    pub fn expire(&mut self, now: Instant, threshold: Duration) {
        let best_port_identity = self.best_index.and_then(|i| self.get(i)).map(|r| r.port_identity);

        for slot in self.records.iter_mut() {
            let expired = match slot {
                Some(r) => match r.latest_announce() {
                    Some(latest) => now.duration_since(latest) > threshold,
                    None => true,
                },
                None => false,
            };
            if expired {
                *slot = None;
            }
        }

        self.best_index = best_port_identity.and_then(|id| self.find_index(&id));
    }

    /// Delete a specific (unselected) record, e.g. after BMCA determines it
    /// is qualified but not selected, to reclaim space for new masters.
    pub fn remove(&mut self, index: usize) {
        if Some(index) != self.best_index {
            self.records[index] = None;
        }
    }

    pub fn qualification_threshold(&self) -> usize {
        self.qualification_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptp::{
        AnnounceBody, ClockAccuracy, ClockIdentity, ClockQuality, ControlField, Header,
        HeaderFlags, MessageType, PortIdentity, Timestamp,
    };
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 319))
    }

    fn port_identity(n: u8) -> PortIdentity {
        PortIdentity {
            clock_identity: ClockIdentity::from_mac([n, n, n, n, n, n]),
            port_number: 1,
        }
    }

    fn header(seq: u16, pi: PortIdentity) -> Header {
        Header {
            message_type: MessageType::Announce,
            version: 2,
            message_length: 64,
            domain_number: 0,
            flags: HeaderFlags::empty(),
            correction_field: 0,
            source_port_identity: pi,
            sequence_id: seq,
            control_field: ControlField::Other,
            log_message_interval: 1,
        }
    }

    fn announce(priority1: u8, steps_removed: u16, gm: PortIdentity) -> AnnounceBody {
        AnnounceBody {
            origin_timestamp: Timestamp::from_nanos(0),
            current_utc_offset: 37,
            grandmaster_priority1: priority1,
            grandmaster_clock_quality: ClockQuality {
                clock_class: 6,
                clock_accuracy: ClockAccuracy::UNKNOWN,
                offset_scaled_log_variance: 0xFFFF,
            },
            grandmaster_priority2: 128,
            grandmaster_identity: gm.clock_identity,
            steps_removed,
            time_source: 0x20,
        }
    }

    #[test]
    fn insert_then_find_same_port_updates_in_place() {
        let mut ds = ForeignMasterDataset::new(4, 2);
        let pi = port_identity(1);
        let now = Instant::now();
        let idx1 = ds.insert(pi, header(1, pi), announce(128, 0, pi), addr(), now);
        let idx2 = ds.insert(pi, header(2, pi), announce(128, 0, pi), addr(), now);
        assert_eq!(idx1, idx2);
        assert_eq!(ds.count(), 1);
        assert_eq!(ds.get(idx1).unwrap().announce_count(), 2);
    }

    #[test]
    fn overflow_skips_best_index() {
        let mut ds = ForeignMasterDataset::new(4, 1);
        let now = Instant::now();
        for n in 0..4u8 {
            let pi = port_identity(n);
            ds.insert(pi, header(1, pi), announce(128, 0, pi), addr(), now);
        }
        assert_eq!(ds.count(), 4);
        ds.set_best_index(Some(2));

        // 5th distinct master: write_index currently 0 (wrapped), but that's
        // fine since best_index is 2, not 0; insert occupies slot 0's owner
        // is overwritten, not best_index 2.
        let pi5 = port_identity(5);
        let idx = ds.insert(pi5, header(1, pi5), announce(128, 0, pi5), addr(), now);
        assert_ne!(idx, 2);
        assert_eq!(ds.get(2).unwrap().port_identity, port_identity(2));
    }

    #[test]
    fn expire_removes_stale_records_and_tracks_best() {
        let mut ds = ForeignMasterDataset::new(4, 1);
        let t0 = Instant::now();
        let pi_stale = port_identity(1);
        let pi_fresh = port_identity(2);
        ds.insert(pi_stale, header(1, pi_stale), announce(128, 0, pi_stale), addr(), t0);
        let best_idx = ds.insert(pi_fresh, header(1, pi_fresh), announce(128, 0, pi_fresh), addr(), t0);
        ds.set_best_index(Some(best_idx));

        let later = t0 + Duration::from_secs(100);
        // refresh only the fresh one
        ds.insert(pi_fresh, header(2, pi_fresh), announce(128, 0, pi_fresh), addr(), later);

        ds.expire(later, Duration::from_secs(10));
        assert_eq!(ds.count(), 1);
        assert_eq!(ds.get(ds.best_index().unwrap()).unwrap().port_identity, pi_fresh);
    }

    #[test]
    fn qualification_requires_threshold_and_window() {
        let mut ds = ForeignMasterDataset::new(4, 2);
        let t0 = Instant::now();
        let pi = port_identity(1);
        let idx = ds.insert(pi, header(1, pi), announce(128, 0, pi), addr(), t0);
        assert!(!ds.get(idx).unwrap().is_qualified(t0, 2, Duration::from_secs(10), None));

        ds.insert(pi, header(2, pi), announce(128, 0, pi), addr(), t0);
        assert!(ds.get(idx).unwrap().is_qualified(t0, 2, Duration::from_secs(10), None));
    }
}
