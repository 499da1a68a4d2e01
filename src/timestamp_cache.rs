//! Correlates transmit timestamps recovered asynchronously from the kernel
//! error queue (`SO_TIMESTAMPING` / `MSG_ERRQUEUE`) back to the in-flight
//! packet that caused them. Fixed-capacity so a stuck or malicious peer
//! cannot grow unbounded memory: once full, the oldest-sent ticket is
//! evicted to make room.

use std::time::{Duration, Instant};

pub const CACHE_SLOTS: usize = 32;

/// Caller-supplied descriptor of what to do once a timestamp resolves;
/// opaque to the cache itself (the port/PPS engine interprets it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaiting {
    Sync { sequence_id: u16 },
    DelayReq { sequence_id: u16 },
    PDelayReq { sequence_id: u16 },
    PDelayResp { sequence_id: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub slot: usize,
    pub seq: u64,
}

struct Slot {
    pdu: Vec<u8>,
    trailer: usize,
    awaiting: Awaiting,
    sent_at: Instant,
    seq: u64,
}

/// Resolution-age quantile buckets: powers of ten nanoseconds from 10^-4s
/// (100us) to 10^1s (10s), i.e. indices 0..=5 map to 1e5..1e10 ns.
const QUANTILE_BUCKETS: usize = 6;

#[derive(Debug, Clone, Copy, Default)]
pub struct QuantileStats {
    pub resolved: [u64; QUANTILE_BUCKETS],
    pub evicted: u64,
    pub pending_sweeps: [u64; QUANTILE_BUCKETS],
}

fn bucket_for_age(age: Duration) -> usize {
    let ns = age.as_nanos().max(1);
    // ceil(log10(ns)) clamped into [0, QUANTILE_BUCKETS-1], offset so that
    // 1e5 ns (100us) lands in bucket 0 and 1e10 ns (10s) in the last bucket.
    let log10 = (ns as f64).log10().ceil() as i64;
    let idx = (log10 - 5).clamp(0, QUANTILE_BUCKETS as i64 - 1);
    idx as usize
}

pub struct TimestampCache {
    slots: Vec<Option<Slot>>,
    free_bitmap: u64, // bit set = free; only lowest CACHE_SLOTS bits used
    next_seq: u64,
    stats: QuantileStats,
}

impl TimestampCache {
    pub fn new() -> Self {
        TimestampCache {
            slots: (0..CACHE_SLOTS).map(|_| None).collect(),
            free_bitmap: (1u64 << CACHE_SLOTS) - 1,
            next_seq: 0,
            stats: QuantileStats::default(),
        }
    }

    pub fn occupied_count(&self) -> usize {
        CACHE_SLOTS - self.free_bitmap.count_ones() as usize
    }

    fn take_free_slot(&mut self) -> Option<usize> {
        if self.free_bitmap == 0 {
            return None;
        }
        let slot = self.free_bitmap.trailing_zeros() as usize;
        self.free_bitmap &= !(1 << slot);
        Some(slot)
    }

    fn oldest_occupied(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s.sent_at)))
            .min_by_key(|(_, sent_at)| *sent_at)
            .map(|(i, _)| i)
    }

    /// Reserve a slot for a just-sent PDU awaiting its kernel timestamp.
    /// Evicts the oldest-sent occupant if the cache is full.
    pub fn reserve(
        &mut self,
        pdu: Vec<u8>,
        trailer: usize,
        awaiting: Awaiting,
        now: Instant,
    ) -> Ticket {
        let slot_index = match self.take_free_slot() {
            Some(idx) => idx,
            None => {
                let victim = self.oldest_occupied().expect("cache full implies occupied");
                self.slots[victim] = None;
                self.stats.evicted += 1;
                victim
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots[slot_index] = Some(Slot {
            pdu,
            trailer,
            awaiting,
            sent_at: now,
            seq,
        });

        Ticket {
            slot: slot_index,
            seq,
        }
    }

    /// Attempt to match a recovered timestamp fragment (possibly with
    /// kernel-mangled trailing bytes) against a cached PDU. On a unique
    /// match, frees the slot and returns the matched `Awaiting` descriptor
    /// plus the age bucket it resolved at.
    pub fn match_timestamp(&mut self, recovered: &[u8], now: Instant) -> Option<(Awaiting, usize)> {
        let found = self.slots.iter().enumerate().find_map(|(i, slot)| {
            let slot = slot.as_ref()?;
            let compare_len = slot.pdu.len().saturating_sub(slot.trailer);
            let recovered_len = recovered.len().saturating_sub(slot.trailer);
            if compare_len > 0
                && compare_len == recovered_len
                && slot.pdu[..compare_len] == recovered[..compare_len]
            {
                Some(i)
            } else {
                None
            }
        });

        let index = found?;
        let slot = self.slots[index].take()?;
        self.free_bitmap |= 1 << index;

        let age = now.duration_since(slot.sent_at);
        let bucket = bucket_for_age(age);
        self.stats.resolved[bucket] += 1;

        Some((slot.awaiting, bucket))
    }

    /// Account still-pending tickets into the quantile-age stats (used to
    /// drive a time-to-alarm style metric); does not evict anything.
    pub fn sweep(&mut self, now: Instant) {
        for slot in self.slots.iter().flatten() {
            let age = now.duration_since(slot.sent_at);
            self.stats.pending_sweeps[bucket_for_age(age)] += 1;
        }
    }

    /// A ticket is stale once its slot has been reused for something else.
    pub fn is_valid(&self, ticket: Ticket) -> bool {
        matches!(&self.slots[ticket.slot], Some(slot) if slot.seq == ticket.seq)
    }

    pub fn stats(&self) -> QuantileStats {
        self.stats
    }
}

impl Default for TimestampCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_match_round_trip() {
        let mut cache = TimestampCache::new();
        let t0 = Instant::now();
        let ticket = cache.reserve(vec![1, 2, 3, 4], 0, Awaiting::Sync { sequence_id: 1 }, t0);
        assert!(cache.is_valid(ticket));
        assert_eq!(cache.occupied_count(), 1);

        let later = t0 + Duration::from_micros(50);
        let (awaiting, _bucket) = cache.match_timestamp(&[1, 2, 3, 4], later).unwrap();
        assert_eq!(awaiting, Awaiting::Sync { sequence_id: 1 });
        assert_eq!(cache.occupied_count(), 0);
        assert!(!cache.is_valid(ticket));
    }

    #[test]
    fn trailer_bytes_are_ignored_in_comparison() {
        let mut cache = TimestampCache::new();
        let t0 = Instant::now();
        // trailer=2: last 2 bytes may have been mangled by the kernel.
        cache.reserve(vec![9, 9, 9, 0xAA, 0xBB], 2, Awaiting::Sync { sequence_id: 5 }, t0);
        let mangled = [9u8, 9, 9, 0x00, 0x00];
        assert!(cache.match_timestamp(&mangled, t0).is_some());
    }

    #[test]
    fn full_cache_evicts_oldest_sent() {
        let mut cache = TimestampCache::new();
        let t0 = Instant::now();
        let mut first_ticket = None;
        for i in 0..CACHE_SLOTS {
            let ticket = cache.reserve(
                vec![i as u8],
                0,
                Awaiting::Sync { sequence_id: i as u16 },
                t0 + Duration::from_millis(i as u64),
            );
            if i == 0 {
                first_ticket = Some(ticket);
            }
        }
        assert_eq!(cache.occupied_count(), CACHE_SLOTS);

        let overflow_time = t0 + Duration::from_secs(1);
        cache.reserve(vec![255], 0, Awaiting::Sync { sequence_id: 999 }, overflow_time);

        assert_eq!(cache.occupied_count(), CACHE_SLOTS);
        assert_eq!(cache.stats().evicted, 1);
        assert!(!cache.is_valid(first_ticket.unwrap()));
    }

    #[test]
    fn no_match_found_returns_none() {
        let mut cache = TimestampCache::new();
        let t0 = Instant::now();
        cache.reserve(vec![1, 2, 3], 0, Awaiting::Sync { sequence_id: 1 }, t0);
        assert!(cache.match_timestamp(&[9, 9, 9], t0).is_none());
        assert_eq!(cache.occupied_count(), 1);
    }

    #[test]
    fn bucket_for_age_orders_correctly() {
        assert!(bucket_for_age(Duration::from_micros(100)) <= bucket_for_age(Duration::from_secs(1)));
        assert_eq!(
            bucket_for_age(Duration::from_secs(10)),
            QUANTILE_BUCKETS - 1
        );
    }
}
