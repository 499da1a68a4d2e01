//! IEEE 1588 port engine (§4.F): the slave and master message paths, the
//! BMCA-driven state machine, hybrid unicast/multicast delay-request
//! fallback, and the alarm bitfield. One `Port` per configured interface;
//! driven by a `harness` thread via the `SyncEngine` trait.

use crate::bmca::{self, LocalDataset, PortState};
use crate::clock::SystemClock;
use crate::config::PtpPortConfig;
use crate::foreign_master::ForeignMasterDataset;
use crate::harness::TimerId;
use crate::message::{ControlFlags, ControlMessage, Reply};
use crate::ptp::{
    AnnounceBody, ClockIdentity, ClockQuality, ControlField, DelayReqBody, DelayRespBody,
    FollowUpBody, Header, HeaderFlags, Message, MessageBody, MessageType, PortIdentity, SyncBody,
    Timestamp,
};
use crate::servo::{Servo, ServoAction};
use crate::status::{Alarms, InstanceStatus, Status};
use crate::timestamp_cache::{Awaiting, Ticket, TimestampCache};
use crate::traits::SyncEngine;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const TIMER_ANNOUNCE_INTERVAL: TimerId = 1;
pub const TIMER_ANNOUNCE_RECEIPT: TimerId = 2;
pub const TIMER_SYNC_INTERVAL: TimerId = 3;
pub const TIMER_SYNC_RECEIPT: TimerId = 4;
pub const TIMER_DELAY_REQ_INTERVAL: TimerId = 5;
pub const TIMER_DELAY_RESP_RECEIPT: TimerId = 6;
pub const TIMER_FOREIGN_MASTER: TimerId = 7;
pub const TIMER_FAULT_RESTART: TimerId = 8;

/// Sequence-number replay window: accepted FollowUp/DelayResp sequence
/// numbers must fall in `[last+1, last+16]`, modulo 16-bit arithmetic.
const SEQUENCE_WINDOW: u16 = 16;

/// Transport a port output message should go out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Event,
    General,
}

/// Something the engine wants sent; actual socket IO belongs to the
/// harness/main wiring, kept out of this module for testability.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub transport: Transport,
    pub dest: Option<SocketAddr>,
    pub bytes: Vec<u8>,
}

struct PendingSync {
    sequence_id: u16,
    t1: Option<Timestamp>,
    t2: Option<Instant>,
}

struct PendingDelayReq {
    sequence_id: u16,
    t3: Option<Instant>,
}

/// A FollowUp that arrived before the Sync it completes, held until a
/// matching two-step Sync lands (§4.F: out-of-order follow-ups are cached,
/// not dropped).
struct PendingFollowUp {
    sequence_id: u16,
    t1_ns: i64,
}

pub struct Port<C: SystemClock> {
    config: PtpPortConfig,
    local_identity: ClockIdentity,
    port_number: u16,
    dataset: ForeignMasterDataset,
    local: LocalDataset,
    servo: Servo,
    clock: C,
    state: PortState,
    tx_cache: TimestampCache,

    sync_seq: u16,
    announce_seq: u16,
    delay_req_seq: u16,

    pending_sync: Option<PendingSync>,
    pending_delay_req: Option<PendingDelayReq>,
    pending_followup: Option<PendingFollowUp>,
    /// `t2 - t1` from the most recently completed Sync/FollowUp pair,
    /// held until the matching DelayResp supplies `t4 - t3`.
    pending_sync_offset_ns: Option<i64>,
    last_accepted_followup_seq: Option<u16>,
    last_accepted_delay_resp_seq: Option<u16>,
    followup_sequence_mismatches: u64,

    hybrid_unicast_dest: Option<SocketAddr>,
    hybrid_losses: u32,

    alarms: Alarms,
    control_flags: ControlFlags,
    last_sync_rx: Option<Instant>,
    last_followup_rx: Option<Instant>,
    last_delay_resp_rx: Option<Instant>,
    clock_steps: u64,
    /// Most recent `(t2-t1) - (t4-t3) / 2` slave offset, reported verbatim
    /// as the `offset-from-master` `SaveState` key (§6).
    last_offset_ns: i64,
}

impl<C: SystemClock> Port<C> {
    pub fn new(config: PtpPortConfig, local_identity: ClockIdentity, port_number: u16, clock: C) -> Self {
        let local = LocalDataset {
            priority1: config.priority1,
            clock_identity: local_identity,
            clock_quality: ClockQuality {
                clock_class: if config.slave_only { 255 } else { 248 },
                clock_accuracy: crate::ptp::ClockAccuracy::UNKNOWN,
                offset_scaled_log_variance: 0xFFFF,
            },
            priority2: config.priority2,
            steps_removed: 0,
            slave_only: config.slave_only,
            has_ever_locked: false,
            parent_port_identity: None,
        };

        let servo = Servo::new(config.servo);
        let dataset = ForeignMasterDataset::new(16, 2);

        Port {
            local_identity,
            port_number,
            dataset,
            local,
            servo,
            state: PortState::Initializing,
            tx_cache: TimestampCache::new(),
            sync_seq: 0,
            announce_seq: 0,
            delay_req_seq: 0,
            pending_sync: None,
            pending_delay_req: None,
            pending_followup: None,
            pending_sync_offset_ns: None,
            last_accepted_followup_seq: None,
            last_accepted_delay_resp_seq: None,
            followup_sequence_mismatches: 0,
            hybrid_unicast_dest: None,
            hybrid_losses: 0,
            alarms: Alarms::empty(),
            control_flags: ControlFlags::CLOCK_CTRL | ControlFlags::TIMESTAMP_PROCESSING,
            last_sync_rx: None,
            last_followup_rx: None,
            last_delay_resp_rx: None,
            clock_steps: 0,
            last_offset_ns: 0,
            config,
            clock,
        }
    }

    fn port_identity(&self) -> PortIdentity {
        PortIdentity {
            clock_identity: self.local_identity,
            port_number: self.port_number,
        }
    }

    fn header(&self, message_type: MessageType, seq: u16, control: ControlField) -> Header {
        let log_message_interval = match message_type {
            MessageType::Announce => self.config.log_announce_interval,
            MessageType::Sync => self.config.log_sync_interval,
            MessageType::DelayReq => self.config.log_min_delay_req_interval,
            _ => 0x7F, // unspecified, per IEEE 1588 convention
        };
        Header {
            message_type,
            version: 2,
            message_length: Header::WIRE_SIZE as u16,
            domain_number: self.config.domain_number,
            flags: HeaderFlags::TWO_STEP,
            correction_field: 0,
            source_port_identity: self.port_identity(),
            sequence_id: seq,
            control_field: control,
            log_message_interval,
        }
    }

    fn encode(&self, message: &Message) -> Vec<u8> {
        let mut buf = vec![0u8; 256];
        let len = message.encode(&mut buf).unwrap_or(0);
        buf.truncate(len);
        buf
    }

    /// Check whether a sequence id falls in the accepted replay window
    /// relative to the last accepted one (modulo-16-bit arithmetic).
    fn in_replay_window(last: Option<u16>, candidate: u16) -> bool {
        match last {
            None => true,
            Some(last) => {
                let delta = candidate.wrapping_sub(last);
                delta >= 1 && delta <= SEQUENCE_WINDOW
            }
        }
    }

    /// Process one received PTP message. `now` is the monotonic receive
    /// time (from kernel RX timestamping where available).
    pub fn handle_rx(
        &mut self,
        message: &Message,
        now: Instant,
        source: SocketAddr,
    ) -> Vec<Outgoing> {
        if message.header.domain_number != self.config.domain_number {
            return Vec::new();
        }

        match &message.body {
            MessageBody::Announce(body) => {
                self.handle_announce(&message.header, body, source, now);
                Vec::new()
            }
            MessageBody::Sync(body) => self.handle_sync(&message.header, body, now),
            MessageBody::FollowUp(body) => self.handle_followup(&message.header, body, now),
            MessageBody::DelayReq(body) => self.handle_delay_req(&message.header, body, now, source),
            MessageBody::DelayResp(body) => self.handle_delay_resp(&message.header, body, now),
            _ => Vec::new(),
        }
    }

    fn handle_announce(
        &mut self,
        header: &Header,
        body: &AnnounceBody,
        source: SocketAddr,
        now: Instant,
    ) {
        self.dataset.insert(
            header.source_port_identity,
            *header,
            body.clone(),
            source,
            now,
        );
        self.run_bmca(now);
    }

    fn run_bmca(&mut self, now: Instant) {
        let result = bmca::run(
            &self.dataset,
            &self.local,
            now,
            Duration::from_secs(4 << self.config.log_announce_interval.max(0)),
            None,
        );

        if result.state == PortState::Slave || result.state == PortState::Uncalibrated {
            if let Some(idx) = result.best_index {
                if let Some(record) = self.dataset.get(idx) {
                    self.local.parent_port_identity = Some(record.port_identity);
                }
            }
        }

        self.dataset.set_best_index(result.best_index);
        for idx in result.unselected_qualified {
            if Some(idx) != result.best_index {
                // Qualified but not selected: reclaim the slot (§4.C step 5).
                self.dataset.remove(idx);
            }
        }

        if result.state != self.state {
            log::info!("port {}: {:?} -> {:?}", self.port_number, self.state, result.state);
        }
        self.state = result.state;
        if self.state == PortState::Slave {
            self.local.has_ever_locked = true;
        }
    }

    fn handle_sync(&mut self, header: &Header, body: &SyncBody, now: Instant) -> Vec<Outgoing> {
        if self.state != PortState::Slave && self.state != PortState::Uncalibrated {
            return Vec::new();
        }
        if !Self::in_replay_window(self.last_accepted_followup_seq, header.sequence_id) {
            return Vec::new();
        }
        self.last_sync_rx = Some(now);
        self.alarms.remove(Alarms::NO_SYNC_PKTS);

        if header.flags.contains(HeaderFlags::TWO_STEP) {
            if let Some(cached) = &self.pending_followup {
                if cached.sequence_id == header.sequence_id {
                    let t1 = self.pending_followup.take().expect("checked Some above").t1_ns;
                    self.last_followup_rx = Some(now);
                    self.alarms.remove(Alarms::NO_FOLLOW_UPS);
                    self.last_accepted_followup_seq = Some(header.sequence_id);
                    self.complete_sync(t1, now);
                    return self.emit_delay_req(now);
                }
            }
            self.pending_followup = None;
            self.pending_sync = Some(PendingSync {
                sequence_id: header.sequence_id,
                t1: None,
                t2: Some(now),
            });
            Vec::new()
        } else {
            let t1 = body
                .origin_timestamp
                .to_nanos()
                .saturating_sub(header.correction_field_ns());
            self.complete_sync(t1, now);
            self.emit_delay_req(now)
        }
    }

    fn handle_followup(
        &mut self,
        header: &Header,
        body: &FollowUpBody,
        now: Instant,
    ) -> Vec<Outgoing> {
        if self.state != PortState::Slave && self.state != PortState::Uncalibrated {
            return Vec::new();
        }
        match &self.pending_sync {
            Some(pending) if pending.sequence_id == header.sequence_id => {
                let t2 = pending.t2.expect("sync always records t2 first");
                let t1 = body
                    .precise_origin_timestamp
                    .to_nanos()
                    .saturating_sub(header.correction_field_ns());
                self.last_followup_rx = Some(now);
                self.alarms.remove(Alarms::NO_FOLLOW_UPS);
                self.last_accepted_followup_seq = Some(header.sequence_id);
                self.complete_sync(t1, t2);
                self.pending_sync = None;
                self.emit_delay_req(now)
            }
            Some(_) => {
                // A Sync is pending but for a different sequence: a genuine
                // mismatch, not ordinary reordering. Drop the stale wait and
                // count it so persistent reordering/loss is observable.
                self.followup_sequence_mismatches += 1;
                self.pending_sync = None;
                Vec::new()
            }
            None => {
                // FollowUp arrived before its Sync: cache it so the Sync,
                // once it lands, can complete immediately (§4.F).
                let t1_ns = body
                    .precise_origin_timestamp
                    .to_nanos()
                    .saturating_sub(header.correction_field_ns());
                self.pending_followup = Some(PendingFollowUp {
                    sequence_id: header.sequence_id,
                    t1_ns,
                });
                Vec::new()
            }
        }
    }

    fn complete_sync(&mut self, t1_ns: i64, t2: Instant) {
        let t2_ns = instant_to_unix_ns(t2);
        self.pending_sync_offset_ns = Some(t2_ns - t1_ns);
    }

    fn emit_delay_req(&mut self, now: Instant) -> Vec<Outgoing> {
        self.delay_req_seq = self.delay_req_seq.wrapping_add(1);
        let seq = self.delay_req_seq;
        let header = self.header(MessageType::DelayReq, seq, ControlField::DelayReq);
        let message = Message {
            header,
            body: MessageBody::DelayReq(DelayReqBody {
                origin_timestamp: Timestamp::from_nanos(0),
            }),
            tlvs: Vec::new(),
        };
        let bytes = self.encode(&message);
        self.pending_delay_req = Some(PendingDelayReq {
            sequence_id: seq,
            t3: Some(now),
        });
        let ticket_bytes = bytes.clone();
        let _: Ticket = self.tx_cache.reserve(
            ticket_bytes,
            0,
            Awaiting::DelayReq { sequence_id: seq },
            now,
        );

        vec![Outgoing {
            transport: Transport::Event,
            dest: self.hybrid_unicast_dest,
            bytes,
        }]
    }

    fn handle_delay_req(
        &mut self,
        header: &Header,
        _body: &DelayReqBody,
        now: Instant,
        source: SocketAddr,
    ) -> Vec<Outgoing> {
        if self.state != PortState::Master {
            return Vec::new();
        }
        let resp_header = self.header(MessageType::DelayResp, header.sequence_id, ControlField::DelayResp);
        let message = Message {
            header: resp_header,
            body: MessageBody::DelayResp(DelayRespBody {
                receive_timestamp: Timestamp::from_nanos(instant_to_unix_ns(now)),
                requesting_port_identity: header.source_port_identity,
            }),
            tlvs: Vec::new(),
        };
        let bytes = self.encode(&message);
        vec![Outgoing {
            transport: Transport::General,
            dest: Some(source),
            bytes,
        }]
    }

    fn handle_delay_resp(
        &mut self,
        header: &Header,
        body: &DelayRespBody,
        now: Instant,
    ) -> Vec<Outgoing> {
        if body.requesting_port_identity != self.port_identity() {
            return Vec::new();
        }
        let pending = match &self.pending_delay_req {
            Some(p) if p.sequence_id == header.sequence_id => p,
            _ => {
                self.hybrid_losses += 1;
                self.maybe_fall_back_to_multicast();
                return Vec::new();
            }
        };
        if !Self::in_replay_window(self.last_accepted_delay_resp_seq, header.sequence_id) {
            return Vec::new();
        }

        let t3 = pending.t3.expect("delay req always records t3");
        let t4_ns = body
            .receive_timestamp
            .to_nanos()
            .saturating_sub(header.correction_field_ns());

        self.last_delay_resp_rx = Some(now);
        self.alarms.remove(Alarms::NO_DELAY_RESPS);
        self.last_accepted_delay_resp_seq = Some(header.sequence_id);
        self.hybrid_losses = 0;

        let t2_minus_t1 = match self.pending_sync_offset_ns.take() {
            Some(v) => v,
            None => return Vec::new(),
        };
        let t4_minus_t3 = t4_ns - instant_to_unix_ns(t3);
        let path_delay_raw_ns = ((t2_minus_t1 + t4_minus_t3) / 2).max(0) as f64;
        let _path_delay_ns = self.servo.filter_path_delay(path_delay_raw_ns, now);
        let offset_ns = (t2_minus_t1 - t4_minus_t3) / 2;
        self.last_offset_ns = offset_ns;

        // First completed offset calculation after BMCA put us in
        // UNCALIBRATED promotes us to SLAVE (IEEE 1588 §9.2.5): the port
        // has now actually measured its offset against the chosen parent,
        // not just selected it.
        if self.state == PortState::Uncalibrated {
            log::info!("port {}: Uncalibrated -> Slave", self.port_number);
            self.state = PortState::Slave;
            self.local.has_ever_locked = true;
        }

        match self.servo.process(offset_ns, now) {
            ServoAction::Step { offset_ns } => {
                if let Err(e) = self.clock.step_clock(
                    Duration::from_nanos(offset_ns.unsigned_abs()),
                    if offset_ns < 0 { 1 } else { -1 },
                ) {
                    log::warn!("port {}: clock step failed: {e}", self.port_number);
                } else {
                    self.clock_steps += 1;
                }
            }
            ServoAction::AdjustFrequency { ppb } => {
                if let Err(e) = self.clock.adjust_frequency(ppb) {
                    log::warn!("port {}: frequency adjust failed: {e}", self.port_number);
                    self.alarms.insert(Alarms::SERVO_FAIL);
                } else {
                    self.alarms.remove(Alarms::SERVO_FAIL);
                }
            }
        }

        Vec::new()
    }

    fn maybe_fall_back_to_multicast(&mut self) {
        if self.hybrid_losses >= self.config.hybrid_fallback_threshold {
            self.hybrid_unicast_dest = None;
            self.hybrid_losses = 0;
        }
    }

    fn emit_announce(&mut self) -> Vec<Outgoing> {
        self.announce_seq = self.announce_seq.wrapping_add(1);
        let header = self.header(MessageType::Announce, self.announce_seq, ControlField::Other);
        let message = Message {
            header,
            body: MessageBody::Announce(AnnounceBody {
                origin_timestamp: Timestamp::from_nanos(0),
                current_utc_offset: 37,
                grandmaster_priority1: self.local.priority1,
                grandmaster_clock_quality: self.local.clock_quality,
                grandmaster_priority2: self.local.priority2,
                grandmaster_identity: self.local.clock_identity,
                steps_removed: self.local.steps_removed,
                time_source: 0xA0,
            }),
            tlvs: Vec::new(),
        };
        vec![Outgoing {
            transport: Transport::General,
            dest: None,
            bytes: self.encode(&message),
        }]
    }

    fn emit_sync(&mut self, now: Instant) -> Vec<Outgoing> {
        self.sync_seq = self.sync_seq.wrapping_add(1);
        let seq = self.sync_seq;
        let header = self.header(MessageType::Sync, seq, ControlField::Sync);
        let message = Message {
            header,
            body: MessageBody::Sync(SyncBody {
                origin_timestamp: Timestamp::from_nanos(instant_to_unix_ns(now)),
            }),
            tlvs: Vec::new(),
        };
        let bytes = self.encode(&message);

        let followup_header = self.header(MessageType::FollowUp, seq, ControlField::FollowUp);
        let followup = Message {
            header: followup_header,
            body: MessageBody::FollowUp(FollowUpBody {
                precise_origin_timestamp: Timestamp::from_nanos(instant_to_unix_ns(now)),
            }),
            tlvs: Vec::new(),
        };
        let followup_bytes = self.encode(&followup);

        vec![
            Outgoing {
                transport: Transport::Event,
                dest: None,
                bytes,
            },
            Outgoing {
                transport: Transport::General,
                dest: None,
                bytes: followup_bytes,
            },
        ]
    }

    pub fn on_timer(&mut self, timer: TimerId, now: Instant) -> Vec<Outgoing> {
        match timer {
            TIMER_ANNOUNCE_INTERVAL if self.state == PortState::Master => self.emit_announce(),
            TIMER_SYNC_INTERVAL if self.state == PortState::Master => self.emit_sync(now),
            TIMER_DELAY_REQ_INTERVAL
                if self.state == PortState::Slave || self.state == PortState::Uncalibrated =>
            {
                self.emit_delay_req(now)
            }
            TIMER_FOREIGN_MASTER => {
                self.dataset.expire(now, Duration::from_secs(4));
                self.run_bmca(now);
                Vec::new()
            }
            TIMER_ANNOUNCE_RECEIPT => {
                if self.last_sync_rx.map_or(true, |t| now.duration_since(t) > Duration::from_secs(3)) {
                    self.alarms.insert(Alarms::NO_SYNC_PKTS);
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn instance_status(&self) -> InstanceStatus {
        InstanceStatus {
            clock_name: self.config.clock_name.clone(),
            clock_id: self.local_identity.0,
            state: format!("{:?}", self.state),
            alarms: self.alarms,
            control_flags: self.control_flags.bits(),
            interface: self.config.interface.clone(),
            offset_from_master_ns: self.last_offset_ns,
            freq_adjustment_ppb: self.servo.frequency_correction(),
            in_sync: self.servo.synchronized(),
            // Multi-reference clustering/arbitration scoring is out of
            // scope (SPEC_FULL.md §6); reported as a constant placeholder.
            clustering_score: 0.0,
            updated_unix_secs: 0,
            clock_steps: self.clock_steps,
        }
    }
}

impl<C: SystemClock> SyncEngine for Port<C> {
    fn handle_message(&mut self, message: ControlMessage) -> Reply {
        match message {
            ControlMessage::GetStatus => Reply::Status(Box::new(Status {
                instances: vec![self.instance_status()],
            })),
            ControlMessage::Control { mask, value } => {
                if value {
                    self.control_flags.insert(mask);
                } else {
                    self.control_flags.remove(mask);
                }
                self.servo.set_clock_control(self.control_flags.contains(ControlFlags::CLOCK_CTRL));
                Reply::Ack
            }
            ControlMessage::SaveState => {
                self.servo.commit_frequency_correction();
                if let Err(e) = self.clock.save_freq_correction(self.servo.frequency_correction()) {
                    return Reply::Error(format!("save_freq_correction failed: {e}"));
                }
                Reply::Ack
            }
            ControlMessage::StepClock { .. } | ControlMessage::Run => Reply::Ack,
            ControlMessage::ServoPidAdjust { .. } => Reply::Ack,
            _ => Reply::Ack,
        }
    }

    fn on_timer(&mut self, timer: TimerId) {
        let _ = Port::on_timer(self, timer, Instant::now());
    }

    fn status(&self) -> InstanceStatus {
        self.instance_status()
    }
}

fn instant_to_unix_ns(instant: Instant) -> i64 {
    let now_instant = Instant::now();
    let now_unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64;
    if instant <= now_instant {
        now_unix - now_instant.duration_since(instant).as_nanos() as i64
    } else {
        now_unix + instant.duration_since(now_instant).as_nanos() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PtpPortConfig;
    use anyhow::Result;
    use std::cmp::Ordering;

    struct FakeClock;

    impl SystemClock for FakeClock {
        fn now(&self) -> Result<std::time::SystemTime> {
            Ok(std::time::SystemTime::now())
        }
        fn step_clock(&mut self, _offset: Duration, _sign: i8) -> Result<()> {
            Ok(())
        }
        fn adjust_frequency(&mut self, _ppb: f64) -> Result<()> {
            Ok(())
        }
        fn freq_correction(&self) -> f64 {
            0.0
        }
        fn save_freq_correction(&self, _ppb: f64) -> Result<()> {
            Ok(())
        }
        fn max_freq_adjustment(&self) -> f64 {
            500_000.0
        }
        fn compare(&self, other: &dyn SystemClock) -> Result<Ordering> {
            Ok(self.now()?.cmp(&other.now()?))
        }
    }

    fn port() -> Port<FakeClock> {
        Port::new(
            PtpPortConfig::default(),
            ClockIdentity::from_mac([1, 2, 3, 4, 5, 6]),
            1,
            FakeClock,
        )
    }

    #[test]
    fn replay_window_accepts_next_sixteen() {
        assert!(Port::in_replay_window(Some(10), 11));
        assert!(Port::in_replay_window(Some(10), 26));
        assert!(!Port::in_replay_window(Some(10), 27));
        assert!(!Port::in_replay_window(Some(10), 10));
    }

    #[test]
    fn master_capable_port_with_no_foreign_masters_emits_announce_on_timer() {
        let mut p = port();
        p.config.slave_only = false;
        p.run_bmca(Instant::now());
        assert_eq!(p.state, PortState::Master);
        let out = p.on_timer(TIMER_ANNOUNCE_INTERVAL, Instant::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].transport, Transport::General);
    }

    #[test]
    fn slave_only_port_stays_listening_with_no_foreign_masters() {
        let mut p = port();
        p.run_bmca(Instant::now());
        assert_eq!(p.state, PortState::Listening);
        assert!(p.on_timer(TIMER_SYNC_INTERVAL, Instant::now()).is_empty());
    }

    #[test]
    fn get_status_reply_reports_current_state() {
        let mut p = port();
        match p.handle_message(ControlMessage::GetStatus) {
            Reply::Status(status) => {
                assert_eq!(status.instances.len(), 1);
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }
}
