//! End-to-end simulation: two `Port`s (one master-capable, one slave-only)
//! wired together with in-process message passing instead of real sockets.
//! Exercises the full Announce/Sync/FollowUp/DelayReq/DelayResp exchange and
//! the BMCA state transitions it drives, the way `main.rs` wires a real
//! `UdpPtpNetwork` but without needing one.

use anyhow::Result;
use std::cmp::Ordering;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use syncored::clock::SystemClock;
use syncored::config::PtpPortConfig;
use syncored::message::ControlMessage;
use syncored::port::{
    Port, Transport, TIMER_ANNOUNCE_INTERVAL, TIMER_DELAY_REQ_INTERVAL, TIMER_FOREIGN_MASTER,
    TIMER_SYNC_INTERVAL,
};
use syncored::ptp::{ClockIdentity, Message};
use syncored::traits::SyncEngine;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), port))
}

/// A clock that tracks the frequency correction the servo lands on and
/// counts steps, without touching any real OS clock API. Shared via
/// `Arc<Mutex<_>>` so the test can read the applied ppb after the port
/// (which owns the clock by value) has run.
#[derive(Clone)]
struct RecordingClock(Arc<Mutex<RecordingClockState>>);

#[derive(Default)]
struct RecordingClockState {
    freq_ppb: f64,
    steps: u32,
}

impl RecordingClock {
    fn new() -> Self {
        RecordingClock(Arc::new(Mutex::new(RecordingClockState::default())))
    }

    fn freq_ppb(&self) -> f64 {
        self.0.lock().unwrap().freq_ppb
    }

    fn steps(&self) -> u32 {
        self.0.lock().unwrap().steps
    }
}

impl SystemClock for RecordingClock {
    fn now(&self) -> Result<std::time::SystemTime> {
        Ok(std::time::SystemTime::now())
    }
    fn step_clock(&mut self, _offset: Duration, _sign: i8) -> Result<()> {
        self.0.lock().unwrap().steps += 1;
        Ok(())
    }
    fn adjust_frequency(&mut self, ppb: f64) -> Result<()> {
        self.0.lock().unwrap().freq_ppb = ppb;
        Ok(())
    }
    fn freq_correction(&self) -> f64 {
        self.0.lock().unwrap().freq_ppb
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

fn master_port() -> Port<RecordingClock> {
    let mut config = PtpPortConfig::default();
    config.slave_only = false;
    config.priority1 = 1;
    Port::new(
        config,
        ClockIdentity::from_mac([0xAA, 0, 0, 0, 0, 1]),
        1,
        RecordingClock::new(),
    )
}

fn slave_port() -> (Port<RecordingClock>, RecordingClock) {
    let config = PtpPortConfig::default();
    let clock = RecordingClock::new();
    let port = Port::new(
        config,
        ClockIdentity::from_mac([0xBB, 0, 0, 0, 0, 1]),
        1,
        clock.clone(),
    );
    (port, clock)
}

/// Drives one outgoing message from `master` straight into `slave`, mirroring
/// a zero-latency wire between the two ports' event/general sockets.
fn deliver(slave: &mut Port<RecordingClock>, now: Instant, bytes: &[u8]) {
    let message = Message::decode(bytes).expect("master always emits well-formed messages");
    slave.handle_rx(&message, now, addr(319));
}

#[test]
fn slave_reaches_slave_state_and_converges_via_full_message_exchange() {
    let mut master = master_port();
    let (mut slave, slave_clock) = slave_port();
    let mut now = Instant::now();

    // A master-capable port with no competing foreign masters declares
    // itself MASTER the first time its periodic BMCA sweep runs.
    master.on_timer(TIMER_FOREIGN_MASTER, now);
    assert_eq!(master.status().state, "Master");

    for out in master.on_timer(TIMER_ANNOUNCE_INTERVAL, now) {
        assert_eq!(out.transport, Transport::General);
        deliver(&mut slave, now, &out.bytes);
    }
    assert_eq!(slave.status().state, "Listening", "single Announce is below the qualification threshold");

    // A second Announce reaches the qualification threshold (default 2);
    // the slave's own `handle_announce` runs BMCA and should move it to
    // UNCALIBRATED, now that it has a qualified, better-than-itself master.
    now += Duration::from_secs(1);
    for out in master.on_timer(TIMER_ANNOUNCE_INTERVAL, now) {
        deliver(&mut slave, now, &out.bytes);
    }
    assert_eq!(slave.status().state, "Uncalibrated");

    // Drive several Sync/FollowUp/DelayReq/DelayResp rounds. Each round:
    // master emits Sync+FollowUp -> slave processes them and emits a
    // DelayReq -> master answers with DelayResp -> slave completes the
    // offset calculation and feeds its servo.
    for _ in 0..6 {
        now += Duration::from_secs(1);
        let sync_out = master.on_timer(TIMER_SYNC_INTERVAL, now);
        assert_eq!(sync_out.len(), 2, "two-step Sync also emits a FollowUp");

        let mut delay_req_bytes = None;
        for out in &sync_out {
            let message = Message::decode(&out.bytes).unwrap();
            let mut produced = slave.handle_rx(&message, now, addr(319));
            if let Some(req) = produced.pop() {
                delay_req_bytes = Some(req.bytes);
            }
        }

        let delay_req_bytes = delay_req_bytes.expect("FollowUp completion emits a DelayReq");
        let delay_req = Message::decode(&delay_req_bytes).unwrap();
        let resp_out = master.handle_rx(&delay_req, now, addr(319));
        assert_eq!(resp_out.len(), 1);
        assert_eq!(resp_out[0].transport, Transport::General);
        deliver(&mut slave, now, &resp_out[0].bytes);
    }

    assert_eq!(
        slave.status().state,
        "Slave",
        "first completed offset calculation should promote Uncalibrated -> Slave"
    );
    // The servo should have actually computed and applied a frequency
    // adjustment to the clock over six synchronization rounds, and the
    // (near-zero, zero-latency-loopback) offset should never have been
    // large enough to trigger a step.
    assert!(slave_clock.freq_ppb().is_finite());
    assert_ne!(slave_clock.freq_ppb(), 0.0);
    assert_eq!(slave_clock.steps(), 0);
}

#[test]
fn master_without_foreign_masters_emits_announce_and_sync() {
    let mut master = master_port();
    let now = Instant::now();
    master.on_timer(TIMER_FOREIGN_MASTER, now);
    assert_eq!(master.status().state, "Master");

    let announce = master.on_timer(TIMER_ANNOUNCE_INTERVAL, now);
    assert_eq!(announce.len(), 1);
    assert_eq!(announce[0].transport, Transport::General);

    let sync = master.on_timer(TIMER_SYNC_INTERVAL, now);
    assert_eq!(sync.len(), 2);
    assert_eq!(sync[0].transport, Transport::Event);
    assert_eq!(sync[1].transport, Transport::General);
}

#[test]
fn delay_req_from_an_unrecognized_port_gets_no_response_when_not_master() {
    let (mut slave, _clock) = slave_port();
    let now = Instant::now();
    // Never having seen an Announce, this port is LISTENING, not MASTER, so
    // it must not answer DelayReqs (only a Master emits DelayResp).
    let delay_req = Message::decode(&build_delay_req_bytes()).unwrap();
    let out = slave.handle_rx(&delay_req, now, addr(319));
    assert!(out.is_empty());
}

#[test]
fn foreign_master_timer_expires_stale_records_and_falls_back_to_listening() {
    let mut master = master_port();
    let mut slave = slave_port().0;
    let mut now = Instant::now();
    master.on_timer(TIMER_FOREIGN_MASTER, now);

    for _ in 0..2 {
        for out in master.on_timer(TIMER_ANNOUNCE_INTERVAL, now) {
            deliver(&mut slave, now, &out.bytes);
        }
        now += Duration::from_secs(1);
    }
    assert_eq!(slave.status().state, "Uncalibrated");

    // Let the foreign-master record go stale (well past its qualification
    // window) without any further Announces, then let the periodic sweep
    // run: the record should expire and the slave should fall back to
    // LISTENING rather than staying latched onto a vanished master.
    now += Duration::from_secs(120);
    slave.on_timer(TIMER_FOREIGN_MASTER, now);
    assert_eq!(slave.status().state, "Listening");
}

#[test]
fn slave_does_not_emit_delay_req_before_a_master_is_selected() {
    let (mut slave, _clock) = slave_port();
    let now = Instant::now();
    assert!(slave
        .on_timer(TIMER_DELAY_REQ_INTERVAL, now)
        .is_empty());
}

#[test]
fn control_message_clearing_clock_ctrl_stops_frequency_application_but_keeps_state() {
    let (mut slave, _clock) = slave_port();
    use syncored::message::ControlFlags;
    let reply = slave.handle_message(ControlMessage::Control {
        mask: ControlFlags::CLOCK_CTRL,
        value: false,
    });
    assert!(matches!(reply, syncored::message::Reply::Ack));
}

fn build_delay_req_bytes() -> Vec<u8> {
    use syncored::ptp::{
        ControlField, DelayReqBody, Header, HeaderFlags, MessageBody, MessageType, PortIdentity,
        Timestamp,
    };
    let header = Header {
        message_type: MessageType::DelayReq,
        version: 2,
        message_length: Header::WIRE_SIZE as u16,
        domain_number: 0,
        flags: HeaderFlags::empty(),
        correction_field: 0,
        source_port_identity: PortIdentity {
            clock_identity: ClockIdentity::from_mac([0xCC, 0, 0, 0, 0, 1]),
            port_number: 1,
        },
        sequence_id: 1,
        control_field: ControlField::DelayReq,
        log_message_interval: 0x7F,
    };
    let message = Message {
        header,
        body: MessageBody::DelayReq(DelayReqBody {
            origin_timestamp: Timestamp::from_nanos(0),
        }),
        tlvs: Vec::new(),
    };
    let mut buf = vec![0u8; 128];
    let len = message.encode(&mut buf).unwrap();
    buf.truncate(len);
    buf
}
