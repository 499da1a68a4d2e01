//! PPS synchronization loop (§4.G): validates 1 Hz hardware edges against a
//! notch filter centred on the nominal period, derives a sub-second phase
//! error against the nearest second boundary, cross-checks it against a
//! coarse time-of-day source to rule out a whole-second ambiguity, and
//! drives the shared FIR/PID/step-policy cascade (`servo::Servo`) from the
//! result.
//!
//! The edge source and the clock being disciplined are kept as separate
//! type parameters: a GPS receiver's `/dev/ppsN` device supplies the edges
//! but is not itself a clock, and the clock it disciplines (the system
//! clock, typically) has no notion of PPS edges. Forcing both behind one
//! trait bound would mean a fake implementation for whichever half a given
//! piece of hardware doesn't provide.

use crate::clock::{PpsSource, SystemClock};
use crate::config::PpsConfig;
use crate::filters::{Notch, Peirce};
use crate::harness::TimerId;
use crate::message::{ControlFlags, ControlMessage, Reply};
use crate::servo::{Servo, ServoAction};
use crate::status::{Alarms, InstanceStatus, Status};
use crate::traits::{NtpSource, SyncEngine};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const TIMER_PPS_POLL: TimerId = 20;
pub const TIMER_EDGE_WATCHDOG: TimerId = 21;

/// Consecutive good periods required before the servo is engaged (or
/// before the bad-signal alarm clears).
const SYNC_THRESHOLD: u32 = 3;
/// Time allowed to reach `SYNC_THRESHOLD` good periods before raising
/// `NO_PPS_SIGNAL`.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(8);
/// No edge within this long after the previous one: raise the missed-edge
/// alarm (folded into `NO_PPS_SIGNAL`, same soft-alarm family).
const MISSED_EDGE_TIMEOUT: Duration = Duration::from_millis(1100);
/// No edge at all for this long: give up and revert to `Listening`.
const SIGNAL_LOST_TIMEOUT: Duration = Duration::from_secs(60);
/// Disagreement between the ToD source and the PPS phase this large means
/// the edge has been attributed to the wrong whole second.
const TOD_AMBIGUITY_THRESHOLD_NS: i64 = 500_000_000;
/// How long to block waiting for the next hardware edge per poll.
const PPS_FETCH_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpsState {
    /// Not yet seeing `SYNC_THRESHOLD` consecutive good periods; servo idle.
    Listening,
    /// Servo engaged and disciplining `clock`.
    Active,
}

pub struct Pps<P, C, T>
where
    P: PpsSource,
    C: SystemClock,
    T: NtpSource,
{
    config: PpsConfig,
    edge_source: P,
    clock: C,
    tod: T,

    notch: Notch,
    period_stats: Peirce,
    servo: Servo,

    state: PpsState,
    consecutive_good: u32,
    acquiring_since: Option<Instant>,
    last_edge_monotonic: Option<Instant>,
    last_edge_wall: Option<SystemTime>,

    alarms: Alarms,
    control_flags: ControlFlags,
    clock_steps: u64,
    last_offset_ns: i64,
}

/// Signed distance (ns) from `wall` to the nearest whole second, in
/// `(-500_000_000, 500_000_000]`. A PPS edge should land on a second
/// boundary; this is the raw phase error before any ToD cross-check.
fn phase_error_ns(wall: SystemTime) -> i64 {
    let dur = wall.duration_since(UNIX_EPOCH).unwrap_or_default();
    let nanos = dur.subsec_nanos() as i64;
    if nanos > 500_000_000 {
        nanos - 1_000_000_000
    } else {
        nanos
    }
}

fn signed_duration_ns(a: SystemTime, b: SystemTime) -> i64 {
    match a.duration_since(b) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

impl<P, C, T> Pps<P, C, T>
where
    P: PpsSource,
    C: SystemClock,
    T: NtpSource,
{
    pub fn new(config: PpsConfig, edge_source: P, clock: C, tod: T) -> Self {
        let notch = Notch::new(config.notch_midpoint_ns, config.notch_width_ns);
        let servo = Servo::new(config.servo);
        Pps {
            config,
            edge_source,
            clock,
            tod,
            notch,
            period_stats: Peirce::new(20, 0.0),
            servo,
            state: PpsState::Listening,
            consecutive_good: 0,
            acquiring_since: None,
            last_edge_monotonic: None,
            last_edge_wall: None,
            alarms: Alarms::empty(),
            control_flags: ControlFlags::CLOCK_CTRL | ControlFlags::TIMESTAMP_PROCESSING,
            clock_steps: 0,
            last_offset_ns: 0,
        }
    }

    pub fn state(&self) -> PpsState {
        self.state
    }

    /// Feed one PPS period measurement (nanoseconds between this edge and
    /// the previous one). Returns whether it fell inside the notch band.
    /// Split out from `handle_edge` so the literal sample sequence a test
    /// exercises can be driven directly without real hardware.
    pub fn observe_period(&mut self, period_ns: f64, now: Instant) -> bool {
        let good = self.notch.update(period_ns).is_ok();
        let _ = self.period_stats.update(period_ns);

        if good {
            self.consecutive_good += 1;
            if self.consecutive_good >= SYNC_THRESHOLD {
                self.alarms.remove(Alarms::PPS_BAD_SIGNAL);
            }
        } else {
            self.consecutive_good = 0;
            self.alarms.insert(Alarms::PPS_BAD_SIGNAL);
        }

        if self.state == PpsState::Listening {
            if self.acquiring_since.is_none() {
                self.acquiring_since = Some(now);
            }
            if self.consecutive_good >= SYNC_THRESHOLD {
                self.engage();
            }
        }

        good
    }

    fn engage(&mut self) {
        self.state = PpsState::Active;
        self.acquiring_since = None;
        self.alarms.remove(Alarms::NO_PPS_SIGNAL);
    }

    fn revert_to_listening(&mut self) {
        self.state = PpsState::Listening;
        self.consecutive_good = 0;
        self.acquiring_since = None;
    }

    /// Cross-check the edge's phase error against the coarse ToD source
    /// and, if they agree on which second it is, feed the phase error
    /// through the servo. Only meaningful once `state` is `Active`.
    fn discipline(&mut self, wall: SystemTime, now: Instant) {
        if self.state != PpsState::Active {
            return;
        }
        let phase_err_ns = phase_error_ns(wall);

        match self.tod.get_offset() {
            Ok((dur, sign)) => {
                let tod_offset_ns = sign as i64 * dur.as_nanos() as i64;
                if (tod_offset_ns - phase_err_ns).abs() > TOD_AMBIGUITY_THRESHOLD_NS {
                    log::warn!(
                        "pps {}: ToD offset ({tod_offset_ns}ns) disagrees with PPS phase \
                         ({phase_err_ns}ns) on which second this is, skipping this cycle",
                        self.config.clock_name
                    );
                    self.alarms.insert(Alarms::PPS_BAD_SIGNAL);
                    return;
                }
            }
            Err(e) => {
                log::warn!(
                    "pps {}: time-of-day source unavailable ({e}), disciplining on phase alone",
                    self.config.clock_name
                );
            }
        }

        self.last_offset_ns = phase_err_ns;
        match self.servo.process(phase_err_ns, now) {
            ServoAction::Step { offset_ns } => {
                if let Err(e) = self.clock.step_clock(
                    Duration::from_nanos(offset_ns.unsigned_abs()),
                    if offset_ns < 0 { 1 } else { -1 },
                ) {
                    log::warn!("pps {}: clock step failed: {e}", self.config.clock_name);
                } else {
                    self.clock_steps += 1;
                }
            }
            ServoAction::AdjustFrequency { ppb } => {
                if let Err(e) = self.clock.adjust_frequency(ppb) {
                    log::warn!("pps {}: frequency adjust failed: {e}", self.config.clock_name);
                    self.alarms.insert(Alarms::SERVO_FAIL);
                } else {
                    self.alarms.remove(Alarms::SERVO_FAIL);
                }
            }
        }
    }

    /// Record a hardware edge arriving at wall-clock `wall` (monotonic
    /// `now`). Computes the period against the previous edge and drives
    /// the full pipeline.
    pub fn handle_edge(&mut self, wall: SystemTime, now: Instant) {
        if let Some(last_wall) = self.last_edge_wall {
            let period_ns = signed_duration_ns(wall, last_wall) as f64;
            self.observe_period(period_ns, now);
        }
        self.last_edge_wall = Some(wall);
        self.last_edge_monotonic = Some(now);
        self.alarms.remove(Alarms::NO_PPS_SIGNAL);

        self.discipline(wall, now);
    }

    /// Poll hardware for the next edge; called on `TIMER_PPS_POLL`.
    fn poll_hardware(&mut self, now: Instant) {
        if let Ok(wall) = self.edge_source.pps_fetch(PPS_FETCH_TIMEOUT) {
            self.handle_edge(wall, now);
        }
    }

    /// Check edge timeouts; called on `TIMER_EDGE_WATCHDOG`, independent of
    /// whether a fresh edge arrived this tick.
    fn check_watchdog(&mut self, now: Instant) {
        if let Some(last) = self.last_edge_monotonic {
            let since = now.duration_since(last);
            if since > MISSED_EDGE_TIMEOUT {
                self.alarms.insert(Alarms::NO_PPS_SIGNAL);
            }
            if since > SIGNAL_LOST_TIMEOUT && self.state == PpsState::Active {
                log::warn!(
                    "pps {}: no edges for {:?}, reverting to Listening",
                    self.config.clock_name,
                    since
                );
                self.revert_to_listening();
            }
        }
        if self.state == PpsState::Listening {
            if let Some(started) = self.acquiring_since {
                if now.duration_since(started) > ACQUIRE_TIMEOUT {
                    self.alarms.insert(Alarms::NO_PPS_SIGNAL);
                }
            }
        }
    }

    fn instance_status(&self) -> InstanceStatus {
        InstanceStatus {
            clock_name: self.config.clock_name.clone(),
            clock_id: [0; 8],
            state: format!("{:?}", self.state),
            alarms: self.alarms,
            control_flags: self.control_flags.bits(),
            interface: self.config.device.clone(),
            offset_from_master_ns: self.last_offset_ns,
            freq_adjustment_ppb: self.servo.frequency_correction(),
            in_sync: self.servo.synchronized(),
            clustering_score: 0.0,
            updated_unix_secs: 0,
            clock_steps: self.clock_steps,
        }
    }
}

impl<P, C, T> SyncEngine for Pps<P, C, T>
where
    P: PpsSource,
    C: SystemClock,
    T: NtpSource,
{
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
                self.servo
                    .set_clock_control(self.control_flags.contains(ControlFlags::CLOCK_CTRL));
                if !self.control_flags.contains(ControlFlags::TIMESTAMP_PROCESSING) {
                    self.last_offset_ns = 0;
                }
                Reply::Ack
            }
            ControlMessage::SaveState => {
                self.servo.commit_frequency_correction();
                if let Err(e) = self
                    .clock
                    .save_freq_correction(self.servo.frequency_correction())
                {
                    return Reply::Error(format!("save_freq_correction failed: {e}"));
                }
                Reply::Ack
            }
            _ => Reply::Ack,
        }
    }

    fn on_timer(&mut self, timer: TimerId) {
        let now = Instant::now();
        match timer {
            TIMER_PPS_POLL => self.poll_hardware(now),
            TIMER_EDGE_WATCHDOG => self.check_watchdog(now),
            _ => {}
        }
    }

    fn status(&self) -> InstanceStatus {
        self.instance_status()
    }
}
