//! Per-sync-module thread harness (§4.I, §5). Each sync module (a PTP
//! port, a PPS instance, the NTP free-run module) runs its engine on a
//! dedicated OS thread: a cooperative loop that polls its inbox plus its
//! own timer set, and dispatches whichever fires first. Cross-thread
//! interaction is exclusively `post`/`send_wait`; the only state visible
//! to other threads is a read-only, atomically-swapped `Status` snapshot.

use crate::message::{channel, ControlMessage, Inbox, Outbox, Reply};
use crate::status::InstanceStatus;
use crate::traits::SyncEngine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Tick resolution for the cooperative loop: achieves sub-interval
/// granularity against the fastest configured timer (62.5ms default).
pub const TICK_RESOLUTION: Duration = Duration::from_millis(62);

pub type TimerId = u32;

/// A single software countdown, reset on firing.
struct Timer {
    period: Duration,
    next_fire: Instant,
}

/// The harness's dynamically registered wait set: a timer id -> countdown
/// map the engine can add to or clear at any point (e.g. switching from
/// `Listening` to `Slave` changes which timers matter).
#[derive(Default)]
pub struct TimerSet {
    timers: HashMap<TimerId, Timer>,
}

impl TimerSet {
    pub fn new() -> Self {
        TimerSet::default()
    }

    pub fn set(&mut self, id: TimerId, period: Duration, now: Instant) {
        self.timers.insert(
            id,
            Timer {
                period,
                next_fire: now + period,
            },
        );
    }

    pub fn clear(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    /// Returns every timer id that has fired by `now`, resetting each.
    pub fn poll(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();
        for (&id, timer) in self.timers.iter_mut() {
            if now >= timer.next_fire {
                fired.push(id);
                timer.next_fire = now + timer.period;
            }
        }
        fired
    }

    /// Duration until the next timer fires, capped at `TICK_RESOLUTION`.
    fn next_wait(&self, now: Instant) -> Duration {
        self.timers
            .values()
            .map(|t| t.next_fire.saturating_duration_since(now))
            .min()
            .unwrap_or(TICK_RESOLUTION)
            .min(TICK_RESOLUTION)
    }
}

/// A running sync module: the join handle, its message inbox's sending
/// half, and a shared read-only status snapshot.
pub struct Handle {
    outbox: Outbox,
    status: Arc<RwLock<InstanceStatus>>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Handle {
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn status(&self) -> InstanceStatus {
        self.status.read().expect("status lock poisoned").clone()
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn `engine` on its own thread, driven by `timers` and an inbox the
/// returned `Handle` can `post`/`send_wait` into.
pub fn spawn<E>(mut engine: E, mut timers: TimerSet, inbox_depth: usize) -> Handle
where
    E: SyncEngine + Send + 'static,
{
    let (outbox, inbox) = channel(inbox_depth);
    let status = Arc::new(RwLock::new(engine.status()));
    let status_for_thread = status.clone();
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_thread = shutdown.clone();

    let join = thread::spawn(move || {
        run_loop(&mut engine, &inbox, &mut timers, &status_for_thread, &shutdown_for_thread);
    });

    Handle {
        outbox,
        status,
        shutdown,
        join: Some(join),
    }
}

fn run_loop<E: SyncEngine>(
    engine: &mut E,
    inbox: &Inbox,
    timers: &mut TimerSet,
    status: &Arc<RwLock<InstanceStatus>>,
    shutdown: &Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let now = Instant::now();
        let wait = timers.next_wait(now);

        if let Some((message, reply_to)) = inbox.recv_timeout(wait) {
            let reply = engine.handle_message(message);
            if let Some(reply_to) = reply_to {
                let _ = reply_to.send(reply);
            }
        }

        let now = Instant::now();
        for fired in timers.poll(now) {
            engine.on_timer(fired);
        }

        if let Ok(mut guard) = status.write() {
            *guard = engine.status();
        }
    }
}

/// Fan-out helper for the engine thread coordinating many harnesses: send
/// the same message to every handle, ignoring individual post failures
/// (a module that has already shut down is not this call's problem).
pub fn broadcast(handles: &[Handle], message: ControlMessage) {
    for handle in handles {
        let _ = handle.outbox().post(message.clone());
    }
}

/// Collect a `GetStatus` reply from every handle, skipping any that don't
/// answer within `timeout`.
pub fn collect_status(handles: &[Handle], timeout: Duration) -> Vec<InstanceStatus> {
    handles
        .iter()
        .filter_map(|handle| {
            match handle.outbox().send_wait(ControlMessage::GetStatus, timeout) {
                Ok(Reply::Status(status)) => status.instances.into_iter().next(),
                _ => Some(handle.status()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ControlMessage;
    use crate::status::InstanceStatus;

    struct EchoEngine {
        ticks: u32,
        status: InstanceStatus,
    }

    impl SyncEngine for EchoEngine {
        fn handle_message(&mut self, message: ControlMessage) -> Reply {
            match message {
                ControlMessage::GetStatus => Reply::Ack,
                _ => Reply::Ack,
            }
        }

        fn on_timer(&mut self, _timer: TimerId) {
            self.ticks += 1;
        }

        fn status(&self) -> InstanceStatus {
            self.status.clone()
        }
    }

    #[test]
    fn timer_set_fires_once_per_period_and_resets() {
        let mut timers = TimerSet::new();
        let t0 = Instant::now();
        timers.set(1, Duration::from_millis(10), t0);
        assert!(timers.poll(t0).is_empty());
        let fired = timers.poll(t0 + Duration::from_millis(15));
        assert_eq!(fired, vec![1]);
        assert!(timers.poll(t0 + Duration::from_millis(16)).is_empty());
    }

    #[test]
    fn spawn_delivers_posted_message_and_stops_cleanly() {
        let engine = EchoEngine {
            ticks: 0,
            status: InstanceStatus::default(),
        };
        let handle = spawn(engine, TimerSet::new(), 4);
        handle.outbox().post(ControlMessage::Run).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        handle.stop();
    }
}
