//! Cross-thread control messages exchanged between the engine thread and
//! each sync-module harness (§6, §5). Delivery is either fire-and-forget
//! (`post`) or synchronous request/reply (`send_wait`); see `harness`.

use crate::status::Status;
use std::sync::mpsc::{Receiver, SyncSender};
use std::time::Duration;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlFlags: u32 {
        const CLOCK_CTRL              = 1 << 0;
        const TIMESTAMP_PROCESSING    = 1 << 1;
        const SELECTED                = 1 << 2;
        const CLUSTERING_DETERMINANT  = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub enum ControlMessage {
    Run,
    GetStatus,
    Control { mask: ControlFlags, value: bool },
    UpdateGmInfo { grandmaster_identity: [u8; 8], steps_removed: u16 },
    UpdateLeapSecond { offset_seconds: i16 },
    StepClock { offset_ns: i64 },
    LogStats,
    SaveState,
    WriteTopology,
    StatsEndPeriod,
    TestMode(bool),
    ServoPidAdjust { kp: f64, ki: f64, kd: f64 },
}

#[derive(Debug, Clone)]
pub enum Reply {
    Ack,
    Status(Box<Status>),
    Error(String),
}

/// One end of a sync module's inbox: the engine posts or sends into it.
pub struct Outbox {
    sender: SyncSender<(ControlMessage, Option<SyncSender<Reply>>)>,
}

impl Outbox {
    pub fn post(&self, message: ControlMessage) -> anyhow::Result<()> {
        self.sender
            .send((message, None))
            .map_err(|e| anyhow::anyhow!("sync module inbox closed: {e}"))
    }

    pub fn send_wait(&self, message: ControlMessage, timeout: Duration) -> anyhow::Result<Reply> {
        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(1);
        self.sender
            .send((message, Some(reply_tx)))
            .map_err(|e| anyhow::anyhow!("sync module inbox closed: {e}"))?;
        reply_rx
            .recv_timeout(timeout)
            .map_err(|e| anyhow::anyhow!("no reply within {timeout:?}: {e}"))
    }
}

/// The receiving side, owned by the sync module's own thread.
pub struct Inbox {
    receiver: Receiver<(ControlMessage, Option<SyncSender<Reply>>)>,
}

impl Inbox {
    pub fn try_recv(&self) -> Option<(ControlMessage, Option<SyncSender<Reply>>)> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Option<(ControlMessage, Option<SyncSender<Reply>>)> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

pub fn channel(depth: usize) -> (Outbox, Inbox) {
    let (sender, receiver) = std::sync::mpsc::sync_channel(depth.max(1));
    (Outbox { sender }, Inbox { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn post_is_fire_and_forget() {
        let (outbox, inbox) = channel(4);
        outbox.post(ControlMessage::Run).unwrap();
        let (msg, reply) = inbox.try_recv().unwrap();
        assert!(matches!(msg, ControlMessage::Run));
        assert!(reply.is_none());
    }

    #[test]
    fn send_wait_round_trips_a_reply() {
        let (outbox, inbox) = channel(4);
        let worker = std::thread::spawn(move || {
            let (msg, reply) = inbox.recv_timeout(Duration::from_secs(1)).unwrap();
            assert!(matches!(msg, ControlMessage::GetStatus));
            reply.unwrap().send(Reply::Ack).unwrap();
        });
        let reply = outbox
            .send_wait(ControlMessage::GetStatus, Duration::from_secs(1))
            .unwrap();
        assert!(matches!(reply, Reply::Ack));
        worker.join().unwrap();
    }

    #[test]
    fn control_flags_compose() {
        let flags = ControlFlags::CLOCK_CTRL | ControlFlags::SELECTED;
        assert!(flags.contains(ControlFlags::CLOCK_CTRL));
        assert!(!flags.contains(ControlFlags::TIMESTAMP_PROCESSING));
    }
}
