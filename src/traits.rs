use crate::harness::TimerId;
use crate::message::{ControlMessage, Reply};
use crate::status::InstanceStatus;
use anyhow::Result;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

#[cfg_attr(test, mockall::automock)]
pub trait NtpSource {
    fn get_offset(&self) -> Result<(Duration, i8)>;
}

/// A port's view of its transport: receive one datagram off either socket
/// (event or general), or send one out. Kept as a trait so `port`'s thread
/// wiring can be driven by `MockPtpNetwork` in tests instead of real
/// sockets.
#[cfg_attr(test, mockall::automock)]
pub trait PtpNetwork {
    /// Receive a packet. Returns `Ok(Some((data, len, timestamp, source)))`
    /// if one was waiting on either socket. Returns `Ok(None)` on a
    /// timeout/would-block with nothing to report.
    fn recv_packet(&mut self) -> Result<Option<(Vec<u8>, usize, SystemTime, SocketAddr)>>;

    /// Send on the event-message (319) transport. `dest = None` sends to
    /// the primary multicast group.
    fn send_event(&mut self, dest: Option<SocketAddr>, bytes: &[u8]) -> Result<()>;

    /// Send on the general-message (320) transport. `dest = None` sends to
    /// the primary multicast group.
    fn send_general(&mut self, dest: Option<SocketAddr>, bytes: &[u8]) -> Result<()>;

    /// Reset the network state (e.g. clear buffers). Default impl does nothing.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What a sync module's harness drives: one PTP port, one PPS instance, the
/// NTP free-run module. The harness owns the thread and the timer/inbox
/// wait set; this trait is the only thing it calls into.
pub trait SyncEngine {
    fn handle_message(&mut self, message: ControlMessage) -> Reply;
    fn on_timer(&mut self, timer: TimerId);
    fn status(&self) -> InstanceStatus;
}