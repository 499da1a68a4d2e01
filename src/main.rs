//! Process entry point (§6): CLI args, JSON config load, singleton lock,
//! realtime scheduling, and the top-level wiring that turns a `SystemConfig`
//! into running sync-module threads.
//!
//! Two different thread shapes coexist here. PPS instances fit the generic
//! `harness::SyncEngine` model cleanly (inbox + timers, no byte stream) and
//! are launched with `harness::spawn`. PTP ports need to move bytes on and
//! off the wire, which that abstraction has no room for, so each port gets
//! a bespoke loop in this file that drives its `Port` directly against a
//! `UdpPtpNetwork` and only borrows the inbox/timer machinery's shapes, not
//! `harness::spawn` itself.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::{flock, FlockArg};

use syncored::clock::linux::{LinuxClock, LinuxPps};
use syncored::clock::PpsSource;
use syncored::config::{ClockConfig, PpsConfig, PtpPortConfig, SystemConfig};
use syncored::harness::{self, Handle, TimerSet};
use syncored::message::{self, ControlMessage, Inbox, Outbox};
use syncored::net::UdpPtpNetwork;
use syncored::ntp::NtpClient;
use syncored::port::{self, Port};
use syncored::pps::{self, Pps};
use syncored::ptp::{ClockIdentity, Message};
use syncored::status::InstanceStatus;
use syncored::traits::{PtpNetwork, SyncEngine};

const DEFAULT_CONFIG_PATH: &str = "/etc/syncored/config.json";
const LOCK_PATH: &str = "/var/run/syncored.lock";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON system configuration. Written with defaults on
    /// first run if missing.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Skip the realtime scheduling and NTP-service-stopping setup steps,
    /// useful when running unprivileged for a quick check.
    #[arg(long, default_value_t = false)]
    no_privileged_setup: bool,
}

fn load_or_init_config(path: &Path) -> Result<SystemConfig> {
    match SystemConfig::load(path) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("could not load config at {}: {e}, writing defaults", path.display());
            let config = SystemConfig::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&config)?)?;
            Ok(config)
        }
    }
}

fn acquire_singleton_lock() -> Result<File> {
    let file = File::create(LOCK_PATH)
        .with_context(|| format!("failed to create lock file {LOCK_PATH}"))?;
    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(file),
        Err(nix::errno::Errno::EAGAIN) => {
            Err(anyhow!("another instance of syncored is already running ({LOCK_PATH})"))
        }
        Err(e) => Err(e.into()),
    }
}

fn enable_realtime_priority() {
    unsafe {
        let param = libc::sched_param { sched_priority: 50 };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) == 0 {
            info!("realtime priority (SCHED_FIFO, 50) enabled");
        } else {
            warn!(
                "failed to set realtime priority: {}, latency may suffer",
                std::io::Error::last_os_error()
            );
        }
    }
}

fn stop_conflicting_time_services() {
    info!("disabling systemd-timesyncd via timedatectl set-ntp false");
    match std::process::Command::new("timedatectl")
        .args(["set-ntp", "false"])
        .output()
    {
        Ok(_) => {}
        Err(e) => warn!("failed to run timedatectl (ignoring): {e}"),
    }
}

/// Resolve a configured interface name to its IPv4 address and MAC, used
/// to bind sockets and derive a clock identity.
fn resolve_interface(name: &str) -> Result<(Ipv4Addr, [u8; 6])> {
    let iface = pnet_datalink::interfaces()
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| anyhow!("no such network interface: {name}"))?;

    let ip = iface
        .ips
        .iter()
        .find_map(|ip| match ip.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            _ => None,
        })
        .ok_or_else(|| anyhow!("interface {name} has no IPv4 address"))?;

    let mac = iface
        .mac
        .map(|m| m.octets())
        .ok_or_else(|| anyhow!("interface {name} has no MAC address"))?;

    Ok((ip, mac))
}

/// `2^log_interval` seconds, the IEEE 1588 `logMessageInterval` convention.
fn log_interval_duration(log_interval: i8) -> Duration {
    let secs = 2f64.powi(log_interval as i32);
    Duration::from_secs_f64(secs.max(0.001))
}

/// Tracks which `ClockConfig` names have already been claimed by a running
/// engine instance, since a `LinuxClock`/`LinuxPps` is owned by value by
/// exactly one engine and cannot be shared.
struct ClockRegistry<'a> {
    configs: &'a [ClockConfig],
    claimed: HashMap<String, ()>,
}

impl<'a> ClockRegistry<'a> {
    fn new(configs: &'a [ClockConfig]) -> Self {
        ClockRegistry {
            configs,
            claimed: HashMap::new(),
        }
    }

    fn claim_linux_clock(&mut self, name: &str) -> Result<LinuxClock> {
        if self.claimed.insert(name.to_string(), ()).is_some() {
            return Err(anyhow!(
                "clock '{name}' is claimed by more than one port/PPS instance"
            ));
        }
        let config = self
            .configs
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| anyhow!("no clock configured with name '{name}'"))?;
        LinuxClock::new(config.max_freq_adjustment_ppb, config.persistence_path.clone())
            .with_context(|| format!("failed to open clock '{name}'"))
    }
}

/// Drive one PTP port's real socket I/O and timers on a dedicated thread
/// until `shutdown` is set. Inbox commands (`GetStatus`, `SaveState`, ...)
/// are drained opportunistically between network polls.
fn run_port_loop(
    mut port: Port<LinuxClock>,
    mut network: UdpPtpNetwork,
    config: &PtpPortConfig,
    inbox: Inbox,
    shutdown: Arc<AtomicBool>,
    status: Arc<RwLock<InstanceStatus>>,
) {
    let mut timers = TimerSet::new();
    let now = Instant::now();
    timers.set(port::TIMER_ANNOUNCE_INTERVAL, log_interval_duration(config.log_announce_interval), now);
    timers.set(port::TIMER_SYNC_INTERVAL, log_interval_duration(config.log_sync_interval), now);
    timers.set(port::TIMER_DELAY_REQ_INTERVAL, log_interval_duration(config.log_min_delay_req_interval), now);
    timers.set(
        port::TIMER_ANNOUNCE_RECEIPT,
        log_interval_duration(config.log_announce_interval) * config.announce_receipt_timeout as u32,
        now,
    );
    timers.set(port::TIMER_FOREIGN_MASTER, Duration::from_secs(1), now);

    while !shutdown.load(Ordering::SeqCst) {
        if let Some((message, reply_to)) = inbox.try_recv() {
            let reply = port.handle_message(message);
            if let Some(reply_to) = reply_to {
                let _ = reply_to.send(reply);
            }
        }

        match network.recv_packet() {
            Ok(Some((bytes, len, _timestamp, source))) => {
                match Message::decode(&bytes[..len]) {
                    Ok(message) => {
                        let outgoing = port.handle_rx(&message, Instant::now(), source);
                        send_all(&mut network, &config.clock_name, &outgoing);
                    }
                    Err(e) => warn!("port {}: malformed packet: {e}", config.clock_name),
                }
            }
            Ok(None) => {}
            Err(e) => warn!("port {}: recv failed: {e}", config.clock_name),
        }

        let now = Instant::now();
        for fired in timers.poll(now) {
            let outgoing = port.on_timer(fired, now);
            send_all(&mut network, &config.clock_name, &outgoing);
        }

        if let Ok(mut guard) = status.write() {
            *guard = port.status();
        }

        thread::sleep(harness::TICK_RESOLUTION / 4);
    }
}

fn send_all(network: &mut UdpPtpNetwork, clock_name: &str, outgoing: &[port::Outgoing]) {
    for out in outgoing {
        let result = match out.transport {
            port::Transport::Event => network.send_event(out.dest, &out.bytes),
            port::Transport::General => network.send_general(out.dest, &out.bytes),
        };
        if let Err(e) = result {
            warn!("port {clock_name}: send failed: {e}");
        }
    }
}

fn spawn_port(
    config: PtpPortConfig,
    clocks: &mut ClockRegistry,
    shutdown: Arc<AtomicBool>,
) -> Result<(thread::JoinHandle<()>, Outbox, Arc<RwLock<InstanceStatus>>)> {
    let (ip, mac) = resolve_interface(&config.interface)?;
    let network = UdpPtpNetwork::bind(ip)
        .with_context(|| format!("failed to bind sockets on {}", config.interface))?;
    let clock = clocks.claim_linux_clock(&config.clock_name)?;
    let identity = ClockIdentity::from_mac(mac);

    let port = Port::new(config.clone(), identity, 1, clock);
    let (outbox, inbox) = message::channel(8);
    let status = Arc::new(RwLock::new(InstanceStatus::default()));
    let status_for_thread = status.clone();

    let config_for_thread = config.clone();
    let join = thread::spawn(move || {
        run_port_loop(port, network, &config_for_thread, inbox, shutdown, status_for_thread);
    });

    Ok((join, outbox, status))
}

fn spawn_pps(config: PpsConfig, clocks: &mut ClockRegistry, ntp: &HashMap<String, String>) -> Result<Handle> {
    let clock = clocks.claim_linux_clock(&config.clock_name)?;

    let mut edge_source = LinuxPps::open(&config.device)
        .with_context(|| format!("failed to open PPS device {}", config.device))?;
    edge_source.pps_enable()?;

    let server = ntp
        .get(&config.tod_source)
        .ok_or_else(|| anyhow!("PPS instance references unknown NTP source '{}'", config.tod_source))?;
    let tod = NtpClient::new(server);

    let mut timers = TimerSet::new();
    let now = Instant::now();
    timers.set(pps::TIMER_PPS_POLL, Duration::from_millis(200), now);
    timers.set(pps::TIMER_EDGE_WATCHDOG, Duration::from_millis(500), now);

    let engine = Pps::new(config, edge_source, clock, tod);
    Ok(harness::spawn(engine, timers, 8))
}

fn run(args: Args, running: Arc<AtomicBool>) -> Result<()> {
    let config = load_or_init_config(&args.config)?;

    if !args.no_privileged_setup {
        stop_conflicting_time_services();
        enable_realtime_priority();
    }

    let _ = sd_notify::notify(
        false,
        &[sd_notify::NotifyState::Status(
            format!("v{} | starting", env!("CARGO_PKG_VERSION")).as_str(),
        )],
    );

    let ntp_servers: HashMap<String, String> = config
        .ntp
        .iter()
        .map(|n| (n.name.clone(), n.server.clone()))
        .collect();

    let mut clocks = ClockRegistry::new(&config.clocks);

    let mut port_threads = Vec::new();
    for port_config in &config.ptp_ports {
        match spawn_port(port_config.clone(), &mut clocks, running.clone()) {
            Ok((join, outbox, status)) => port_threads.push((join, outbox, status)),
            Err(e) => error!("failed to start port '{}': {e}", port_config.clock_name),
        }
    }

    let mut pps_handles = Vec::new();
    for pps_config in &config.pps {
        match spawn_pps(pps_config.clone(), &mut clocks, &ntp_servers) {
            Ok(handle) => pps_handles.push(handle),
            Err(e) => error!("failed to start PPS instance '{}': {e}", pps_config.clock_name),
        }
    }

    if port_threads.is_empty() && pps_handles.is_empty() {
        return Err(anyhow!("no sync-module instances started, nothing to do"));
    }

    let _ = sd_notify::notify(
        false,
        &[
            sd_notify::NotifyState::Ready,
            sd_notify::NotifyState::Status(
                format!("v{} | running", env!("CARGO_PKG_VERSION")).as_str(),
            ),
        ],
    );

    let mut last_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        if last_log.elapsed() >= Duration::from_secs(10) {
            for (_, _, status) in &port_threads {
                let s = status.read().expect("status lock poisoned").clone();
                info!(
                    "port {}: {} offset={}ns freq={:.1}ppb in_sync={}",
                    s.clock_name, s.state, s.offset_from_master_ns, s.freq_adjustment_ppb, s.in_sync
                );
            }
            for handle in &pps_handles {
                let s = handle.status();
                info!(
                    "pps {}: {} offset={}ns freq={:.1}ppb in_sync={}",
                    s.clock_name, s.state, s.offset_from_master_ns, s.freq_adjustment_ppb, s.in_sync
                );
            }
            last_log = Instant::now();
        }
        thread::sleep(Duration::from_millis(250));
    }

    info!("shutting down");
    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]);

    for (join, outbox, _) in port_threads {
        let _ = outbox.post(ControlMessage::SaveState);
        let _ = join.join();
    }
    for handle in pps_handles {
        let _ = handle.outbox().send_wait(ControlMessage::SaveState, Duration::from_millis(500));
        handle.stop();
    }

    Ok(())
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp_millis()
        .format_target(false)
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("syncored v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let _lock_file = match acquire_singleton_lock() {
        Ok(f) => f,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("signal received, shutting down");
        r.store(false, Ordering::SeqCst);
    })?;

    run(args, running)
}
