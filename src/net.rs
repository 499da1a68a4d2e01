//! IPv4/UDP transport for PTP (§6): event port 319, general port 320, the
//! primary and pdelay multicast groups, kernel RX timestamping. IPv6 and
//! raw-Ethernet transports are acknowledged in the data model but not
//! wired up here.

use crate::traits::PtpNetwork;
use anyhow::{anyhow, Result};
use pnet_datalink::{self, NetworkInterface};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::SystemTime;

#[cfg(unix)]
use nix::sys::socket::{setsockopt, sockopt};
#[cfg(unix)]
use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrIn};
#[cfg(unix)]
use std::io::IoSliceMut;
#[cfg(unix)]
use std::os::fd::AsRawFd;
#[cfg(unix)]
use std::time::{Duration, UNIX_EPOCH};

pub const EVENT_PORT: u16 = 319;
pub const GENERAL_PORT: u16 = 320;

/// Primary multicast group for Announce/Sync/FollowUp/DelayReq/DelayResp.
pub const MULTICAST_PRIMARY: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 129);
/// Peer-delay multicast group (PDelayReq/PDelayResp/PDelayRespFollowUp).
pub const MULTICAST_PDELAY: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 107);

/// Packet size ceiling (allowing TLVs).
pub const MAX_PACKET_SIZE: usize = 500;

pub fn get_default_interface() -> Result<(NetworkInterface, Ipv4Addr)> {
    let interfaces = pnet_datalink::interfaces();
    let usable_interfaces: Vec<&NetworkInterface> = interfaces
        .iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
        .collect();

    if usable_interfaces.is_empty() {
        log::warn!("No suitable network interface found. Diagnostics:");
        for iface in &interfaces {
            log::warn!(
                " - Name: '{}', Up: {}, Loopback: {}, IPs: {:?}",
                iface.name,
                iface.is_up(),
                iface.is_loopback(),
                iface.ips,
            );
        }
        return Err(anyhow!("No suitable network interface found"));
    }

    let mut best_iface = None;
    let mut best_ip = None;

    for iface in usable_interfaces {
        let ipv4 = iface.ips.iter().find(|ip| ip.is_ipv4()).map(|ip| {
            if let IpAddr::V4(addr) = ip.ip() {
                addr
            } else {
                unreachable!()
            }
        });

        if let Some(ip) = ipv4 {
            let name_lower = iface.name.to_lowercase();
            let desc_lower = iface.description.to_lowercase();
            let is_likely_wireless = name_lower.contains("wlan")
                || name_lower.contains("wifi")
                || name_lower.contains("wireless")
                || desc_lower.contains("wlan")
                || desc_lower.contains("wifi")
                || desc_lower.contains("wireless");

            if !is_likely_wireless {
                best_iface = Some(iface.clone());
                best_ip = Some(ip);
                break;
            } else if best_iface.is_none() {
                best_iface = Some(iface.clone());
                best_ip = Some(ip);
            }
        }
    }

    match (best_iface, best_ip) {
        (Some(iface), Some(ip)) => Ok((iface, ip)),
        _ => Err(anyhow!("No suitable network interface found")),
    }
}

/// Bind `port` on all interfaces, join both PTP multicast groups on
/// `interface_ip`, and enable kernel RX timestamping.
pub fn create_multicast_socket(port: u16, interface_ip: Ipv4Addr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;

    socket.join_multicast_v4(&MULTICAST_PRIMARY, &interface_ip)?;
    socket.join_multicast_v4(&MULTICAST_PDELAY, &interface_ip)?;

    socket.set_multicast_loop_v4(false)?;
    socket.set_nonblocking(true)?;

    let udp_socket: UdpSocket = socket.into();

    #[cfg(unix)]
    {
        match setsockopt(&udp_socket, sockopt::ReceiveTimestampns, &true) {
            Ok(_) => log::info!("kernel timestamping (SO_TIMESTAMPNS) enabled on port {port}"),
            Err(e) => log::warn!("failed to enable kernel timestamping on port {port}: {e}"),
        }
    }

    Ok(udp_socket)
}

/// Bind the pair of sockets a PTP port needs: event (319) and general (320).
pub fn bind_port_sockets(interface_ip: Ipv4Addr) -> Result<(UdpSocket, UdpSocket)> {
    let event = create_multicast_socket(EVENT_PORT, interface_ip)?;
    let general = create_multicast_socket(GENERAL_PORT, interface_ip)?;
    Ok((event, general))
}

/// Receive one datagram off `socket`, recovering the kernel RX timestamp
/// from the `SO_TIMESTAMPNS` control message `create_multicast_socket`
/// enabled. Falls back to `SystemTime::now()` if the kernel didn't attach
/// one (older kernels, loopback in some configurations).
#[cfg(unix)]
pub fn recv_with_timestamp(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> Result<Option<(Vec<u8>, usize, SystemTime, SocketAddr)>> {
    let fd = socket.as_raw_fd();
    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsg_buffer = nix::cmsg_space!(nix::sys::time::TimeSpec);

    let msg = match recvmsg::<SockaddrIn>(fd, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty()) {
        Ok(msg) => msg,
        Err(nix::errno::Errno::EAGAIN) | Err(nix::errno::Errno::EWOULDBLOCK) => return Ok(None),
        Err(e) => return Err(anyhow!("recvmsg failed: {e}")),
    };

    let mut timestamp = None;
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmTimestampns(ts) = cmsg {
            timestamp = Some(UNIX_EPOCH + Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32));
        }
    }

    let source = msg
        .address
        .ok_or_else(|| anyhow!("recvmsg returned no source address"))?;
    let source = SocketAddr::new(IpAddr::V4(*source.ip()), source.port());
    let len = msg.bytes;
    Ok(Some((
        buf[..len].to_vec(),
        len,
        timestamp.unwrap_or_else(SystemTime::now),
        source,
    )))
}

/// `PtpNetwork` backed by a real pair of bound multicast sockets (§6): the
/// only implementation a running port actually uses; `MockPtpNetwork`
/// stands in for it in tests.
pub struct UdpPtpNetwork {
    event: UdpSocket,
    general: UdpSocket,
    recv_buf: [u8; MAX_PACKET_SIZE],
}

impl UdpPtpNetwork {
    pub fn bind(interface_ip: Ipv4Addr) -> Result<Self> {
        let (event, general) = bind_port_sockets(interface_ip)?;
        Ok(UdpPtpNetwork {
            event,
            general,
            recv_buf: [0u8; MAX_PACKET_SIZE],
        })
    }

    fn send_on(socket: &UdpSocket, dest: Option<SocketAddr>, port: u16, bytes: &[u8]) -> Result<()> {
        let dest = dest.unwrap_or(SocketAddr::V4(SocketAddrV4::new(MULTICAST_PRIMARY, port)));
        socket.send_to(bytes, dest)?;
        Ok(())
    }
}

impl PtpNetwork for UdpPtpNetwork {
    fn recv_packet(&mut self) -> Result<Option<(Vec<u8>, usize, SystemTime, SocketAddr)>> {
        if let Some(packet) = recv_with_timestamp(&self.event, &mut self.recv_buf)? {
            return Ok(Some(packet));
        }
        recv_with_timestamp(&self.general, &mut self.recv_buf)
    }

    fn send_event(&mut self, dest: Option<SocketAddr>, bytes: &[u8]) -> Result<()> {
        Self::send_on(&self.event, dest, EVENT_PORT, bytes)
    }

    fn send_general(&mut self, dest: Option<SocketAddr>, bytes: &[u8]) -> Result<()> {
        Self::send_on(&self.general, dest, GENERAL_PORT, bytes)
    }
}
