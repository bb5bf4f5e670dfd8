// ── UDP beacon discovery ──
//
// X-Plane multicasts a `BECN` packet on 239.255.1.1:49707 while its
// network API is enabled. The packet carries the host's UDP port,
// hostname, and simulator version, which is enough to locate a running
// instance without configuration.
//
// `BeaconMonitor` runs as a cancellable background task publishing the
// most recent beacon through a `watch` channel; the value clears to
// `None` when the beacon goes silent for longer than the timeout.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Error;

/// Multicast group the simulator beacons on.
pub const MCAST_GRP: Ipv4Addr = Ipv4Addr::new(239, 255, 1, 1);
/// Multicast port (49000 was X-Plane 10; 49707 since X-Plane 11).
pub const MCAST_PORT: u16 = 49707;
/// No beacon within this window means the simulator is gone.
pub const BEACON_TIMEOUT: Duration = Duration::from_secs(3);

const PROLOGUE: &[u8] = b"BECN\x00";
const HEADER_LEN: usize = 21;

/// Decoded beacon payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconData {
    /// Address the beacon was received from.
    pub host: IpAddr,
    /// UDP port the simulator listens on.
    pub port: u16,
    /// Hostname of the machine running the simulator.
    pub hostname: String,
    /// Simulator version number, e.g. 121400 for 12.1.4.
    pub xplane_version: i32,
    /// 1 = master, 2 = extern visual, 3 = IOS.
    pub role: u32,
}

/// Parse a raw beacon datagram.
///
/// Wire layout after the `BECN\0` prologue (all little-endian):
/// major `u8`, minor `u8`, application host id `i32`, version `i32`,
/// role `u32`, port `u16`, then a NUL-terminated hostname.
pub fn parse_beacon(packet: &[u8], sender: IpAddr) -> Result<BeaconData, Error> {
    if packet.len() < HEADER_LEN || &packet[..PROLOGUE.len()] != PROLOGUE {
        return Err(Error::Beacon(format!(
            "unknown packet ({} bytes) from {sender}",
            packet.len()
        )));
    }

    let major = packet[5];
    let minor = packet[6];
    let host_id = i32::from_le_bytes(packet[7..11].try_into().expect("fixed slice"));
    let xplane_version = i32::from_le_bytes(packet[11..15].try_into().expect("fixed slice"));
    let role = u32::from_le_bytes(packet[15..19].try_into().expect("fixed slice"));
    let port = u16::from_le_bytes(packet[19..21].try_into().expect("fixed slice"));

    // host_id 1 is X-Plane itself; 2 is PlaneMaker, which also beacons.
    if major != 1 || minor > 2 || host_id != 1 {
        return Err(Error::Beacon(format!(
            "unsupported beacon (major {major}, minor {minor}, host id {host_id})"
        )));
    }

    let tail = &packet[HEADER_LEN..];
    let hostname_end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    let hostname = String::from_utf8_lossy(&tail[..hostname_end]).into_owned();

    Ok(BeaconData {
        host: sender,
        port,
        hostname,
        xplane_version,
        role,
    })
}

// ── BeaconMonitor ────────────────────────────────────────────────────

/// Handle to a running beacon monitor task.
pub struct BeaconMonitor {
    data_rx: watch::Receiver<Option<BeaconData>>,
    cancel: CancellationToken,
}

impl BeaconMonitor {
    /// Bind the multicast socket and spawn the monitor task.
    ///
    /// Returns immediately; subscribe to the watch channel to observe
    /// beacon presence.
    pub async fn start(cancel: CancellationToken) -> Result<Self, Error> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, MCAST_PORT)).await?;
        socket.join_multicast_v4(MCAST_GRP, Ipv4Addr::UNSPECIFIED)?;

        let (data_tx, data_rx) = watch::channel(None);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            monitor_loop(socket, data_tx, task_cancel).await;
        });

        Ok(Self { data_rx, cancel })
    }

    /// Get a receiver for beacon presence changes.
    ///
    /// `Some(BeaconData)` while a beacon is being received, `None` after
    /// it has been silent for [`BEACON_TIMEOUT`].
    pub fn subscribe(&self) -> watch::Receiver<Option<BeaconData>> {
        self.data_rx.clone()
    }

    /// Latest beacon data, if the simulator is currently reachable.
    pub fn data(&self) -> Option<BeaconData> {
        self.data_rx.borrow().clone()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn monitor_loop(
    socket: UdpSocket,
    data_tx: watch::Sender<Option<BeaconData>>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; 1472];

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(BEACON_TIMEOUT, socket.recv_from(&mut buf)) => {
                match result {
                    Ok(Ok((len, sender))) => match parse_beacon(&buf[..len], sender.ip()) {
                        Ok(data) => {
                            trace!(host = %data.host, port = data.port, "beacon received");
                            data_tx.send_if_modified(|current| {
                                if current.as_ref() == Some(&data) {
                                    false
                                } else {
                                    debug!(hostname = %data.hostname, "beacon detected");
                                    *current = Some(data.clone());
                                    true
                                }
                            });
                        }
                        Err(e) => debug!(error = %e, "ignoring packet"),
                    },
                    Ok(Err(e)) => {
                        warn!(error = %e, "beacon socket error");
                        break;
                    }
                    Err(_) => {
                        // Silence past the timeout: simulator gone.
                        data_tx.send_if_modified(|current| {
                            if current.is_some() {
                                debug!("beacon lost");
                                *current = None;
                                true
                            } else {
                                false
                            }
                        });
                    }
                }
            }
        }
    }
    debug!("beacon monitor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet(major: u8, minor: u8, host_id: i32, hostname: &str) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(PROLOGUE);
        packet.push(major);
        packet.push(minor);
        packet.extend_from_slice(&host_id.to_le_bytes());
        packet.extend_from_slice(&121400i32.to_le_bytes());
        packet.extend_from_slice(&1u32.to_le_bytes());
        packet.extend_from_slice(&49000u16.to_le_bytes());
        packet.extend_from_slice(hostname.as_bytes());
        packet.push(0);
        packet
    }

    #[test]
    fn parse_valid_beacon() {
        let packet = sample_packet(1, 2, 1, "sim-host");
        let data = parse_beacon(&packet, IpAddr::from(Ipv4Addr::new(192, 168, 1, 40))).unwrap();

        assert_eq!(data.port, 49000);
        assert_eq!(data.hostname, "sim-host");
        assert_eq!(data.xplane_version, 121400);
        assert_eq!(data.role, 1);
        assert_eq!(data.host, IpAddr::from(Ipv4Addr::new(192, 168, 1, 40)));
    }

    #[test]
    fn reject_wrong_prologue() {
        let mut packet = sample_packet(1, 1, 1, "sim-host");
        packet[0] = b'X';
        let err = parse_beacon(&packet, IpAddr::from(Ipv4Addr::LOCALHOST));
        assert!(matches!(err, Err(Error::Beacon(_))));
    }

    #[test]
    fn reject_planemaker_beacon() {
        // host id 2 is PlaneMaker, not the simulator
        let packet = sample_packet(1, 1, 2, "sim-host");
        assert!(parse_beacon(&packet, IpAddr::from(Ipv4Addr::LOCALHOST)).is_err());
    }

    #[test]
    fn reject_truncated_packet() {
        let packet = sample_packet(1, 1, 1, "sim-host");
        assert!(parse_beacon(&packet[..10], IpAddr::from(Ipv4Addr::LOCALHOST)).is_err());
    }

    #[test]
    fn hostname_without_terminator() {
        let mut packet = sample_packet(1, 1, 1, "host");
        packet.pop(); // drop the NUL
        let data = parse_beacon(&packet, IpAddr::from(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(data.hostname, "host");
    }
}
