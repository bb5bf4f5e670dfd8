// ── Legacy UDP protocol ──
//
// The pre-Web-API transport: fixed-layout datagrams sent straight to the
// simulator's UDP port (usually discovered via the beacon). It can only
// stream float dataref values (`RREF`), write single floats (`DREF`),
// and trigger commands (`CMND`) -- no metadata, no acknowledgments.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::Error;

const RREF_REQUEST: &[u8] = b"RREF\x00";
const RREF_RESPONSE: &[u8] = b"RREF,";
const DREF_REQUEST: &[u8] = b"DREF\x00";
const CMND_REQUEST: &[u8] = b"CMND\x00";

const RREF_PATH_LEN: usize = 400;
const DREF_PATH_LEN: usize = 500;
const CMND_PATH_LEN: usize = 500;

// ── Datagram encoding ────────────────────────────────────────────────

/// `RREF` subscription: ask for `path` at `freq` Hz under a client-chosen
/// index. `freq` 0 cancels the subscription. 413 bytes.
pub fn encode_rref(freq: i32, index: i32, path: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(13 + RREF_PATH_LEN);
    msg.extend_from_slice(RREF_REQUEST);
    msg.extend_from_slice(&freq.to_le_bytes());
    msg.extend_from_slice(&index.to_le_bytes());
    msg.extend_from_slice(path.as_bytes());
    msg.resize(13 + RREF_PATH_LEN, 0);
    msg
}

/// `DREF` write: set `path` to a single float. 509 bytes.
///
/// The path field is NUL-terminated then space-padded; the simulator
/// expects exactly this layout.
pub fn encode_dref(value: f32, path: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(9 + DREF_PATH_LEN);
    msg.extend_from_slice(DREF_REQUEST);
    msg.extend_from_slice(&value.to_le_bytes());
    msg.extend_from_slice(path.as_bytes());
    msg.push(0);
    msg.resize(9 + DREF_PATH_LEN, b' ');
    msg
}

/// `CMND` trigger: run the command once. 505 bytes.
pub fn encode_cmnd(path: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(5 + CMND_PATH_LEN);
    msg.extend_from_slice(CMND_REQUEST);
    msg.extend_from_slice(path.as_bytes());
    msg.resize(5 + CMND_PATH_LEN, 0);
    msg
}

/// Parse an `RREF,` response datagram into `(index, value)` pairs.
///
/// Near-zero negative values are clamped to 0.0 (the simulator emits
/// -0.0 for idle floats).
pub fn parse_rref(packet: &[u8]) -> Result<Vec<(i32, f32)>, Error> {
    if packet.len() < RREF_RESPONSE.len() || &packet[..RREF_RESPONSE.len()] != RREF_RESPONSE {
        return Err(Error::UdpProtocol(format!(
            "unknown packet ({} bytes)",
            packet.len()
        )));
    }

    let payload = &packet[RREF_RESPONSE.len()..];
    let mut values = Vec::with_capacity(payload.len() / 8);
    for pair in payload.chunks_exact(8) {
        let index = i32::from_le_bytes(pair[0..4].try_into().expect("fixed slice"));
        let mut value = f32::from_le_bytes(pair[4..8].try_into().expect("fixed slice"));
        if value < 0.0 && value > -0.001 {
            value = 0.0;
        }
        values.push((index, value));
    }
    Ok(values)
}

// ── UdpClient ────────────────────────────────────────────────────────

#[derive(Default)]
struct Subscriptions {
    next_index: i32,
    by_index: HashMap<i32, String>,
    by_path: HashMap<String, i32>,
}

/// Client for the legacy UDP protocol.
///
/// Owns the socket and the client-side index bookkeeping that maps
/// `RREF` response indices back to dataref paths.
pub struct UdpClient {
    socket: UdpSocket,
    dest: SocketAddr,
    subs: Mutex<Subscriptions>,
}

impl UdpClient {
    /// Bind an ephemeral local socket aimed at the simulator's UDP port.
    pub async fn connect(host: IpAddr, port: u16) -> Result<Self, Error> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        Ok(Self {
            socket,
            dest: SocketAddr::new(host, port),
            subs: Mutex::new(Subscriptions::default()),
        })
    }

    /// Subscribe to a dataref at `freq` Hz. Returns the client index the
    /// simulator will use in responses. Re-subscribing an already
    /// subscribed path reuses its index.
    pub async fn subscribe_dataref(&self, path: &str, freq: i32) -> Result<i32, Error> {
        let index = {
            let mut subs = self.subs.lock().expect("subscription lock poisoned");
            if let Some(&existing) = subs.by_path.get(path) {
                existing
            } else {
                let index = subs.next_index;
                subs.next_index += 1;
                subs.by_index.insert(index, path.to_string());
                subs.by_path.insert(path.to_string(), index);
                index
            }
        };
        self.socket
            .send_to(&encode_rref(freq, index, path), self.dest)
            .await?;
        debug!(path, index, freq, "rref subscription sent");
        Ok(index)
    }

    /// Cancel a subscription (freq 0) and drop its index mapping.
    pub async fn unsubscribe_dataref(&self, path: &str) -> Result<(), Error> {
        let index = {
            let mut subs = self.subs.lock().expect("subscription lock poisoned");
            match subs.by_path.remove(path) {
                Some(index) => {
                    subs.by_index.remove(&index);
                    index
                }
                None => {
                    debug!(path, "not subscribed, nothing to cancel");
                    return Ok(());
                }
            }
        };
        self.socket
            .send_to(&encode_rref(0, index, path), self.dest)
            .await?;
        Ok(())
    }

    /// Write a single float dataref value.
    pub async fn write_dataref(&self, path: &str, value: f32) -> Result<(), Error> {
        self.socket
            .send_to(&encode_dref(value, path), self.dest)
            .await?;
        Ok(())
    }

    /// Trigger a command once.
    pub async fn send_command(&self, path: &str) -> Result<(), Error> {
        self.socket
            .send_to(&encode_cmnd(path), self.dest)
            .await?;
        Ok(())
    }

    /// Receive one response datagram and resolve indices to paths.
    ///
    /// A single datagram carries roughly 15 values; call in a loop to
    /// collect a full round of subscribed datarefs.
    pub async fn recv_values(&self) -> Result<Vec<(String, f32)>, Error> {
        let mut buf = [0u8; 1472];
        let (len, _) = self.socket.recv_from(&mut buf).await?;
        let pairs = parse_rref(&buf[..len])?;

        let subs = self.subs.lock().expect("subscription lock poisoned");
        let mut values = Vec::with_capacity(pairs.len());
        for (index, value) in pairs {
            match subs.by_index.get(&index) {
                Some(path) => values.push((path.clone(), value)),
                None => warn!(index, "value for unknown rref index"),
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rref_request_layout() {
        let msg = encode_rref(1, 42, "sim/cockpit/altitude");
        assert_eq!(msg.len(), 413);
        assert_eq!(&msg[..5], b"RREF\x00");
        assert_eq!(i32::from_le_bytes(msg[5..9].try_into().unwrap()), 1);
        assert_eq!(i32::from_le_bytes(msg[9..13].try_into().unwrap()), 42);
        assert_eq!(&msg[13..33], b"sim/cockpit/altitude");
        assert!(msg[33..].iter().all(|&b| b == 0));
    }

    #[test]
    fn dref_request_layout() {
        let msg = encode_dref(0.5, "sim/test/path");
        assert_eq!(msg.len(), 509);
        assert_eq!(&msg[..5], b"DREF\x00");
        assert_eq!(f32::from_le_bytes(msg[5..9].try_into().unwrap()), 0.5);
        assert_eq!(&msg[9..22], b"sim/test/path");
        assert_eq!(msg[22], 0);
        assert!(msg[23..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn cmnd_request_layout() {
        let msg = encode_cmnd("sim/operation/pause_toggle");
        assert_eq!(msg.len(), 505);
        assert_eq!(&msg[..5], b"CMND\x00");
        assert_eq!(&msg[5..31], b"sim/operation/pause_toggle");
        assert!(msg[31..].iter().all(|&b| b == 0));
    }

    #[test]
    fn parse_rref_response() {
        let mut packet = Vec::new();
        packet.extend_from_slice(b"RREF,");
        packet.extend_from_slice(&3i32.to_le_bytes());
        packet.extend_from_slice(&1.5f32.to_le_bytes());
        packet.extend_from_slice(&7i32.to_le_bytes());
        packet.extend_from_slice(&(-0.0005f32).to_le_bytes());

        let values = parse_rref(&packet).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], (3, 1.5));
        // -0.0005 clamps to positive zero
        assert_eq!(values[1], (7, 0.0));
    }

    #[test]
    fn parse_rejects_foreign_packet() {
        assert!(parse_rref(b"BECN\x00whatever").is_err());
        assert!(parse_rref(b"RR").is_err());
    }
}
