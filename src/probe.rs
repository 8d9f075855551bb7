// src/probe.rs
//
// Liveness probing for the community game servers. Each configured server
// answers the legacy Source query protocol on one of two UDP ports
// (base_port, then base_port + 1); we ask each candidate in turn with the
// standard A2S_INFO datagram and read player counts out of the reply.
use futures::future::join_all;
use log::{debug, error};
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::models::status::{ServerEndpoint, ServerStatus};

const INFO_REQUEST_TYPE: u8 = 0x54;
const INFO_REPLY_TYPE: u8 = 0x49;

/// What one request/response attempt against a single port came to.
enum PortOutcome {
    /// A reply arrived and carried usable player counts (zeroed when the
    /// reply type was not an info reply).
    Online { players: u8, max_players: u8 },
    /// Timeout, socket error, or a reply too mangled to read: fall through
    /// to the next candidate port.
    NoReply,
}

pub struct ServerStatusProber {
    timeout: Duration,
}

impl ServerStatusProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probes every endpoint concurrently. Always returns exactly one status
    /// per endpoint, in input order; probe failures only ever surface as
    /// `online: false`.
    pub async fn probe_all(&self, endpoints: &[ServerEndpoint]) -> Vec<ServerStatus> {
        join_all(endpoints.iter().map(|e| self.probe_endpoint(e))).await
    }

    /// Tries base_port, then base_port + 1. The second port is only touched
    /// after the first fails; a reply on the first port ends the probe.
    pub async fn probe_endpoint(&self, endpoint: &ServerEndpoint) -> ServerStatus {
        for port in [endpoint.base_port, endpoint.base_port.wrapping_add(1)] {
            match self.probe_port(&endpoint.host, port).await {
                PortOutcome::Online { players, max_players } => {
                    return ServerStatus::online(endpoint, port, players, max_players);
                }
                PortOutcome::NoReply => continue,
            }
        }
        ServerStatus::offline(endpoint)
    }

    async fn probe_port(&self, host: &str, port: u16) -> PortOutcome {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Could not bind udp socket: {}", e);
                return PortOutcome::NoReply;
            }
        };

        let addr = format!("{}:{}", host, port);
        if let Err(e) = socket.send_to(&info_request(), addr.as_str()).await {
            debug!("Error sending info request to {}: {}", addr, e);
            return PortOutcome::NoReply;
        }

        let mut buffer = [0u8; 1400];
        match tokio::time::timeout(self.timeout, socket.recv_from(&mut buffer)).await {
            Ok(Ok((len, _))) => match parse_info_reply(&buffer[..len]) {
                Some((players, max_players)) => {
                    debug!("{} replied: {}/{} players", addr, players, max_players);
                    PortOutcome::Online { players, max_players }
                }
                None => {
                    debug!("Unparseable reply from {} ({} bytes)", addr, len);
                    PortOutcome::NoReply
                }
            },
            Ok(Err(e)) => {
                debug!("Failed to receive reply from {}: {}", addr, e);
                PortOutcome::NoReply
            }
            Err(_) => {
                debug!("Probe timed out for {}", addr);
                PortOutcome::NoReply
            }
        }
    }
}

/// The A2S_INFO request: connectionless marker, type byte, query string, NUL.
fn info_request() -> Vec<u8> {
    let mut packet: Vec<u8> = vec![0xFF, 0xFF, 0xFF, 0xFF, INFO_REQUEST_TYPE];
    packet.extend_from_slice(b"Source Engine Query");
    packet.push(0x00);
    packet
}

/// Reads (players, max_players) out of a reply datagram.
///
/// An info reply (type 0x49) carries, after a protocol byte, four
/// NUL-terminated strings (name, map, folder, description) and a two-byte app
/// id before the two player-count bytes. We only care about the counts; the
/// strings are skipped. A reply of any other type still counts as liveness,
/// just with zero counts. `None` means the datagram was truncated and the
/// caller should treat the port as if it never answered.
fn parse_info_reply(buffer: &[u8]) -> Option<(u8, u8)> {
    let tag = *buffer.get(4)?;
    if tag != INFO_REPLY_TYPE {
        return Some((0, 0));
    }

    // Past the tag and the protocol-version byte.
    let mut cursor = 6;
    for _ in 0..4 {
        while *buffer.get(cursor)? != 0x00 {
            cursor += 1;
        }
        cursor += 1;
    }
    cursor += 2; // app id, unused

    let players = *buffer.get(cursor)?;
    let max_players = *buffer.get(cursor + 1)?;
    Some((players, max_players))
}
