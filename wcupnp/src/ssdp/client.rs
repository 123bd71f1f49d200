/*!
The Wallcast SSDP client is a *control point*. It must **not** bind to UDP
port 1900.

Reason:

* A UPnP *device* must listen on 0.0.0.0:1900 for M-SEARCH discovery.
* A *control point* only needs to send M-SEARCH and receive unicast HTTP/200
  replies.
* If a control point binds 1900 next to a device process (even with
  SO_REUSEPORT) the kernel load-balances incoming datagrams between sockets
  and replies get lost randomly.

Therefore the client binds 0.0.0.0:0, uses an ephemeral port, sends M-SEARCH
and receives replies there. Joining the multicast group is optional and only
useful for debugging.
*/

use super::{MAX_AGE, SSDP_MULTICAST_ADDR, SSDP_PORT};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// A parsed M-SEARCH reply from a device.
#[derive(Debug, Clone)]
pub struct SsdpResponse {
    pub usn: String,
    pub st: String,
    pub location: String,
    pub server: String,
    pub max_age: u32,
    pub from: SocketAddr,
}

impl SsdpResponse {
    /// Extracts the `uuid:...` part of the USN header, lowercased.
    pub fn udn(&self) -> Option<String> {
        extract_udn_from_usn(&self.usn)
    }
}

/// Client socket used to send M-SEARCH probes and collect replies.
pub struct SsdpClient {
    socket: UdpSocket,
}

impl SsdpClient {
    /// Creates a new SSDP client on an ephemeral port.
    pub fn new() -> std::io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;

        let bind_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        socket2.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket2.into();
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        socket.set_multicast_loop_v4(true)?;

        for iface in get_if_addrs::get_if_addrs()? {
            if let std::net::IpAddr::V4(ipv4) = iface.ip() {
                if !ipv4.is_loopback() {
                    match socket.join_multicast_v4(&SSDP_MULTICAST_ADDR.parse().unwrap(), &ipv4) {
                        Ok(()) => debug!("SSDP: joined {} on {}", SSDP_MULTICAST_ADDR, ipv4),
                        Err(e) => warn!(
                            "SSDP: failed to join {} on {}: {}",
                            SSDP_MULTICAST_ADDR, ipv4, e
                        ),
                    }
                }
            }
        }

        Ok(Self { socket })
    }

    /// Sends an M-SEARCH probe for the given search target.
    ///
    /// `mx` is the maximum random delay (seconds) devices may wait before
    /// answering; the UPnP spec requires it to be at least 1.
    pub fn send_msearch(&self, st: &str, mx: u32) -> std::io::Result<()> {
        let mx = mx.max(1);
        let msg = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}:{}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             USER-AGENT: Wallcast SSDP Client\r\n\
             \r\n",
            SSDP_MULTICAST_ADDR, SSDP_PORT, mx, st
        );

        let addr: SocketAddr = format!("{}:{}", SSDP_MULTICAST_ADDR, SSDP_PORT)
            .parse()
            .unwrap();

        match self.socket.send_to(msg.as_bytes(), addr) {
            Ok(_) => {
                debug!("M-SEARCH sent (ST={}, MX={})", st, mx);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send M-SEARCH: {}", e);
                Err(e)
            }
        }
    }

    /// Collects unicast replies for `window`.
    ///
    /// Malformed or unrelated datagrams (NOTIFY traffic, other control
    /// points' M-SEARCH) are dropped silently; a read error other than a
    /// timeout ends the window early.
    pub fn collect_responses(&self, window: Duration) -> Vec<SsdpResponse> {
        let deadline = Instant::now() + window;
        let mut responses = Vec::new();
        let mut buf = [0u8; 8192];

        while Instant::now() < deadline {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let data = String::from_utf8_lossy(&buf[..n]);
                    if let Some(response) = parse_message(&data, from) {
                        debug!("SSDP reply from {}: st={}", from, response.st);
                        responses.push(response);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("SSDP client read error: {}", e);
                    break;
                }
            }
        }

        responses
    }
}

/// Parses a datagram into an [`SsdpResponse`] if it is an M-SEARCH reply.
fn parse_message(data: &str, from: SocketAddr) -> Option<SsdpResponse> {
    let mut lines = data.lines();
    let first_line = lines.next()?.trim();
    let upper = first_line.to_ascii_uppercase();

    if !(upper.starts_with("HTTP/") && upper.contains(" 200 ")) {
        // NOTIFY announcements and other control points' probes are not
        // replies to us; drop them quietly.
        trace!("Ignoring SSDP message from {}: {}", from, first_line);
        return None;
    }

    let headers = parse_headers(lines);

    // Critical headers required by the UPnP spec: ST, USN, LOCATION.
    let st = headers.get("ST")?.to_string();
    let usn = headers.get("USN")?.to_string();
    let location = headers.get("LOCATION")?.to_string();

    let server = headers
        .get("SERVER")
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());
    let max_age = parse_max_age(headers.get("CACHE-CONTROL"));

    Some(SsdpResponse {
        usn,
        st,
        location,
        server,
        max_age,
        from,
    })
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();

        // Empty line marks end of headers.
        if line.is_empty() {
            break;
        }

        // Split on first ':' only (values may contain ':').
        if let Some(colon_pos) = line.find(':') {
            let (name, value_with_colon) = line.split_at(colon_pos);
            let value = &value_with_colon[1..];

            let name = name.trim().to_ascii_uppercase();
            let value = value.trim().to_string();

            if !name.is_empty() && !value.is_empty() {
                headers.insert(name, value);
            } else {
                trace!("Skipping malformed header: '{}'", line);
            }
        } else {
            trace!("Skipping line without colon: '{}'", line);
        }
    }
    headers
}

fn parse_max_age(value: Option<&String>) -> u32 {
    if let Some(v) = value {
        let lower = v.to_ascii_lowercase();
        if let Some(idx) = lower.find("max-age") {
            let after_key = &v[idx + 7..];
            let after_eq = after_key.trim_start().trim_start_matches('=').trim_start();
            let digits: String = after_eq
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(age) = digits.parse::<u32>() {
                return age;
            }
        }
        trace!(
            "Could not parse max-age from CACHE-CONTROL: '{}', using default {}",
            v, MAX_AGE
        );
    }
    MAX_AGE
}

fn extract_udn_from_usn(usn: &str) -> Option<String> {
    let lower = usn.trim().to_ascii_lowercase();
    if let Some(idx) = lower.find("uuid:") {
        let sub = &lower[idx..];
        if let Some(end) = sub.find("::") {
            Some(sub[..end].to_string())
        } else {
            Some(sub.to_string())
        }
    } else {
        None
    }
}
