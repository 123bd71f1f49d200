//! Local network address detection.

use get_if_addrs::get_if_addrs;
use std::net::UdpSocket;

/// Guesses the LAN address of this machine.
///
/// Binds a UDP socket and "connects" it to a public address to ask the OS
/// which interface would carry outbound traffic; no packet is actually sent.
/// Falls back to the first non-loopback IPv4 interface, then to loopback.
pub fn guess_local_ip() -> String {
    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
        if socket.connect("8.8.8.8:80").is_ok() {
            if let Ok(local_addr) = socket.local_addr() {
                return local_addr.ip().to_string();
            }
        }
    }

    if let Ok(interfaces) = get_if_addrs() {
        for iface in interfaces {
            let ip = iface.ip();
            if !ip.is_loopback() && ip.is_ipv4() {
                return ip.to_string();
            }
        }
    }

    "127.0.0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn guess_local_ip_returns_parsable_ipv4() {
        let ip = guess_local_ip();
        let parsed: IpAddr = ip.parse().expect("should return a valid IP address");
        assert!(parsed.is_ipv4());
    }
}
