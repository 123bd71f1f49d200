//! # SSDP - Simple Service Discovery Protocol
//!
//! Control-point side of SSDP: send M-SEARCH probes over UDP multicast and
//! collect the unicast HTTP/200 replies devices send back.
//!
//! ## Constants
//!
//! - **Multicast Address**: 239.255.255.250:1900
//! - **Max-Age**: 1800 seconds when a reply carries no CACHE-CONTROL

mod client;

pub use client::{SsdpClient, SsdpResponse};

/// SSDP multicast group.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// SSDP port.
pub const SSDP_PORT: u16 = 1900;

/// Default announcement validity (seconds).
pub const MAX_AGE: u32 = 1800;

/// Search target matching any service.
pub const ST_ALL: &str = "ssdp:all";

/// Search target for the AVTransport renderer-control service.
pub const ST_AVTRANSPORT: &str = "urn:schemas-upnp-org:service:AVTransport:1";
