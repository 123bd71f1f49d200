//! UPnP wire plumbing for Wallcast: SSDP discovery probes and SOAP
//! envelope construction/parsing for AVTransport control calls.

pub mod soap;
pub mod ssdp;
