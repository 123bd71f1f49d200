//! SOAP envelope handling for UPnP control calls.
//!
//! Wallcast only acts as a control point: it builds action *requests* and
//! parses the *responses* (including SOAP faults) devices send back.

mod builder;
mod envelope;
mod parser;

pub use builder::build_soap_request;
pub use envelope::{SoapBody, SoapEnvelope, SoapHeader};
pub use parser::{SoapParseError, parse_soap_envelope};
