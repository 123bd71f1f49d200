//! Low-level SOAP action invocation over HTTP.

use crate::errors::ControlError;
use std::time::Duration;
use ureq::Agent;
use wcupnp::soap::{build_soap_request, parse_soap_envelope, SoapEnvelope};

/// Result of a SOAP call: HTTP status, raw body, and the parsed envelope
/// when the body was valid SOAP.
pub struct SoapCallResult {
    pub status: u16,
    pub raw_body: String,
    pub envelope: Option<SoapEnvelope>,
}

/// Builds an agent suitable for device control.
///
/// 4xx/5xx must not become transport errors: a SOAP fault arrives as an
/// HTTP 500 whose body we need to read.
pub fn control_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Invokes a UPnP SOAP action on a control URL.
///
/// * `control_url` — full URL of the service control endpoint
/// * `service_type` — service URN, e.g. "urn:schemas-upnp-org:service:AVTransport:1"
/// * `action` — action name, e.g. "GetTransportInfo"
/// * `args` — (name, value) pairs, e.g. `&[("InstanceID", "0")]`
pub fn invoke_upnp_action(
    agent: &Agent,
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<SoapCallResult, ControlError> {
    let body_xml = build_soap_request(service_type, action, args)
        .map_err(|e| ControlError::RequestBuild(e.to_string()))?;

    // SOAPAction header: "urn:service#Action", quotes included.
    let soap_action_header = format!(r#""{}#{}""#, service_type, action);

    let mut response = agent
        .post(control_url)
        .header("Content-Type", r#"text/xml; charset="utf-8""#)
        .header("SOAPAction", &soap_action_header)
        .send(body_xml)
        .map_err(|e| ControlError::DeviceUnreachable(e.to_string()))?;

    let status = response.status().as_u16();

    // Read the body whatever the status: fault details live in 500 bodies.
    let raw_body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| ControlError::DeviceUnreachable(e.to_string()))?;

    // An unparsable body is not fatal here; the caller still gets the
    // status and the raw text.
    let envelope = parse_soap_envelope(raw_body.as_bytes()).ok();

    Ok(SoapCallResult {
        status,
        raw_body,
        envelope,
    })
}
