//! AVTransport client for DLNA/UPnP renderers.

use crate::capabilities::{TransportControl, TransportPosition, TransportStatus};
use crate::clients::soap::{control_agent, invoke_upnp_action};
use crate::clients::with_retries;
use crate::errors::ControlError;
use crate::model::PlaybackState;
use std::time::Duration;
use tracing::debug;
use ureq::Agent;
use wcupnp::soap::SoapEnvelope;
use xmltree::{Element, XMLNode};

/// Client for one renderer's AVTransport service.
pub struct AvTransportClient {
    agent: Agent,
    control_url: String,
    service_type: String,
    retries: u32,
}

impl AvTransportClient {
    pub fn new(
        control_url: String,
        service_type: String,
        timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            agent: control_agent(timeout),
            control_url,
            service_type,
            retries,
        }
    }

    /// Invokes `action`, retrying transient network failures, and returns
    /// the response envelope on success.
    fn call(&self, action: &str, args: &[(&str, &str)]) -> Result<SoapEnvelope, ControlError> {
        let result = with_retries(self.retries, action, || {
            invoke_upnp_action(&self.agent, &self.control_url, &self.service_type, action, args)
        })?;

        if !(200..300).contains(&result.status) {
            if let Some(envelope) = &result.envelope {
                if let Some((code, description)) = parse_upnp_fault(envelope) {
                    return Err(ControlError::UpnpFault(action.to_string(), code, description));
                }
            }
            return Err(ControlError::ActionRejected(action.to_string(), result.status));
        }

        result
            .envelope
            .ok_or_else(|| ControlError::MissingEnvelope(action.to_string()))
    }

    fn set_transport_uri(&self, uri: &str) -> Result<(), ControlError> {
        self.call(
            "SetAVTransportURI",
            &[
                ("InstanceID", "0"),
                ("CurrentURI", uri),
                ("CurrentURIMetaData", ""),
            ],
        )?;
        Ok(())
    }

    fn play(&self) -> Result<(), ControlError> {
        self.call("Play", &[("InstanceID", "0"), ("Speed", "1")])?;
        Ok(())
    }

    /// Best effort: plenty of renderers reject SetPlayMode, and a clip that
    /// does not loop natively is restarted by the supervisor anyway.
    fn set_repeat(&self) {
        if let Err(e) = self.call(
            "SetPlayMode",
            &[("InstanceID", "0"), ("NewPlayMode", "REPEAT_ONE")],
        ) {
            debug!("SetPlayMode REPEAT_ONE rejected: {}", e);
        }
    }
}

impl TransportControl for AvTransportClient {
    fn play_url(&self, url: &str, looped: bool) -> Result<(), ControlError> {
        self.set_transport_uri(url)?;
        self.play()?;
        if looped {
            self.set_repeat();
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), ControlError> {
        self.call("Stop", &[("InstanceID", "0")])?;
        Ok(())
    }

    fn pause(&self) -> Result<(), ControlError> {
        self.call("Pause", &[("InstanceID", "0")])?;
        Ok(())
    }
}

impl TransportStatus for AvTransportClient {
    fn transport_state(&self) -> Result<PlaybackState, ControlError> {
        let envelope = self.call("GetTransportInfo", &[("InstanceID", "0")])?;
        let response = find_child_with_suffix(&envelope.body.content, "GetTransportInfoResponse")
            .ok_or_else(|| ControlError::missing_return_value("GetTransportInfoResponse"))?;
        let state = extract_child_text(response, "CurrentTransportState")?;
        Ok(PlaybackState::from_transport(&state))
    }

    fn transport_position(&self) -> Result<TransportPosition, ControlError> {
        let envelope = self.call("GetPositionInfo", &[("InstanceID", "0")])?;
        let response = find_child_with_suffix(&envelope.body.content, "GetPositionInfoResponse")
            .ok_or_else(|| ControlError::missing_return_value("GetPositionInfoResponse"))?;

        // RelTime and TrackDuration are frequently sentinel values; a
        // missing or unparsable field is simply "unknown".
        let position = extract_child_text(response, "RelTime")
            .ok()
            .and_then(|t| parse_hms(&t));
        let duration = extract_child_text(response, "TrackDuration")
            .ok()
            .and_then(|t| parse_hms(&t));

        Ok(TransportPosition { position, duration })
    }
}

fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name.ends_with(suffix) => Some(elem),
        _ => None,
    })
}

fn extract_child_text(parent: &Element, suffix: &str) -> Result<String, ControlError> {
    let child = find_child_with_suffix(parent, suffix)
        .ok_or_else(|| ControlError::missing_return_value(suffix))?;

    child
        .get_text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ControlError::bad_return_value(suffix, "<empty>"))
}

/// Extracts (errorCode, errorDescription) from a SOAP fault envelope.
fn parse_upnp_fault(envelope: &SoapEnvelope) -> Option<(u32, String)> {
    let fault = find_child_with_suffix(&envelope.body.content, "Fault")?;
    let detail = find_child_with_suffix(fault, "detail")?;
    let upnp_error = find_child_with_suffix(detail, "UPnPError")?;

    let code = extract_child_text(upnp_error, "errorCode")
        .ok()?
        .parse::<u32>()
        .ok()?;
    let description = extract_child_text(upnp_error, "errorDescription")
        .unwrap_or_else(|_| "unknown".to_string());

    Some((code, description))
}

/// Parses "HH:MM:SS" time strings.
///
/// Returns None for sentinel values such as "NOT_IMPLEMENTED" or "-:--:--".
fn parse_hms(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || s == "NOT_IMPLEMENTED" || s == "-:--:--" {
        return None;
    }

    let parts: Vec<_> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: u64 = parts[0].parse().ok()?;
    let minutes: u64 = parts[1].parse().ok()?;
    // Fractional seconds ("00:01:23.500") are truncated.
    let seconds: u64 = parts[2].split('.').next()?.parse().ok()?;

    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}
