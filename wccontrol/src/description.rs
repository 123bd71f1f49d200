//! Fetch and parse UPnP device descriptions.
//!
//! The SSDP reply only carries a LOCATION URL; the description document
//! behind it names the device and lists its services, including the
//! AVTransport control endpoint Wallcast drives.

use crate::errors::ControlError;
use std::time::Duration;
use tracing::debug;
use xmltree::{Element, XMLNode};

/// What Wallcast needs from a description.xml.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescription {
    pub friendly_name: String,
    pub udn: String,
    /// AVTransport control endpoint, absent on non-renderer devices.
    pub av_transport: Option<ServiceEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service_type: String,
    /// Absolute control URL, resolved against the description location.
    pub control_url: String,
}

/// Downloads and parses the description document at `location`.
pub fn fetch_description(
    location: &str,
    timeout: Duration,
) -> Result<DeviceDescription, ControlError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();

    let mut response = agent
        .get(location)
        .call()
        .map_err(|e| ControlError::DeviceUnreachable(e.to_string()))?;

    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| ControlError::DeviceUnreachable(e.to_string()))?;

    parse_description(&body, location)
}

/// Parses a description document; `location` anchors relative URLs.
pub fn parse_description(
    xml: &str,
    location: &str,
) -> Result<DeviceDescription, ControlError> {
    let root = Element::parse(xml.as_bytes())
        .map_err(|e| ControlError::Description(format!("invalid XML: {}", e)))?;

    let device = find_descendant(&root, "device")
        .ok_or_else(|| ControlError::Description("no <device> element".to_string()))?;

    let friendly_name = child_text(device, "friendlyName")
        .unwrap_or_else(|| "Unknown renderer".to_string());
    let udn = child_text(device, "UDN")
        .map(|u| u.to_ascii_lowercase())
        .ok_or_else(|| ControlError::Description("no <UDN> element".to_string()))?;

    let av_transport = find_descendant(device, "serviceList")
        .into_iter()
        .flat_map(|list| list.children.iter().filter_map(XMLNode::as_element))
        .find_map(|service| {
            let service_type = child_text(service, "serviceType")?;
            if !service_type.contains("AVTransport") {
                return None;
            }
            let control_url = resolve_url(location, &child_text(service, "controlURL")?);
            Some(ServiceEndpoint {
                service_type,
                control_url,
            })
        });

    if av_transport.is_none() {
        debug!("{} exposes no AVTransport service", location);
    }

    Ok(DeviceDescription {
        friendly_name,
        udn,
        av_transport,
    })
}

/// Depth-first search for an element whose local name matches.
fn find_descendant<'a>(root: &'a Element, name: &str) -> Option<&'a Element> {
    if local_name(&root.name) == name {
        return Some(root);
    }
    root.children
        .iter()
        .filter_map(XMLNode::as_element)
        .find_map(|child| find_descendant(child, name))
}

fn child_text(parent: &Element, name: &str) -> Option<String> {
    parent
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .find(|e| local_name(&e.name) == name)
        .and_then(|e| e.get_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Resolves a possibly relative URL against the description location.
fn resolve_url(location: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }

    // Base is scheme://host:port of the location.
    let base = location
        .find("://")
        .and_then(|scheme_end| {
            location[scheme_end + 3..]
                .find('/')
                .map(|path_start| &location[..scheme_end + 3 + path_start])
        })
        .unwrap_or(location);

    if url.starts_with('/') {
        format!("{}{}", base, url)
    } else {
        format!("{}/{}", base, url)
    }
}
