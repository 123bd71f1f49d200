//! SOAP response parsing.

use super::{SoapBody, SoapEnvelope, SoapHeader};
use std::io::BufReader;
use xmltree::Element;

/// SOAP parsing error.
#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,
}

/// Parses a complete SOAP envelope.
pub fn parse_soap_envelope(xml: &[u8]) -> Result<SoapEnvelope, SoapParseError> {
    let reader = BufReader::new(xml);
    let root = Element::parse(reader)?;

    if !root.name.ends_with("Envelope") {
        return Err(SoapParseError::MissingEnvelope);
    }

    let header = root
        .get_child("Header")
        .or_else(|| root.children.iter().find_map(|n| n.as_element()))
        .filter(|e| e.name.ends_with("Header"))
        .map(|e| SoapHeader { content: e.clone() });

    let body_elem = root
        .get_child("Body")
        .or_else(|| {
            root.children
                .iter()
                .find_map(|n| n.as_element().filter(|e| e.name.ends_with("Body")))
        })
        .ok_or(SoapParseError::MissingBody)?;

    let body = SoapBody {
        content: body_elem.clone(),
    };

    Ok(SoapEnvelope { header, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_envelope() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetTransportInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
      <CurrentTransportState>PLAYING</CurrentTransportState>
      <CurrentTransportStatus>OK</CurrentTransportStatus>
      <CurrentSpeed>1</CurrentSpeed>
    </u:GetTransportInfoResponse>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let response = envelope
            .body
            .content
            .children
            .iter()
            .find_map(|n| n.as_element())
            .unwrap();
        assert!(response.name.ends_with("GetTransportInfoResponse"));
    }

    #[test]
    fn test_parse_rejects_non_envelope() {
        let xml = b"<notsoap/>";
        assert!(matches!(
            parse_soap_envelope(xml),
            Err(SoapParseError::MissingEnvelope)
        ));
    }

    #[test]
    fn test_parse_rejects_missing_body() {
        let xml = br#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"></s:Envelope>"#;
        assert!(matches!(
            parse_soap_envelope(xml),
            Err(SoapParseError::MissingBody)
        ));
    }
}
