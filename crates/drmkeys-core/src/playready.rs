//! PlayReady key message unwrapping.
//!
//! The PlayReady CDM wraps its license challenge in a UTF-16LE XML envelope:
//!
//! ```text
//! <PlayReadyKeyMessage type="LicenseAcquisition">
//!   <LicenseAcquisition Version="1">
//!     <Challenge encoding="base64encoded">...</Challenge>
//!     <HttpHeaders>
//!       <HttpHeader><name>Content-Type</name><value>text/xml; charset=utf-8</value></HttpHeader>
//!     </HttpHeaders>
//!   </LicenseAcquisition>
//! </PlayReadyKeyMessage>
//! ```
//!
//! The license server wants the decoded challenge and the listed headers.

use base64::Engine;
use bytes::Bytes;
use quick_xml::events::Event;

use crate::error::{InitDataError, Result};

const ENVELOPE_MARKER: &str = "PlayReadyKeyMessage";
const DEFAULT_CONTENT_TYPE: (&str, &str) = ("Content-Type", "text/xml; charset=utf-8");

/// The license request body and headers extracted from a key message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnwrappedChallenge {
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
}

/// Unwrap a PlayReady key message.
///
/// Messages without the envelope are sent as-is with an XML content type.
pub fn unwrap_key_message(message: &[u8]) -> Result<UnwrappedChallenge> {
    let text = decode_utf16le(message);
    if !text.contains(ENVELOPE_MARKER) {
        return Ok(UnwrappedChallenge {
            body: Bytes::copy_from_slice(message),
            headers: vec![(
                DEFAULT_CONTENT_TYPE.0.to_string(),
                DEFAULT_CONTENT_TYPE.1.to_string(),
            )],
        });
    }

    let mut reader = quick_xml::Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut challenge: Option<String> = None;
    let mut headers = Vec::new();
    let mut pending_name: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                path.push(name);
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                let value = e
                    .unescape()
                    .map_err(|err| InitDataError::InvalidXml(err.to_string()))?
                    .into_owned();
                match path.last().map(String::as_str) {
                    Some("Challenge") => challenge = Some(value),
                    Some("name") if in_header(&path) => pending_name = Some(value),
                    Some("value") if in_header(&path) => {
                        if let Some(name) = pending_name.take() {
                            headers.push((name, value));
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(InitDataError::InvalidXml(e.to_string())),
            _ => {}
        }
    }

    let challenge = challenge.ok_or(InitDataError::MissingChallenge)?;
    let body = base64::engine::general_purpose::STANDARD.decode(challenge.trim())?;

    Ok(UnwrappedChallenge {
        body: Bytes::from(body),
        headers,
    })
}

fn in_header(path: &[String]) -> bool {
    path.iter().any(|p| p == "HttpHeader")
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn envelope(challenge_b64: &str) -> Vec<u8> {
        utf16le(&format!(
            "<PlayReadyKeyMessage type=\"LicenseAcquisition\">\
             <LicenseAcquisition Version=\"1\">\
             <Challenge encoding=\"base64encoded\">{challenge_b64}</Challenge>\
             <HttpHeaders>\
             <HttpHeader><name>Content-Type</name><value>text/xml; charset=utf-8</value></HttpHeader>\
             <HttpHeader><name>SOAPAction</name><value>http://schemas.microsoft.com/DRM/2007/03/protocols/AcquireLicense</value></HttpHeader>\
             </HttpHeaders>\
             </LicenseAcquisition>\
             </PlayReadyKeyMessage>"
        ))
    }

    #[test]
    fn test_unwrap_envelope() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"<soap>challenge</soap>");
        let unwrapped = unwrap_key_message(&envelope(&encoded)).unwrap();
        assert_eq!(unwrapped.body.as_ref(), b"<soap>challenge</soap>");
        assert_eq!(unwrapped.headers.len(), 2);
        assert_eq!(unwrapped.headers[0].0, "Content-Type");
        assert_eq!(unwrapped.headers[1].0, "SOAPAction");
    }

    #[test]
    fn test_raw_message_passes_through() {
        let raw = b"\x01\x02\x03\x04".to_vec();
        let unwrapped = unwrap_key_message(&raw).unwrap();
        assert_eq!(unwrapped.body.as_ref(), raw.as_slice());
        assert_eq!(
            unwrapped.headers,
            vec![("Content-Type".to_string(), "text/xml; charset=utf-8".to_string())]
        );
    }

    #[test]
    fn test_missing_challenge() {
        let msg = utf16le("<PlayReadyKeyMessage><LicenseAcquisition/></PlayReadyKeyMessage>");
        assert!(matches!(
            unwrap_key_message(&msg),
            Err(InitDataError::MissingChallenge)
        ));
    }
}
