//! Init data and key message vectors.
//!
//! Builders for the byte formats a host hands to the controller, so tests can
//! drive `encrypted` events and CDM messages with realistic payloads.

use base64::Engine;
use bytes::Bytes;

use drmkeys_core::init_data::{make_box, make_pssh, system_id_bytes};
use drmkeys_core::{KeyId, KeySystem, SystemId};

/// Protection system id of `key_system`.
pub fn system_id(key_system: KeySystem) -> SystemId {
    match key_system {
        KeySystem::FairPlay => SystemId::FairPlay,
        KeySystem::Widevine => SystemId::Widevine,
        KeySystem::PlayReady => SystemId::PlayReady,
        KeySystem::ClearKey => SystemId::ClearKey,
    }
}

/// A version 1 `pssh` box for `key_system` listing `key_ids`.
pub fn pssh(key_system: KeySystem, key_ids: &[KeyId]) -> Bytes {
    Bytes::from(make_pssh(
        system_id_bytes(system_id(key_system)),
        key_ids,
        b"",
    ))
}

/// A `sinf` box with scheme `scheme` whose `tenc` carries `key_id`.
///
/// `key_id` must be 16 bytes.
pub fn sinf_box(key_id: &KeyId, scheme: &[u8; 4]) -> Vec<u8> {
    let frma = make_box(b"frma", b"avc1");

    let mut schm = vec![0, 0, 0, 0];
    schm.extend_from_slice(scheme);
    schm.extend_from_slice(&0x10000u32.to_be_bytes());
    let schm = make_box(b"schm", &schm);

    // version/flags, reserved, protected flag, IV size, then the key id
    let mut tenc = vec![0, 0, 0, 0, 0, 0, 1, 16];
    tenc.extend_from_slice(key_id.as_bytes());
    let schi = make_box(b"schi", &make_box(b"tenc", &tenc));

    make_box(b"sinf", &[frma, schm, schi].concat())
}

/// `sinf` init data as delivered with an `encrypted` event:
/// `{"sinf": ["<base64 sinf box>"]}`.
pub fn sinf_init_data(key_id: &KeyId) -> Bytes {
    let encoded = base64::engine::general_purpose::STANDARD.encode(sinf_box(key_id, b"cbcs"));
    Bytes::from(serde_json::json!({ "sinf": [encoded] }).to_string())
}

/// A PlayReady key message: the UTF-16LE XML envelope around a base64
/// challenge, with the headers the license server expects.
pub fn playready_key_message(challenge: &[u8]) -> Bytes {
    let encoded = base64::engine::general_purpose::STANDARD.encode(challenge);
    let xml = format!(
        "<PlayReadyKeyMessage type=\"LicenseAcquisition\">\
         <LicenseAcquisition Version=\"1\">\
         <Challenge encoding=\"base64encoded\">{encoded}</Challenge>\
         <HttpHeaders>\
         <HttpHeader><name>Content-Type</name><value>text/xml; charset=utf-8</value></HttpHeader>\
         <HttpHeader><name>SOAPAction</name><value>http://schemas.microsoft.com/DRM/2007/03/protocols/AcquireLicense</value></HttpHeader>\
         </HttpHeaders>\
         </LicenseAcquisition>\
         </PlayReadyKeyMessage>"
    );
    xml.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}
