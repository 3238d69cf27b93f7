//! Init data parsing.
//!
//! Two formats are understood:
//!
//! - `cenc`: one or more container-embedded `pssh` boxes.
//! - `sinf`: a JSON document carrying a base64 encoded `sinf` structure, from
//!   which the track-encryption (`tenc`) box key id is extracted.
//!
//! ```text
//! sinf
//! ├── frma
//! ├── schm   scheme 'cbcs' | 'cenc'
//! └── schi
//!     └── tenc   [4 version/flags][4 reserved/pattern/protected/iv size][16 KID]
//! ```

use base64::Engine;
use bytes::Bytes;

use crate::error::{InitDataError, Result};
use crate::types::{KeyId, KeySystem};

const COMMON_SYSTEM_ID: [u8; 16] = hex_literal("1077efecc0b24d02ace33c1e52e2fb4b");
const WIDEVINE_SYSTEM_ID: [u8; 16] = hex_literal("edef8ba979d64acea3c827dcd51d21ed");
const PLAYREADY_SYSTEM_ID: [u8; 16] = hex_literal("9a04f07998404286ab92e65be0885f95");
const FAIRPLAY_SYSTEM_ID: [u8; 16] = hex_literal("94ce86fb07ff4f43adb893d2fa968ca2");
const CLEARKEY_SYSTEM_ID: [u8; 16] = hex_literal("e2719d58a985b3c9781ab030af78d30e");

/// Offset of the default KID inside a `tenc` box payload.
const TENC_KID_RANGE: std::ops::Range<usize> = 8..24;

const fn hex_literal(s: &str) -> [u8; 16] {
    let bytes = s.as_bytes();
    let mut out = [0u8; 16];
    let mut i = 0;
    while i < 16 {
        out[i] = (nibble(bytes[i * 2]) << 4) | nibble(bytes[i * 2 + 1]);
        i += 1;
    }
    out
}

const fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

/// A top-level box found while walking a buffer.
#[derive(Debug, Clone, Copy)]
struct RawBox<'a> {
    box_type: [u8; 4],
    /// Box payload, excluding the size/type header.
    payload: &'a [u8],
    /// Whole box including header.
    full: &'a [u8],
}

/// Iterate over sibling boxes in `data`.
fn boxes(data: &[u8]) -> Result<Vec<RawBox<'_>>> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = &data[offset..];
        if remaining.len() < 8 {
            return Err(InitDataError::Truncated {
                needed: 8,
                available: remaining.len(),
            });
        }
        let size32 = u32::from_be_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]);
        let mut box_type = [0u8; 4];
        box_type.copy_from_slice(&remaining[4..8]);

        let (header_len, size) = match size32 {
            0 => (8usize, remaining.len()),
            1 => {
                if remaining.len() < 16 {
                    return Err(InitDataError::Truncated {
                        needed: 16,
                        available: remaining.len(),
                    });
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&remaining[8..16]);
                (16usize, u64::from_be_bytes(large) as usize)
            }
            n => (8usize, n as usize),
        };

        if size < header_len || size > remaining.len() {
            return Err(InitDataError::Truncated {
                needed: size.max(header_len),
                available: remaining.len(),
            });
        }

        out.push(RawBox {
            box_type,
            payload: &remaining[header_len..size],
            full: &remaining[..size],
        });
        offset += size;
    }

    Ok(out)
}

/// Find the payload of the first box reached by following `path`.
fn find_box<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Result<Option<&'a [u8]>> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(Some(data));
    };
    for b in boxes(data)? {
        if &b.box_type == *first {
            if rest.is_empty() {
                return Ok(Some(b.payload));
            }
            if let Some(found) = find_box(b.payload, rest)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

fn read_u32(data: &[u8], at: usize) -> Result<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(InitDataError::Truncated {
            needed: at + 4,
            available: data.len(),
        })
}

/// Protection system identified by a `pssh` box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemId {
    Common,
    Widevine,
    PlayReady,
    FairPlay,
    ClearKey,
    Other([u8; 16]),
}

impl SystemId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        match bytes {
            COMMON_SYSTEM_ID => SystemId::Common,
            WIDEVINE_SYSTEM_ID => SystemId::Widevine,
            PLAYREADY_SYSTEM_ID => SystemId::PlayReady,
            FAIRPLAY_SYSTEM_ID => SystemId::FairPlay,
            CLEARKEY_SYSTEM_ID => SystemId::ClearKey,
            other => SystemId::Other(other),
        }
    }

    /// The key system this protection system belongs to, if any.
    pub fn key_system(&self) -> Option<KeySystem> {
        match self {
            SystemId::Widevine => Some(KeySystem::Widevine),
            SystemId::PlayReady => Some(KeySystem::PlayReady),
            SystemId::FairPlay => Some(KeySystem::FairPlay),
            SystemId::ClearKey | SystemId::Common => Some(KeySystem::ClearKey),
            SystemId::Other(_) => None,
        }
    }
}

/// A parsed `pssh` box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PsshBox {
    pub version: u8,
    pub system_id: SystemId,
    /// Key ids listed in the box header (version 1 boxes only).
    pub key_ids: Vec<KeyId>,
    /// System specific data.
    pub data: Bytes,
    /// The complete box, header included, as handed to the host.
    pub raw: Bytes,
}

impl PsshBox {
    /// Parse every `pssh` box found at the top level of `init_data`.
    /// Boxes of other types are skipped.
    pub fn parse_all(init_data: &[u8]) -> Result<Vec<PsshBox>> {
        boxes(init_data)?
            .into_iter()
            .filter(|b| &b.box_type == b"pssh")
            .map(|b| Self::parse_payload(b.payload, b.full))
            .collect()
    }

    fn parse_payload(payload: &[u8], full: &[u8]) -> Result<PsshBox> {
        if payload.len() < 20 {
            return Err(InitDataError::Truncated {
                needed: 20,
                available: payload.len(),
            });
        }
        let version = payload[0];
        let mut system_id = [0u8; 16];
        system_id.copy_from_slice(&payload[4..20]);

        let mut offset = 20;
        let mut key_ids = Vec::new();
        if version > 0 {
            let count = read_u32(payload, offset)? as usize;
            offset += 4;
            for _ in 0..count {
                let kid = payload.get(offset..offset + 16).ok_or(InitDataError::Truncated {
                    needed: offset + 16,
                    available: payload.len(),
                })?;
                key_ids.push(KeyId::from_bytes(kid));
                offset += 16;
            }
        }

        let data_len = read_u32(payload, offset)? as usize;
        offset += 4;
        let data = payload
            .get(offset..offset + data_len)
            .ok_or(InitDataError::Truncated {
                needed: offset + data_len,
                available: payload.len(),
            })?;

        Ok(PsshBox {
            version,
            system_id: SystemId::from_bytes(system_id),
            key_ids,
            data: Bytes::copy_from_slice(data),
            raw: Bytes::copy_from_slice(full),
        })
    }
}

/// Locate the `tenc` payload inside a `sinf` structure.
///
/// Accepts either the `sinf` box itself or its children. Returns `None` when
/// the scheme is not `cbcs`/`cenc` or no `schi > tenc` is present.
pub fn parse_sinf(sinf: &[u8]) -> Result<Option<&[u8]>> {
    let children = match find_box(sinf, &[b"sinf"]) {
        Ok(Some(inner)) => inner,
        _ => sinf,
    };

    let Some(schm) = find_box(children, &[b"schm"])? else {
        return Ok(None);
    };
    let scheme = schm.get(4..8).unwrap_or_default();
    if scheme != b"cbcs" && scheme != b"cenc" {
        return Ok(None);
    }
    find_box(children, &[b"schi", b"tenc"])
}

/// Extract the key id from JSON-wrapped `sinf` init data, as delivered with
/// init data type `sinf`: `{"sinf": ["<base64>"]}` (a bare string is accepted
/// too).
pub fn key_id_from_sinf_json(init_data: &[u8]) -> Result<KeyId> {
    let json: serde_json::Value = serde_json::from_slice(init_data)?;
    let encoded = match &json["sinf"] {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(","),
        _ => return Err(InitDataError::MissingTenc),
    };
    let sinf = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    let tenc = parse_sinf(&sinf)?.ok_or(InitDataError::MissingTenc)?;
    let kid = tenc
        .get(TENC_KID_RANGE)
        .ok_or(InitDataError::Truncated {
            needed: TENC_KID_RANGE.end,
            available: tenc.len(),
        })?;
    Ok(KeyId::from_bytes(kid))
}

/// Serialize a box from its type and payload. Used to assemble init data.
pub fn make_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(payload);
    out
}

/// Build a `pssh` box for `system` carrying `data`, listing `key_ids` when
/// any are given (version 1).
pub fn make_pssh(system: [u8; 16], key_ids: &[KeyId], data: &[u8]) -> Vec<u8> {
    let version: u8 = if key_ids.is_empty() { 0 } else { 1 };
    let mut payload = vec![version, 0, 0, 0];
    payload.extend_from_slice(&system);
    if version > 0 {
        payload.extend_from_slice(&(key_ids.len() as u32).to_be_bytes());
        for kid in key_ids {
            payload.extend_from_slice(kid.as_bytes());
        }
    }
    payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
    payload.extend_from_slice(data);
    make_box(b"pssh", &payload)
}

/// Raw system id bytes for building boxes.
pub const fn system_id_bytes(system: SystemId) -> [u8; 16] {
    match system {
        SystemId::Common => COMMON_SYSTEM_ID,
        SystemId::Widevine => WIDEVINE_SYSTEM_ID,
        SystemId::PlayReady => PLAYREADY_SYSTEM_ID,
        SystemId::FairPlay => FAIRPLAY_SYSTEM_ID,
        SystemId::ClearKey => CLEARKEY_SYSTEM_ID,
        SystemId::Other(bytes) => bytes,
    }
}
