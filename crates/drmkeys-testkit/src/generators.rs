//! Proptest generators for property-based testing.

use proptest::prelude::*;

use drmkeys_core::{DecryptDescriptor, KeyId, KeySystem};

use crate::fixtures::key_for;

/// Generate a 16-byte key id.
pub fn key_id() -> impl Strategy<Value = KeyId> {
    any::<[u8; 16]>().prop_map(KeyId::from)
}

/// Generate between 1 and `max` distinct key ids.
pub fn distinct_key_ids(max: usize) -> impl Strategy<Value = Vec<KeyId>> {
    prop::collection::hash_set(any::<[u8; 16]>(), 1..=max.max(1))
        .prop_map(|ids| ids.into_iter().map(KeyId::from).collect())
}

/// Generate a key system.
pub fn key_system() -> impl Strategy<Value = KeySystem> {
    prop_oneof![
        Just(KeySystem::FairPlay),
        Just(KeySystem::Widevine),
        Just(KeySystem::PlayReady),
        Just(KeySystem::ClearKey),
    ]
}

/// Generate a descriptor for `key_system` carrying a PSSH for its key id.
pub fn descriptor(key_system: KeySystem) -> impl Strategy<Value = DecryptDescriptor> {
    key_id().prop_map(move |kid| key_for(key_system, &kid))
}

/// Generate a list of key ids where some ids repeat, as when a playlist and
/// the media both announce the same keys.
pub fn key_ids_with_repeats(max: usize) -> impl Strategy<Value = Vec<KeyId>> {
    distinct_key_ids(max).prop_flat_map(|ids| {
        let len = ids.len();
        prop::collection::vec(0..len, len..=len * 3).prop_map(move |picks| {
            let mut out = ids.clone();
            out.extend(picks.into_iter().map(|i| ids[i].clone()));
            out
        })
    })
}
