//! End-to-end controller scenarios against the in-memory host.

use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use proptest::prelude::*;

use drmkeys::{
    DrmConfig, EncryptedOutcome, ErrorKind, GenerateRequestFilter, ProtocolState,
    UsableInFuturePolicy,
};
use drmkeys_core::{
    DecryptDescriptor, DrmSystemOptions, KeyId, KeyStatus, KeySystem, MessageType,
};
use drmkeys_host::{HostScript, SessionEvent};
use drmkeys_license::transport::memory::ScriptedResponse;
use drmkeys_license::{LicenseContext, LicenseRequest};
use drmkeys_testkit::fixtures::{config_for, fairplay_playlist_key, key_for, license_url};
use drmkeys_testkit::generators::key_ids_with_repeats;
use drmkeys_testkit::vectors::{playready_key_message, sinf_init_data};
use drmkeys_testkit::{wait_until, TestHarness};

fn kid(byte: u8) -> KeyId {
    KeyId::from([byte; 16])
}

// ─────────────────────────────────────────────────────────────────────────────
// Dedupe
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_loads_share_one_session() {
    let h = TestHarness::new(config_for(&[KeySystem::Widevine]));
    let key = key_for(KeySystem::Widevine, &kid(1));

    let results = join_all((0..3).map(|_| h.controller.load_key(key.clone()))).await;
    let contexts: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    assert!(contexts.windows(2).all(|w| w[0].session_id() == w[1].session_id()));
    assert_eq!(h.host.sessions().len(), 1);
    assert_eq!(h.server.attempts(), 1);
    assert_eq!(h.host.cdm_count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_one_session_per_key_id(ids in key_ids_with_repeats(5)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let distinct: HashSet<String> = ids.iter().map(KeyId::to_hex).collect();

        let (sessions, attempts) = runtime.block_on(async {
            let h = TestHarness::new(config_for(&[KeySystem::Widevine]));
            let loads = ids
                .iter()
                .map(|id| h.controller.load_key(key_for(KeySystem::Widevine, id)));
            for result in join_all(loads).await {
                result.unwrap();
            }
            (h.host.sessions().len(), h.server.attempts())
        });

        prop_assert_eq!(sessions, distinct.len());
        prop_assert_eq!(attempts, distinct.len());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Media keys binding
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_binds_never_overlap() {
    let systems = [KeySystem::Widevine, KeySystem::PlayReady, KeySystem::ClearKey];
    let h = TestHarness::with_media_delay(config_for(&systems), Duration::from_millis(20));

    let loads = systems
        .iter()
        .enumerate()
        .map(|(i, ks)| h.controller.load_key(key_for(*ks, &kid(i as u8 + 1))));
    for result in join_all(loads).await {
        result.unwrap();
    }

    assert_eq!(h.host.cdm_count(), 3);
    assert_eq!(h.media.attach_calls().len(), 3);
    assert_eq!(h.media.max_in_flight(), 1);
}

#[tokio::test]
async fn test_same_handle_bound_once() {
    let h = TestHarness::new(config_for(&[KeySystem::Widevine]));

    h.controller.load_key(key_for(KeySystem::Widevine, &kid(1))).await.unwrap();
    h.controller.load_key(key_for(KeySystem::Widevine, &kid(2))).await.unwrap();

    assert_eq!(h.host.sessions().len(), 2);
    assert_eq!(h.media.attach_calls().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// License retries
// ─────────────────────────────────────────────────────────────────────────────

async fn attempts_for(max_num_retry: u32, status: u16) -> (usize, ErrorKind) {
    let mut config = config_for(&[KeySystem::Widevine]);
    config.key_load_policy.max_num_retry = max_num_retry;
    let h = TestHarness::new(config);
    h.server.set_fallback(ScriptedResponse::status(status));

    let err = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(9)))
        .await
        .unwrap_err();
    (h.server.attempts(), err.kind)
}

#[tokio::test]
async fn test_server_errors_retried_up_to_budget() {
    assert_eq!(attempts_for(3, 500).await, (4, ErrorKind::LicenseRequestFailed));
    assert_eq!(attempts_for(1, 500).await, (2, ErrorKind::LicenseRequestFailed));
}

#[tokio::test]
async fn test_client_errors_not_retried() {
    assert_eq!(attempts_for(3, 403).await, (1, ErrorKind::LicenseRequestFailed));
}

#[tokio::test]
async fn test_retry_succeeds_after_transient_failure() {
    let h = TestHarness::new(config_for(&[KeySystem::Widevine]));
    h.server.push(ScriptedResponse::status(503));

    let context = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(3)))
        .await
        .unwrap();
    assert_eq!(context.key_status(), Some(KeyStatus::Usable));
    assert_eq!(h.server.attempts(), 2);
    assert_eq!(h.session(0).updates(), vec![Bytes::from_static(b"license")]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Key status handling
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_expired_key_renews_session() {
    let h = TestHarness::new(config_for(&[KeySystem::Widevine]));
    let expired = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(4)))
        .await
        .unwrap();

    h.session(0).set_status(KeyStatus::Expired);

    let renewed = wait_until(|| {
        let sessions = h.controller.sessions();
        sessions.len() == 1
            && sessions[0].session_id() != expired.session_id()
            && sessions[0].key_status() == Some(KeyStatus::Usable)
            && h.session(0).is_closed()
    })
    .await;
    assert!(renewed);
    assert_eq!(h.host.sessions().len(), 2);
    assert_eq!(h.session(0).listener_count(), 0);
    assert_eq!(expired.state(), ProtocolState::Closed);
    assert_eq!(h.server.attempts(), 2);
    assert!(h.errors.events().is_empty());
}

#[tokio::test]
async fn test_output_restricted_after_usable_is_published() {
    let h = TestHarness::new(config_for(&[KeySystem::Widevine]));
    let context = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(5)))
        .await
        .unwrap();

    h.session(0).set_status(KeyStatus::OutputRestricted);

    assert!(wait_until(|| !h.errors.events().is_empty()).await);
    let events = h.errors.events();
    let event = &events[0];
    assert_eq!(event.kind, ErrorKind::StatusOutputRestricted);
    assert!(!event.fatal);
    assert_eq!(event.category, "key-system");
    assert_eq!(context.state(), ProtocolState::OutputRestricted);
}

#[tokio::test]
async fn test_internal_error_status_rejects_pending_load() {
    let h = TestHarness::with_script(
        config_for(&[KeySystem::Widevine]),
        HostScript {
            statuses_after_update: vec![KeyStatus::InternalError],
            ..Default::default()
        },
    );

    let err = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(6)))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StatusInternalError);
    assert!(err.fatal);
    assert!(h.session(0).is_closed());
    assert!(h.errors.events().is_empty());
}

#[tokio::test]
async fn test_swapped_status_entries_still_usable() {
    let h = TestHarness::with_script(
        config_for(&[KeySystem::Widevine]),
        HostScript {
            swap_status_order: true,
            ..Default::default()
        },
    );

    let context = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(7)))
        .await
        .unwrap();
    assert_eq!(context.key_status(), Some(KeyStatus::Usable));
}

#[tokio::test]
async fn test_usable_in_future_resolves_when_configured() {
    let config = DrmConfig {
        usable_in_future: UsableInFuturePolicy::Resolve,
        ..config_for(&[KeySystem::Widevine])
    };
    let h = TestHarness::with_script(
        config,
        HostScript {
            statuses_after_update: vec![KeyStatus::UsableInFuture],
            ..Default::default()
        },
    );

    let context = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(8)))
        .await
        .unwrap();
    assert_eq!(context.key_status(), Some(KeyStatus::UsableInFuture));
    assert_eq!(context.state(), ProtocolState::Usable);
}

#[tokio::test]
async fn test_usable_in_future_waits_for_usable_by_default() {
    let h = TestHarness::with_script(
        config_for(&[KeySystem::Widevine]),
        HostScript {
            statuses_after_update: vec![KeyStatus::UsableInFuture],
            ..Default::default()
        },
    );
    let key = key_for(KeySystem::Widevine, &kid(9));

    let pending =
        tokio::time::timeout(Duration::from_millis(100), h.controller.load_key(key.clone())).await;
    assert!(pending.is_err());
    assert_eq!(h.session(0).updates().len(), 1);

    h.session(0).set_status(KeyStatus::Usable);
    let context = h.controller.load_key(key).await.unwrap();
    assert_eq!(context.key_status(), Some(KeyStatus::Usable));
    assert_eq!(h.host.sessions().len(), 1);
    assert_eq!(h.server.attempts(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// FairPlay `encrypted` events
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sinf_matching_session_with_pssh_is_reused() {
    let h = TestHarness::new(config_for(&[KeySystem::FairPlay]));
    let key_id = kid(0x21);
    let loaded = h
        .controller
        .load_key(key_for(KeySystem::FairPlay, &key_id))
        .await
        .unwrap();

    let outcome = h
        .controller
        .on_media_encrypted("sinf", Some(sinf_init_data(&key_id)))
        .await
        .unwrap();

    match outcome {
        EncryptedOutcome::Reused(context) => {
            assert_eq!(context.session_id(), loaded.session_id())
        }
        other => panic!("expected reuse, got {other:?}"),
    }
    assert_eq!(h.host.sessions().len(), 1);
}

#[tokio::test]
async fn test_sinf_supplies_init_data_to_playlist_session() {
    let h = TestHarness::new(config_for(&[KeySystem::FairPlay]));
    let key_id = kid(0x22);
    let loaded = h
        .controller
        .load_key(fairplay_playlist_key(&key_id))
        .await
        .unwrap();
    assert_eq!(loaded.key_status(), None);
    assert_eq!(h.server.attempts(), 0);

    let outcome = h
        .controller
        .on_media_encrypted("sinf", Some(sinf_init_data(&key_id)))
        .await
        .unwrap();
    assert!(matches!(outcome, EncryptedOutcome::Generated(_)));

    assert!(wait_until(|| loaded.key_status() == Some(KeyStatus::Usable)).await);
    let requests = h.session(0).requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "sinf");
    assert!(loaded.descriptor().pssh.is_some());
    assert_eq!(h.host.sessions().len(), 1);
}

#[tokio::test]
async fn test_sinf_matches_key_uri() {
    let h = TestHarness::new(config_for(&[KeySystem::FairPlay]));
    let media_kid = KeyId::from_hex("0123456789abcdef0123456789abcdef").unwrap();
    let playlist_key = fairplay_playlist_key(&kid(0x26));
    let playlist_key = DecryptDescriptor {
        uri: "skd://01234567-89AB-CDEF-0123-456789ABCDEF".into(),
        ..playlist_key
    };
    let loaded = h.controller.load_key(playlist_key).await.unwrap();

    let outcome = h
        .controller
        .on_media_encrypted("sinf", Some(sinf_init_data(&media_kid)))
        .await
        .unwrap();

    match outcome {
        EncryptedOutcome::Generated(context) => {
            assert_eq!(context.session_id(), loaded.session_id())
        }
        other => panic!("expected generation, got {other:?}"),
    }
    assert!(wait_until(|| loaded.key_status() == Some(KeyStatus::Usable)).await);
    assert_eq!(loaded.descriptor().key_id, Some(media_kid));
    assert_eq!(h.host.sessions().len(), 1);
}

#[tokio::test]
async fn test_unknown_sinf_key_publishes_no_keys() {
    let h = TestHarness::new(config_for(&[KeySystem::FairPlay]));

    let outcome = h
        .controller
        .on_media_encrypted("sinf", Some(sinf_init_data(&kid(0x23))))
        .await
        .unwrap();

    assert!(matches!(outcome, EncryptedOutcome::Unmatched));
    assert_eq!(h.error_kinds(), vec![ErrorKind::NoKeys]);
    assert!(h.errors.events()[0]
        .cause
        .message
        .contains("not encountered in playlist"));
}

#[tokio::test]
async fn test_cenc_event_ignored_for_fairplay() {
    let h = TestHarness::new(config_for(&[KeySystem::FairPlay]));
    let pssh = drmkeys_testkit::vectors::pssh(KeySystem::FairPlay, &[kid(0x24)]);

    let outcome = h
        .controller
        .on_media_encrypted("cenc", Some(pssh))
        .await
        .unwrap();
    assert!(matches!(outcome, EncryptedOutcome::Ignored));
    assert!(h.host.sessions().is_empty());
}

#[tokio::test]
async fn test_license_release_acknowledged_and_closed() {
    let h = TestHarness::new(config_for(&[KeySystem::FairPlay]));
    h.controller
        .load_key(key_for(KeySystem::FairPlay, &kid(0x25)))
        .await
        .unwrap();

    h.session(0).emit(SessionEvent::Message {
        message_type: MessageType::LicenseRelease,
        message: Bytes::from_static(b"release"),
    });

    assert!(wait_until(|| h.session(0).is_closed()).await);
    assert_eq!(
        h.session(0).updates().last(),
        Some(&Bytes::from_static(b"acknowledged"))
    );
    assert!(wait_until(|| h.controller.sessions().is_empty()).await);
}

#[tokio::test]
async fn test_new_license_message_aborts_previous_request() {
    let h = TestHarness::new(config_for(&[KeySystem::Widevine]));
    h.controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x27)))
        .await
        .unwrap();
    h.server
        .push(ScriptedResponse::ok(Bytes::from_static(b"stale")).delayed(Duration::from_millis(200)));
    h.server.push(ScriptedResponse::ok(Bytes::from_static(b"second")));

    let session = h.session(0);
    session.emit(SessionEvent::Message {
        message_type: MessageType::LicenseRenewal,
        message: Bytes::from_static(b"renew-1"),
    });
    assert!(wait_until(|| h.server.attempts() == 2).await);
    session.emit(SessionEvent::Message {
        message_type: MessageType::LicenseRenewal,
        message: Bytes::from_static(b"renew-2"),
    });
    assert!(wait_until(|| session.updates().len() == 2).await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        session.updates(),
        vec![Bytes::from_static(b"license"), Bytes::from_static(b"second")]
    );
    assert_eq!(h.server.attempts(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// PlayReady
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_playready_renewal_unwraps_envelope() {
    let h = TestHarness::new(config_for(&[KeySystem::PlayReady]));
    h.controller
        .load_key(key_for(KeySystem::PlayReady, &kid(0x31)))
        .await
        .unwrap();

    h.session(0).emit(SessionEvent::Message {
        message_type: MessageType::LicenseRenewal,
        message: playready_key_message(b"<renew/>"),
    });

    assert!(wait_until(|| h.server.attempts() == 2).await);
    let request = &h.server.requests()[1];
    assert_eq!(request.url, license_url(KeySystem::PlayReady));
    assert_eq!(request.body.as_ref(), b"<renew/>");
    assert_eq!(request.header("content-type"), Some("text/xml; charset=utf-8"));
    assert!(request.header("SOAPAction").is_some());
}

#[tokio::test]
async fn test_request_setup_runs_before_envelope_unwrap() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let mut config = config_for(&[KeySystem::PlayReady]);
    config.hooks.license.request_setup = Some(Arc::new(
        move |request: &mut LicenseRequest, context: &LicenseContext| -> anyhow::Result<()> {
            record.lock().unwrap().push(request.body.clone());
            if context.message_type == MessageType::LicenseRenewal {
                request.body = playready_key_message(b"<replaced/>");
            }
            Ok(())
        },
    ));
    let h = TestHarness::new(config);
    h.controller
        .load_key(key_for(KeySystem::PlayReady, &kid(0x32)))
        .await
        .unwrap();

    h.session(0).emit(SessionEvent::Message {
        message_type: MessageType::LicenseRenewal,
        message: playready_key_message(b"<renew/>"),
    });

    assert!(wait_until(|| h.server.attempts() == 2).await);
    assert_eq!(seen.lock().unwrap()[1], playready_key_message(b"<renew/>"));
    let request = &h.server.requests()[1];
    assert_eq!(request.body.as_ref(), b"<replaced/>");
    assert!(request.header("SOAPAction").is_some());
}

// ─────────────────────────────────────────────────────────────────────────────
// Site hooks
// ─────────────────────────────────────────────────────────────────────────────

fn widevine_filter(
    filter: impl Fn(&str, Option<&Bytes>, &DecryptDescriptor) -> anyhow::Result<(String, Option<Bytes>)>
        + Send
        + Sync
        + 'static,
) -> DrmConfig {
    let filter: GenerateRequestFilter = Arc::new(filter);
    let mut config = config_for(&[KeySystem::Widevine]);
    config.hooks.generate_request.insert(KeySystem::Widevine, filter);
    config
}

#[tokio::test]
async fn test_filtered_init_data_replaces_pssh() {
    let h = TestHarness::new(widevine_filter(|_, _, _| {
        Ok(("cenc".into(), Some(Bytes::from_static(b"FILTERED"))))
    }));

    let context = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x71)))
        .await
        .unwrap();

    let requests = h.session(0).requests();
    assert_eq!(requests[0].1, Bytes::from_static(b"FILTERED"));
    assert_eq!(context.descriptor().pssh, Some(Bytes::from_static(b"FILTERED")));
    assert_eq!(h.server.requests()[0].body.as_ref(), b"FILTERED");
}

#[tokio::test]
async fn test_filter_dropping_init_data_skips_request() {
    let h = TestHarness::new(widevine_filter(|init_data_type, _, _| {
        Ok((init_data_type.to_string(), None))
    }));

    let context = h
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x72)))
        .await
        .unwrap();

    assert!(h.session(0).requests().is_empty());
    assert_eq!(context.descriptor().pssh, None);
    assert_eq!(context.key_status(), None);
    assert_eq!(h.server.attempts(), 0);
}

#[tokio::test]
async fn test_failing_filter_ignored_unless_strict() {
    let key = key_for(KeySystem::Widevine, &kid(0x73));
    let failing = |_: &str,
                   _: Option<&Bytes>,
                   _: &DecryptDescriptor|
     -> anyhow::Result<(String, Option<Bytes>)> { anyhow::bail!("filter unavailable") };

    let h = TestHarness::new(widevine_filter(failing));
    let context = h.controller.load_key(key.clone()).await.unwrap();
    assert_eq!(context.key_status(), Some(KeyStatus::Usable));
    assert_eq!(Some(h.session(0).requests()[0].1.clone()), key.pssh);

    let strict = DrmConfig {
        strict: true,
        ..widevine_filter(failing)
    };
    let h = TestHarness::new(strict);
    let err = h.controller.load_key(key).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoSession);
    assert!(err.fatal);
    assert!(h.session(0).requests().is_empty());
    assert!(h.session(0).is_closed());
}

// ─────────────────────────────────────────────────────────────────────────────
// Server certificates
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_certificate_url_skips_fetch() {
    let h = TestHarness::new(config_for(&[KeySystem::Widevine]));
    h.controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x41)))
        .await
        .unwrap();

    assert_eq!(h.loader.load_count(), 0);
    assert!(h.host.certificates().is_empty());
}

#[tokio::test]
async fn test_certificate_applied_before_sessions() {
    let cert_url = "https://cert.test/wv";
    let config =
        config_for(&[KeySystem::Widevine]).with_certificate_url(KeySystem::Widevine, cert_url);
    let h = TestHarness::new(config);
    h.loader.serve(cert_url, Ok(Bytes::from_static(b"certificate")));

    h.controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x42)))
        .await
        .unwrap();

    assert_eq!(h.loader.load_count(), 1);
    let certificates = h.host.certificates();
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0].0, h.session(0).cdm_id());
    assert_eq!(certificates[0].1, Bytes::from_static(b"certificate"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_config_loaded_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "drm_systems": {{
                "com.microsoft.playready": {{ "license_url": "{}" }}
            }},
            "key_load_policy": {{ "max_num_retry": 2 }}
        }}"#,
        license_url(KeySystem::PlayReady)
    )
    .unwrap();

    let config = DrmConfig::from_file(file.path()).unwrap();
    assert_eq!(config.key_systems_for_config(), vec![KeySystem::PlayReady]);

    let h = TestHarness::new(config);
    h.server.set_fallback(ScriptedResponse::status(502));
    let err = h
        .controller
        .load_key(key_for(KeySystem::PlayReady, &kid(0x51)))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::LicenseRequestFailed);
    assert_eq!(h.server.attempts(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Teardown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_next_controller_waits_for_teardown() {
    let config = config_for(&[KeySystem::Widevine]);
    let first = TestHarness::with_media_delay(config.clone(), Duration::from_millis(30));
    first
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x61)))
        .await
        .unwrap();

    let destroying = first.controller.clone();
    let teardown = tokio::spawn(async move { destroying.destroy().await });
    assert!(wait_until(|| first.barrier.pending().is_some()).await);

    let second = first.successor(config);
    second
        .controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x62)))
        .await
        .unwrap();
    teardown.await.unwrap();

    let first_cdm = first.session(0).cdm_id();
    let second_cdm = first.session(1).cdm_id();
    assert_ne!(first_cdm, second_cdm);
    assert_eq!(
        first.media.attach_calls(),
        vec![Some(first_cdm), None, Some(second_cdm)]
    );
    assert_eq!(first.media.max_in_flight(), 1);
    assert!(first.session(0).is_closed());
    assert!(!first.session(1).is_closed());
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let h = TestHarness::new(config_for(&[KeySystem::Widevine]));
    h.controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x63)))
        .await
        .unwrap();

    h.controller.destroy().await;
    h.controller.destroy().await;

    assert_eq!(h.media.attach_calls().len(), 2);
    assert!(h.host.open_sessions().is_empty());
    assert!(h.errors.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_persistent_remove_is_bounded() {
    let config = DrmConfig {
        drm_system_options: DrmSystemOptions {
            session_type: Some("persistent-license".into()),
            ..Default::default()
        },
        ..config_for(&[KeySystem::Widevine])
    };
    let h = TestHarness::with_script(
        config,
        HostScript {
            remove_delay: Some(Duration::from_secs(60)),
            ..Default::default()
        },
    );
    h.controller
        .load_key(key_for(KeySystem::Widevine, &kid(0x64)))
        .await
        .unwrap();
    assert_eq!(h.session(0).session_type(), "persistent-license");

    let started = tokio::time::Instant::now();
    h.controller.destroy().await;

    assert!(started.elapsed() >= drmkeys::REMOVE_SESSION_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(h.error_kinds(), vec![ErrorKind::DestroyRemoveSessionError]);
    assert!(!h.session(0).is_removed());
    assert!(h.session(0).is_closed());
}
