//! Contract Test: Credential Lifecycle
//!
//! Constraints verified:
//! - `put` probes reachability and stores the credential either way
//! - `get` reports the stored flag without re-probing and never the secret
//! - `delete` is idempotent and leaves backups queryable
//! - Missing fields are rejected before any remote access
//!
//! If this test fails, credential handling is broken.

mod common;

use common::*;
use dhcpsync_core::service::{PutConfigRequest, PutCredentialRequest};
use dhcpsync_core::Error;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn put_reports_reachable_device() {
    let harness = harness();

    let view = harness
        .service
        .put_credential(PutCredentialRequest::new(DEVICE, USERNAME, PASSWORD))
        .await
        .unwrap();

    assert_eq!(view.device_ip, DEVICE);
    assert_eq!(view.username, USERNAME);
    assert!(view.ssh_access);
    assert_eq!(harness.transport.connect_count(), 1, "exactly one probe");
}

#[tokio::test]
async fn unreachable_device_is_still_stored() {
    let harness = harness();
    harness.transport.set_reachable(DEVICE, false);

    let view = assert_ok!(
        harness
            .service
            .put_credential(PutCredentialRequest::new(DEVICE, USERNAME, PASSWORD))
            .await
    );
    assert!(!view.ssh_access);

    let stored = harness.service.get_credential(DEVICE).await.unwrap();
    assert!(!stored.ssh_access);
}

#[tokio::test]
async fn wrong_password_is_stored_as_unreachable() {
    let harness = harness();
    let view = harness
        .service
        .put_credential(PutCredentialRequest::new(DEVICE, USERNAME, "wrong"))
        .await
        .unwrap();
    assert!(!view.ssh_access);
}

#[tokio::test]
async fn get_does_not_reprobe() {
    let harness = harness_with_credential().await;
    let probes = harness.transport.connect_count();

    // Device goes away after the credential was stored
    harness.transport.set_reachable(DEVICE, false);

    let view = harness.service.get_credential(DEVICE).await.unwrap();
    assert!(view.ssh_access, "flag reflects the last put, not the present");
    assert_eq!(harness.transport.connect_count(), probes);

    let json = serde_json::to_string(&view).unwrap();
    assert!(!json.contains(PASSWORD), "view must never carry the secret");
}

#[tokio::test]
async fn replacing_a_credential_recomputes_reachability() {
    let harness = harness_with_credential().await;

    harness.transport.set_reachable(DEVICE, false);
    let view = harness
        .service
        .put_credential(PutCredentialRequest::new(DEVICE, "operator", PASSWORD))
        .await
        .unwrap();

    assert!(!view.ssh_access);
    assert_eq!(view.username, "operator");
    assert_eq!(harness.service.list_credentials().await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_fields_are_rejected_without_probing() {
    let harness = harness();

    let err = assert_err!(
        harness
            .service
            .put_credential(PutCredentialRequest {
                device_ip: Some(DEVICE.to_string()),
                username: None,
                password: None,
            })
            .await
    );

    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("username"));
    assert!(err.to_string().contains("password"));
    assert_eq!(harness.transport.connect_count(), 0);
    assert!(harness.service.list_credentials().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_device_is_not_found() {
    let harness = harness();
    let err = harness.service.get_credential("10.9.9.9").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn delete_is_idempotent_and_keeps_backups() {
    let harness = harness_with_credential().await;
    harness.transport.set_file(DEVICE, CONFIG_PATH, "A");
    harness
        .service
        .put_config(PutConfigRequest::new(DEVICE, "B"))
        .await
        .unwrap();

    assert!(harness.service.delete_credential(DEVICE).await.unwrap());
    assert!(!harness.service.delete_credential(DEVICE).await.unwrap());

    let err = harness.service.get_credential(DEVICE).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let backups = harness.service.list_backups(DEVICE).await.unwrap();
    assert_eq!(backups.len(), 1);

    // Config operations now have nothing to authenticate with
    let err = harness
        .service
        .put_config(PutConfigRequest::new(DEVICE, "C"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
