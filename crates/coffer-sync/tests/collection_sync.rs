//! Collection sync with mixed local and remote files.

mod common;

use coffer_core::{CofferError, SyncStatus};
use coffer_sync::{sync_collection, sync_file, SyncOutcome};
use common::{password, Vault};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_partial_failure_is_isolated_per_file() {
    let vault = Vault::new().await;
    let good_a = vault.import("a.txt", b"alpha").await;
    let good_b = vault.import("b.txt", b"bravo").await;
    let bad = vault.import("c.txt", b"charlie").await;
    let remote_d = vault.seed_remote("d.txt", b"delta").await;
    let remote_e = vault.seed_remote("e.txt", b"echo").await;
    vault.gateway.fail_content_uploads_with_hash(&bad.encrypted_hash);

    let report = sync_collection(
        &vault.ctx,
        &vault.collection.id,
        &password(),
        &CancellationToken::new(),
    )
    .await
    .expect("diffing succeeds");

    assert_eq!(report.total, 5);
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded(), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].file_id, bad.id);
    assert!(matches!(
        report.failures[0].error,
        CofferError::UploadIncomplete { .. }
    ));

    for id in [&good_a.id, &good_b.id] {
        assert_eq!(
            vault.ctx.repo.get_file(id).unwrap().sync_status,
            SyncStatus::Synced
        );
    }
    let failed = vault.ctx.repo.get_file(&bad.id).unwrap();
    assert_eq!(failed.sync_status, SyncStatus::LocalOnly);
    assert!(failed.remote_id.is_some());

    for (remote, content) in [(&remote_d, b"delta".as_slice()), (&remote_e, b"echo")] {
        let local = vault.ctx.repo.get_file(&remote.id).unwrap();
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert_eq!(
            std::fs::read(local.decrypted_path.as_ref().unwrap()).unwrap(),
            content
        );
    }
}

#[tokio::test]
async fn test_second_pass_only_retries_what_failed() {
    let vault = Vault::new().await;
    vault.import("a.txt", b"alpha").await;
    let bad = vault.import("b.txt", b"bravo").await;
    vault.gateway.fail_content_uploads_with_hash(&bad.encrypted_hash);
    let cancel = CancellationToken::new();

    let first = sync_collection(&vault.ctx, &vault.collection.id, &password(), &cancel)
        .await
        .unwrap();
    assert_eq!(first.failed, 1);

    vault.gateway.clear_faults();
    let second = sync_collection(&vault.ctx, &vault.collection.id, &password(), &cancel)
        .await
        .unwrap();
    assert_eq!(second.total, 2);
    assert_eq!(second.uploaded, 1);
    assert_eq!(second.unchanged, 1);
    assert_eq!(second.failed, 0);
    // The pending record from the first pass was resumed.
    assert_eq!(vault.gateway.create_pending_calls(), 2);
}

#[tokio::test]
async fn test_wrong_password_fails_only_files_needing_keys() {
    let vault = Vault::new().await;
    let local = vault.import("a.txt", b"alpha").await;
    vault.seed_remote("b.txt", b"bravo").await;

    let wrong = secrecy::SecretString::from("wrong");
    let report = sync_collection(
        &vault.ctx,
        &vault.collection.id,
        &wrong,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    // Uploads move ciphertext that already exists; only the fetch needs keys.
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.failures[0].error,
        CofferError::AuthenticationFailed
    ));
    assert_eq!(
        vault.ctx.repo.get_file(&local.id).unwrap().sync_status,
        SyncStatus::Synced
    );
}

#[tokio::test]
async fn test_cancelled_collection_sync_moves_nothing() {
    let vault = Vault::new().await;
    vault.import("a.txt", b"alpha").await;
    vault.seed_remote("b.txt", b"bravo").await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = sync_collection(&vault.ctx, &vault.collection.id, &password(), &cancel)
        .await
        .unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.failed, 2);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.error, CofferError::Cancelled)));
    assert_eq!(vault.gateway.create_pending_calls(), 0);
}

#[tokio::test]
async fn test_sync_file_discovers_remote_only_file() {
    let vault = Vault::new().await;
    let remote = vault.seed_remote("photo.jpg", b"jpeg bytes").await;

    let outcome = sync_file(&vault.ctx, &remote.id, &password(), &CancellationToken::new())
        .await
        .unwrap();
    let SyncOutcome::Downloaded(file) = outcome else {
        panic!("expected a download, got {outcome:?}");
    };
    assert_eq!(file.id, remote.id);
    assert_eq!(file.remote_id.as_deref(), Some(remote.id.as_str()));
    assert_eq!(file.sync_status, SyncStatus::Synced);
    assert_eq!(file.version, remote.version);
    let plain = file.decrypted_path.as_ref().unwrap();
    assert!(plain.to_string_lossy().ends_with(".jpg"));
    assert_eq!(std::fs::read(plain).unwrap(), b"jpeg bytes");

    let again = sync_file(&vault.ctx, &remote.id, &password(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again, SyncOutcome::Unchanged);
}
