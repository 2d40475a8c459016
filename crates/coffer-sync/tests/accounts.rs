//! Registration, password change, recovery and sharing.

mod common;

use std::sync::Arc;

use coffer_core::CofferError;
use coffer_crypto::KeyMaterial;
use coffer_storage::MemoryGateway;
use coffer_sync::{
    change_password, collection_name, create_collection, open_shared_collection_key, open_store,
    recover_account, register_user, share_collection, sync_collection, VaultContext,
};
use common::{password, test_settings, Vault};
use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_registration_returns_a_24_word_phrase() {
    let vault = Vault::new().await;
    let reg = register_user(&vault.ctx, "second@example.com", &password())
        .await
        .unwrap();
    assert_eq!(reg.recovery_phrase.expose_secret().split_whitespace().count(), 24);
    assert!(!format!("{reg:?}").contains(reg.recovery_phrase.expose_secret()));
    assert_eq!(vault.ctx.repo.get_user(&reg.user.id).unwrap().email, "second@example.com");
}

#[tokio::test]
async fn test_registration_validates_input() {
    let vault = Vault::new().await;
    let err = register_user(&vault.ctx, "not-an-email", &password())
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::Validation { field: "email", .. }));

    let err = register_user(&vault.ctx, "a@b.c", &SecretString::from(""))
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::Validation { field: "password", .. }));
}

#[tokio::test]
async fn test_password_change_keeps_collection_keys() {
    let vault = Vault::new().await;
    let file = vault.import("a.txt", b"a").await;
    let new_pw = SecretString::from("a much better password");

    change_password(&vault.ctx, &vault.user.id, &password(), &new_pw)
        .await
        .unwrap();

    assert_eq!(
        collection_name(&vault.ctx, &vault.collection.id, &new_pw)
            .await
            .unwrap(),
        "Photos"
    );
    let err = collection_name(&vault.ctx, &vault.collection.id, &password())
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::AuthenticationFailed));

    // Files wrapped under the old chain still open.
    coffer_sync::replace_content(&vault.ctx, &file.id, b"b", &new_pw)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_change_password_with_wrong_old_password_fails() {
    let vault = Vault::new().await;
    let err = change_password(
        &vault.ctx,
        &vault.user.id,
        &SecretString::from("guess"),
        &SecretString::from("new"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CofferError::AuthenticationFailed));
}

#[tokio::test]
async fn test_recovery_phrase_resets_password() {
    let vault = Vault::new().await;
    let reg = register_user(&vault.ctx, "forgetful@example.com", &password())
        .await
        .unwrap();
    let col = create_collection(&vault.ctx, &reg.user.id, "Docs", &password())
        .await
        .unwrap();

    let new_pw = SecretString::from("fresh start");
    recover_account(&vault.ctx, &reg.user.id, &reg.recovery_phrase, &new_pw)
        .await
        .unwrap();
    assert_eq!(
        collection_name(&vault.ctx, &col.id, &new_pw).await.unwrap(),
        "Docs"
    );

    let bogus = SecretString::from("abandon ".repeat(24).trim().to_string());
    assert!(recover_account(&vault.ctx, &reg.user.id, &bogus, &new_pw)
        .await
        .is_err());
}

#[tokio::test]
async fn test_shared_collection_key_matches_owner_key() {
    let vault = Vault::new().await;
    let friend_pw = SecretString::from("friend password");
    let friend = register_user(&vault.ctx, "friend@example.com", &friend_pw)
        .await
        .unwrap()
        .user;

    let err = open_shared_collection_key(&vault.ctx, &vault.collection.id, &friend.id, &friend_pw)
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::NotFound { kind: "collection member", .. }));

    let shared = share_collection(&vault.ctx, &vault.collection.id, &password(), &friend.id)
        .await
        .unwrap();
    assert_eq!(shared.members.len(), 1);

    let owner_key =
        open_shared_collection_key(&vault.ctx, &vault.collection.id, &vault.user.id, &password())
            .await
            .unwrap();
    let friend_key =
        open_shared_collection_key(&vault.ctx, &vault.collection.id, &friend.id, &friend_pw)
            .await
            .unwrap();
    assert_eq!(owner_key.as_bytes(), friend_key.as_bytes());

    // Sharing again replaces the membership instead of duplicating it.
    let again = share_collection(&vault.ctx, &vault.collection.id, &password(), &friend.id)
        .await
        .unwrap();
    assert_eq!(again.members.len(), 1);

    let err = share_collection(&vault.ctx, &vault.collection.id, &password(), &vault.user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::Validation { field: "recipient_id", .. }));
}

#[tokio::test]
async fn test_state_survives_reopening_json_store() {
    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    let gateway = MemoryGateway::new();

    let (user_id, collection_id, file_id) = {
        let ctx = VaultContext::new(
            open_store(&state_path).unwrap(),
            Arc::new(gateway.clone()),
            dir.path().join("data"),
            test_settings(),
        );
        let user = register_user(&ctx, "me@example.com", &password())
            .await
            .unwrap()
            .user;
        let col = create_collection(&ctx, &user.id, "Notes", &password())
            .await
            .unwrap();
        let source = dir.path().join("n.txt");
        std::fs::write(&source, b"persist me").unwrap();
        let file = coffer_sync::import_file(
            &ctx,
            &coffer_sync::ImportRequest::new(&col.id, &source),
            &password(),
        )
        .await
        .unwrap();
        (user.id, col.id, file.id)
    };

    let ctx = VaultContext::new(
        open_store(&state_path).unwrap(),
        Arc::new(gateway.clone()),
        dir.path().join("data"),
        test_settings(),
    );
    assert_eq!(ctx.repo.get_user(&user_id).unwrap().email, "me@example.com");
    assert_eq!(ctx.repo.files_in_collection(&collection_id).unwrap().len(), 1);

    let report = sync_collection(&ctx, &collection_id, &password(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.uploaded, 1);
    assert!(ctx.repo.get_file(&file_id).unwrap().remote_id.is_some());
}
