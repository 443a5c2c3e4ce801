/// Account lifecycle integration tests
///
/// Drives `AccountService` end to end over the in-memory store with a
/// recording notification gateway.
mod common;

use account_service::config::SecuritySettings;
use account_service::db::AccountStore;
use account_service::domain::{LockoutPolicy, TokenPurpose};
use account_service::error::AccountError;
use account_service::security::StrengthPolicy;
use chrono::Duration;
use common::{multi_tenant, Harness, RecordingNotifier, PASSWORD};
use std::sync::Arc;

#[tokio::test]
async fn test_create_then_verify_acme_alice() {
    let h = Harness::new(multi_tenant());

    let account = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();

    assert_eq!(account.tenant, "acme");
    assert!(!account.is_account_verified);
    assert_eq!(h.notifier.count("account_created"), 1);
    let key = account.verification_key().unwrap().to_string();
    assert!(!key.is_empty());

    assert!(!h.service.verify_account("not-the-key").await.unwrap());
    let unchanged = h.stored(account.id).await;
    assert!(!unchanged.is_account_verified);
    assert_eq!(unchanged.verification_key(), Some(key.as_str()));

    assert!(h.service.verify_account(&key).await.unwrap());
    let verified = h.stored(account.id).await;
    assert!(verified.is_account_verified);
    assert!(verified.verification.is_none());
    assert_eq!(h.notifier.count("account_verified"), 1);

    // Consumed
    assert!(!h.service.verify_account(&key).await.unwrap());
    assert_eq!(h.notifier.count("account_verified"), 1);
}

#[tokio::test]
async fn test_lockout_after_max_failures() {
    let h = Harness::new(multi_tenant());
    let account = h.verified_account("acme", "alice", "a@x.com").await;
    let lockout = Some(LockoutPolicy::new(5, Duration::minutes(5)));

    for _ in 0..4 {
        assert!(!h
            .service
            .authenticate(Some("acme"), "alice", "wrong", lockout)
            .await
            .unwrap());
        assert!(h.stored(account.id).await.is_login_allowed);
    }

    assert!(!h
        .service
        .authenticate(Some("acme"), "alice", "wrong", lockout)
        .await
        .unwrap());
    let locked = h.stored(account.id).await;
    assert!(!locked.is_login_allowed);
    assert_eq!(locked.failed_login_count, 5);

    assert!(!h
        .service
        .authenticate(Some("acme"), "alice", PASSWORD, lockout)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_lockout_lifts_after_window() {
    let h = Harness::new(multi_tenant());
    let account = h.verified_account("acme", "alice", "a@x.com").await;
    let lockout = Some(LockoutPolicy::new(3, Duration::milliseconds(200)));

    for _ in 0..3 {
        h.service
            .authenticate(Some("acme"), "alice", "wrong", lockout)
            .await
            .unwrap();
    }
    assert!(!h
        .service
        .authenticate(Some("acme"), "alice", PASSWORD, lockout)
        .await
        .unwrap());

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    assert!(h
        .service
        .authenticate(Some("acme"), "alice", PASSWORD, lockout)
        .await
        .unwrap());
    let stored = h.stored(account.id).await;
    assert!(stored.is_login_allowed);
    assert_eq!(stored.failed_login_count, 0);
    assert!(stored.last_login_at.is_some());
}

#[tokio::test]
async fn test_default_lockout_comes_from_settings() {
    let h = Harness::new(SecuritySettings {
        account_lockout_failed_login_attempts: 2,
        ..multi_tenant()
    });
    let account = h.verified_account("acme", "alice", "a@x.com").await;

    for _ in 0..2 {
        h.service
            .authenticate(Some("acme"), "alice", "wrong", None)
            .await
            .unwrap();
    }
    assert!(!h.stored(account.id).await.is_login_allowed);
}

#[tokio::test]
async fn test_unverified_account_cannot_login() {
    let h = Harness::new(multi_tenant());
    h.service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();

    assert!(!h
        .service
        .authenticate(Some("acme"), "alice", PASSWORD, None)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_change_password_with_wrong_old_password_keeps_hash() {
    let h = Harness::new(multi_tenant());
    let account = h.verified_account("acme", "alice", "a@x.com").await;

    assert!(!h
        .service
        .change_password(Some("acme"), "alice", "wrong", "NewPass456!", None)
        .await
        .unwrap());
    assert_eq!(h.stored(account.id).await.password_hash, account.password_hash);
    assert_eq!(h.notifier.count("password_changed"), 0);

    assert!(h
        .service
        .change_password(Some("acme"), "alice", PASSWORD, "NewPass456!", None)
        .await
        .unwrap());
    assert!(h
        .service
        .authenticate(Some("acme"), "alice", "NewPass456!", None)
        .await
        .unwrap());
    assert_eq!(h.notifier.count("password_changed"), 1);
}

#[tokio::test]
async fn test_weak_password_is_validation_error() {
    let h = Harness::new(multi_tenant());
    let service = h
        .service
        .clone()
        .with_password_policy(Arc::new(StrengthPolicy::default()));

    let err = service
        .create_account(Some("acme"), "alice", "weak", "a@x.com")
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(h.store.list_by_tenant("acme").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_rejects_blank_and_malformed_input() {
    let h = Harness::new(multi_tenant());

    for (tenant, username, password, email) in [
        (Some("acme"), "", PASSWORD, "a@x.com"),
        (Some("acme"), "alice", " ", "a@x.com"),
        (Some("acme"), "alice", PASSWORD, ""),
        (Some("acme"), "alice", PASSWORD, "not-an-email"),
        (Some(""), "alice", PASSWORD, "a@x.com"),
    ] {
        let err = h
            .service
            .create_account(tenant, username, password, email)
            .await
            .unwrap_err();
        assert!(err.is_validation(), "unexpected error: {err}");
    }
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_duplicate_username_or_email_is_conflict() {
    let h = Harness::new(multi_tenant());
    h.service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();

    let err = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "other@x.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::UsernameAlreadyExists));

    let err = h
        .service
        .create_account(Some("acme"), "bob", PASSWORD, "a@x.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::EmailAlreadyExists));

    assert_eq!(h.store.list_by_tenant("acme").await.unwrap().len(), 1);

    // Per-tenant scope by default
    h.service
        .create_account(Some("globex"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_global_username_scope_spans_tenants() {
    let h = Harness::new(SecuritySettings {
        usernames_unique_across_tenants: true,
        ..multi_tenant()
    });
    h.service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();

    let err = h
        .service
        .create_account(Some("globex"), "alice", PASSWORD, "a@globex.com")
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(h.store.list_by_tenant("globex").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_global_username_creates_commit_once() {
    let h = Arc::new(Harness::new(SecuritySettings {
        usernames_unique_across_tenants: true,
        ..multi_tenant()
    }));

    let tasks: Vec<_> = ["acme", "globex", "initech", "umbrella"]
        .into_iter()
        .map(|tenant| {
            let h = h.clone();
            tokio::spawn(async move {
                h.service
                    .create_account(Some(tenant), "alice", PASSWORD, &format!("alice@{tenant}.com"))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(err) => assert!(matches!(err, AccountError::UsernameAlreadyExists)),
        }
    }

    assert_eq!(created, 1);
    let mut holders = 0;
    for tenant in ["acme", "globex", "initech", "umbrella"] {
        holders += h.store.list_by_tenant(tenant).await.unwrap().len();
    }
    assert_eq!(holders, 1);
}

#[tokio::test]
async fn test_single_tenant_ignores_requested_tenant() {
    let h = Harness::new(SecuritySettings::default());

    let account = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();
    assert_eq!(account.tenant, "default");
    assert!(h
        .service
        .get_by_username(Some("globex"), "alice")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_email_change_refused_when_email_is_username() {
    let h = Harness::new(SecuritySettings {
        email_is_username: true,
        ..multi_tenant()
    });
    let account = h.verified_account("acme", "ignored", "a@x.com").await;
    assert_eq!(account.username, "a@x.com");

    assert!(!h
        .service
        .change_email_request(Some("acme"), "a@x.com", "b@x.com")
        .await
        .unwrap());

    let stored = h.stored(account.id).await;
    assert!(stored.verification.is_none());
    assert!(stored.unconfirmed_email.is_none());
}

#[tokio::test]
async fn test_email_change_round_trip() {
    let h = Harness::new(multi_tenant());
    let account = h.verified_account("acme", "alice", "a@x.com").await;

    assert!(h
        .service
        .change_email_request(Some("acme"), "alice", "b@x.com")
        .await
        .unwrap());
    let staged = h.stored(account.id).await;
    assert_eq!(staged.unconfirmed_email.as_deref(), Some("b@x.com"));
    assert_eq!(staged.pending_purpose(), Some(TokenPurpose::EmailChange));
    let key = staged.verification_key().unwrap().to_string();

    let requested = h.notifier.sent();
    let notice = requested
        .iter()
        .find(|n| n.kind == "email_change_requested")
        .unwrap();
    assert_eq!(notice.address, "b@x.com");

    assert!(!h
        .service
        .change_email_from_key(PASSWORD, &key, "c@x.com", None)
        .await
        .unwrap());
    assert!(h
        .service
        .change_email_from_key(PASSWORD, &key, "b@x.com", None)
        .await
        .unwrap());

    let changed = h.stored(account.id).await;
    assert_eq!(changed.email, "b@x.com");
    assert!(changed.unconfirmed_email.is_none());

    let notices = h.notifier.sent();
    let notice = notices.iter().find(|n| n.kind == "email_changed").unwrap();
    assert_eq!(notice.address, "a@x.com");
}

#[tokio::test]
async fn test_email_change_request_conflicts_with_existing_email() {
    let h = Harness::new(multi_tenant());
    h.verified_account("acme", "alice", "a@x.com").await;
    h.verified_account("acme", "bob", "b@x.com").await;

    let err = h
        .service
        .change_email_request(Some("acme"), "alice", "b@x.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::EmailAlreadyExists));

    let err = h
        .service
        .change_email_request(Some("acme"), "alice", "nope")
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_password_reset_round_trip_is_single_use() {
    let h = Harness::new(multi_tenant());
    let account = h.verified_account("acme", "alice", "a@x.com").await;

    assert!(h.service.reset_password(Some("acme"), "a@x.com").await.unwrap());
    assert_eq!(h.notifier.count("password_reset"), 1);
    let key = h
        .stored(account.id)
        .await
        .verification_key()
        .unwrap()
        .to_string();

    assert!(h
        .service
        .change_password_from_reset_key(&key, "Fresh789!")
        .await
        .unwrap());
    assert!(!h
        .service
        .change_password_from_reset_key(&key, "Other000!")
        .await
        .unwrap());

    assert!(h
        .service
        .authenticate(Some("acme"), "alice", "Fresh789!", None)
        .await
        .unwrap());
    assert_eq!(h.notifier.count("password_changed"), 1);
}

#[tokio::test]
async fn test_reset_for_unverified_account_resends_verification() {
    let h = Harness::new(multi_tenant());
    let account = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();

    assert!(h.service.reset_password(Some("acme"), "a@x.com").await.unwrap());
    assert_eq!(h.notifier.count("account_created"), 2);
    assert_eq!(h.notifier.count("password_reset"), 0);

    let stored = h.stored(account.id).await;
    assert_eq!(stored.pending_purpose(), Some(TokenPurpose::NewAccount));
    assert_ne!(stored.verification_key(), account.verification_key());
}

#[tokio::test]
async fn test_wrong_purpose_key_is_rejected() {
    let h = Harness::new(multi_tenant());
    let account = h.verified_account("acme", "alice", "a@x.com").await;

    h.service.reset_password(Some("acme"), "a@x.com").await.unwrap();
    let reset_key = h
        .stored(account.id)
        .await
        .verification_key()
        .unwrap()
        .to_string();

    assert!(!h.service.verify_account(&reset_key).await.unwrap());
    assert!(!h.service.cancel_new_account(&reset_key).await.unwrap());
    assert!(!h
        .service
        .change_email_from_key(PASSWORD, &reset_key, "b@x.com", None)
        .await
        .unwrap());
    // Rejected before the password check
    assert_eq!(h.stored(account.id).await.failed_login_count, 0);
}

#[tokio::test]
async fn test_expired_keys_behave_as_missing() {
    let h = Harness::new(SecuritySettings {
        verification_key_lifetime_secs: 0,
        ..multi_tenant()
    });
    let account = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();
    let key = account.verification_key().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(h.service.get_by_verification_key(&key).await.unwrap().is_none());
    assert!(!h.service.verify_account(&key).await.unwrap());
    assert!(!h.stored(account.id).await.is_account_verified);
}

#[tokio::test]
async fn test_expired_email_change_is_discarded() {
    let h = Harness::new(SecuritySettings {
        require_account_verification: false,
        verification_key_lifetime_secs: 0,
        ..multi_tenant()
    });
    let account = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();

    h.service
        .change_email_request(Some("acme"), "alice", "b@x.com")
        .await
        .unwrap();
    let key = h
        .stored(account.id)
        .await
        .verification_key()
        .unwrap()
        .to_string();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(!h
        .service
        .change_email_from_key(PASSWORD, &key, "b@x.com", None)
        .await
        .unwrap());
    let stored = h.stored(account.id).await;
    assert_eq!(stored.email, "a@x.com");
    assert!(stored.unconfirmed_email.is_none());
    assert!(stored.verification.is_none());
}

#[tokio::test]
async fn test_cancel_new_account_removes_record() {
    let h = Harness::new(SecuritySettings {
        allow_account_deletion: false,
        ..multi_tenant()
    });
    let account = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();
    let key = account.verification_key().unwrap().to_string();

    assert!(h.service.cancel_new_account(&key).await.unwrap());
    assert!(h.store.find_by_id(account.id).await.unwrap().is_none());
    assert_eq!(h.notifier.count("account_deleted"), 1);
    assert!(!h.service.cancel_new_account(&key).await.unwrap());
}

#[tokio::test]
async fn test_closed_account_rejects_every_operation() {
    let h = Harness::new(SecuritySettings {
        allow_account_deletion: false,
        ..multi_tenant()
    });
    let account = h.verified_account("acme", "alice", "a@x.com").await;
    h.service.reset_password(Some("acme"), "a@x.com").await.unwrap();

    assert!(h.service.delete_account(Some("acme"), "alice").await.unwrap());
    let closed = h.stored(account.id).await;
    assert!(closed.is_account_closed);
    assert!(!closed.is_login_allowed);
    assert!(closed.verification.is_none());

    assert!(!h.service.delete_account(Some("acme"), "alice").await.unwrap());
    assert!(!h
        .service
        .authenticate(Some("acme"), "alice", PASSWORD, None)
        .await
        .unwrap());
    assert!(!h.service.reset_password(Some("acme"), "a@x.com").await.unwrap());
    assert!(!h
        .service
        .change_email_request(Some("acme"), "alice", "b@x.com")
        .await
        .unwrap());
    assert!(!h
        .service
        .send_username_reminder(Some("acme"), "a@x.com")
        .await
        .unwrap());

    // Still holds its identity, but is not listed
    assert!(h.service.username_exists(Some("acme"), "alice").await.unwrap());
    assert!(h.service.list_accounts(Some("acme")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_with_deletion_allowed_removes_record() {
    let h = Harness::new(multi_tenant());
    let account = h.verified_account("acme", "alice", "a@x.com").await;

    assert!(h.service.delete_account(Some("acme"), "alice").await.unwrap());
    assert!(h.service.get_by_id(account.id).await.unwrap().is_none());
    assert!(!h.service.username_exists(Some("acme"), "alice").await.unwrap());
    assert_eq!(h.notifier.count("account_deleted"), 1);
}

#[tokio::test]
async fn test_notification_failure_keeps_committed_change() {
    let h = Harness::with_notifier(multi_tenant(), RecordingNotifier::failing());

    let account = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();
    let key = account.verification_key().unwrap().to_string();

    assert!(h.service.verify_account(&key).await.unwrap());
    assert!(h.stored(account.id).await.is_account_verified);
    assert_eq!(h.notifier.count("account_verified"), 1);
}

#[tokio::test]
async fn test_store_failure_propagates_without_notification() {
    let h = Harness::new(multi_tenant());
    let account = h
        .service
        .create_account(Some("acme"), "alice", PASSWORD, "a@x.com")
        .await
        .unwrap();
    let key = account.verification_key().unwrap().to_string();

    h.store.fail_writes(true);
    let err = h.service.verify_account(&key).await.unwrap_err();
    assert!(err.is_storage());
    assert_eq!(h.notifier.count("account_verified"), 0);

    h.store.fail_writes(false);
    assert!(!h.stored(account.id).await.is_account_verified);
}

#[tokio::test]
async fn test_username_reminder() {
    let h = Harness::new(multi_tenant());
    let account = h.verified_account("acme", "alice", "a@x.com").await;

    assert!(h
        .service
        .send_username_reminder(Some("acme"), "a@x.com")
        .await
        .unwrap());
    assert!(!h
        .service
        .send_username_reminder(Some("acme"), "nobody@x.com")
        .await
        .unwrap());

    let notices = h.notifier.sent();
    let reminder = notices
        .iter()
        .find(|n| n.kind == "username_reminder")
        .unwrap();
    assert_eq!(reminder.account_id, account.id);
}

#[tokio::test]
async fn test_lookups_and_listing() {
    let h = Harness::new(multi_tenant());
    let alice = h.verified_account("acme", "alice", "a@x.com").await;
    h.verified_account("acme", "bob", "b@x.com").await;
    h.verified_account("globex", "carol", "c@x.com").await;

    let by_email = h.service.get_by_email(Some("acme"), "a@x.com").await.unwrap();
    assert_eq!(by_email.map(|a| a.id), Some(alice.id));
    assert!(h.service.email_exists(Some("acme"), "b@x.com").await.unwrap());
    assert!(!h.service.email_exists(Some("globex"), "b@x.com").await.unwrap());

    let listed = h.service.list_accounts(Some("acme")).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(h.service.list_accounts(None).await.unwrap().is_empty());
}
