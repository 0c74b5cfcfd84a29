mod common;

use common::{api, session_name, test_config, FakeHub};
use sehub_lib::error::ApiErrorKind;
use sehub_reconcile::reconcile::ManualClock;
use sehub_softether::softether::{AccountPair, NewAccount, RuleAction};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

// ── Accounts ────────────────────────────────────────────────────────

#[tokio::test]
async fn account_lifecycle_through_the_api() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let hub = FakeHub::with(&["bob"], &["bob"]);
    let api = api(hub.clone(), &config, Arc::new(ManualClock::new(0)));

    let created = assert_ok!(
        api.create_account(&NewAccount {
            name: "alice".into(),
            password: "hunter2".into(),
            group: Some("staff".into()),
        })
        .await
    );
    assert_eq!(created.group.as_deref(), Some("staff"));
    assert_eq!(hub.account_names(), vec!["bob", "alice"]);

    let accounts = assert_ok!(api.list_accounts().await);
    let online: Vec<(&str, bool)> = accounts.iter().map(|a| (a.name.as_str(), a.online)).collect();
    assert_eq!(online, vec![("bob", true), ("alice", false)]);

    let detail = assert_ok!(api.get_account_detail("alice").await);
    assert_eq!(detail.num_logins, Some(3));
    assert!(detail.created_at.is_some());

    assert_ok!(api.set_password("alice", "correct horse").await);

    let profiles = tmp.path().join("configs");
    std::fs::create_dir_all(&profiles).unwrap();
    std::fs::write(profiles.join("alice.ovpn"), "client\n").unwrap();
    assert_ok!(api.delete_account("alice").await);
    assert!(!profiles.join("alice.ovpn").exists());
    assert_eq!(hub.account_names(), vec!["bob"]);

    // No password ever reaches a log line.
    assert!(hub.commands().iter().all(|c| !c.contains("hunter2") && !c.contains("horse")));
}

#[tokio::test]
async fn missing_account_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let hub = FakeHub::with(&[], &[]);
    let api = api(hub, &test_config(tmp.path()), Arc::new(ManualClock::new(0)));

    let err = assert_err!(api.get_account_detail("ghost").await);
    assert_eq!(err.kind, ApiErrorKind::NotFound);
    let err = assert_err!(api.delete_account("ghost").await);
    assert_eq!(err.kind, ApiErrorKind::NotFound);
    let err = assert_err!(api.delete_account("bad name").await);
    assert_eq!(err.kind, ApiErrorKind::InvalidInput);
}

// ── Sessions ────────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_all_skips_securenat() {
    let tmp = tempfile::tempdir().unwrap();
    let hub = FakeHub::with(&["alice", "bob"], &["alice", "bob"]);
    let api = api(hub.clone(), &test_config(tmp.path()), Arc::new(ManualClock::new(0)));

    let sessions = assert_ok!(api.list_sessions().await);
    assert_eq!(sessions.len(), 3);

    let outcome = assert_ok!(api.disconnect_all_sessions().await);
    assert_eq!(outcome.succeeded, vec![session_name("alice"), session_name("bob")]);
    assert!(outcome.failed.is_empty());
    assert!(hub.online.lock().unwrap().is_empty());

    let err = assert_err!(api.disconnect_session(&session_name("alice")).await);
    assert_eq!(err.kind, ApiErrorKind::NotFound);
}

// ── Access policy ───────────────────────────────────────────────────

#[tokio::test]
async fn pair_policy_creates_four_ordered_rules() {
    let tmp = tempfile::tempdir().unwrap();
    let hub = FakeHub::with(&["alice", "alice-mt"], &[]);
    let api = api(hub.clone(), &test_config(tmp.path()), Arc::new(ManualClock::new(0)));

    let specs = assert_ok!(api.apply_access_policy(&AccountPair::new("alice", "alice-mt")).await);
    assert_eq!(specs.len(), 4);

    let rules = assert_ok!(api.list_access_rules().await);
    assert_eq!(rules.len(), 4);
    let allow_max = rules
        .iter()
        .filter(|r| r.action == Some(RuleAction::Allow))
        .filter_map(|r| r.priority)
        .max()
        .unwrap();
    let deny_min = rules
        .iter()
        .filter(|r| r.action == Some(RuleAction::Deny))
        .filter_map(|r| r.priority)
        .min()
        .unwrap();
    assert!(allow_max < deny_min);
    assert_eq!(rules[0].source.as_deref(), Some("alice"));
    assert_eq!(rules[0].destination.as_deref(), Some("alice-mt"));
    assert_eq!(rules[3].source.as_deref(), Some("alice-mt"));
    assert_eq!(rules[3].destination, None);
}

#[tokio::test]
async fn registered_pair_drives_policy_and_clear() {
    let tmp = tempfile::tempdir().unwrap();
    let hub = FakeHub::with(&["carol", "carol-mt", "dave", "dave-router"], &[]);
    let api = api(hub.clone(), &test_config(tmp.path()), Arc::new(ManualClock::new(0)));

    let err = assert_err!(api.apply_access_policy_for("carol").await);
    assert_eq!(err.kind, ApiErrorKind::NotFound);

    assert_ok!(api.register_pair("carol", None, Some("10.8.0.2".into())).await);
    assert_ok!(api.register_pair("dave", Some("dave-router".into()), None).await);
    assert_ok!(api.apply_access_policy_for("carol").await);
    assert_ok!(api.apply_access_policy_for("Dave").await);
    assert_eq!(hub.rules.lock().unwrap().len(), 8);
    assert!(hub.rules.lock().unwrap().iter().any(|r| r.src == "carol-mt"));
    assert!(hub.rules.lock().unwrap().iter().any(|r| r.src == "dave-router"));

    let outcome = assert_ok!(api.clear_access_rules_by_name("CAROL").await);
    assert_eq!(outcome.succeeded.len(), 4);
    assert!(outcome.failed.is_empty());
    assert!(hub.rules.lock().unwrap().iter().all(|r| r.src.starts_with("dave")));
    assert_eq!(assert_ok!(api.list_pairs().await).len(), 2);
}

// ── Broker behaviour ────────────────────────────────────────────────

#[tokio::test]
async fn transient_failures_are_absorbed() {
    let tmp = tempfile::tempdir().unwrap();
    let hub = FakeHub::with(&["alice"], &[]);
    hub.busy_remaining.store(2, Ordering::SeqCst);
    let api = api(hub.clone(), &test_config(tmp.path()), Arc::new(ManualClock::new(0)));

    let accounts = assert_ok!(api.list_accounts().await);
    assert_eq!(accounts.len(), 1);
    assert_eq!(api.broker_stats().retries, 2);
}

#[tokio::test]
async fn exhausted_retries_surface_once_as_transient() {
    let tmp = tempfile::tempdir().unwrap();
    let hub = FakeHub::with(&["alice"], &[]);
    hub.busy_remaining.store(100, Ordering::SeqCst);
    let api = api(hub.clone(), &test_config(tmp.path()), Arc::new(ManualClock::new(0)));

    let err = assert_err!(api.set_password("alice", "pw").await);
    assert_eq!(err.kind, ApiErrorKind::TransientExternal);
    // One attempt plus two retries.
    assert_eq!(hub.commands().len(), 3);
}

#[tokio::test]
async fn concurrent_callers_never_overlap_in_the_hub() {
    let tmp = tempfile::tempdir().unwrap();
    let names: Vec<String> = (0..8).map(|i| format!("user{}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let hub = FakeHub::with(&refs, &[]);
    hub.latency_ms.store(5, Ordering::SeqCst);
    let api = Arc::new(api(hub.clone(), &test_config(tmp.path()), Arc::new(ManualClock::new(0))));

    let calls: Vec<_> = names
        .iter()
        .map(|name| {
            let api = api.clone();
            let name = name.clone();
            tokio::spawn(async move { api.set_password(&name, "pw").await })
        })
        .collect();
    for call in calls {
        assert_ok!(call.await.unwrap());
    }

    assert_eq!(hub.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(hub.commands().len(), 8);
    let stats = api.broker_stats();
    assert_eq!(stats.completed, 8);
    assert_eq!(stats.queue_depth, 0);
}
