//! Self-Healing Requeue Integration Tests
//!
//! The single backward edge: ghosts cycle back into the dispatchable
//! pool with a retry delay until the ghost-count ceiling, then they are
//! trashed for good. True terminal states are never touched.

use std::sync::Arc;

use cadenza::config::RequeueConfig;
use cadenza::core::RequeueWorker;
use cadenza::domain::{normalize_name, Contact, ContactStatus};
use cadenza::store::ContactStore;
use chrono::{Duration, Utc};
use uuid::Uuid;

fn contact_in(status: ContactStatus, ghost_count: i64, silent_days: i64) -> Contact {
    let name = format!("Biz {}", Uuid::new_v4());
    Contact {
        id: Uuid::new_v4(),
        normalized_name: normalize_name(&name),
        business_name: name,
        phone: Some("+15550001111".to_string()),
        email: Some("owner@biz.test".to_string()),
        website: Some("https://biz.test".to_string()),
        source: "test".to_string(),
        niche: "plumber".to_string(),
        geography: "austin".to_string(),
        status,
        engagement_score: 5,
        strategy_hint: Some("pitch".to_string()),
        ghost_count,
        consent_logged: true,
        next_touch_at: None,
        last_contacted_at: Some(Utc::now() - Duration::days(silent_days)),
        created_at: Utc::now() - Duration::days(silent_days + 1),
        version: 0,
    }
}

fn setup() -> (RequeueWorker, Arc<ContactStore>) {
    let store = Arc::new(ContactStore::open_in_memory().unwrap());
    let worker = RequeueWorker::new(store.clone(), RequeueConfig::default());
    (worker, store)
}

#[test]
fn test_ghost_cycles_back_with_retry_delay() {
    let (worker, store) = setup();
    let contact = contact_in(ContactStatus::OutreachSent, 0, 20);
    store.insert_contact(&contact).unwrap();

    let now = Utc::now();
    let summary = worker.run_pass(now).unwrap();
    assert_eq!(summary.requeued, 1);

    let loaded = store.get_contact(contact.id).unwrap();
    assert_eq!(loaded.status, ContactStatus::ResearchDone);
    assert_eq!(loaded.ghost_count, 1);

    // The retry delay defers the next dispatch
    let retry_at = loaded.next_touch_at.unwrap();
    assert!(retry_at > now + Duration::days(2));
    assert!(store.dispatchable_batch(10, now).unwrap().is_empty());
    assert_eq!(
        store
            .dispatchable_batch(10, now + Duration::days(4))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_ghost_count_above_ceiling_always_trashes() {
    let (worker, store) = setup();

    // At and above the ceiling: every one resolves to trashed,
    // never back to a dispatchable state.
    for ghost_count in 2..5 {
        let contact = contact_in(ContactStatus::OutreachSent, ghost_count, 20);
        store.insert_contact(&contact).unwrap();

        worker.run_pass(Utc::now()).unwrap();

        let loaded = store.get_contact(contact.id).unwrap();
        assert_eq!(
            loaded.status,
            ContactStatus::Trashed,
            "ghost_count {} must resolve to trashed",
            ghost_count
        );
    }
}

#[test]
fn test_nurture_states_are_requeue_eligible() {
    let (worker, store) = setup();
    let contact = contact_in(ContactStatus::NurtureDay(2), 1, 20);
    store.insert_contact(&contact).unwrap();

    let summary = worker.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.requeued, 1);

    let loaded = store.get_contact(contact.id).unwrap();
    assert_eq!(loaded.status, ContactStatus::ResearchDone);
    assert_eq!(loaded.ghost_count, 2);
}

#[test]
fn test_terminal_states_never_requeued() {
    let (worker, store) = setup();

    for status in [
        ContactStatus::Customer,
        ContactStatus::BadData,
        ContactStatus::Trashed,
    ] {
        let contact = contact_in(status, 0, 30);
        store.insert_contact(&contact).unwrap();
    }

    let summary = worker.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.examined, 0);
    assert_eq!(summary.requeued, 0);
    assert_eq!(summary.trashed, 0);
}

#[test]
fn test_contacts_inside_observation_window_untouched() {
    let (worker, store) = setup();
    let contact = contact_in(ContactStatus::OutreachSent, 0, 5);
    store.insert_contact(&contact).unwrap();

    let summary = worker.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.examined, 0);

    let loaded = store.get_contact(contact.id).unwrap();
    assert_eq!(loaded.status, ContactStatus::OutreachSent);
}

#[test]
fn test_batch_cap_bounds_one_pass() {
    let store = Arc::new(ContactStore::open_in_memory().unwrap());
    let worker = RequeueWorker::new(
        store.clone(),
        RequeueConfig {
            batch_cap: 3,
            ..Default::default()
        },
    );

    for _ in 0..5 {
        store
            .insert_contact(&contact_in(ContactStatus::OutreachSent, 0, 20))
            .unwrap();
    }

    let summary = worker.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.examined, 3);
    assert_eq!(summary.requeued, 3);
}
