//! Circuit Breaker Integration Tests
//!
//! Failure-rate sampling, the insufficient-sample guard, the one-way
//! latch, and the audited clear operation.

use std::sync::Arc;

use cadenza::config::BreakerConfig;
use cadenza::core::{BreakerVerdict, CircuitBreaker};
use cadenza::domain::{Channel, Contact, ContactStatus, PipelineMode, Touch, TouchOutcome};
use cadenza::store::ContactStore;
use chrono::Utc;
use uuid::Uuid;

fn setup() -> (CircuitBreaker, Arc<ContactStore>) {
    let store = Arc::new(ContactStore::open_in_memory().unwrap());
    let breaker = CircuitBreaker::new(store.clone(), BreakerConfig::default());
    (breaker, store)
}

/// Insert the parent contact row that the `touches.contact_id` foreign
/// key requires, returning its id.
fn seed_contact(store: &ContactStore) -> Uuid {
    let id = Uuid::new_v4();
    let contact = Contact {
        id,
        business_name: "Fixture".to_string(),
        normalized_name: "fixture".to_string(),
        phone: Some("+15550000000".to_string()),
        email: None,
        website: None,
        source: "test".to_string(),
        niche: "test".to_string(),
        geography: "test".to_string(),
        status: ContactStatus::New,
        engagement_score: 0,
        strategy_hint: None,
        ghost_count: 0,
        consent_logged: false,
        next_touch_at: None,
        last_contacted_at: None,
        created_at: Utc::now(),
        version: 0,
    };
    store.insert_contact(&contact).unwrap();
    id
}

fn touch(store: &ContactStore, channel: Channel, outcome: TouchOutcome) {
    let contact_id = seed_contact(store);
    store
        .append_touch(&Touch::new(contact_id, channel, outcome))
        .unwrap();
}

#[test]
fn test_five_of_ten_failures_halts_pipeline() {
    let (breaker, store) = setup();

    for _ in 0..5 {
        touch(&store, Channel::Sms, TouchOutcome::Failed);
    }
    for _ in 0..5 {
        touch(&store, Channel::Email, TouchOutcome::Sent);
    }

    let verdict = breaker.check_and_trip().unwrap();
    assert!(matches!(verdict, BreakerVerdict::Tripped { failures: 5, .. }));
    assert_eq!(store.mode().unwrap(), PipelineMode::Halted);
}

#[test]
fn test_four_of_ten_failures_keeps_working() {
    let (breaker, store) = setup();

    for _ in 0..4 {
        touch(&store, Channel::Sms, TouchOutcome::Failed);
    }
    for _ in 0..6 {
        touch(&store, Channel::Sms, TouchOutcome::Sent);
    }

    let verdict = breaker.check_and_trip().unwrap();
    assert!(matches!(verdict, BreakerVerdict::Healthy { failures: 4, .. }));
    assert_eq!(store.mode().unwrap(), PipelineMode::Working);
}

#[test]
fn test_fewer_than_ten_touches_never_trips() {
    let (breaker, store) = setup();

    // 100% failure rate, but only nine data points
    for _ in 0..9 {
        touch(&store, Channel::Sms, TouchOutcome::Failed);
    }

    let verdict = breaker.check_and_trip().unwrap();
    assert_eq!(verdict, BreakerVerdict::InsufficientSample { sampled: 9 });
    assert_eq!(store.mode().unwrap(), PipelineMode::Working);
}

#[test]
fn test_window_only_covers_most_recent_touches() {
    let (breaker, store) = setup();

    // Ten early failures, then ten clean sends: the window has moved on
    for _ in 0..10 {
        touch(&store, Channel::Sms, TouchOutcome::Failed);
    }
    for _ in 0..10 {
        touch(&store, Channel::Sms, TouchOutcome::Sent);
    }

    let verdict = breaker.check_and_trip().unwrap();
    assert!(matches!(verdict, BreakerVerdict::Healthy { failures: 0, .. }));
}

#[test]
fn test_passive_channel_invisible_to_breaker() {
    let (breaker, store) = setup();

    // Call-status rows are low-signal logging; they must neither fill
    // the sample nor count as failures.
    for _ in 0..10 {
        touch(&store, Channel::CallStatus, TouchOutcome::Failed);
    }
    for _ in 0..4 {
        touch(&store, Channel::Sms, TouchOutcome::Failed);
    }
    for _ in 0..6 {
        touch(&store, Channel::Sms, TouchOutcome::Sent);
    }

    let verdict = breaker.check_and_trip().unwrap();
    assert!(matches!(verdict, BreakerVerdict::Healthy { failures: 4, .. }));
    assert_eq!(store.mode().unwrap(), PipelineMode::Working);
}

#[test]
fn test_latch_stays_shut_until_cleared() {
    let (breaker, store) = setup();

    for _ in 0..10 {
        touch(&store, Channel::Sms, TouchOutcome::Failed);
    }
    breaker.check_and_trip().unwrap();
    assert!(breaker.is_halted().unwrap());

    // Healthy traffic does not reopen the latch
    for _ in 0..20 {
        touch(&store, Channel::Sms, TouchOutcome::Sent);
    }
    assert_eq!(
        breaker.check_and_trip().unwrap(),
        BreakerVerdict::AlreadyHalted
    );
    assert!(breaker.is_halted().unwrap());
}

#[test]
fn test_clear_is_explicit_and_audited() {
    let (breaker, store) = setup();

    breaker.trip("manual halt for maintenance").unwrap();
    assert_eq!(store.mode().unwrap(), PipelineMode::Halted);
    assert_eq!(
        store.get_state("halted_reason").unwrap().as_deref(),
        Some("manual halt for maintenance")
    );

    breaker.clear("maintenance finished").unwrap();
    assert_eq!(store.mode().unwrap(), PipelineMode::Working);
    assert_eq!(
        store.get_state("resume_reason").unwrap().as_deref(),
        Some("maintenance finished")
    );
}

#[test]
fn test_custom_threshold_config() {
    let store = Arc::new(ContactStore::open_in_memory().unwrap());
    let breaker = CircuitBreaker::new(
        store.clone(),
        BreakerConfig {
            sample_size: 4,
            failure_threshold: 2,
        },
    );

    touch(&store, Channel::Sms, TouchOutcome::Sent);
    touch(&store, Channel::Sms, TouchOutcome::Failed);
    touch(&store, Channel::Sms, TouchOutcome::Sent);
    touch(&store, Channel::Sms, TouchOutcome::Failed);

    let verdict = breaker.check_and_trip().unwrap();
    assert!(matches!(verdict, BreakerVerdict::Tripped { failures: 2, .. }));
}
