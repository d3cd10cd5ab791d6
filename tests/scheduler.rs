//! Cadence Scheduler Integration Tests
//!
//! Tick-modulo fan-out, the halted-mode heartbeat-only rule, branch
//! isolation, mid-tick breaker trips, and the full funnel end to end.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use cadenza::config::{
    BreakerConfig, CadenceConfig, DiscoveryConfig, DispatchConfig, RequeueConfig,
};
use cadenza::core::{CadenceScheduler, ChannelDispatcher, CircuitBreaker, RequeueWorker};
use cadenza::discovery::DiscoveryEngine;
use cadenza::domain::{
    normalize_name, Channel, Contact, ContactStatus, PipelineMode, Touch, TouchOutcome,
};
use cadenza::providers::{
    ChannelProviders, DirectoryPage, DirectoryProvider, DirectoryResult, DispatchReceipt,
    Messenger,
};
use cadenza::store::ContactStore;
use chrono::Utc;
use uuid::Uuid;

struct MockMessenger {
    channel: Channel,
    fail: bool,
    calls: Mutex<usize>,
}

impl MockMessenger {
    fn new(channel: Channel, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail,
            calls: Mutex::new(0),
        })
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    fn name(&self) -> &str {
        "mock"
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _identifier: &str, _message: &str) -> Result<DispatchReceipt> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            anyhow::bail!("provider unreachable");
        }
        Ok(DispatchReceipt::accepted("mock-ref"))
    }
}

struct MockDirectory {
    results: Vec<DirectoryResult>,
}

#[async_trait]
impl DirectoryProvider for MockDirectory {
    fn name(&self) -> &str {
        "mock-directory"
    }

    async fn search(
        &self,
        _niche: &str,
        _geography: &str,
        _page_token: Option<&str>,
    ) -> Result<DirectoryPage> {
        Ok(DirectoryPage {
            results: self.results.clone(),
            next_page_token: None,
        })
    }
}

struct Fixture {
    store: Arc<ContactStore>,
    scheduler: CadenceScheduler,
    sms: Arc<MockMessenger>,
    email: Arc<MockMessenger>,
    voice: Arc<MockMessenger>,
}

fn fixture(messengers_fail: bool, directory_results: Vec<DirectoryResult>) -> Fixture {
    let store = Arc::new(ContactStore::open_in_memory().unwrap());

    let sms = MockMessenger::new(Channel::Sms, messengers_fail);
    let email = MockMessenger::new(Channel::Email, messengers_fail);
    let voice = MockMessenger::new(Channel::Voice, messengers_fail);

    let providers = ChannelProviders {
        sms: sms.clone(),
        email: email.clone(),
        voice: voice.clone(),
    };

    let dispatch_cfg = DispatchConfig {
        // Window open around the clock so tests are independent of
        // wall-clock time; business-day gating is covered elsewhere.
        sms_window_start_hour: 0,
        sms_window_end_hour: 24,
        ..Default::default()
    };

    let breaker = CircuitBreaker::new(store.clone(), BreakerConfig::default());
    let dispatcher = Arc::new(ChannelDispatcher::new(
        store.clone(),
        providers,
        dispatch_cfg.clone(),
    ));
    let discovery = DiscoveryEngine::new(
        store.clone(),
        Arc::new(MockDirectory {
            results: directory_results,
        }),
        DiscoveryConfig {
            niches: vec!["plumber".to_string()],
            geographies: vec!["austin".to_string()],
            queries_per_run: 1,
            ..Default::default()
        },
    );
    let requeue = RequeueWorker::new(store.clone(), RequeueConfig::default());

    let scheduler = CadenceScheduler::new(
        store.clone(),
        breaker,
        dispatcher,
        discovery,
        requeue,
        CadenceConfig::default(),
        dispatch_cfg.research_batch_cap,
    );

    Fixture {
        store,
        scheduler,
        sms,
        email,
        voice,
    }
}

fn seed_touches(store: &ContactStore, failed: usize, sent: usize) {
    let mut append = |outcome: TouchOutcome| {
        // The touches.contact_id foreign key requires a parent contact row.
        let contact = seeded_contact(ContactStatus::New, None, None);
        store.insert_contact(&contact).unwrap();
        store
            .append_touch(&Touch::new(contact.id, Channel::Sms, outcome))
            .unwrap();
    };
    for _ in 0..failed {
        append(TouchOutcome::Failed);
    }
    for _ in 0..sent {
        append(TouchOutcome::Sent);
    }
}

fn seeded_contact(status: ContactStatus, email: Option<&str>, website: Option<&str>) -> Contact {
    let name = format!("Biz {}", Uuid::new_v4());
    Contact {
        id: Uuid::new_v4(),
        normalized_name: normalize_name(&name),
        business_name: name,
        phone: None,
        email: email.map(String::from),
        website: website.map(String::from),
        source: "test".to_string(),
        niche: "plumber".to_string(),
        geography: "austin".to_string(),
        status,
        engagement_score: 5,
        strategy_hint: Some("pitch".to_string()),
        ghost_count: 0,
        consent_logged: true,
        next_touch_at: None,
        last_contacted_at: None,
        created_at: Utc::now(),
        version: 0,
    }
}

#[tokio::test]
async fn test_anomalous_failure_rate_leaves_only_heartbeat_running() {
    let f = fixture(false, Vec::new());

    // 6 of the last 10 non-passive touches failed
    seed_touches(&f.store, 6, 4);

    // A contact that would otherwise be dispatched
    f.store
        .insert_contact(&seeded_contact(
            ContactStatus::ResearchDone,
            Some("owner@biz.test"),
            Some("https://biz.test"),
        ))
        .unwrap();

    // Tick 30 is due for every job type
    let report = f.scheduler.run_tick(30).await;

    assert_eq!(report.mode, PipelineMode::Halted);
    assert_eq!(report.jobs_run, vec!["heartbeat"]);

    // No dispatch or research sub-invocations were issued
    assert_eq!(f.sms.call_count(), 0);
    assert_eq!(f.email.call_count(), 0);
    assert_eq!(f.voice.call_count(), 0);
    assert_eq!(f.store.touch_count().unwrap(), 10);

    let contact = &f.store.contacts_with_status(ContactStatus::ResearchDone, 10).unwrap();
    assert_eq!(contact.len(), 1);

    // The heartbeat still reached the health log
    assert_eq!(f.store.heartbeat_count().unwrap(), 1);
}

#[tokio::test]
async fn test_provider_failures_do_not_break_other_branches() {
    let f = fixture(true, Vec::new());

    // Too little history for the breaker to judge
    seed_touches(&f.store, 0, 5);

    f.store
        .insert_contact(&seeded_contact(
            ContactStatus::ResearchDone,
            Some("owner@biz.test"),
            Some("https://biz.test"),
        ))
        .unwrap();

    let report = f.scheduler.run_tick(30).await;

    // The message branch ran (and recorded its failure as a touch);
    // every other branch still ran in the same tick.
    assert!(report.ran("research"));
    assert!(report.ran("message"));
    assert!(report.ran("voice"));
    assert!(report.ran("discovery"));
    assert!(report.ran("requeue"));
    assert!(report.ran("heartbeat"));
    assert!(report.errors.is_empty());

    assert_eq!(f.store.touch_count().unwrap(), 6);
    assert_eq!(report.mode, PipelineMode::Working);
}

#[tokio::test]
async fn test_mid_tick_trip_skips_remaining_dispatch_work() {
    let f = fixture(true, Vec::new());

    // 9 historical touches: one more failure fills the window with
    // 5 failures and trips the breaker mid-tick.
    seed_touches(&f.store, 4, 5);

    f.store
        .insert_contact(&seeded_contact(
            ContactStatus::ResearchDone,
            Some("owner@biz.test"),
            Some("https://biz.test"),
        ))
        .unwrap();

    let report = f.scheduler.run_tick(30).await;

    assert!(report.ran("message"));
    assert_eq!(report.mode, PipelineMode::Halted);

    // Voice, discovery, and requeue were all due but skipped
    assert!(!report.ran("voice"));
    assert!(!report.ran("discovery"));
    assert!(!report.ran("requeue"));
    assert!(report.ran("heartbeat"));
    assert_eq!(f.voice.call_count(), 0);
}

#[tokio::test]
async fn test_research_pass_validates_and_promotes() {
    let f = fixture(false, Vec::new());

    let unreachable = seeded_contact(ContactStatus::New, None, Some("https://a.test"));
    let no_website = seeded_contact(ContactStatus::New, Some("a@b.test"), None);
    let ready = seeded_contact(ContactStatus::New, Some("c@d.test"), Some("https://c.test"));
    let mut hinted = seeded_contact(
        ContactStatus::Researching,
        Some("e@f.test"),
        Some("https://e.test"),
    );
    hinted.strategy_hint = Some("lead with the referral angle".to_string());
    let mut waiting = seeded_contact(
        ContactStatus::Researching,
        Some("g@h.test"),
        Some("https://g.test"),
    );
    waiting.strategy_hint = None;

    for c in [&unreachable, &no_website, &ready, &hinted, &waiting] {
        f.store.insert_contact(c).unwrap();
    }

    let summary = f.scheduler.run_research_pass().unwrap();
    assert_eq!(summary.parked, 2);
    assert_eq!(summary.started, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.waiting, 1);

    assert_eq!(
        f.store.get_contact(unreachable.id).unwrap().status,
        ContactStatus::NoContactInfo
    );
    assert_eq!(
        f.store.get_contact(no_website.id).unwrap().status,
        ContactStatus::SkippedNoUrl
    );
    assert_eq!(
        f.store.get_contact(ready.id).unwrap().status,
        ContactStatus::Researching
    );
    assert_eq!(
        f.store.get_contact(hinted.id).unwrap().status,
        ContactStatus::ResearchDone
    );
    assert_eq!(
        f.store.get_contact(waiting.id).unwrap().status,
        ContactStatus::Researching
    );
}

#[tokio::test]
async fn test_full_funnel_discovery_to_dispatch() {
    // Listing with a website but no phone: enrichment derives the
    // email, so dispatch is independent of the SMS window.
    let f = fixture(
        false,
        vec![DirectoryResult {
            name: "Funnel Test Plumbing".to_string(),
            phone: None,
            website: Some("https://funneltest.com".to_string()),
            address: None,
            rating: Some(4.4),
            review_count: Some(25),
        }],
    );

    // Tick 0: everything is due; discovery inserts the contact
    f.scheduler.run_tick(0).await;
    let inserted = f.store.contacts_with_status(ContactStatus::New, 10).unwrap();
    assert_eq!(inserted.len(), 1);
    let id = inserted[0].id;
    assert_eq!(inserted[0].email.as_deref(), Some("info@funneltest.com"));

    // Tick 1: research validates the new contact
    f.scheduler.run_tick(1).await;
    assert_eq!(
        f.store.get_contact(id).unwrap().status,
        ContactStatus::Researching
    );

    // The external generator attaches its strategy hint
    f.store
        .set_strategy_hint(id, "lead with the emergency call-out angle")
        .unwrap();

    // Tick 2: research promotes to dispatch-eligible
    f.scheduler.run_tick(2).await;
    assert_eq!(
        f.store.get_contact(id).unwrap().status,
        ContactStatus::ResearchDone
    );

    // Ticks 3..9: message pass not due; nothing dispatched
    for tick in 3..10 {
        f.scheduler.run_tick(tick).await;
    }
    assert_eq!(f.email.call_count(), 0);

    // Tick 10: message pass dispatches over email
    let report = f.scheduler.run_tick(10).await;
    assert!(report.ran("message"));

    let contact = f.store.get_contact(id).unwrap();
    assert_eq!(contact.status, ContactStatus::OutreachSent);
    assert!(contact.last_contacted_at.is_some());

    let touches = f.store.touches_for_contact(id).unwrap();
    assert_eq!(touches.len(), 1);
    assert_eq!(touches[0].channel, Channel::Email);
    assert_eq!(touches[0].outcome, TouchOutcome::Sent);
    assert_eq!(f.email.call_count(), 1);
}

#[tokio::test]
async fn test_tick_stamps_run_marker() {
    let f = fixture(false, Vec::new());

    f.scheduler.run_tick(7).await;
    assert_eq!(
        f.store.get_state("last_tick").unwrap().as_deref(),
        Some("7")
    );

    f.scheduler.run_tick(8).await;
    assert_eq!(
        f.store.get_state("last_tick").unwrap().as_deref(),
        Some("8")
    );
}
