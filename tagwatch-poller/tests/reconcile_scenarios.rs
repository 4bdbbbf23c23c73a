//! End-to-end reconcile cycles against in-memory collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tagwatch_core::{Account, AccountName, AccountSnapshot, ObservedImage};
use tagwatch_poller::{
    run_cycle, AccountOutcome, CacheStore, CancelFlag, CycleOptions, CycleOutcome, ImageEvent,
    ImageTagMonitor, KeyCodec, MemoryCacheStore, MigrationStatus, NotificationSink, PollMode,
    PollScope, RemoteSource, SinkError, SourceError, StaticAccountRegistry,
};

/// Source whose listing per account can be swapped between cycles.
#[derive(Default)]
struct ScriptedSource {
    listings: Mutex<HashMap<String, Result<Vec<Option<ObservedImage>>, String>>>,
    calls: AtomicUsize,
    cancel_on_call: Mutex<Option<CancelFlag>>,
}

impl ScriptedSource {
    fn set(&self, account: &str, images: Vec<Option<ObservedImage>>) {
        self.listings
            .lock()
            .unwrap()
            .insert(account.to_string(), Ok(images));
    }

    fn fail(&self, account: &str) {
        self.listings
            .lock()
            .unwrap()
            .insert(account.to_string(), Err("connection refused".to_string()));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteSource for ScriptedSource {
    fn list_images(&self, account: &Account) -> Result<Vec<Option<ObservedImage>>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = self.cancel_on_call.lock().unwrap().as_ref() {
            flag.cancel();
        }
        match self.listings.lock().unwrap().get(account.name.as_str()) {
            Some(Ok(images)) => Ok(images.clone()),
            Some(Err(message)) => Err(SourceError::Http {
                url: format!("https://{}/v2/_catalog", account.registry),
                message: message.clone(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<ImageEvent>>);

impl RecordingSink {
    fn events(&self) -> Vec<ImageEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn post_event(&self, event: &ImageEvent) -> Result<(), SinkError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Flag(AtomicBool);

impl MigrationStatus for Flag {
    fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Harness {
    source: Arc<ScriptedSource>,
    cache: Arc<MemoryCacheStore>,
    sink: Arc<RecordingSink>,
    monitor: ImageTagMonitor,
    registry: StaticAccountRegistry,
    codec: KeyCodec,
}

impl Harness {
    fn new(accounts: Vec<Account>, default_threshold: u32) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let codec = KeyCodec::new("tagwatch");
        let source = Arc::new(ScriptedSource::default());
        let cache = Arc::new(MemoryCacheStore::new(codec.clone()));
        let sink = Arc::new(RecordingSink::default());
        let monitor = ImageTagMonitor::new(
            source.clone(),
            cache.clone(),
            codec.clone(),
            default_threshold,
        )
        .with_sink(Some(sink.clone() as Arc<dyn NotificationSink>));
        Self {
            source,
            cache,
            sink,
            monitor,
            registry: StaticAccountRegistry::new(AccountSnapshot::new(accounts)),
            codec,
        }
    }

    fn cycle(&mut self, options: CycleOptions) -> tagwatch_poller::CycleReport {
        self.cycle_with(options, None, &CancelFlag::new())
    }

    fn cycle_with(
        &mut self,
        options: CycleOptions,
        migration: Option<&dyn MigrationStatus>,
        cancel: &CancelFlag,
    ) -> tagwatch_poller::CycleReport {
        run_cycle(
            &self.monitor,
            &mut self.registry,
            migration,
            &PollScope::All,
            options,
            cancel,
        )
        .expect("cycle")
    }

    fn digest(&self, account: &str, tag: &str) -> Option<String> {
        self.cache
            .last_digest(&AccountName::from(account), "app", tag)
            .expect("cache read")
    }
}

fn image(account: &str, tag: &str, digest: Option<&str>) -> Option<ObservedImage> {
    Some(ObservedImage {
        account: AccountName::from(account),
        registry: "registry.example.com".to_string(),
        repository: "app".to_string(),
        tag: tag.to_string(),
        digest: digest.map(str::to_string),
    })
}

fn account(name: &str) -> Account {
    Account::new(name, "registry.example.com")
}

fn notify() -> CycleOptions {
    CycleOptions {
        mode: PollMode::Notify,
        enforce_threshold: true,
    }
}

#[test]
fn first_poll_commits_without_notifying() {
    let mut h = Harness::new(vec![account("acme")], 1000);
    h.source.set("acme", vec![image("acme", "v1", Some("sha1"))]);

    let report = h.cycle(notify());

    assert_eq!(report.outcome, CycleOutcome::Completed);
    let stats = report.accounts[0].stats.expect("stats");
    assert_eq!(stats.new, 1);
    assert_eq!(h.digest("acme", "v1").as_deref(), Some("sha1"));
    assert!(h.sink.events().is_empty());
    assert_eq!(report.totals().notifications.suppressed_empty_cache, 1);
}

#[test]
fn digest_change_is_committed_and_notified_once() {
    let mut h = Harness::new(vec![account("acme")], 1000);
    h.source.set("acme", vec![image("acme", "v1", Some("sha1"))]);
    h.cycle(notify());

    h.source.set("acme", vec![image("acme", "v1", Some("sha2"))]);
    let report = h.cycle(notify());

    assert_eq!(report.accounts[0].stats.expect("stats").changed, 1);
    assert_eq!(h.digest("acme", "v1").as_deref(), Some("sha2"));
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, h.codec.key(&AccountName::from("acme"), "app", "v1"));

    let again = h.cycle(notify());
    assert_eq!(again.totals().committed, 0);
    assert_eq!(h.sink.events().len(), 1);
}

#[test]
fn null_digest_never_reports_a_change() {
    let mut h = Harness::new(vec![account("acme")], 1000);
    h.source.set("acme", vec![image("acme", "v1", Some("sha1"))]);
    h.cycle(notify());

    h.source.set("acme", vec![image("acme", "v1", None)]);
    let report = h.cycle(notify());

    let stats = report.accounts[0].stats.expect("stats");
    assert_eq!(stats.changed, 0);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(h.digest("acme", "v1").as_deref(), Some("sha1"));
}

#[test]
fn new_tag_on_known_account_is_notified() {
    let mut h = Harness::new(vec![account("acme")], 1000);
    h.source.set("acme", vec![image("acme", "v1", Some("sha1"))]);
    h.cycle(notify());

    h.source.set(
        "acme",
        vec![image("acme", "v1", Some("sha1")), image("acme", "v2", Some("sha9"))],
    );
    let report = h.cycle(notify());

    assert_eq!(report.accounts[0].stats.expect("stats").new, 1);
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].artifact.version, "v2");
}

#[test]
fn migration_in_progress_skips_every_account() {
    let mut h = Harness::new(vec![account("acme"), account("globex")], 1000);
    h.source.set("acme", vec![image("acme", "v1", Some("sha1"))]);
    let migration = Flag::default();
    migration.0.store(true, Ordering::SeqCst);

    let report = h.cycle_with(notify(), Some(&migration), &CancelFlag::new());

    assert_eq!(report.outcome, CycleOutcome::MigrationInProgress);
    assert!(report.accounts.is_empty());
    assert_eq!(h.source.calls(), 0);
    assert!(h.cache.entries().expect("entries").is_empty());
}

#[test]
fn cached_keys_only_grow_across_cycles() {
    let mut h = Harness::new(vec![account("acme")], 1000);
    h.source.set(
        "acme",
        vec![image("acme", "v1", Some("sha1")), image("acme", "v2", Some("sha2"))],
    );
    h.cycle(notify());
    let before = h.cache.images(&AccountName::from("acme")).expect("images");

    h.source.set("acme", vec![image("acme", "v3", Some("sha3"))]);
    h.cycle(notify());
    let after = h.cache.images(&AccountName::from("acme")).expect("images");

    assert!(before.is_subset(&after));
    assert_eq!(after.len(), 3);
}

#[test]
fn failing_account_does_not_block_the_others() {
    let mut h = Harness::new(vec![account("acme"), account("globex")], 1000);
    h.source.fail("acme");
    h.source.set("globex", vec![image("globex", "v1", Some("sha1"))]);

    let report = h.cycle(notify());

    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.accounts.len(), 2);
    assert!(matches!(
        report.accounts[0].outcome,
        AccountOutcome::Failed { .. }
    ));
    assert!(matches!(
        report.accounts[1].outcome,
        AccountOutcome::Committed { .. }
    ));
    assert_eq!(h.digest("globex", "v1").as_deref(), Some("sha1"));
    assert_eq!(report.totals().failed, 1);
}

#[test]
fn cancellation_stops_before_the_next_account() {
    let mut h = Harness::new(vec![account("acme"), account("globex")], 1000);
    h.source.set("acme", vec![image("acme", "v1", Some("sha1"))]);
    h.source.set("globex", vec![image("globex", "v1", Some("sha1"))]);
    let cancel = CancelFlag::new();
    *h.source.cancel_on_call.lock().unwrap() = Some(cancel.clone());

    let report = h.cycle_with(notify(), None, &cancel);

    assert_eq!(report.outcome, CycleOutcome::Cancelled);
    assert_eq!(report.accounts.len(), 1);
    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.digest("globex", "v1"), None);
}

#[test]
fn over_threshold_skips_commit_until_fast_forward() {
    let mut h = Harness::new(vec![account("acme")], 1);
    h.source.set(
        "acme",
        vec![image("acme", "v1", Some("sha1")), image("acme", "v2", Some("sha2"))],
    );

    let report = h.cycle(notify());
    assert_eq!(
        report.accounts[0].outcome,
        AccountOutcome::OverThreshold {
            items: 2,
            threshold: 1
        }
    );
    assert!(h.cache.entries().expect("entries").is_empty());

    let report = h.cycle(CycleOptions {
        mode: PollMode::FastForward,
        enforce_threshold: true,
    });
    assert_eq!(report.totals().committed, 2);
    assert_eq!(report.totals().notifications.skipped, 2);
    assert!(h.sink.events().is_empty());
    assert_eq!(h.digest("acme", "v2").as_deref(), Some("sha2"));
}

#[test]
fn dry_run_reports_pending_without_writing() {
    let mut h = Harness::new(vec![account("acme")], 1000);
    h.source.set("acme", vec![image("acme", "v1", Some("sha1"))]);

    let report = h.cycle(CycleOptions {
        mode: PollMode::DryRun,
        enforce_threshold: true,
    });

    match &report.accounts[0].outcome {
        AccountOutcome::DryRun { pending } => assert_eq!(pending.len(), 1),
        other => panic!("expected dry run, got {other:?}"),
    }
    assert!(h.cache.entries().expect("entries").is_empty());
    assert!(h.sink.events().is_empty());
}

#[test]
fn null_entries_in_listing_are_skipped() {
    let mut h = Harness::new(vec![account("acme")], 1000);
    h.source
        .set("acme", vec![None, image("acme", "v1", Some("sha1")), None]);

    let report = h.cycle(notify());

    let stats = report.accounts[0].stats.expect("stats");
    assert_eq!(stats.skipped_null, 2);
    assert_eq!(stats.new, 1);
}
