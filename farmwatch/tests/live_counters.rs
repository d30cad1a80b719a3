use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farmwatch::backend::Backend;
use farmwatch::counters::{Counter, CounterKind, CounterSnapshot};
use farmwatch::demo::{resolve_entry, DemoEntry, DemoGate};
use farmwatch::errors::{Error, Result};
use farmwatch::live::{LiveHandle, LiveSession, PushEvent, PushTable, Subscriber};
use farmwatch::model::{SensorId, SensorReading, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[derive(Default)]
struct FakeBackend {
    notifications: Mutex<HashMap<UserId, u64>>,
    activity: Mutex<HashMap<UserId, u64>>,
    read_delays: Mutex<HashMap<UserId, Duration>>,
    mark_delay: Mutex<Option<Duration>>,
    owners: Mutex<Vec<UserId>>,
    fail_marks: AtomicBool,
    fail_ownership: AtomicBool,
    mark_calls: AtomicUsize,
    ownership_calls: AtomicUsize,
}

impl FakeBackend {
    fn insert_notification(&self, user: UserId) {
        *self.notifications.lock().unwrap().entry(user).or_default() += 1;
    }

    fn set_counts(&self, user: UserId, notifications: u64, activity: u64) {
        self.notifications.lock().unwrap().insert(user, notifications);
        self.activity.lock().unwrap().insert(user, activity);
    }

    async fn delay_for(&self, user: UserId) {
        let delay = self.read_delays.lock().unwrap().get(&user).copied();
        if let Some(d) = delay {
            sleep(d).await;
        }
    }

    async fn mark(&self, table: &Mutex<HashMap<UserId, u64>>, user: UserId) -> Result<()> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.mark_delay.lock().unwrap();
        if let Some(d) = delay {
            sleep(d).await;
        }
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(Error::Storage("write rejected".into()));
        }
        table.lock().unwrap().insert(user, 0);
        Ok(())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn count_unread_notifications(&self, user: UserId) -> Result<u64> {
        self.delay_for(user).await;
        Ok(self.notifications.lock().unwrap().get(&user).copied().unwrap_or(0))
    }

    async fn count_unviewed_activity(&self, user: UserId) -> Result<u64> {
        self.delay_for(user).await;
        Ok(self.activity.lock().unwrap().get(&user).copied().unwrap_or(0))
    }

    async fn mark_notifications_read(&self, user: UserId) -> Result<()> {
        self.mark(&self.notifications, user).await
    }

    async fn mark_activity_viewed(&self, user: UserId) -> Result<()> {
        self.mark(&self.activity, user).await
    }

    async fn has_farms_or_sensors(&self, user: UserId) -> Result<bool> {
        self.ownership_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ownership.load(Ordering::SeqCst) {
            return Err(Error::Storage("connection reset".into()));
        }
        Ok(self.owners.lock().unwrap().contains(&user))
    }

    async fn sensor_readings_since(&self, _sensor: SensorId, _since: DateTime<Utc>) -> Result<Vec<SensorReading>> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Default)]
struct RecordingSubscriber {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    async fn subscribe(&self, user: UserId) -> Result<()> {
        self.log.lock().unwrap().push(format!("subscribe {}", user));
        Ok(())
    }

    async fn unsubscribe(&self, user: UserId) -> Result<()> {
        // A slow teardown must still finish before the next subscribe.
        sleep(Duration::from_millis(20)).await;
        self.log.lock().unwrap().push(format!("unsubscribe {}", user));
        Ok(())
    }
}

fn start(backend: Arc<FakeBackend>) -> (LiveHandle, RecordingSubscriber) {
    let subscriber = RecordingSubscriber::default();
    let (session, handle) = LiveSession::new(backend, Box::new(subscriber.clone()), 64);
    tokio::spawn(session.run());
    (handle, subscriber)
}

async fn wait_until(handle: &LiveHandle, pred: impl FnMut(&CounterSnapshot) -> bool) -> CounterSnapshot {
    let mut rx = handle.watch();
    let snapshot = timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("timed out waiting for counters")
        .expect("live session stopped");
    *snapshot
}

fn push(table: PushTable, user: UserId) -> PushEvent {
    PushEvent {
        table,
        user_id: user,
        payload: serde_json::json!({ "user_id": user }),
    }
}

#[tokio::test]
async fn test_counter_converges_to_number_of_inserts() {
    let backend = Arc::new(FakeBackend::default());
    let (handle, _) = start(Arc::clone(&backend));
    let user = UserId::new();

    handle.set_user(Some(user)).await.unwrap();
    wait_until(&handle, |s| s.notifications == Counter::Settled(0)).await;

    for _ in 0..25 {
        backend.insert_notification(user);
        handle.push(push(PushTable::Notifications, user)).await.unwrap();
    }

    let snapshot = wait_until(&handle, |s| s.notifications == Counter::Settled(25)).await;
    assert_eq!(snapshot.user_id, Some(user));
    assert_eq!(snapshot.activity, Counter::Settled(0));
}

#[tokio::test]
async fn test_view_zeroes_and_stays_zero_when_write_fails() {
    let backend = Arc::new(FakeBackend::default());
    backend.fail_marks.store(true, Ordering::SeqCst);
    let (handle, _) = start(Arc::clone(&backend));
    let user = UserId::new();
    backend.set_counts(user, 4, 6);

    handle.set_user(Some(user)).await.unwrap();
    wait_until(&handle, |s| s.notifications == Counter::Settled(4)).await;

    handle.view(CounterKind::Notifications).await.unwrap();
    wait_until(&handle, |s| s.notifications == Counter::Settled(0)).await;

    sleep(Duration::from_millis(100)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.notifications, Counter::Settled(0));
    assert_eq!(snapshot.activity, Counter::Settled(6));
    assert_eq!(backend.mark_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_push_during_slow_mark_write_settles_back_to_zero() {
    let backend = Arc::new(FakeBackend::default());
    *backend.mark_delay.lock().unwrap() = Some(Duration::from_millis(200));
    let (handle, _) = start(Arc::clone(&backend));
    let user = UserId::new();
    backend.set_counts(user, 4, 0);

    handle.set_user(Some(user)).await.unwrap();
    wait_until(&handle, |s| s.notifications == Counter::Settled(4)).await;

    handle.view(CounterKind::Notifications).await.unwrap();
    wait_until(&handle, |s| s.notifications == Counter::Settled(0)).await;

    // A row lands while the write is pending; its read still sees the old rows.
    backend.insert_notification(user);
    handle.push(push(PushTable::Notifications, user)).await.unwrap();
    wait_until(&handle, |s| s.notifications == Counter::Settled(5)).await;

    // The write then clears everything and the counter follows the server.
    wait_until(&handle, |s| s.notifications == Counter::Settled(0)).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.snapshot().notifications, Counter::Settled(0));
    assert_eq!(backend.notifications.lock().unwrap().get(&user).copied(), Some(0));
    assert_eq!(backend.mark_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_old_subscription_is_closed_before_new_one_opens() {
    let backend = Arc::new(FakeBackend::default());
    let (handle, subscriber) = start(Arc::clone(&backend));
    let alice = UserId::new();
    let bob = UserId::new();

    handle.set_user(Some(alice)).await.unwrap();
    handle.set_user(Some(bob)).await.unwrap();
    wait_until(&handle, |s| s.user_id == Some(bob)).await;

    let log = subscriber.log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            format!("subscribe {}", alice),
            format!("unsubscribe {}", alice),
            format!("subscribe {}", bob),
        ]
    );
}

#[tokio::test]
async fn test_late_read_for_previous_user_is_discarded() {
    let backend = Arc::new(FakeBackend::default());
    let (handle, _) = start(Arc::clone(&backend));
    let alice = UserId::new();
    let bob = UserId::new();
    backend.set_counts(alice, 7, 7);
    backend.set_counts(bob, 2, 1);
    backend
        .read_delays
        .lock()
        .unwrap()
        .insert(alice, Duration::from_millis(200));

    handle.set_user(Some(alice)).await.unwrap();
    handle.set_user(Some(bob)).await.unwrap();
    wait_until(&handle, |s| {
        s.user_id == Some(bob) && s.notifications == Counter::Settled(2) && s.activity == Counter::Settled(1)
    })
    .await;

    sleep(Duration::from_millis(300)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.notifications, Counter::Settled(2));
    assert_eq!(snapshot.activity, Counter::Settled(1));
}

#[tokio::test]
async fn test_no_session_pins_counters_to_zero() {
    let backend = Arc::new(FakeBackend::default());
    let (handle, subscriber) = start(Arc::clone(&backend));
    let user = UserId::new();
    backend.set_counts(user, 3, 3);

    handle.set_user(Some(user)).await.unwrap();
    wait_until(&handle, |s| s.notifications == Counter::Settled(3)).await;

    handle.set_user(None).await.unwrap();
    let snapshot = wait_until(&handle, |s| s.user_id.is_none()).await;
    assert_eq!(snapshot.notifications, Counter::Settled(0));
    assert_eq!(snapshot.activity, Counter::Settled(0));

    // Events still in flight for the old user change nothing.
    handle.push(push(PushTable::ActivityLogs, user)).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.snapshot().activity, Counter::Settled(0));
    assert_eq!(subscriber.log.lock().unwrap().last().cloned(), Some(format!("unsubscribe {}", user)));
}

#[tokio::test]
async fn test_push_for_another_user_is_ignored() {
    let backend = Arc::new(FakeBackend::default());
    let (handle, _) = start(Arc::clone(&backend));
    let user = UserId::new();
    let stranger = UserId::new();

    handle.set_user(Some(user)).await.unwrap();
    wait_until(&handle, |s| s.activity == Counter::Settled(0)).await;

    // Even if our count changed, a foreign event must not trigger a re-read.
    backend.set_counts(user, 0, 9);
    handle.push(push(PushTable::ActivityLogs, stranger)).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.snapshot().activity, Counter::Settled(0));

    handle.push(push(PushTable::ActivityLogs, user)).await.unwrap();
    wait_until(&handle, |s| s.activity == Counter::Settled(9)).await;
}

#[tokio::test]
async fn test_demo_entry_assumes_no_data_on_error() {
    let backend = FakeBackend::default();
    let user = UserId::new();
    backend.owners.lock().unwrap().push(user);

    assert_eq!(resolve_entry(&backend, user, true).await, DemoEntry::Tutorial);
    assert_eq!(resolve_entry(&backend, user, false).await, DemoEntry::Dashboard);
    assert_eq!(resolve_entry(&backend, UserId::new(), true).await, DemoEntry::NoDataPrompt);

    backend.fail_ownership.store(true, Ordering::SeqCst);
    assert_eq!(resolve_entry(&backend, user, false).await, DemoEntry::NoDataPrompt);
}

#[tokio::test]
async fn test_demo_gate_checks_ownership_once_per_user() {
    let backend = FakeBackend::default();
    let gate = DemoGate::new();
    let owner = UserId::new();
    let newcomer = UserId::new();
    backend.owners.lock().unwrap().push(owner);

    assert_eq!(gate.entry(&backend, owner, true).await, DemoEntry::Tutorial);
    // The first-time flag is still honoured once the check is cached.
    assert_eq!(gate.entry(&backend, owner, false).await, DemoEntry::Dashboard);
    assert_eq!(backend.ownership_calls.load(Ordering::SeqCst), 1);

    assert_eq!(gate.entry(&backend, newcomer, true).await, DemoEntry::NoDataPrompt);
    assert_eq!(gate.entry(&backend, newcomer, true).await, DemoEntry::NoDataPrompt);
    assert_eq!(backend.ownership_calls.load(Ordering::SeqCst), 2);
}
