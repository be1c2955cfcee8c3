mod common;

use std::time::{Duration, Instant};

use futures::StreamExt;
use pretty_assertions::assert_eq;
use sni_tray::{EventQueue, LifecycleEvent, Watcher, WatcherState};

use common::*;

fn is_watcher_outcome(event: &LifecycleEvent) -> bool {
    matches!(event, LifecycleEvent::WatcherAcquired | LifecycleEvent::WatcherLost)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_acquires_free_name() {
    let Some(bus) = TestBus::start() else { return };
    let queue = EventQueue::new();
    let watcher = Watcher::new(bus.config(), queue.clone()).start().unwrap();

    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherAcquired));
    assert_eq!(watcher.state(), WatcherState::Running);

    let con = bus.connect().await;
    let snw = watcher_proxy(&con).await;
    assert!(!snw.is_status_notifier_host_registered().await.unwrap());
    assert_eq!(snw.protocol_version().await.unwrap(), 1);
    assert_eq!(snw.registered_status_notifier_items().await.unwrap(), Vec::<String>::new());

    watcher.stop();
}

#[test]
fn test_watcher_gives_up_on_stalled_bus() {
    let bus = StalledBus::start("gives-up");
    let queue = EventQueue::new();
    let watcher = Watcher::new(bus.config(Duration::from_millis(200)), queue.clone()).start().unwrap();

    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherLost));
    assert!(eventually(|| watcher.state() == WatcherState::NameLost));
}

#[test]
fn test_watcher_stops_while_bus_stalls() {
    let bus = StalledBus::start("stops");
    let queue = EventQueue::new();
    let watcher = Watcher::new(bus.config(Duration::from_secs(60)), queue.clone()).start().unwrap();
    assert!(eventually(|| watcher.state() == WatcherState::AcquiringName));

    let started = Instant::now();
    watcher.stop();
    assert!(started.elapsed() < TIMEOUT, "stop took {:?}", started.elapsed());
    assert!(queue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_watcher_loses() {
    let Some(bus) = TestBus::start() else { return };
    let queue = EventQueue::new();
    let first = Watcher::new(bus.config(), queue.clone()).start().unwrap();
    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherAcquired));

    let con = bus.connect().await;
    let snw = watcher_proxy(&con).await;
    snw.register_status_notifier_item("/Item1").await.unwrap();
    let registered = snw.registered_status_notifier_items().await.unwrap();

    let second_queue = EventQueue::new();
    let second = Watcher::new(bus.config(), second_queue.clone()).start().unwrap();
    assert_eq!(wait_for(&second_queue, is_watcher_outcome), Some(LifecycleEvent::WatcherLost));
    assert!(eventually(|| second.state() == WatcherState::NameLost));

    // the first watcher is unaffected
    assert_eq!(first.state(), WatcherState::Running);
    assert_eq!(snw.registered_status_notifier_items().await.unwrap(), registered);
    assert!(second_queue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_register_item_by_object_path() {
    let Some(bus) = TestBus::start() else { return };
    let queue = EventQueue::new();
    let _watcher = Watcher::new(bus.config(), queue.clone()).start().unwrap();
    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherAcquired));

    let con = bus.connect().await;
    let snw = watcher_proxy(&con).await;
    let mut registrations = snw.receive_status_notifier_item_registered().await.unwrap();
    let expected = format!("{}/Item1", unique_name(&con));

    snw.register_status_notifier_item("/Item1").await.unwrap();
    // registering twice is a no-op
    snw.register_status_notifier_item("/Item1").await.unwrap();

    let sig = tokio::time::timeout(TIMEOUT, registrations.next()).await.unwrap().unwrap();
    assert_eq!(sig.args().unwrap().service, expected.as_str());
    assert_eq!(snw.registered_status_notifier_items().await.unwrap(), vec![expected.clone()]);

    assert!(tokio::time::timeout(Duration::from_millis(300), registrations.next()).await.is_err());
    let added: Vec<_> = drain_for(&queue, Duration::from_millis(300))
        .into_iter()
        .filter(|e| matches!(e, LifecycleEvent::WatcherItemAdded(_)))
        .collect();
    assert_eq!(added, vec![LifecycleEvent::WatcherItemAdded(expected)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_register_item_by_unique_name() {
    let Some(bus) = TestBus::start() else { return };
    let queue = EventQueue::new();
    let _watcher = Watcher::new(bus.config(), queue.clone()).start().unwrap();
    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherAcquired));

    let con = bus.connect().await;
    let snw = watcher_proxy(&con).await;
    let name = unique_name(&con);
    snw.register_status_notifier_item(&name).await.unwrap();

    assert_eq!(
        snw.registered_status_notifier_items().await.unwrap(),
        vec![format!("{}/StatusNotifierItem", name)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_registration_is_rejected() {
    let Some(bus) = TestBus::start() else { return };
    let queue = EventQueue::new();
    let _watcher = Watcher::new(bus.config(), queue.clone()).start().unwrap();
    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherAcquired));

    let con = bus.connect().await;
    let snw = watcher_proxy(&con).await;
    assert!(snw.register_status_notifier_item("").await.is_err());
    assert!(snw.register_status_notifier_host("").await.is_err());

    assert_eq!(snw.registered_status_notifier_items().await.unwrap(), Vec::<String>::new());
    assert!(!snw.is_status_notifier_host_registered().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_path_is_rejected() {
    let Some(bus) = TestBus::start() else { return };
    let queue = EventQueue::new();
    let _watcher = Watcher::new(bus.config(), queue.clone()).start().unwrap();
    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherAcquired));

    let con = bus.connect().await;
    let snw = watcher_proxy(&con).await;
    let err = snw.register_status_notifier_item("/bad path").await.unwrap_err();
    assert!(matches!(err, zbus::Error::MethodError(ref name, _, _) if name.as_str() == "org.freedesktop.DBus.Error.InvalidArgs"), "{:?}", err);

    assert_eq!(snw.registered_status_notifier_items().await.unwrap(), Vec::<String>::new());
    let added = drain_for(&queue, Duration::from_millis(300));
    assert!(!added.iter().any(|e| matches!(e, LifecycleEvent::WatcherItemAdded(_))), "{:?}", added);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_vanish_removes_only_its_own_item() {
    let Some(bus) = TestBus::start() else { return };
    let queue = EventQueue::new();
    let _watcher = Watcher::new(bus.config(), queue.clone()).start().unwrap();
    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherAcquired));

    let first = bus.connect().await;
    let second = bus.connect().await;
    let first_id = format!("{}/StatusNotifierItem", unique_name(&first));
    let second_id = format!("{}/StatusNotifierItem", unique_name(&second));

    // back to back, before either liveness watch has done anything
    let (a, b) = tokio::join!(
        async { watcher_proxy(&first).await.register_status_notifier_item("/StatusNotifierItem").await },
        async { watcher_proxy(&second).await.register_status_notifier_item("/StatusNotifierItem").await },
    );
    a.unwrap();
    b.unwrap();

    let observer = bus.connect().await;
    let snw = watcher_proxy(&observer).await;
    assert_eq!(snw.registered_status_notifier_items().await.unwrap().len(), 2);

    first.close().await.unwrap();

    let removed = wait_for(&queue, |e| matches!(e, LifecycleEvent::WatcherItemRemoved(_)));
    assert_eq!(removed, Some(LifecycleEvent::WatcherItemRemoved(first_id)));
    assert_eq!(snw.registered_status_notifier_items().await.unwrap(), vec![second_id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_registration_follows_host_lifetime() {
    let Some(bus) = TestBus::start() else { return };
    let queue = EventQueue::new();
    let _watcher = Watcher::new(bus.config(), queue.clone()).start().unwrap();
    assert_eq!(wait_for(&queue, is_watcher_outcome), Some(LifecycleEvent::WatcherAcquired));

    let observer = bus.connect().await;
    let snw = watcher_proxy(&observer).await;

    let host = bus.connect().await;
    watcher_proxy(&host).await.register_status_notifier_host("org.freedesktop.StatusNotifierHost-test").await.unwrap();
    assert!(snw.is_status_notifier_host_registered().await.unwrap());

    let mut unregistered = snw.receive_status_notifier_host_unregistered().await.unwrap();
    host.close().await.unwrap();
    tokio::time::timeout(TIMEOUT, unregistered.next()).await.unwrap().unwrap();
    assert!(!snw.is_status_notifier_host_registered().await.unwrap());
}
