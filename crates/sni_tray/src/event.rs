use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Something that happened inside a [`Watcher`][crate::Watcher] or [`Host`][crate::Host].
///
/// Item events carry the item identity in its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The watcher now owns `org.kde.StatusNotifierWatcher`.
    WatcherAcquired,
    /// The watcher could not get, or lost, its name and shut down.
    WatcherLost,
    WatcherItemAdded(String),
    WatcherItemRemoved(String),
    HostItemAdded(String),
    HostItemChanged(String),
    HostItemRemoved(String),
    /// The host found a watcher and registered with it.
    HostAcquired,
    /// The watcher the host was registered with went away.
    HostLost,
}

impl LifecycleEvent {
    /// Whether a consumer rendering the host's items has to redraw.
    pub fn affects_host_items(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::HostItemAdded(_)
                | LifecycleEvent::HostItemChanged(_)
                | LifecycleEvent::HostItemRemoved(_)
                | LifecycleEvent::HostAcquired
        )
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            LifecycleEvent::WatcherItemAdded(id)
            | LifecycleEvent::WatcherItemRemoved(id)
            | LifecycleEvent::HostItemAdded(id)
            | LifecycleEvent::HostItemChanged(id)
            | LifecycleEvent::HostItemRemoved(id) => Some(id),
            _ => None,
        }
    }
}

/// Unbounded multi-producer, multi-consumer queue of [`LifecycleEvent`]s.
///
/// Clones share the same queue. Every event is handed to exactly one dequeue call. Events from
/// a single producer come out in the order they were enqueued.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: Sender<LifecycleEvent>,
    rx: Receiver<LifecycleEvent>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Append an event. Never blocks.
    pub fn enqueue(&self, event: LifecycleEvent) {
        // can't fail: we hold a receiver ourselves
        let _ = self.tx.send(event);
    }

    /// Take the next event if there is one. Never blocks.
    pub fn try_dequeue(&self) -> Option<LifecycleEvent> {
        self.rx.try_recv().ok()
    }

    /// Block the calling thread until an event is available.
    pub fn wait_dequeue(&self) -> LifecycleEvent {
        match self.rx.recv() {
            Ok(event) => event,
            Err(_) => unreachable!("the queue holds its own sender"),
        }
    }

    /// Like [`EventQueue::wait_dequeue`], but gives up after `timeout`.
    pub fn wait_dequeue_timeout(&self, timeout: Duration) -> Option<LifecycleEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_try_dequeue_empty() {
        let queue = EventQueue::new();
        assert_eq!(queue.try_dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clones_share_events() {
        let queue = EventQueue::new();
        let producer = queue.clone();
        producer.enqueue(LifecycleEvent::WatcherAcquired);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_dequeue(), Some(LifecycleEvent::WatcherAcquired));
        assert_eq!(producer.try_dequeue(), None);
    }

    #[test]
    fn test_fifo_per_producer() {
        let queue = EventQueue::new();
        let producers: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|tag| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(LifecycleEvent::HostItemChanged(format!("{}{}", tag, i)));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        while let Some(event) = queue.try_dequeue() {
            let id = event.identity().unwrap().to_owned();
            let n: u32 = id[1..].parse().unwrap();
            if id.starts_with('a') {
                seen_a.push(n);
            } else {
                seen_b.push(n);
            }
        }
        assert_eq!(seen_a, (0..100).collect::<Vec<_>>());
        assert_eq!(seen_b, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_wait_dequeue_blocks_until_enqueued() {
        let queue = EventQueue::new();
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.wait_dequeue())
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.enqueue(LifecycleEvent::HostLost);
        assert_eq!(consumer.join().unwrap(), LifecycleEvent::HostLost);
    }

    #[test]
    fn test_wait_dequeue_timeout() {
        let queue = EventQueue::new();
        assert_eq!(queue.wait_dequeue_timeout(Duration::from_millis(10)), None);
        queue.enqueue(LifecycleEvent::WatcherLost);
        assert_eq!(queue.wait_dequeue_timeout(Duration::from_millis(10)), Some(LifecycleEvent::WatcherLost));
    }

    #[test]
    fn test_event_classification() {
        assert!(LifecycleEvent::HostItemAdded(":1.2/x".into()).affects_host_items());
        assert!(!LifecycleEvent::WatcherItemAdded(":1.2/x".into()).affects_host_items());
        assert_eq!(LifecycleEvent::WatcherItemRemoved(":1.2/x".into()).identity(), Some(":1.2/x"));
        assert_eq!(LifecycleEvent::WatcherAcquired.identity(), None);
    }
}
