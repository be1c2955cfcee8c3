use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{EventQueue, Host, HostHandle, IconResolver, LifecycleEvent, Result, TrayConfig, TrayIcon, Watcher, WatcherHandle};

/// A watcher and a host sharing one event queue: what a bar embeds to show a system tray.
pub struct Tray {
    queue: EventQueue,
    watcher: Option<WatcherHandle>,
    host: HostHandle,
}

impl Tray {
    /// Start the watcher (unless [`TrayConfig::run_watcher`] is off) and wait until it knows
    /// whether it owns `org.kde.StatusNotifierWatcher`, then start the host.
    ///
    /// If our own watcher got the name, the host skips checking for one.
    pub fn start(config: TrayConfig, resolver: Arc<dyn IconResolver>) -> Result<Tray> {
        let queue = EventQueue::new();
        // fail before spawning anything
        let host = Host::new(config.clone(), queue.clone(), resolver)?;

        let (watcher, acquired) = if config.run_watcher {
            let watcher = Watcher::new(config.clone(), queue.clone()).start()?;
            let acquired = wait_for_watcher(&queue, config.startup_timeout);
            (Some(watcher), acquired)
        } else {
            (None, false)
        };

        let host = host.start(acquired)?;
        Ok(Tray { queue, watcher, host })
    }

    /// Take one event off the queue without blocking. Returns `true` if it means the items
    /// changed.
    pub fn has_event(&self) -> bool {
        match self.queue.try_dequeue() {
            Some(event) => {
                log::trace!("tray: {:?}", event);
                event.affects_host_items()
            }
            None => false,
        }
    }

    pub fn items(&self) -> Vec<TrayIcon> {
        self.host.get_items()
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    pub fn watcher(&self) -> Option<&WatcherHandle> {
        self.watcher.as_ref()
    }

    /// Stop the host, then the watcher.
    pub fn stop(self) {
        let Tray { queue: _, watcher, host } = self;
        host.stop();
        if let Some(watcher) = watcher {
            watcher.stop();
        }
    }
}

/// Block until the watcher reports whether it got its name. Events that arrive in the meantime
/// are not for us and are put back.
fn wait_for_watcher(queue: &EventQueue, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut unrelated = Vec::new();
    let acquired = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match queue.wait_dequeue_timeout(remaining) {
            Some(LifecycleEvent::WatcherAcquired) => break true,
            Some(LifecycleEvent::WatcherLost) => break false,
            Some(event) => unrelated.push(event),
            None => {
                log::warn!("tray: watcher did not report back within {:?}", timeout);
                break false;
            }
        }
    };
    for event in unrelated {
        queue.enqueue(event);
    }
    acquired
}
