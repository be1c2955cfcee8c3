#![allow(dead_code)]

use std::{
    io::{BufRead, BufReader},
    path::Path,
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};

use sni_tray::{BusAddress, EventQueue, IconError, IconResolver, LifecycleEvent, Pixmap, TrayConfig};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A private `dbus-daemon`, killed on drop.
pub struct TestBus {
    daemon: Child,
    address: String,
}

impl TestBus {
    /// Returns `None` if no bus could be started, in which case the test should return early.
    pub fn start() -> Option<TestBus> {
        let _ = pretty_env_logger::try_init();

        let mut daemon = match Command::new("dbus-daemon")
            .args(["--session", "--nofork", "--print-address=1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(daemon) => daemon,
            Err(e) => {
                eprintln!("dbus-daemon not available, skipping: {}", e);
                return None;
            }
        };

        let mut address = String::new();
        let read = daemon.stdout.take().map(|stdout| BufReader::new(stdout).read_line(&mut address));
        let address = address.trim().to_owned();
        if !matches!(read, Some(Ok(n)) if n > 0) || address.is_empty() {
            eprintln!("dbus-daemon did not print its address, skipping");
            let _ = daemon.kill();
            let _ = daemon.wait();
            return None;
        }

        Some(TestBus { daemon, address })
    }

    pub fn config(&self) -> TrayConfig {
        TrayConfig {
            bus: BusAddress::Address(self.address.clone()),
            call_timeout: Duration::from_secs(2),
            startup_timeout: TIMEOUT,
            icon_size: 16,
            ..Default::default()
        }
    }

    pub async fn connect(&self) -> zbus::Connection {
        BusAddress::Address(self.address.clone()).connect().await.unwrap()
    }
}

impl Drop for TestBus {
    fn drop(&mut self) {
        let _ = self.daemon.kill();
        let _ = self.daemon.wait();
    }
}

/// A socket that accepts connections but never says anything, like a hung bus.
pub struct StalledBus {
    path: std::path::PathBuf,
    _listener: std::os::unix::net::UnixListener,
}

impl StalledBus {
    pub fn start(name: &str) -> StalledBus {
        let path = std::env::temp_dir().join(format!("sni-tray-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        StalledBus { path, _listener: listener }
    }

    pub fn config(&self, call_timeout: Duration) -> TrayConfig {
        TrayConfig {
            bus: BusAddress::Address(format!("unix:path={}", self.path.display())),
            call_timeout,
            ..Default::default()
        }
    }
}

impl Drop for StalledBus {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Resolves nothing, so hosts fall back to the pixmaps items send.
pub struct NoIcons;

impl IconResolver for NoIcons {
    fn resolve(&self, icon_name: &str, theme_path: Option<&Path>, _size: u32) -> Result<Pixmap, IconError> {
        Err(IconError::NotFound { icon_name: icon_name.to_owned(), theme_path: theme_path.map(Path::to_path_buf) })
    }
}

/// Dequeue until an event matches `pred`. Other events are dropped.
pub fn wait_for(queue: &EventQueue, pred: impl Fn(&LifecycleEvent) -> bool) -> Option<LifecycleEvent> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = queue.wait_dequeue_timeout(remaining)?;
        if pred(&event) {
            return Some(event);
        }
    }
}

/// Everything that arrives within `window`.
pub fn drain_for(queue: &EventQueue, window: Duration) -> Vec<LifecycleEvent> {
    let deadline = Instant::now() + window;
    let mut events = Vec::new();
    while let Some(event) = queue.wait_dequeue_timeout(deadline.saturating_duration_since(Instant::now())) {
        events.push(event);
    }
    events
}

/// Poll `cond` until it holds or [`TIMEOUT`] passes.
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

pub fn unique_name(con: &zbus::Connection) -> String {
    con.unique_name().unwrap().to_string()
}

pub async fn watcher_proxy(con: &zbus::Connection) -> sni_tray::proxy::StatusNotifierWatcherProxy<'static> {
    sni_tray::proxy::StatusNotifierWatcherProxy::builder(con)
        .cache_properties(zbus::proxy::CacheProperties::No)
        .build()
        .await
        .unwrap()
}
