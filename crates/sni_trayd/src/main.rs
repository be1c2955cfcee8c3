use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use sni_tray::{EventQueue, Host, LifecycleEvent, ThemeDirResolver, Tray, TrayConfig, Watcher};

mod opts;

/// How long `list` waits for the item list to settle.
const SETTLE_TIME: Duration = Duration::from_millis(300);

fn main() {
    let opts = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("sni_trayd"), log_level_filter)
            .filter(Some("sni_tray"), log_level_filter)
            .init();
    }

    let result = match opts.action {
        opts::Action::Run if opts.watcher_only => run_watcher(opts.tray_config()),
        opts::Action::Run => run_tray(opts.tray_config()),
        opts::Action::List => list_items(opts.tray_config()),
    };

    if let Err(err) = result {
        log::error!("{:?}", err);
        std::process::exit(1);
    }
}

/// Set up a flag that turns true on SIGINT or SIGTERM.
fn shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], {
        let flag = flag.clone();
        move |_| {
            log::info!("Shutting down sni-trayd...");
            flag.store(true, Ordering::SeqCst);
        }
    });
    flag
}

fn run_tray(config: TrayConfig) -> Result<()> {
    let shutdown = shutdown_flag();
    let resolver = Arc::new(ThemeDirResolver::from_environment(&config.icon_search_paths));
    let tray = Tray::start(config, resolver).context("Failed to start the tray")?;

    while !shutdown.load(Ordering::SeqCst) {
        let Some(event) = tray.queue().wait_dequeue_timeout(Duration::from_millis(200)) else { continue };
        log::info!("{:?}", event);
        if event.affects_host_items() {
            for icon in tray.items() {
                log::debug!("  {} {:?} ({}, {}x{})", icon.service, icon.title, icon.status, icon.pixmap.width, icon.pixmap.height);
            }
        }
    }

    tray.stop();
    Ok(())
}

fn run_watcher(config: TrayConfig) -> Result<()> {
    let shutdown = shutdown_flag();
    let queue = EventQueue::new();
    let watcher = Watcher::new(config, queue.clone()).start().context("Failed to start the watcher")?;

    while !shutdown.load(Ordering::SeqCst) {
        let Some(event) = queue.wait_dequeue_timeout(Duration::from_millis(200)) else { continue };
        log::info!("{:?}", event);
        if event == LifecycleEvent::WatcherLost {
            anyhow::bail!("Could not own org.kde.StatusNotifierWatcher, is another watcher running?");
        }
    }

    watcher.stop();
    Ok(())
}

fn list_items(config: TrayConfig) -> Result<()> {
    let queue = EventQueue::new();
    let resolver = Arc::new(ThemeDirResolver::from_environment(&config.icon_search_paths));
    let startup_timeout = config.startup_timeout;
    let host = Host::new(config, queue.clone(), resolver)
        .context("Failed to create the host")?
        .start(false)
        .context("Failed to start the host")?;

    let deadline = std::time::Instant::now() + startup_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match queue.wait_dequeue_timeout(remaining) {
            Some(LifecycleEvent::HostAcquired) => break,
            Some(_) => {}
            None => anyhow::bail!("No StatusNotifierWatcher appeared within {:?}", startup_timeout),
        }
    }
    // items are added right after the host registers
    while queue.wait_dequeue_timeout(SETTLE_TIME).is_some() {}

    for item in host.snapshot().iter() {
        println!("{}\t{}\t{}\t{}", item.service, item.id, item.status, item.title);
    }
    host.stop();
    Ok(())
}
