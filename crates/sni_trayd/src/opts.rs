use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use sni_tray::{BusAddress, TrayConfig};

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq)]
pub struct Opt {
    pub log_debug: bool,
    pub address: Option<String>,
    pub run_watcher: bool,
    pub watcher_only: bool,
    pub icon_size: u32,
    pub call_timeout: Duration,
    pub icon_dirs: Vec<PathBuf>,
    pub action: Action,
}

#[derive(Parser, Debug, PartialEq)]
#[command(author = "elkowar", version, about = "StatusNotifierItem watcher and host")]
struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// Connect to this D-Bus address instead of the session bus.
    #[arg(long, global = true)]
    address: Option<String>,

    /// Don't try to become the session's StatusNotifierWatcher.
    #[arg(long, global = true, conflicts_with = "watcher_only")]
    no_watcher: bool,

    /// Only run the StatusNotifierWatcher, without a host.
    #[arg(long, global = true)]
    watcher_only: bool,

    /// Edge length of the icons, in pixels.
    #[arg(long, global = true, default_value_t = 24)]
    icon_size: u32,

    /// Timeout for calls to other peers on the bus, in milliseconds.
    #[arg(long = "timeout-ms", global = true, default_value_t = 2000)]
    timeout_ms: u64,

    /// Additional directory to look for icons in. Can be given multiple times.
    #[arg(long = "icon-dir", global = true)]
    icon_dirs: Vec<PathBuf>,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug, PartialEq, Clone, Copy)]
pub enum Action {
    /// Run until interrupted, logging what happens to the tray.
    #[command(name = "run")]
    Run,

    /// Print the items currently registered with the watcher, then exit.
    #[command(name = "list", alias = "ls")]
    List,
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }

    pub fn tray_config(&self) -> TrayConfig {
        TrayConfig {
            bus: match &self.address {
                Some(address) => BusAddress::Address(address.clone()),
                None => BusAddress::Session,
            },
            call_timeout: self.call_timeout,
            icon_size: self.icon_size,
            run_watcher: self.run_watcher,
            icon_search_paths: self.icon_dirs.clone(),
            ..Default::default()
        }
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { log_debug, address, no_watcher, watcher_only, icon_size, timeout_ms, icon_dirs, action } = other;
        Opt {
            log_debug,
            address,
            run_watcher: !no_watcher,
            watcher_only,
            icon_size,
            call_timeout: Duration::from_millis(timeout_ms),
            icon_dirs,
            action: action.unwrap_or(Action::Run),
        }
    }
}
