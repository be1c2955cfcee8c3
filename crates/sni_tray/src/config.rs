use std::{path::PathBuf, time::Duration};

use smart_default::SmartDefault;

/// Which message bus to connect to.
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault)]
pub enum BusAddress {
    /// The session bus of the current user.
    #[default]
    Session,
    /// A bus reachable at the given D-Bus address, e.g. `unix:path=/tmp/bus`.
    Address(String),
}

impl BusAddress {
    /// Open a new connection to this bus. Every watcher and host gets its own connection.
    pub async fn connect(&self) -> zbus::Result<zbus::Connection> {
        match self {
            BusAddress::Session => zbus::Connection::session().await,
            BusAddress::Address(address) => zbus::connection::Builder::address(address.as_str())?.build().await,
        }
    }
}

/// Settings shared by the [`Watcher`][crate::Watcher], the [`Host`][crate::Host] and the
/// [`Tray`][crate::Tray] that ties them together.
#[derive(Debug, Clone, SmartDefault)]
pub struct TrayConfig {
    pub bus: BusAddress,

    /// Upper bound for a single property read or method call on another peer.
    #[default(_code = "Duration::from_secs(2)")]
    pub call_timeout: Duration,

    /// How long [`Tray::start`][crate::Tray::start] waits to learn whether its watcher got the
    /// well-known name.
    #[default(_code = "Duration::from_secs(5)")]
    pub startup_timeout: Duration,

    /// Edge length in pixels of the icons returned by [`HostHandle::get_items`][crate::HostHandle::get_items].
    #[default(24)]
    pub icon_size: u32,

    /// Whether the tray should try to become the session's watcher.
    #[default(true)]
    pub run_watcher: bool,

    /// Extra directories searched for icons, before the system defaults.
    pub icon_search_paths: Vec<PathBuf>,
}
