//! Well-known bus names, object paths and constants of the protocol.

/// Bus name owned by the single StatusNotifierWatcher of a session.
pub const WATCHER_BUS: &str = "org.kde.StatusNotifierWatcher";
/// Object path the watcher interface is served at.
pub const WATCHER_OBJECT: &str = "/StatusNotifierWatcher";

/// Interface implemented by tray items.
pub const ITEM_INTERFACE: &str = "org.kde.StatusNotifierItem";
/// Object path items use when they register with just a bus name.
pub const ITEM_OBJECT: &str = "/StatusNotifierItem";

/// Prefix of the bus name a host claims, followed by `-<pid>`.
pub const HOST_BUS_PREFIX: &str = "org.freedesktop.StatusNotifierHost";

/// Value of the watcher's `ProtocolVersion` property.
pub const PROTOCOL_VERSION: i32 = 1;
