//! Proxies for DBus services, so we can call them.
//!
//! The proxies were written after the interface XML files of the StatusNotifierItem
//! specification, in the shape [zbus-xmlgen](https://docs.rs/crate/zbus_xmlgen/latest) produces.
//!
//! For more information, see ["Writing a client proxy" in the zbus
//! tutorial](https://dbus2.github.io/zbus/).

mod dbus_status_notifier_item;
pub use dbus_status_notifier_item::*;

mod dbus_status_notifier_watcher;
pub use dbus_status_notifier_watcher::*;
