//! The two services of the [StatusNotifierItem] protocol: a [`Watcher`] that acts as the
//! session-wide registry of tray items, and a [`Host`] that discovers the watcher and mirrors
//! the state of every registered item. Both run on their own thread and report what happens to
//! them through an [`EventQueue`].
//!
//! [StatusNotifierItem]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/

mod bus;
pub mod names;
pub mod proxy;

mod config;
pub use config::*;

mod error;
pub use error::*;

mod event;
pub use event::*;

mod host;
pub use host::*;

mod icon;
pub use icon::*;

mod identity;
pub use identity::*;

mod item;
pub use item::*;

mod mirror;
pub use mirror::*;

mod registry;
pub use registry::*;

mod tray;
pub use tray::*;

mod watcher;
pub use watcher::*;
