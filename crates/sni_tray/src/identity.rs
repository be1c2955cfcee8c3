use std::fmt;

use crate::{names, Error, Result};

/// Key of one registered StatusNotifierItem: the bus name of the connection that owns the item
/// plus the object path the item is served at.
///
/// Its string form is `{bus_name}{object_path}` (e.g. `:1.50/org/ayatana/NotificationItem/nm_applet`),
/// which is the format of the watcher's [RegisteredStatusNotifierItems property][rsni] and of
/// the registration signals.
///
/// [rsni]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/#registeredstatusnotifieritems
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemIdentity {
    bus_name: String,
    object_path: String,
}

impl ItemIdentity {
    /// Derive the identity of an item from the `service` argument of
    /// `RegisterStatusNotifierItem` and the unique name of the connection that sent it.
    ///
    /// The freedesktop.org specification has the argument be just the bus name, however some
    /// status items pass non-conforming values:
    /// - libappindicator sends only the object path, so the sender owns the item;
    /// - xembedsniproxy sends a unique name (`:1.50`), which then owns the item;
    /// - anything else (usually a well-known name) is attributed to the sender.
    ///
    /// Refused are the empty string, and paths or unique names that are not valid as such.
    pub fn derive(sender: &str, service: &str) -> Result<Self> {
        if service.is_empty() {
            return Err(Error::protocol_violation(service, "empty service name"));
        }

        let (bus_name, object_path) = if service.starts_with('/') {
            if zbus::zvariant::ObjectPath::try_from(service).is_err() {
                return Err(Error::protocol_violation(service, "invalid object path"));
            }
            (sender, service)
        } else if service.starts_with(':') {
            if zbus::names::UniqueName::try_from(service).is_err() {
                return Err(Error::protocol_violation(service, "invalid unique name"));
            }
            (service, names::ITEM_OBJECT)
        } else {
            (sender, names::ITEM_OBJECT)
        };
        Ok(Self { bus_name: bus_name.to_owned(), object_path: object_path.to_owned() })
    }

    /// Split an identity string as announced by a watcher. Returns `None` for addresses that do
    /// not contain an object path.
    pub fn parse(service: &str) -> Option<Self> {
        let (bus_name, path) = service.split_once('/')?;
        if bus_name.is_empty() {
            return None;
        }
        Some(Self { bus_name: bus_name.to_owned(), object_path: format!("/{}", path) })
    }

    /// The bus name whose disappearance ends this registration.
    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bus_name, self.object_path)
    }
}

/// Unique bus name of a registered StatusNotifierHost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::From, derive_more::AsRef)]
pub struct HostIdentity(pub String);

impl From<&str> for HostIdentity {
    fn from(s: &str) -> Self {
        HostIdentity(s.to_owned())
    }
}
