use std::{future::Future, time::Duration};

use serde::Deserialize;
use zbus::fdo::IntrospectableProxy;

use crate::{bus, names, proxy, Error, ItemIdentity, Pixmap};

/// Recognised values of [`org.freedesktop.StatusNotifierItem.Status`].
///
/// [`org.freedesktop.StatusNotifierItem.Status`]: https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/#org.freedesktop.statusnotifieritem.status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The item doesn't convey important information to the user, it can be considered an "idle"
    /// status and is likely that visualizations will chose to hide it.
    Passive,
    /// The item is active, is more important that the item will be shown in some way to the user.
    Active,
    /// The item carries really important information for the user, such as battery charge running
    /// out and is wants to incentive the direct user intervention. Visualizations should emphasize
    /// in some way the items with NeedsAttention status.
    NeedsAttention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ParseStatusError;

impl std::str::FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "Passive" => Ok(Status::Passive),
            "Active" => Ok(Status::Active),
            "NeedsAttention" => Ok(Status::NeedsAttention),
            _ => Err(ParseStatusError),
        }
    }
}

/// Local copy of the properties of one StatusNotifierItem, as seen by a [`Host`][crate::Host].
///
/// Properties that could not be read are empty/`None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemState {
    /// Identity of the item, exactly as the watcher announced it.
    pub service: String,
    pub category: String,
    pub id: String,
    pub title: String,
    /// Raw `Status` property. See [`ItemState::parsed_status`].
    pub status: String,
    pub icon_name: Option<String>,
    pub icon_theme_path: Option<String>,
    pub icon_pixmap: Option<Pixmap>,
    pub overlay_icon_name: Option<String>,
    pub attention_icon_name: Option<String>,
    pub attention_pixmap: Option<Pixmap>,
    pub attention_movie_name: Option<String>,
    /// Whether the item exports a dbusmenu.
    pub has_menu: bool,
    /// Whether the item only supports a context menu, not activation.
    pub item_is_menu: bool,
}

impl ItemState {
    pub fn parsed_status(&self) -> Option<Status> {
        self.status.parse().ok()
    }

    pub fn apply(&mut self, update: ItemUpdate) {
        match update {
            ItemUpdate::Title(title) => self.title = title,
            ItemUpdate::Status(status) => self.status = status,
            ItemUpdate::Icon { name, theme_path, pixmap } => {
                self.icon_name = name;
                self.icon_theme_path = theme_path;
                self.icon_pixmap = pixmap;
            }
            ItemUpdate::AttentionIcon { name, pixmap, movie_name } => {
                self.attention_icon_name = name;
                self.attention_pixmap = pixmap;
                self.attention_movie_name = movie_name;
            }
            ItemUpdate::OverlayIcon(name) => self.overlay_icon_name = name,
        }
    }
}

/// Which change signal an item emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemChange {
    Title,
    Icon,
    /// `NewStatus` carries the new status, if it could be decoded.
    Status(Option<String>),
    AttentionIcon,
    OverlayIcon,
}

/// Freshly read values for the properties covered by one [`ItemChange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemUpdate {
    Title(String),
    Status(String),
    Icon { name: Option<String>, theme_path: Option<String>, pixmap: Option<Pixmap> },
    AttentionIcon { name: Option<String>, pixmap: Option<Pixmap>, movie_name: Option<String> },
    OverlayIcon(Option<String>),
}

/// A StatusNotifierItem on the bus that can be queried.
#[derive(Clone)]
pub struct Item {
    /// Identity of the item, exactly as the watcher announced it.
    pub service: String,
    /// Bus name the item lives on.
    pub bus_name: String,
    /// The StatusNotifierItem that is wrapped by this instance.
    pub sni: proxy::StatusNotifierItemProxy<'static>,
}

impl Item {
    /// Create an instance from the service's address.
    ///
    /// The format of `service` is `{bus}{object_path}` (see [`ItemIdentity`]). Some watchers list
    /// just the unique bus name; the object path is then found by introspecting the item.
    pub async fn from_address(con: &zbus::Connection, service: &str) -> zbus::Result<Self> {
        let (addr, path) = match ItemIdentity::parse(service) {
            Some(identity) => (identity.bus_name().to_owned(), identity.object_path().to_owned()),
            None if service.starts_with(':') => (
                service.to_owned(),
                resolve_pathless_address(con, service, "/".to_owned())
                    .await?
                    .ok_or_else(|| zbus::Error::Failure(format!("no StatusNotifierItem found for {service}")))?,
            ),
            None => return Err(zbus::Error::Address(service.to_owned())),
        };

        let sni = proxy::StatusNotifierItemProxy::builder(con)
            .destination(addr.clone())?
            .path(path)?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;

        Ok(Self { service: service.to_owned(), bus_name: addr, sni })
    }

    /// Read every property of the item. Reads that fail or take longer than `timeout` leave the
    /// field empty.
    pub async fn fetch_state(&self, timeout: Duration) -> ItemState {
        let (category, id, title, status, icon, attention, overlay_icon_name, menu, item_is_menu) = tokio::join!(
            read_property(&self.service, "Category", timeout, self.sni.category()),
            read_property(&self.service, "Id", timeout, self.sni.id()),
            read_property(&self.service, "Title", timeout, self.sni.title()),
            read_property(&self.service, "Status", timeout, self.sni.status()),
            self.fetch_icon(timeout),
            self.fetch_attention_icon(timeout),
            self.fetch_overlay_icon(timeout),
            read_property(&self.service, "Menu", timeout, self.sni.menu()),
            read_property(&self.service, "ItemIsMenu", timeout, self.sni.item_is_menu()),
        );

        let mut state = ItemState {
            service: self.service.clone(),
            category: category.unwrap_or_default(),
            id: id.unwrap_or_default(),
            title: title.unwrap_or_default(),
            status: status.unwrap_or_default(),
            has_menu: menu.map_or(false, |path| path.as_str() != "/"),
            item_is_menu: item_is_menu.unwrap_or(false),
            ..Default::default()
        };
        state.apply(icon);
        state.apply(attention);
        state.apply(overlay_icon_name);
        state
    }

    /// Re-read only the properties that `change` announced as changed.
    pub async fn fetch_update(&self, change: ItemChange, timeout: Duration) -> ItemUpdate {
        match change {
            ItemChange::Title => {
                ItemUpdate::Title(read_property(&self.service, "Title", timeout, self.sni.title()).await.unwrap_or_default())
            }
            ItemChange::Status(Some(status)) => ItemUpdate::Status(status),
            ItemChange::Status(None) => {
                ItemUpdate::Status(read_property(&self.service, "Status", timeout, self.sni.status()).await.unwrap_or_default())
            }
            ItemChange::Icon => self.fetch_icon(timeout).await,
            ItemChange::AttentionIcon => self.fetch_attention_icon(timeout).await,
            ItemChange::OverlayIcon => self.fetch_overlay_icon(timeout).await,
        }
    }

    async fn fetch_icon(&self, timeout: Duration) -> ItemUpdate {
        let (name, theme_path, pixmaps) = tokio::join!(
            read_property(&self.service, "IconName", timeout, self.sni.icon_name()),
            read_property(&self.service, "IconThemePath", timeout, self.sni.icon_theme_path()),
            read_property(&self.service, "IconPixmap", timeout, self.sni.icon_pixmap()),
        );
        ItemUpdate::Icon {
            name: name.filter(|s| !s.is_empty()),
            theme_path: theme_path.filter(|s| !s.is_empty()),
            pixmap: pixmaps.and_then(Pixmap::from_sni_pixmaps),
        }
    }

    async fn fetch_attention_icon(&self, timeout: Duration) -> ItemUpdate {
        let (name, pixmaps, movie_name) = tokio::join!(
            read_property(&self.service, "AttentionIconName", timeout, self.sni.attention_icon_name()),
            read_property(&self.service, "AttentionIconPixmap", timeout, self.sni.attention_icon_pixmap()),
            read_property(&self.service, "AttentionMovieName", timeout, self.sni.attention_movie_name()),
        );
        ItemUpdate::AttentionIcon {
            name: name.filter(|s| !s.is_empty()),
            pixmap: pixmaps.and_then(Pixmap::from_sni_pixmaps),
            movie_name: movie_name.filter(|s| !s.is_empty()),
        }
    }

    async fn fetch_overlay_icon(&self, timeout: Duration) -> ItemUpdate {
        let name = read_property(&self.service, "OverlayIconName", timeout, self.sni.overlay_icon_name()).await;
        ItemUpdate::OverlayIcon(name.filter(|s| !s.is_empty()))
    }
}

/// Read one property, treating failures and timeouts as the property being absent.
async fn read_property<T, F>(service: &str, property: &'static str, timeout: Duration, call: F) -> Option<T>
where
    F: Future<Output = zbus::Result<T>>,
{
    match bus::with_timeout(timeout, property, call).await {
        Ok(value) => Some(value),
        Err(Error::DbusError(source)) => {
            let e = Error::PropertyFetchFailure { service: service.to_owned(), property, source };
            log::debug!("{}", e);
            None
        }
        Err(e) => {
            log::debug!("{} of {}: {}", property, service, e);
            None
        }
    }
}

#[derive(Deserialize)]
struct DBusNode {
    #[serde(default)]
    interface: Vec<DBusInterface>,

    #[serde(default)]
    node: Vec<DBusNode>,

    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Deserialize)]
struct DBusInterface {
    #[serde(rename = "@name")]
    name: String,
}

async fn resolve_pathless_address(con: &zbus::Connection, service: &str, path: String) -> zbus::Result<Option<String>> {
    let introspection_xml =
        IntrospectableProxy::builder(con).destination(service)?.path(path.as_str())?.build().await?.introspect().await?;

    let dbus_node = parse_introspection(&introspection_xml)?;

    if dbus_node.interface.iter().any(|interface| interface.name == names::ITEM_INTERFACE) {
        // This item implements the desired interface, so bubble it back up
        Ok(Some(path))
    } else {
        for node in dbus_node.node {
            if let Some(name) = node.name {
                if name == "StatusNotifierItem" {
                    // If this exists, then there's a good chance DBus may not think anything
                    // implements the desired interface, so just bubble this up instead.
                    return Ok(Some(join_to_path(&path, name)));
                }

                let path = Box::pin(resolve_pathless_address(con, service, join_to_path(&path, name))).await?;

                if path.is_some() {
                    // Return the first item found from a child
                    return Ok(path);
                }
            }
        }

        // No children had the item we want...
        Ok(None)
    }
}

fn parse_introspection(xml: &str) -> zbus::Result<DBusNode> {
    quick_xml::de::from_str::<DBusNode>(xml).map_err(|err| zbus::Error::Failure(err.to_string()))
}

fn join_to_path(path: &str, name: String) -> String {
    // Make sure we don't double-up on the leading slash
    format!("{path}/{name}", path = if path == "/" { "" } else { path })
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_status() {
        assert_eq!("Active".parse::<Status>(), Ok(Status::Active));
        assert_eq!("Passive".parse::<Status>(), Ok(Status::Passive));
        assert_eq!("NeedsAttention".parse::<Status>(), Ok(Status::NeedsAttention));
        assert_eq!("active".parse::<Status>(), Err(ParseStatusError));
    }

    #[test]
    fn test_apply_updates_in_place() {
        let mut state = ItemState { service: ":1.5/StatusNotifierItem".into(), title: "old".into(), ..Default::default() };
        state.apply(ItemUpdate::Title("new".into()));
        state.apply(ItemUpdate::Status("NeedsAttention".into()));
        state.apply(ItemUpdate::Icon {
            name: Some("nm-applet".into()),
            theme_path: None,
            pixmap: Pixmap::from_argb32(1, 1, vec![255, 0, 0, 0]),
        });

        assert_eq!(state.title, "new");
        assert_eq!(state.parsed_status(), Some(Status::NeedsAttention));
        assert_eq!(state.icon_name.as_deref(), Some("nm-applet"));
        assert_eq!(state.icon_pixmap.as_ref().map(|p| p.data.clone()), Some(vec![0, 0, 0, 255]));
        assert_eq!(state.service, ":1.5/StatusNotifierItem");
    }

    #[test]
    fn test_parse_introspection() {
        let xml = r#"
            <node>
              <interface name="org.freedesktop.DBus.Introspectable"/>
              <node name="org"/>
              <node name="StatusNotifierItem"/>
            </node>"#;
        let node = parse_introspection(xml).unwrap();
        assert_eq!(node.interface.len(), 1);
        let children: Vec<_> = node.node.into_iter().filter_map(|n| n.name).collect();
        assert_eq!(children, vec!["org", "StatusNotifierItem"]);
    }

    #[test]
    fn test_join_to_path() {
        assert_eq!(join_to_path("/", "org".into()), "/org");
        assert_eq!(join_to_path("/org", "kde".into()), "/org/kde");
    }
}
