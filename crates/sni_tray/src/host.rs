use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use futures::{stream::BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    bus, names, proxy, Error, EventQueue, IconError, IconResolver, Item, ItemChange, ItemMirror, ItemState,
    LifecycleEvent, Pixmap, Result, Status, TrayConfig,
};

/// Lifecycle of a [`Host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Initializing,
    AcquiringOwnName,
    WatchingForWatcher,
    /// Registered with a watcher, item events are being processed.
    WatcherPresent,
    WatcherAbsent,
    /// The host thread has ended, either through [`HostHandle::stop`] or because the bus
    /// connection failed.
    Stopped,
}

/// One item of [`HostHandle::get_items`], with its icon resolved to pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrayIcon {
    pub service: String,
    pub title: String,
    pub status: String,
    pub pixmap: Pixmap,
}

/// A [StatusNotifierHost]: finds the watcher, registers with it and keeps an [`ItemMirror`] of
/// all registered items up to date.
///
/// [StatusNotifierHost]: https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierHost/
pub struct Host {
    config: TrayConfig,
    queue: EventQueue,
    resolver: Arc<dyn IconResolver>,
}

impl Host {
    /// Fails with [`Error::ResourceInitFailure`] if `resolver` can't resolve icons at all.
    pub fn new(config: TrayConfig, queue: EventQueue, resolver: Arc<dyn IconResolver>) -> Result<Self> {
        if !resolver.is_available() {
            return Err(Error::ResourceInitFailure("the icon resolver has no usable search paths".to_owned()));
        }
        Ok(Self { config, queue, resolver })
    }

    /// Run the host on its own thread.
    ///
    /// With `assume_watcher_present`, the host registers with the watcher right away instead of
    /// first checking whether `org.kde.StatusNotifierWatcher` has an owner. This is what a
    /// process that just started the watcher itself wants.
    pub fn start(self, assume_watcher_present: bool) -> Result<HostHandle> {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let (state_tx, state_rx) = tokio::sync::watch::channel(HostState::Initializing);
        let mirror = Arc::new(Mutex::new(ItemMirror::new()));
        let cancel = CancellationToken::new();

        let thread = std::thread::Builder::new().name("sni-host".to_owned()).spawn({
            let config = self.config.clone();
            let queue = self.queue.clone();
            let mirror = mirror.clone();
            let cancel = cancel.clone();
            move || {
                rt.block_on(async {
                    if let Err(e) = serve(config, queue.clone(), mirror, &state_tx, cancel, assume_watcher_present).await {
                        log::error!("tray-host: {}", e);
                        queue.enqueue(LifecycleEvent::HostLost);
                    }
                    state_tx.send_replace(HostState::Stopped);
                })
            }
        })?;

        Ok(HostHandle {
            state: state_rx,
            mirror,
            resolver: self.resolver,
            icon_size: self.config.icon_size,
            cancel,
            thread: Some(thread),
        })
    }
}

/// Owner of a running [`Host`]. Dropping it stops the host.
pub struct HostHandle {
    state: tokio::sync::watch::Receiver<HostState>,
    mirror: Arc<Mutex<ItemMirror>>,
    resolver: Arc<dyn IconResolver>,
    icon_size: u32,
    cancel: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl HostHandle {
    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    /// A copy of the current item states.
    pub fn snapshot(&self) -> ItemMirror {
        self.mirror.lock().unwrap().clone() // unwrap: mutex poisoning is okay
    }

    /// Every item whose icon could be resolved, in the order the items appeared.
    pub fn get_items(&self) -> Vec<TrayIcon> {
        let items = self.snapshot();
        items
            .iter()
            .filter_map(|item| match resolve_icon(self.resolver.as_ref(), item, self.icon_size) {
                Ok(pixmap) => Some(TrayIcon {
                    service: item.service.clone(),
                    title: item.title.clone(),
                    status: item.status.clone(),
                    pixmap,
                }),
                Err(e) => {
                    log::warn!("tray-host: skipping {}: {}", item.service, e);
                    None
                }
            })
            .collect()
    }

    /// Release the host name and wait for the host thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("StatusNotifierHost thread panicked");
            }
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Turn an item's icon into pixels.
///
/// "Visualizations are encouraged to prefer icon names over icon pixmaps if both are available."
/// The name is first looked up on its own, then once more with the item's theme path. If that
/// fails too, the pixmap the item sent is used. Items that need attention use their attention
/// icon if they have one.
pub fn resolve_icon(resolver: &dyn IconResolver, item: &ItemState, size: u32) -> std::result::Result<Pixmap, IconError> {
    let wants_attention = item.parsed_status() == Some(Status::NeedsAttention);
    let (icon_name, pixmap) = match (&item.attention_icon_name, &item.attention_pixmap) {
        (Some(name), pixmap) if wants_attention => (Some(name), pixmap.as_ref().or(item.icon_pixmap.as_ref())),
        (None, Some(pixmap)) if wants_attention => (item.icon_name.as_ref(), Some(pixmap)),
        _ => (item.icon_name.as_ref(), item.icon_pixmap.as_ref()),
    };

    if let Some(icon_name) = icon_name {
        match resolver.resolve(icon_name, None, size) {
            Ok(p) => return Ok(p),
            Err(e) => log::debug!("tray-host: looking up {:?} for {}: {}", icon_name, item.service, e),
        }
        if let Some(theme_path) = &item.icon_theme_path {
            match resolver.resolve(icon_name, Some(Path::new(theme_path)), size) {
                Ok(p) => return Ok(p),
                Err(e) => log::debug!("tray-host: looking up {:?} for {}: {}", icon_name, item.service, e),
            }
        }
    }

    match pixmap {
        Some(pixmap) => Ok(pixmap.scaled(size)),
        None if icon_name.is_some() => Err(IconError::NotFound {
            icon_name: icon_name.cloned().unwrap_or_default(),
            theme_path: item.icon_theme_path.as_ref().map(Into::into),
        }),
        None => Err(IconError::NotAvailable),
    }
}

/// Claim `org.freedesktop.StatusNotifierHost-<pid>`, or `-<pid>-<n>` if another host in this
/// process already has it.
async fn acquire_host_name(con: &zbus::Connection) -> zbus::Result<String> {
    // From <https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierHost/>:
    //
    // Instances of this service are registered on the Dbus session bus, under a name on the
    // form org.freedesktop.StatusNotifierHost-id where id is an unique identifier, that keeps
    // the names unique on the bus, such as the process-id of the application or another type
    // of identifier if more that one StatusNotifierHost is registered by the same process.
    let pid = std::process::id();
    let mut i = 0;
    loop {
        let wellknown_name = match i {
            0 => format!("{}-{}", names::HOST_BUS_PREFIX, pid),
            i => format!("{}-{}-{}", names::HOST_BUS_PREFIX, pid, i),
        };
        let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];

        use zbus::fdo::RequestNameReply::*;
        match con.request_name_with_flags(wellknown_name.as_str(), flags.into_iter().collect()).await {
            Ok(PrimaryOwner) => return Ok(wellknown_name),
            Ok(Exists) | Ok(AlreadyOwner) | Err(zbus::Error::NameTaken) => {}
            Ok(InQueue) => {
                return Err(zbus::Error::Failure(format!("queued for {} even though we specified DoNotQueue", wellknown_name)))
            }
            Err(e) => return Err(e),
        };

        i += 1;
    }
}

enum RegistrationEvent {
    NewItem(String),
    GoneItem(String),
}

enum ItemSignal {
    Changed(String, ItemChange),
    Vanished(String),
}

/// An item the host is subscribed to. Dropping it stops the subscription.
struct LiveItem {
    item: Item,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for LiveItem {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct HostLoop<'a> {
    con: zbus::Connection,
    host_name: String,
    config: TrayConfig,
    queue: EventQueue,
    state: &'a tokio::sync::watch::Sender<HostState>,
    mirror: Arc<Mutex<ItemMirror>>,
    items: HashMap<String, LiveItem>,
    item_signals: mpsc::UnboundedSender<ItemSignal>,
}

async fn serve(
    config: TrayConfig,
    queue: EventQueue,
    mirror: Arc<Mutex<ItemMirror>>,
    state: &tokio::sync::watch::Sender<HostState>,
    cancel: CancellationToken,
    assume_watcher_present: bool,
) -> Result<()> {
    let timeout = config.call_timeout;
    let con = bus::with_timeout(timeout, "connecting to the bus", config.bus.connect()).await?;

    state.send_replace(HostState::AcquiringOwnName);
    let host_name = bus::with_timeout(timeout, "acquiring the host name", acquire_host_name(&con)).await?;
    log::info!("tray-host: acquired {}", host_name);

    let (tx, item_signals) = mpsc::unbounded_channel();
    let mut host = HostLoop { con, host_name, config, queue, state, mirror, items: HashMap::new(), item_signals: tx };
    let result = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        res = host.run(item_signals, assume_watcher_present) => res,
    };

    // stop item subscriptions before giving up the name
    host.items.clear();
    if let Err(e) = bus::with_timeout(timeout, "releasing the host name", host.con.release_name(host.host_name.as_str())).await {
        log::debug!("tray-host: {}", e);
    }
    result
}

/// Whether the host is registered with a watcher, and with which owner of the watcher name if
/// that is known.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WatcherLink {
    Detached,
    Attached(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatcherTransition {
    Appeared,
    Vanished,
    Unchanged,
}

impl WatcherLink {
    /// Interpret a `NameOwnerChanged` for the watcher name. A new owner that we are already
    /// attached to is not a reappearance.
    fn transition(&self, new_owner: Option<&str>) -> WatcherTransition {
        match (self, new_owner) {
            (WatcherLink::Detached, None) => WatcherTransition::Unchanged,
            (WatcherLink::Attached(_), None) => WatcherTransition::Vanished,
            (WatcherLink::Attached(Some(current)), Some(new)) if current == new => WatcherTransition::Unchanged,
            (_, Some(_)) => WatcherTransition::Appeared,
        }
    }
}

async fn next_registration(registrations: &mut Option<BoxStream<'static, RegistrationEvent>>) -> Option<RegistrationEvent> {
    match registrations {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl HostLoop<'_> {
    async fn run(&mut self, mut item_signals: mpsc::UnboundedReceiver<ItemSignal>, assume_watcher_present: bool) -> Result<()> {
        self.state.send_replace(HostState::WatchingForWatcher);
        let dbus = zbus::fdo::DBusProxy::new(&self.con).await?;
        let mut watcher_owner = dbus.receive_name_owner_changed_with_args(&[(0, names::WATCHER_BUS)]).await?;

        let watcher = zbus::names::BusName::try_from(names::WATCHER_BUS).map_err(zbus::Error::from)?;
        // an error here just means nobody owns the name yet
        let owner = dbus.get_name_owner(watcher).await.ok().map(|owner| owner.to_string());
        let (mut link, mut registrations) = if assume_watcher_present || owner.is_some() {
            (WatcherLink::Attached(owner), self.attach_to_watcher().await)
        } else {
            log::info!("tray-host: waiting for {} to appear", names::WATCHER_BUS);
            self.state.send_replace(HostState::WatcherAbsent);
            (WatcherLink::Detached, None)
        };

        loop {
            tokio::select! {
                sig = watcher_owner.next() => {
                    let Some(sig) = sig else { return Ok(()) };
                    let new_owner = match sig.args() {
                        Ok(args) => {
                            let new_owner: &Option<zbus::names::UniqueName<'_>> = args.new_owner();
                            new_owner.as_ref().map(|owner| owner.to_string())
                        }
                        Err(e) => {
                            log::warn!("tray-host: undecodable NameOwnerChanged: {}", e);
                            continue;
                        }
                    };
                    match link.transition(new_owner.as_deref()) {
                        WatcherTransition::Appeared => {
                            log::info!("tray-host: {} appeared", names::WATCHER_BUS);
                            registrations = self.attach_to_watcher().await;
                            link = WatcherLink::Attached(new_owner);
                        }
                        WatcherTransition::Vanished => {
                            log::warn!("tray-host: {} vanished", names::WATCHER_BUS);
                            registrations = None;
                            link = WatcherLink::Detached;
                            self.state.send_replace(HostState::WatcherAbsent);
                            self.queue.enqueue(LifecycleEvent::HostLost);
                        }
                        WatcherTransition::Unchanged => {}
                    }
                }
                Some(ev) = next_registration(&mut registrations) => match ev {
                    RegistrationEvent::NewItem(service) => self.add_item(&service).await,
                    RegistrationEvent::GoneItem(service) => self.remove_item(&service),
                },
                Some(sig) = item_signals.recv() => match sig {
                    ItemSignal::Changed(service, change) => self.update_item(&service, change).await,
                    ItemSignal::Vanished(service) => {
                        log::info!("tray-host: {}", Error::PeerLost(service.clone()));
                        self.remove_item(&service);
                    }
                },
            }
        }
    }

    /// Register with the watcher, subscribe to its item signals, then reconcile the mirror with
    /// its list of items. Returns the stream of registration events, or `None` if subscribing
    /// failed.
    async fn attach_to_watcher(&mut self) -> Option<BoxStream<'static, RegistrationEvent>> {
        let timeout = self.config.call_timeout;
        let snw: proxy::StatusNotifierWatcherProxy<'static> = match proxy::StatusNotifierWatcherProxy::builder(&self.con)
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await
        {
            Ok(snw) => snw,
            Err(e) => {
                log::error!("tray-host: could not create watcher proxy: {}", e);
                return None;
            }
        };

        // registering is best-effort, the items are what matters
        if let Err(e) = bus::with_timeout(timeout, "RegisterStatusNotifierHost", snw.register_status_notifier_host(&self.host_name)).await
        {
            log::warn!("tray-host: failed to register as host: {}", e);
        }
        self.state.send_replace(HostState::WatcherPresent);
        self.queue.enqueue(LifecycleEvent::HostAcquired);

        // subscribe first, so no registration gets lost between listing and listening
        let subscriptions = futures::try_join!(
            snw.receive_status_notifier_item_registered(),
            snw.receive_status_notifier_item_unregistered()
        );
        let (new_items, gone_items) = match subscriptions {
            Ok(streams) => streams,
            Err(e) => {
                log::error!("tray-host: could not subscribe to the watcher's signals: {}", e);
                return None;
            }
        };
        let new_items = new_items.filter_map(|sig| async move {
            match sig.args() {
                Ok(args) => Some(RegistrationEvent::NewItem(args.service.to_owned())),
                Err(e) => {
                    log::warn!("tray-host: undecodable StatusNotifierItemRegistered: {}", e);
                    None
                }
            }
        });
        let gone_items = gone_items.filter_map(|sig| async move {
            match sig.args() {
                Ok(args) => Some(RegistrationEvent::GoneItem(args.service.to_owned())),
                Err(e) => {
                    log::warn!("tray-host: undecodable StatusNotifierItemUnregistered: {}", e);
                    None
                }
            }
        });
        let events = futures::stream::select(new_items, gone_items).boxed();

        let registered = match bus::with_timeout(timeout, "RegisteredStatusNotifierItems", snw.registered_status_notifier_items()).await {
            Ok(items) => items,
            Err(e) => {
                // an unreadable list says nothing about which items are gone
                log::warn!("tray-host: could not list registered items, keeping the current ones: {}", e);
                return Some(events);
            }
        };
        self.reconcile(registered).await;

        Some(events)
    }

    /// Drop mirrored items the watcher doesn't list and add the ones that are new.
    async fn reconcile(&mut self, registered: Vec<String>) {
        let stale = self.mirror.lock().unwrap().stale(&registered); // unwrap: mutex poisoning is okay
        for service in stale {
            self.remove_item(&service);
        }
        for service in registered {
            self.add_item(&service).await;
        }
    }

    async fn add_item(&mut self, service: &str) {
        if self.items.contains_key(service) {
            log::debug!("tray-host: got duplicate new item: {:?}", service);
            return;
        }

        let timeout = self.config.call_timeout;
        let item = match bus::with_timeout(timeout, service, Item::from_address(&self.con, service)).await {
            Ok(item) => item,
            Err(e) => {
                log::warn!("tray-host: could not create StatusNotifierItem from address {:?}: {}", service, e);
                return;
            }
        };
        // subscribe before reading, so no change in between gets lost
        let (subscribed_tx, subscribed) = tokio::sync::oneshot::channel();
        let task = tokio::spawn({
            let item = item.clone();
            let con = self.con.clone();
            let tx = self.item_signals.clone();
            async move {
                if let Err(e) = watch_item(con, item, tx, subscribed_tx).await {
                    log::warn!("tray-host: lost track of an item: {}", e);
                }
            }
        });
        let live = LiveItem { item: item.clone(), task };
        if !matches!(tokio::time::timeout(timeout, subscribed).await, Ok(Ok(()))) {
            log::warn!("tray-host: could not subscribe to the signals of {}", service);
            return;
        }

        // changes signalled while reading wait in the channel until the item is known
        let state = item.fetch_state(timeout).await;
        self.items.insert(service.to_owned(), live);

        let inserted = self.mirror.lock().unwrap().insert(state); // unwrap: mutex poisoning is okay
        if inserted {
            log::info!("tray-host: new item: {}", service);
            self.queue.enqueue(LifecycleEvent::HostItemAdded(service.to_owned()));
        }
    }

    fn remove_item(&mut self, service: &str) {
        self.items.remove(service);
        let removed = self.mirror.lock().unwrap().remove(service); // unwrap: mutex poisoning is okay
        if removed.is_some() {
            log::info!("tray-host: removed item: {}", service);
            self.queue.enqueue(LifecycleEvent::HostItemRemoved(service.to_owned()));
        }
    }

    async fn update_item(&mut self, service: &str, change: ItemChange) {
        let Some(live) = self.items.get(service) else { return };
        let item = live.item.clone();
        let update = item.fetch_update(change, self.config.call_timeout).await;

        let updated = {
            let mut mirror = self.mirror.lock().unwrap(); // unwrap: mutex poisoning is okay
            match mirror.get_mut(service) {
                Some(state) => {
                    state.apply(update);
                    true
                }
                // removed while we were fetching
                None => false,
            }
        };
        if updated {
            self.queue.enqueue(LifecycleEvent::HostItemChanged(service.to_owned()));
        }
    }
}

/// Forward the change signals of one item to the host loop until its bus name disappears.
///
/// `subscribed` fires once the change signals and the exit of the item are subscribed to.
async fn watch_item(
    con: zbus::Connection,
    item: Item,
    tx: mpsc::UnboundedSender<ItemSignal>,
    subscribed: tokio::sync::oneshot::Sender<()>,
) -> zbus::Result<()> {
    let service = item.service.clone();
    let owner = zbus::names::BusName::try_from(item.bus_name.clone())?;

    let mut title_updates = item.sni.receive_new_title().await?;
    let mut icon_updates = item.sni.receive_new_icon().await?;
    let mut status_updates = item.sni.receive_new_status().await?;
    let mut attention_updates = item.sni.receive_new_attention_icon().await?;
    let mut overlay_updates = item.sni.receive_new_overlay_icon().await?;
    let exit = bus::watch_service_exit(&con, owner).await?;
    tokio::pin!(exit);
    let _ = subscribed.send(());

    loop {
        let change = tokio::select! {
            Some(_) = title_updates.next() => ItemChange::Title,
            Some(_) = icon_updates.next() => ItemChange::Icon,
            Some(sig) = status_updates.next() => ItemChange::Status(sig.args().ok().map(|args| args.status.to_owned())),
            Some(_) = attention_updates.next() => ItemChange::AttentionIcon,
            Some(_) = overlay_updates.next() => ItemChange::OverlayIcon,
            res = &mut exit => {
                if let Err(e) = res {
                    log::warn!("tray-host: failed to wait for {} to exit: {}", service, e);
                }
                let _ = tx.send(ItemSignal::Vanished(service));
                return Ok(());
            }
        };
        if tx.send(ItemSignal::Changed(service.clone(), change)).is_err() {
            return Ok(());
        }
    }
}
