use std::sync::{Arc, Mutex};

use futures::{stream::BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use zbus::{interface, Interface};

use crate::{
    bus, names, Error, EventQueue, Generation, HostIdentity, ItemIdentity, LifecycleEvent, Result, TrayConfig,
    WatcherRegistry,
};

/// Lifecycle of a [`Watcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Unstarted,
    AcquiringName,
    Running,
    /// The name was owned by someone else, or was taken from us. Terminal.
    NameLost,
    /// Shut down through [`WatcherHandle::stop`].
    Stopped,
}

/// An instance of [`org.kde.StatusNotifierWatcher`]. It only tracks what tray items and trays
/// exist, and doesn't have any logic for displaying items (for that, see [`Host`][`crate::Host`]).
///
/// While this is usually run alongside the tray, it can also be used standalone.
///
/// [`org.kde.StatusNotifierWatcher`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/
#[derive(Debug)]
pub struct Watcher {
    config: TrayConfig,
    queue: EventQueue,
}

impl Watcher {
    /// Create a new Watcher. Nothing happens until [`Watcher::start`] is called.
    pub fn new(config: TrayConfig, queue: EventQueue) -> Watcher {
        Watcher { config, queue }
    }

    /// Run the watcher on its own thread.
    ///
    /// Whether it got the well-known name is reported through the event queue:
    /// [`LifecycleEvent::WatcherAcquired`] or [`LifecycleEvent::WatcherLost`].
    pub fn start(self) -> Result<WatcherHandle> {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let (state_tx, state_rx) = tokio::sync::watch::channel(WatcherState::Unstarted);
        let cancel = CancellationToken::new();

        let thread = std::thread::Builder::new().name("sni-watcher".to_owned()).spawn({
            let cancel = cancel.clone();
            move || rt.block_on(run_watcher(self.config, self.queue, state_tx, cancel))
        })?;

        Ok(WatcherHandle { state: state_rx, cancel, thread: Some(thread) })
    }
}

/// Owner of a running [`Watcher`]. Dropping it stops the watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    state: tokio::sync::watch::Receiver<WatcherState>,
    cancel: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Release the name, drop all registrations and wait for the watcher thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("StatusNotifierWatcher thread panicked");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_watcher(
    config: TrayConfig,
    queue: EventQueue,
    state: tokio::sync::watch::Sender<WatcherState>,
    cancel: CancellationToken,
) {
    state.send_replace(WatcherState::AcquiringName);

    let registry = Arc::new(Mutex::new(WatcherRegistry::new()));
    let service = WatcherService {
        tasks: tokio::task::JoinSet::new(),
        registry: registry.clone(),
        queue: queue.clone(),
        cancel: cancel.clone(),
    };

    let acquired = tokio::select! {
        _ = cancel.cancelled() => {
            log::info!("tray-watcher: stopped before acquiring {}", names::WATCHER_BUS);
            state.send_replace(WatcherState::Stopped);
            return;
        }
        res = acquire(&config, service) => res,
    };
    let (con, mut name_lost) = match acquired {
        Ok(acquired) => acquired,
        Err(e) => {
            log::warn!("tray-watcher: {}", e);
            state.send_replace(WatcherState::NameLost);
            queue.enqueue(LifecycleEvent::WatcherLost);
            return;
        }
    };

    log::info!("tray-watcher: acquired {}", names::WATCHER_BUS);
    state.send_replace(WatcherState::Running);
    queue.enqueue(LifecycleEvent::WatcherAcquired);

    tokio::select! {
        _ = cancel.cancelled() => {
            log::info!("tray-watcher: stopping");
            state.send_replace(WatcherState::Stopped);
        }
        _ = name_lost.next() => {
            log::warn!("tray-watcher: lost {}", names::WATCHER_BUS);
            cancel.cancel();
            state.send_replace(WatcherState::NameLost);
            queue.enqueue(LifecycleEvent::WatcherLost);
        }
    }

    detach_from(&con, config.call_timeout).await;
    registry.lock().unwrap().clear(); // unwrap: mutex poisoning is okay
}

/// Connect, then serve the interface under the well-known name. Each step is bounded by the call
/// timeout. Returns the connection and a stream that yields once the name is lost.
async fn acquire(config: &TrayConfig, service: WatcherService) -> Result<(zbus::Connection, BoxStream<'static, ()>)> {
    let timeout = config.call_timeout;
    let con = bus::with_timeout(timeout, "connecting to the bus", config.bus.connect()).await?;

    // subscribe before requesting the name, so a loss can't slip through
    let dbus = bus::with_timeout(timeout, "creating the DBus proxy", zbus::fdo::DBusProxy::new(&con)).await?;
    let name_lost = bus::with_timeout(
        timeout,
        "subscribing to NameLost",
        dbus.receive_name_lost_with_args(&[(0, names::WATCHER_BUS)]),
    )
    .await?
    .map(|_| ())
    .boxed();

    let attached = match tokio::time::timeout(timeout, attach_to(&con, service)).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(format!("requesting {}", names::WATCHER_BUS))),
    };
    if let Err(e) = attached {
        if matches!(e, Error::NameConflict(_)) {
            log::warn!("tray-watcher: StatusNotifierWatcher might already exist");
        }
        detach_from(&con, timeout).await;
        return Err(e);
    }
    Ok((con, name_lost))
}

/// Serve the interface and request the well-known name. Never queues for, or replaces, an
/// existing owner.
async fn attach_to(con: &zbus::Connection, service: WatcherService) -> Result<()> {
    if !con.object_server().at(names::WATCHER_OBJECT, service).await? {
        return Err(Error::NameConflict(format!(
            "Object already exists at {} on this connection -- is StatusNotifierWatcher already running?",
            names::WATCHER_OBJECT
        )));
    }

    let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];
    use zbus::fdo::RequestNameReply::*;
    match con.request_name_with_flags(names::WATCHER_BUS, flags.into_iter().collect()).await {
        Ok(PrimaryOwner) | Ok(AlreadyOwner) => Ok(()),
        Ok(Exists) | Ok(InQueue) | Err(zbus::Error::NameTaken) => Err(Error::NameConflict(names::WATCHER_BUS.to_owned())),
        Err(e) => Err(e.into()),
    }
}

/// Remove the interface (which drops the registry's liveness watches) and release the name.
async fn detach_from(con: &zbus::Connection, timeout: std::time::Duration) {
    let object_server = con.object_server();
    if let Err(e) =
        bus::with_timeout(timeout, "removing the watcher object", object_server.remove::<WatcherService, _>(names::WATCHER_OBJECT)).await
    {
        log::debug!("tray-watcher: {}", e);
    }
    if let Err(e) = bus::with_timeout(timeout, "releasing the watcher name", con.release_name(names::WATCHER_BUS)).await {
        log::debug!("tray-watcher: {}", e);
    }
}

/// Implementation of the `StatusNotifierWatcher` service.
///
/// Methods and properties correspond to methods and properties on the DBus service that can be
/// used by others, while signals are events that we generate that other services listen to.
#[derive(Debug)]
struct WatcherService {
    /// One liveness watch per registration.
    tasks: tokio::task::JoinSet<()>,

    // Intentionally using std::sync::Mutex instead of tokio's async mutex, since we don't need to
    // hold the mutex across an await.
    //
    // See <https://docs.rs/tokio/latest/tokio/sync/struct.Mutex.html#which-kind-of-mutex-should-you-use>
    registry: Arc<Mutex<WatcherRegistry>>,
    queue: EventQueue,
    cancel: CancellationToken,
}

#[interface(name = "org.kde.StatusNotifierWatcher")]
impl WatcherService {
    /// RegisterStatusNotifierHost method
    async fn register_status_notifier_host(
        &mut self,
        service: &str,
        #[zbus(header)] hdr: zbus::message::Header<'_>,
        #[zbus(connection)] con: &zbus::Connection,
        #[zbus(signal_context)] ctxt: zbus::SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        if service.is_empty() {
            log::warn!("tray-watcher: rejected host registration with empty service name");
            return Err(Error::protocol_violation(service, "empty service name").into());
        }
        let host = HostIdentity(sender_of(&hdr)?);

        let (generation, added_first) = {
            let mut registry = self.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
            match registry.add_host(host.clone()) {
                Some(added) => added,
                // we're already tracking them
                None => return Ok(()),
            }
        };
        log::info!("tray-watcher: new host: {} ({})", host, service);

        // watch first, so the registration ends with the host no matter what happens below
        self.tasks.spawn(unregister_host_on_exit(
            con.to_owned(),
            ctxt.to_owned(),
            self.registry.clone(),
            self.cancel.clone(),
            host,
            generation,
        ));

        if added_first {
            if let Err(e) = self.is_status_notifier_host_registered_changed(&ctxt).await {
                log::error!("tray-watcher: failed to signal Watcher: {}", e);
            }
        }
        if let Err(e) = WatcherService::status_notifier_host_registered(&ctxt).await {
            log::error!("tray-watcher: failed to signal Watcher: {}", e);
        }

        Ok(())
    }

    /// StatusNotifierHostRegistered signal.
    #[zbus(signal)]
    async fn status_notifier_host_registered(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// StatusNotifierHostUnregistered signal
    #[zbus(signal)]
    async fn status_notifier_host_unregistered(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// IsStatusNotifierHostRegistered property
    #[zbus(property)]
    async fn is_status_notifier_host_registered(&self) -> bool {
        self.registry.lock().unwrap().has_hosts() // unwrap: mutex poisoning is okay
    }

    // ------------------------------------------------------------------------

    /// RegisterStatusNotifierItem method
    async fn register_status_notifier_item(
        &mut self,
        service: &str,
        #[zbus(header)] hdr: zbus::message::Header<'_>,
        #[zbus(connection)] con: &zbus::Connection,
        #[zbus(signal_context)] ctxt: zbus::SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let sender = sender_of(&hdr)?;
        let item = match ItemIdentity::derive(&sender, service) {
            Ok(item) => item,
            Err(e) => {
                log::warn!("tray-watcher: {}", e);
                return Err(e.into());
            }
        };
        let owner = match zbus::names::BusName::try_from(item.bus_name().to_owned()) {
            Ok(owner) => owner,
            Err(e) => {
                log::warn!("tray-watcher: received invalid bus name {:?}: {}", service, e);
                return Err(zbus::fdo::Error::InvalidArgs(e.to_string()));
            }
        };

        let generation = {
            let mut registry = self.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
            match registry.add_item(item.clone()) {
                Some(generation) => generation,
                None => {
                    // we're already tracking them
                    log::info!("tray-watcher: new item: {} (duplicate)", item);
                    return Ok(());
                }
            }
        };
        log::info!("tray-watcher: new item: {}", item);
        let name = item.to_string();

        // watch first, so the registration ends with the item no matter what happens below
        self.tasks.spawn(unregister_item_on_exit(ItemWatch {
            con: con.to_owned(),
            ctxt: ctxt.to_owned(),
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            cancel: self.cancel.clone(),
            item,
            owner,
            generation,
        }));
        self.queue.enqueue(LifecycleEvent::WatcherItemAdded(name.clone()));

        if let Err(e) = self.registered_status_notifier_items_changed(&ctxt).await {
            log::error!("tray-watcher: failed to signal Watcher: {}", e);
        }
        if let Err(e) = WatcherService::status_notifier_item_registered(&ctxt, &name).await {
            log::error!("tray-watcher: failed to signal Watcher: {}", e);
        }

        Ok(())
    }

    /// StatusNotifierItemRegistered signal
    #[zbus(signal)]
    async fn status_notifier_item_registered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// StatusNotifierItemUnregistered signal
    #[zbus(signal)]
    async fn status_notifier_item_unregistered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// RegisteredStatusNotifierItems property
    #[zbus(property)]
    async fn registered_status_notifier_items(&self) -> Vec<String> {
        self.registry.lock().unwrap().item_names() // unwrap: mutex poisoning is okay
    }

    // ------------------------------------------------------------------------

    /// ProtocolVersion property
    #[zbus(property)]
    fn protocol_version(&self) -> i32 {
        names::PROTOCOL_VERSION
    }
}

impl WatcherService {
    /// Equivalent to `is_status_notifier_host_registered_invalidate`, but without requiring
    /// `self`.
    async fn is_status_notifier_host_registered_refresh(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &["IsStatusNotifierHostRegistered"],
        )
        .await
    }

    /// Equivalent to `registered_status_notifier_items_invalidate`, but without requiring `self`.
    async fn registered_status_notifier_items_refresh(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &["RegisteredStatusNotifierItems"],
        )
        .await
    }
}

fn sender_of(hdr: &zbus::message::Header<'_>) -> zbus::fdo::Result<String> {
    match hdr.sender() {
        Some(sender) => Ok(sender.to_string()),
        None => {
            log::warn!("tray-watcher: unknown sender");
            Err(zbus::fdo::Error::InvalidArgs("Unknown bus address".into()))
        }
    }
}

/// Everything the liveness watch of one item registration needs, moved into its task.
struct ItemWatch {
    con: zbus::Connection,
    ctxt: zbus::SignalContext<'static>,
    registry: Arc<Mutex<WatcherRegistry>>,
    queue: EventQueue,
    cancel: CancellationToken,
    item: ItemIdentity,
    owner: zbus::names::BusName<'static>,
    generation: Generation,
}

async fn unregister_item_on_exit(watch: ItemWatch) {
    let ItemWatch { con, ctxt, registry, queue, cancel, item, owner, generation } = watch;

    if let Err(e) = bus::wait_for_service_exit(&con, owner.clone()).await {
        log::error!("tray-watcher: failed to wait for service exit: {}", e);
    }
    if cancel.is_cancelled() {
        return;
    }

    let removed = {
        let mut registry = registry.lock().unwrap(); // unwrap: mutex poisoning is okay
        registry.remove_item(&item, generation)
    };
    if !removed {
        return;
    }
    log::info!("tray-watcher: {}, removing item {}", Error::PeerLost(owner.to_string()), item);
    queue.enqueue(LifecycleEvent::WatcherItemRemoved(item.to_string()));

    if let Err(e) = WatcherService::registered_status_notifier_items_refresh(&ctxt).await {
        log::error!("tray-watcher: failed to signal Watcher: {}", e);
    }
    if let Err(e) = WatcherService::status_notifier_item_unregistered(&ctxt, &item.to_string()).await {
        log::error!("tray-watcher: failed to signal Watcher: {}", e);
    }
}

async fn unregister_host_on_exit(
    con: zbus::Connection,
    ctxt: zbus::SignalContext<'static>,
    registry: Arc<Mutex<WatcherRegistry>>,
    cancel: CancellationToken,
    host: HostIdentity,
    generation: Generation,
) {
    let owner = match zbus::names::BusName::try_from(host.0.clone()) {
        Ok(owner) => owner,
        Err(e) => {
            log::error!("tray-watcher: cannot watch host {}: {}", host, e);
            return;
        }
    };
    if let Err(e) = bus::wait_for_service_exit(&con, owner).await {
        log::error!("tray-watcher: failed to wait for service exit: {}", e);
    }
    if cancel.is_cancelled() {
        return;
    }

    let removed_last = {
        let mut registry = registry.lock().unwrap(); // unwrap: mutex poisoning is okay
        registry.remove_host(&host, generation)
    };
    let Some(removed_last) = removed_last else { return };
    log::info!("tray-watcher: lost host: {}", host);

    if removed_last {
        if let Err(e) = WatcherService::is_status_notifier_host_registered_refresh(&ctxt).await {
            log::error!("tray-watcher: failed to signal Watcher: {}", e);
        }
    }
    if let Err(e) = WatcherService::status_notifier_host_unregistered(&ctxt).await {
        log::error!("tray-watcher: failed to signal Watcher: {}", e);
    }
}
