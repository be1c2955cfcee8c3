use std::{future::Future, time::Duration};

use futures::StreamExt;

use crate::{Error, Result};

/// Run a bus call, giving up after `timeout`.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = zbus::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::Timeout(what.to_owned())),
    }
}

/// Wait for a DBus service to disappear
pub(crate) async fn wait_for_service_exit(
    con: &zbus::Connection,
    service: zbus::names::BusName<'_>,
) -> zbus::fdo::Result<()> {
    watch_service_exit(con, service.into_owned()).await?.await
}

/// Subscribe to the owner changes of `service`. The returned future resolves once the service
/// is gone, including when it was already gone by the time the future is first polled.
pub(crate) async fn watch_service_exit(
    con: &zbus::Connection,
    service: zbus::names::BusName<'static>,
) -> zbus::fdo::Result<impl Future<Output = zbus::fdo::Result<()>>> {
    let dbus = zbus::fdo::DBusProxy::new(con).await?;
    let mut owner_changes = dbus.receive_name_owner_changed_with_args(&[(0, service.as_str())]).await?;

    Ok(async move {
        if !dbus.name_has_owner(service).await? {
            // service has already disappeared
            return Ok(());
        }

        while let Some(sig) = owner_changes.next().await {
            let args = sig.args()?;
            if args.new_owner().is_none() {
                break;
            }
        }

        Ok(())
    })
}
