use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error")]
    DbusError(#[from] zbus::Error),
    #[error("Service name {service:?} was rejected: {reason}")]
    ProtocolViolation { service: String, reason: &'static str },
    #[error("{0} is already owned by another process")]
    NameConflict(String),
    #[error("{0} disappeared from the bus")]
    PeerLost(String),
    #[error("Icon backend unavailable: {0}")]
    ResourceInitFailure(String),
    #[error("Failed to read {property} of {service}")]
    PropertyFetchFailure {
        service: String,
        property: &'static str,
        #[source]
        source: zbus::Error,
    },
    #[error("{0} timed out")]
    Timeout(String),
    #[error("Failed to set up the runtime")]
    Runtime(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn protocol_violation(service: &str, reason: &'static str) -> Self {
        Error::ProtocolViolation { service: service.to_owned(), reason }
    }
}

impl From<Error> for zbus::fdo::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::ProtocolViolation { .. } => zbus::fdo::Error::InvalidArgs(e.to_string()),
            Error::DbusError(zbus::Error::FDO(e)) => *e,
            e => zbus::fdo::Error::Failed(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
