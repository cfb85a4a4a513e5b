use eletto_bus::BusError;

#[derive(Debug, thiserror::Error)]
pub enum ElectorError {
    /// A candidacy is already in flight on this elector. Distinct from a
    /// deferred candidacy, which is a normal `Ok(false)` outcome.
    #[error("another apply attempt is already running")]
    AttemptInFlight,

    #[error("elector is closed")]
    Closed,

    #[error("bus `{0}`")]
    Bus(#[from] BusError),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ElectorError>;
