use miette::Diagnostic;
use thiserror::Error;

use crate::geo::EntityId;

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("position ({lon}, {lat}) is outside geographic bounds")]
    #[diagnostic(
        help = "longitude must be within -180..=180 and latitude within -90..=90",
        code = "convoy::invalid_position"
    )]
    InvalidPosition { lon: f64, lat: f64 },
    #[error("route for {0} needs at least two positions")]
    #[diagnostic(code = "convoy::route_too_short")]
    RouteTooShort(EntityId),
    #[error("random walk for {0} needs an initial position")]
    #[diagnostic(
        help = "set `initial = [lon, lat]` on the entity",
        code = "convoy::missing_initial_position"
    )]
    MissingInitialPosition(EntityId),
    #[error("random walk spread {spread} for {entity} must be a finite, non-negative number of degrees")]
    #[diagnostic(code = "convoy::invalid_spread")]
    InvalidSpread { entity: EntityId, spread: f64 },
    #[error("entity {0} is already tracked")]
    DuplicateEntity(EntityId),
    #[error("location capability unavailable")]
    CapabilityUnavailable,
    #[error("location acquisition failed: {0}")]
    AcquisitionFailed(#[from] LocationError),
    #[error("location request already in flight")]
    AcquisitionInFlight,
    #[error("map surface not ready")]
    SurfaceNotReady,
    #[error("path layer for {0} used before it was created")]
    #[diagnostic(
        help = "call `ensure_path_layer` before `set_path_geometry`",
        code = "convoy::missing_layer"
    )]
    MissingLayer(EntityId),
    #[error("tracking session closed")]
    SessionClosed,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config not found")]
    #[diagnostic(
        help = "pass --config, set CONVOY_CONFIG, or run with --demo",
        code = "convoy::config_not_found"
    )]
    ConfigNotFound,
    #[error("toml parsing failed")]
    Toml(#[from] toml::de::Error),
}

#[derive(Error, Debug, Diagnostic, Clone, Copy, PartialEq, Eq)]
pub enum LocationError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out")]
    Timeout,
}

/// Failure reported by the map rendering engine itself.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[error("map backend: {0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        BackendError(msg.into())
    }
}
