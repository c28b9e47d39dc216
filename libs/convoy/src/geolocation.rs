use std::{cell::Cell, future::Future, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    error::{Error, LocationError},
    geo::Position,
};

/// Raw reading from a device location capability, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub lon: f64,
    pub lat: f64,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct LocationOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
        }
    }
}

/// A device's "get current position" capability.
pub trait LocationProvider {
    fn current_position(
        &self,
        options: &LocationOptions,
    ) -> impl Future<Output = Result<Fix, LocationError>>;
}

/// Provider that always reports the same fix.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Position);

impl LocationProvider for FixedLocation {
    async fn current_position(&self, _options: &LocationOptions) -> Result<Fix, LocationError> {
        Ok(Fix {
            lon: self.0.lon(),
            lat: self.0.lat(),
            accuracy_m: Some(0.0),
        })
    }
}

/// Single-shot position acquisition from an optional device capability.
///
/// Failures go to the tracing diagnostics channel; callers only ever observe
/// success through the callback.
pub struct GeolocationSource<P> {
    provider: Option<P>,
    options: LocationOptions,
    in_flight: Cell<bool>,
}

impl<P: LocationProvider> GeolocationSource<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Some(provider),
            options: LocationOptions::default(),
            in_flight: Cell::new(false),
        }
    }

    /// A source for hosts without any location capability.
    pub fn unavailable() -> Self {
        Self {
            provider: None,
            options: LocationOptions::default(),
            in_flight: Cell::new(false),
        }
    }

    pub fn with_options(mut self, options: LocationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Requests one position and hands it to `on_found`. Never retries.
    pub async fn acquire(&self, on_found: impl FnOnce(Position)) {
        match self.locate().await {
            Ok(pos) => on_found(pos),
            Err(Error::CapabilityUnavailable) => {
                info!("location capability unavailable, continuing without geolocation")
            }
            Err(Error::AcquisitionInFlight) => {
                debug!("location request already in flight, ignoring")
            }
            Err(err) => warn!(%err, "location acquisition failed"),
        }
    }

    /// Same as [`Self::acquire`] but surfaces the failure.
    pub async fn locate(&self) -> Result<Position, Error> {
        let provider = self.provider.as_ref().ok_or(Error::CapabilityUnavailable)?;
        if self.in_flight.replace(true) {
            return Err(Error::AcquisitionInFlight);
        }
        let _guard = InFlight(&self.in_flight);
        let fix = tokio::time::timeout(
            self.options.timeout,
            provider.current_position(&self.options),
        )
        .await
        .map_err(|_| LocationError::Timeout)??;
        let pos = Position::new(fix.lon, fix.lat).map_err(|_| {
            warn!(lon = fix.lon, lat = fix.lat, "device reported out of bounds fix");
            LocationError::PositionUnavailable
        })?;
        debug!(%pos, accuracy_m = ?fix.accuracy_m, "acquired device position");
        Ok(pos)
    }
}

// Clears the in-flight flag even when the request future is dropped midway.
struct InFlight<'a>(&'a Cell<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
