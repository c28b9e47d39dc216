use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const LON_RANGE: (f64, f64) = (-180.0, 180.0);
pub const LAT_RANGE: (f64, f64) = (-90.0, 90.0);

/// A WGS84 longitude / latitude pair in degrees.
///
/// Always within geographic bounds; construct through [`Position::new`].
/// Serialises as `[lon, lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct Position {
    lon: f64,
    lat: f64,
}

impl Position {
    pub fn new(lon: f64, lat: f64) -> Result<Self, Error> {
        let in_range = |v: f64, (lo, hi): (f64, f64)| v.is_finite() && (lo..=hi).contains(&v);
        if in_range(lon, LON_RANGE) && in_range(lat, LAT_RANGE) {
            Ok(Position { lon, lat })
        } else {
            Err(Error::InvalidPosition { lon, lat })
        }
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Shifts by the given degree offsets, staying inside the bounds.
    pub fn offset(&self, d_lon: f64, d_lat: f64) -> Self {
        Position {
            lon: (self.lon + d_lon).clamp(LON_RANGE.0, LON_RANGE.1),
            lat: (self.lat + d_lat).clamp(LAT_RANGE.0, LAT_RANGE.1),
        }
    }
}

impl TryFrom<[f64; 2]> for Position {
    type Error = Error;

    fn try_from([lon, lat]: [f64; 2]) -> Result<Self, Self::Error> {
        Position::new(lon, lat)
    }
}

impl From<Position> for [f64; 2] {
    fn from(pos: Position) -> Self {
        [pos.lon, pos.lat]
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lon, self.lat)
    }
}

/// Stable identity of a tracked vehicle or driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
