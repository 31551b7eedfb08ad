use serde::{Deserialize, Serialize};

/// A geocoded gazetteer entry. `(0, 0)` marks a known name whose
/// coordinates could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub location: String,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl GeoLocation {
    pub fn resolved(location: impl Into<String>, coordinates: Coordinates) -> Self {
        Self {
            location: location.into(),
            lon: coordinates.lon,
            lat: coordinates.lat,
        }
    }

    pub fn unresolved(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            lon: 0.0,
            lat: 0.0,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.lon == 0.0 && self.lat == 0.0
    }
}
