//! Geographic position reported by radio nodes

use serde::{Deserialize, Serialize};

/// Scale of the fixed-point coordinates radios put on the wire (1e-7 degrees)
pub const COORD_SCALE: f64 = 1e7;

/// Geographic position of a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
    /// Optional altitude in meters
    pub altitude: Option<f64>,
}

impl Location {
    /// Create a new location
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }

    /// Build from fixed-point wire coordinates.
    ///
    /// Returns `None` for the all-zero position radios report when they have
    /// no fix, and for out-of-range values.
    pub fn from_fixed(latitude_i: i32, longitude_i: i32) -> Option<Self> {
        if latitude_i == 0 && longitude_i == 0 {
            return None;
        }
        let loc = Self::new(
            latitude_i as f64 / COORD_SCALE,
            longitude_i as f64 / COORD_SCALE,
        );
        loc.is_valid().then_some(loc)
    }

    /// Attach an altitude
    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Whether the coordinates are within range
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}
