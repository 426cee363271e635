//! Great-circle helpers shared by the anomaly checks and the zone registry.
//!
//! All distances are nautical miles. Route sampling is a straight lat/lon
//! interpolation, not a geodesic.

/// Mean earth radius in nautical miles
const EARTH_RADIUS_NM: f64 = 3_440.065;

/// Nautical miles to meters conversion factor
pub const NM_TO_METERS: f64 = 1852.0;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to another coordinate in nautical miles
    pub fn distance_nm(&self, other: &Coordinate) -> f64 {
        haversine_distance_nm(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Point at `fraction` (0.0..=1.0) of the way to `other`, interpolating
    /// latitude and longitude independently
    pub fn lerp(&self, other: &Coordinate, fraction: f64) -> Coordinate {
        Coordinate {
            latitude: self.latitude + (other.latitude - self.latitude) * fraction,
            longitude: self.longitude + (other.longitude - self.longitude) * fraction,
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

impl std::str::FromStr for Coordinate {
    type Err = anyhow::Error;

    /// Parse "LAT,LON" in decimal degrees
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("expected LAT,LON but got '{}'", s))?;
        let latitude: f64 = lat.trim().parse()?;
        let longitude: f64 = lon.trim().parse()?;
        if !(-90.0..=90.0).contains(&latitude) {
            anyhow::bail!("Latitude must be between -90 and 90");
        }
        if !(-180.0..=180.0).contains(&longitude) {
            anyhow::bail!("Longitude must be between -180 and 180");
        }
        Ok(Coordinate::new(latitude, longitude))
    }
}

/// Calculate distance between two points using the Haversine formula
pub fn haversine_distance_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_NM * c
}

/// Sample points along the straight lat/lon line between two endpoints at the
/// given fractions
pub fn interpolate_route(from: &Coordinate, to: &Coordinate, fractions: &[f64]) -> Vec<Coordinate> {
    fractions.iter().map(|f| from.lerp(to, *f)).collect()
}
