//! Known GPS interference zones
//!
//! Zones are circles (center + radius in nautical miles) with a fixed risk
//! level. The registry is built once and only read afterwards.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::alert::AlertLevel;
use crate::geometry::{Coordinate, interpolate_route};

/// Fractions of the departure/arrival line sampled by the route check
const ROUTE_SAMPLE_FRACTIONS: [f64; 3] = [0.25, 0.5, 0.75];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskZone {
    pub name: String,
    pub region: String,
    pub center: Coordinate,
    pub radius_nm: f64,
    pub risk_level: AlertLevel,
    pub notes: String,
}

impl RiskZone {
    pub fn new(
        name: &str,
        region: &str,
        latitude: f64,
        longitude: f64,
        radius_nm: f64,
        risk_level: AlertLevel,
        notes: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            region: region.to_string(),
            center: Coordinate::new(latitude, longitude),
            radius_nm,
            risk_level,
            notes: notes.to_string(),
        }
    }

    /// Distance from the zone center in nautical miles
    pub fn distance_nm(&self, point: &Coordinate) -> f64 {
        self.center.distance_nm(point)
    }

    /// Check if a point lies inside the zone (boundary inclusive)
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.distance_nm(point) <= self.radius_nm
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Name is required".to_string());
        }
        if self.radius_nm.is_nan() || self.radius_nm <= 0.0 {
            return Err(format!("Zone {}: radius must be positive", self.name));
        }
        if !(-90.0..=90.0).contains(&self.center.latitude) {
            return Err("Latitude must be between -90 and 90".to_string());
        }
        if !(-180.0..=180.0).contains(&self.center.longitude) {
            return Err("Longitude must be between -180 and 180".to_string());
        }
        Ok(())
    }
}

static DEFAULT_ZONES: Lazy<Vec<RiskZone>> = Lazy::new(|| {
    vec![
        RiskZone::new(
            "Eastern Mediterranean",
            "Middle East",
            33.5,
            35.0,
            150.0,
            AlertLevel::Alert,
            "Persistent GNSS spoofing across the Beirut, Tel Aviv, Nicosia and Amman FIRs. Positions frequently displaced to Beirut airport.",
        ),
        RiskZone::new(
            "Northern Iraq",
            "Middle East",
            36.2,
            44.0,
            120.0,
            AlertLevel::Alert,
            "Spoofing events leading to navigation failures on the Baghdad FIR airways. Cross-check with conventional navaids.",
        ),
        RiskZone::new(
            "Strait of Hormuz",
            "Middle East",
            26.6,
            56.3,
            100.0,
            AlertLevel::Warning,
            "Jamming and spoofing reported by maritime and air traffic near the strait.",
        ),
        RiskZone::new(
            "Black Sea",
            "Eastern Europe",
            44.0,
            34.0,
            200.0,
            AlertLevel::Alert,
            "Conflict-related GNSS interference over Crimea and the northern Black Sea.",
        ),
        RiskZone::new(
            "Kaliningrad",
            "Baltic",
            54.7,
            20.5,
            150.0,
            AlertLevel::Alert,
            "Widespread jamming affecting the southern Baltic, Poland and Lithuania.",
        ),
        RiskZone::new(
            "Gulf of Finland",
            "Baltic",
            59.9,
            28.5,
            100.0,
            AlertLevel::Warning,
            "Interference reported by traffic approaching Helsinki and Tallinn.",
        ),
        RiskZone::new(
            "Finnmark",
            "Nordic",
            69.7,
            29.0,
            100.0,
            AlertLevel::Warning,
            "Recurring jamming near the Norway-Russia border affecting Kirkenes and Vardo approaches.",
        ),
        RiskZone::new(
            "Poland-Belarus Border",
            "Eastern Europe",
            52.5,
            23.8,
            80.0,
            AlertLevel::Caution,
            "Intermittent GNSS degradation along the border.",
        ),
        RiskZone::new(
            "Western Libya",
            "North Africa",
            32.9,
            13.2,
            120.0,
            AlertLevel::Warning,
            "Jamming reported around Tripoli and Misrata.",
        ),
        RiskZone::new(
            "Korean DMZ",
            "East Asia",
            38.0,
            126.9,
            80.0,
            AlertLevel::Warning,
            "Periodic jamming campaigns affecting Seoul-area arrivals.",
        ),
        RiskZone::new(
            "White Sands Missile Range",
            "US Military Test Range",
            33.2,
            -106.4,
            50.0,
            AlertLevel::Caution,
            "Scheduled GPS interference testing. Check NOTAMs before flight.",
        ),
        RiskZone::new(
            "China Lake",
            "US Military Test Range",
            35.7,
            -117.7,
            60.0,
            AlertLevel::Caution,
            "Naval air weapons station GPS testing. Check NOTAMs before flight.",
        ),
        RiskZone::new(
            "Nevada Test and Training Range",
            "US Military Test Range",
            37.3,
            -116.0,
            70.0,
            AlertLevel::Caution,
            "Military exercises with published GPS interference windows.",
        ),
        RiskZone::new(
            "Edwards AFB",
            "US Military Test Range",
            34.9,
            -117.9,
            40.0,
            AlertLevel::Caution,
            "Flight test center GPS testing. Check NOTAMs before flight.",
        ),
    ]
});

/// Read-only set of risk zones
#[derive(Debug, Clone, Default)]
pub struct ZoneRegistry {
    zones: Vec<RiskZone>,
}

impl ZoneRegistry {
    /// Build a registry, rejecting zones that fail validation
    pub fn new(zones: Vec<RiskZone>) -> anyhow::Result<Self> {
        for zone in &zones {
            zone.validate().map_err(anyhow::Error::msg)?;
        }
        Ok(Self { zones })
    }

    /// Registry seeded with the built-in zone list
    pub fn with_default_zones() -> Self {
        Self {
            zones: DEFAULT_ZONES.clone(),
        }
    }

    pub fn zones(&self) -> &[RiskZone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RiskZone> {
        self.zones.iter().find(|z| z.name == name)
    }

    /// Every zone containing the point, nearest center first
    pub fn containing_zones(&self, point: &Coordinate) -> Vec<&RiskZone> {
        let mut inside: Vec<(&RiskZone, f64)> = self
            .zones
            .iter()
            .map(|z| (z, z.distance_nm(point)))
            .filter(|(z, d)| *d <= z.radius_nm)
            .collect();
        inside.sort_by(|a, b| a.1.total_cmp(&b.1));
        inside.into_iter().map(|(z, _)| z).collect()
    }

    /// The containing zone whose center is nearest
    pub fn containing_zone(&self, point: &Coordinate) -> Option<&RiskZone> {
        self.containing_zones(point).into_iter().next()
    }

    /// Nearest zone center and its distance, whether or not the point is inside
    pub fn nearest_zone(&self, point: &Coordinate) -> Option<(&RiskZone, f64)> {
        self.zones
            .iter()
            .map(|z| (z, z.distance_nm(point)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Zones touched by the straight route between two airports
    ///
    /// Tests both endpoints plus the quarter, mid and three-quarter points of a
    /// linear lat/lon interpolation. Zones are returned once each, in registry order.
    pub fn zones_along_route(&self, departure: &Coordinate, arrival: &Coordinate) -> Vec<&RiskZone> {
        let mut samples = vec![*departure, *arrival];
        samples.extend(interpolate_route(departure, arrival, &ROUTE_SAMPLE_FRACTIONS));

        self.zones
            .iter()
            .filter(|zone| samples.iter().any(|p| zone.contains(p)))
            .collect()
    }

    /// Pre-flight briefing listing route zones, highest risk first
    pub fn route_briefing(&self, departure: &Coordinate, arrival: &Coordinate) -> String {
        let mut zones = self.zones_along_route(departure, arrival);
        if zones.is_empty() {
            return format!(
                "GPS Interference Briefing\nRoute: {} -> {}\nNo known GPS interference zones on this route.",
                departure, arrival
            );
        }

        zones.sort_by(|a, b| {
            b.risk_level
                .cmp(&a.risk_level)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut briefing = format!(
            "GPS Interference Briefing\nRoute: {} -> {}\nKnown interference zones on route: {}\n",
            departure,
            arrival,
            zones.len()
        );
        for zone in zones {
            briefing.push_str(&format!(
                "\n[{}] {} ({}) - radius {:.0} nm\n    {}\n",
                zone.risk_level.as_str().to_uppercase(),
                zone.name,
                zone.region,
                zone.radius_nm,
                zone.notes
            ));
        }
        briefing
    }
}
