//! Route records - the input to the flight-path subsystem
//!
//! Routes are supplied by an external collaborator (a flight-data feed, a
//! file on disk). Loading is tolerant: a record that fails to parse is
//! reported and skipped, the rest of the list still loads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use three_d::Vec3;

use crate::{arc, geo, particle, path};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("Invalid colour '{0}', expected #RRGGBB")]
    InvalidColor(String),
    #[error("Route '{id}': invalid {field} coordinate ({lat}, {lng})")]
    InvalidCoordinate {
        id: String,
        field: &'static str,
        lat: f64,
        lng: f64,
    },
    #[error("Zero-length arc: start and destination coincide")]
    ZeroLengthArc,
    #[error("Antipodal arc: chord passes through the globe centre")]
    AntipodalArc,
    #[error("Duplicate route id '{0}'")]
    DuplicateId(String),
    #[error("Invalid tunable {field}: {reason}")]
    InvalidTunables { field: &'static str, reason: String },
    #[error("Malformed route record #{index}: {reason}")]
    Malformed { index: usize, reason: String },
}

/// Latitude/longitude in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and within [-90, 90] x [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn to_surface(&self, radius: f64) -> Vec3 {
        geo::project(self.lat, self.lng, radius)
    }
}

/// 24-bit colour, written as `#RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const CYAN: Rgb = Rgb::new(0x00, 0xff, 0xff);
    pub const ORANGE: Rgb = Rgb::new(0xff, 0x88, 0x00);
    pub const RED: Rgb = Rgb::new(0xff, 0x00, 0x00);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn parse(s: &str) -> Result<Self, RouteError> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(RouteError::InvalidColor(s.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| RouteError::InvalidColor(s.to_string()))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Channels as 0.0-1.0 floats
    pub fn to_linear(self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::CYAN
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Rgb {
    type Error = RouteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::parse(&value)
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

/// Per-route visual tunables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTunables {
    /// Dash repetitions along the path
    pub dash_length: f32,
    /// Dash flow rate, in path lengths per second
    pub dash_speed: f32,
    /// Particle loops per second
    pub particle_speed: f64,
    pub trail_length: usize,
    /// Arc apex height as a fraction of the chord length
    pub arc_bulge: f32,
    pub path_segments: usize,
}

impl Default for RouteTunables {
    fn default() -> Self {
        Self {
            dash_length: 1.0,
            dash_speed: 0.5,
            particle_speed: particle::DEFAULT_PARTICLE_SPEED,
            trail_length: particle::DEFAULT_TRAIL_LENGTH,
            arc_bulge: arc::DEFAULT_BULGE,
            path_segments: path::DEFAULT_SEGMENTS,
        }
    }
}

/// Upper bounds that keep one record from stalling the frame loop
pub const MAX_TRAIL_LENGTH: usize = 1_000;
pub const MAX_PATH_SEGMENTS: usize = 10_000;

impl RouteTunables {
    /// Reject values that would produce NaN geometry, a stuck trail or
    /// unbounded allocations
    pub fn validate(&self) -> Result<(), RouteError> {
        let invalid = |field, reason: String| Err(RouteError::InvalidTunables { field, reason });

        if !(self.dash_length.is_finite() && self.dash_length > 0.0) {
            return invalid("dash_length", format!("must be a positive number, got {}", self.dash_length));
        }
        if !(self.dash_speed.is_finite() && self.dash_speed > 0.0) {
            return invalid("dash_speed", format!("must be a positive number, got {}", self.dash_speed));
        }
        if !(self.particle_speed.is_finite() && self.particle_speed > 0.0) {
            return invalid(
                "particle_speed",
                format!("must be a positive number, got {}", self.particle_speed),
            );
        }
        if !(self.arc_bulge.is_finite() && self.arc_bulge > 0.0) {
            return invalid("arc_bulge", format!("must be a positive number, got {}", self.arc_bulge));
        }
        if self.trail_length == 0 || self.trail_length > MAX_TRAIL_LENGTH {
            return invalid(
                "trail_length",
                format!("must be in 1..={}, got {}", MAX_TRAIL_LENGTH, self.trail_length),
            );
        }
        if self.path_segments > MAX_PATH_SEGMENTS {
            return invalid(
                "path_segments",
                format!("must be at most {}, got {}", MAX_PATH_SEGMENTS, self.path_segments),
            );
        }
        Ok(())
    }
}

/// A single flight route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub start: GeoPoint,
    pub destination: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunables: Option<RouteTunables>,
}

impl Route {
    pub fn new(id: impl Into<String>, start: GeoPoint, destination: GeoPoint) -> Self {
        Self {
            id: id.into(),
            start,
            destination,
            color: None,
            tunables: None,
        }
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_tunables(mut self, tunables: RouteTunables) -> Self {
        self.tunables = Some(tunables);
        self
    }

    pub fn color_or_default(&self) -> Rgb {
        self.color.unwrap_or_default()
    }

    /// Check both endpoints carry usable coordinates
    pub fn validate(&self) -> Result<(), RouteError> {
        for (field, point) in [("start", &self.start), ("destination", &self.destination)] {
            if !point.is_valid() {
                return Err(RouteError::InvalidCoordinate {
                    id: self.id.clone(),
                    field,
                    lat: point.lat,
                    lng: point.lng,
                });
            }
        }
        Ok(())
    }
}

/// Result of parsing a route list
#[derive(Debug, Default)]
pub struct RouteBatch {
    pub routes: Vec<Route>,
    pub rejected: Vec<RouteError>,
}

/// Parse a route list from JSON or YAML text.
///
/// The document must be a sequence (a JSON array or a YAML list); each
/// element is parsed on its own so one bad record only drops itself.
pub fn parse_routes(text: &str) -> anyhow::Result<RouteBatch> {
    let records: Vec<serde_json::Value> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text)?
    } else {
        serde_yaml::from_str(text)?
    };
    let mut batch = RouteBatch::default();

    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<Route>(record) {
            Ok(route) => batch.routes.push(route),
            Err(e) => {
                tracing::warn!("Skipping route record #{}: {}", index, e);
                batch.rejected.push(RouteError::Malformed {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::debug!(
        "Parsed {} routes ({} rejected)",
        batch.routes.len(),
        batch.rejected.len()
    );
    Ok(batch)
}

/// Load a route list from disk
pub async fn load_routes<P: AsRef<Path>>(path: P) -> anyhow::Result<RouteBatch> {
    let path = path.as_ref();
    tracing::info!("Loading routes from {:?}", path);
    let content = tokio::fs::read_to_string(path).await?;
    parse_routes(&content)
}

/// Built-in routes used when no route file is available
pub fn sample_routes() -> Vec<Route> {
    vec![
        Route::new("HAM-LHR", GeoPoint::new(53.6, 10.0), GeoPoint::new(51.5, -0.1)),
        Route::new("JFK-LHR", GeoPoint::new(40.6, -73.8), GeoPoint::new(51.5, -0.1)),
        Route::new("SFO-NRT", GeoPoint::new(37.6, -122.4), GeoPoint::new(35.8, 140.4)),
        Route::new("SYD-SIN", GeoPoint::new(-33.9, 151.2), GeoPoint::new(1.4, 104.0)).with_tunables(
            RouteTunables {
                particle_speed: 0.1,
                ..Default::default()
            },
        ),
        Route::new("GRU-JNB", GeoPoint::new(-23.4, -46.5), GeoPoint::new(-26.1, 28.2))
            .with_color(Rgb::RED),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(Rgb::parse("#FF0000").unwrap(), Rgb::RED);
        assert_eq!(Rgb::parse("00ffff").unwrap(), Rgb::CYAN);
        assert!(Rgb::parse("#FF00").is_err());
        assert!(Rgb::parse("#GG0000").is_err());
        assert_eq!(Rgb::new(255, 136, 0).to_string(), "#FF8800");
    }

    #[test]
    fn test_default_color_is_cyan() {
        let route = Route::new("X", GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0));
        assert_eq!(route.color_or_default(), Rgb::CYAN);
    }

    #[test]
    fn test_validate_rejects_bad_coordinates() {
        let ok = Route::new("ok", GeoPoint::new(53.6, 10.0), GeoPoint::new(51.5, -0.1));
        assert!(ok.validate().is_ok());

        let nan = Route::new("nan", GeoPoint::new(f64::NAN, 10.0), GeoPoint::new(51.5, -0.1));
        assert!(matches!(
            nan.validate(),
            Err(RouteError::InvalidCoordinate { field: "start", .. })
        ));

        let out = Route::new("out", GeoPoint::new(10.0, 10.0), GeoPoint::new(91.0, 0.0));
        assert!(matches!(
            out.validate(),
            Err(RouteError::InvalidCoordinate { field: "destination", .. })
        ));
    }

    #[test]
    fn test_parse_json_routes() {
        let json = r##"[
            {"id": "A1", "start": {"lat": 53.6, "lng": 10.0},
             "destination": {"lat": 51.5, "lng": -0.1}, "color": "#FF0000"},
            {"id": "B2", "start": {"lat": 40.6, "lng": -73.8},
             "destination": {"lat": 51.5, "lng": -0.1}}
        ]"##;
        let batch = parse_routes(json).unwrap();
        assert_eq!(batch.routes.len(), 2);
        assert!(batch.rejected.is_empty());
        assert_eq!(batch.routes[0].color, Some(Rgb::RED));
        assert_eq!(batch.routes[1].color, None);
    }

    #[test]
    fn test_parse_skips_malformed_records() {
        let yaml = r##"
- id: good
  start: { lat: 1.0, lng: 2.0 }
  destination: { lat: 3.0, lng: 4.0 }
- id: missing-destination
  start: { lat: 1.0, lng: 2.0 }
- id: bad-color
  start: { lat: 1.0, lng: 2.0 }
  destination: { lat: 3.0, lng: 4.0 }
  color: "#12"
"##;
        let batch = parse_routes(yaml).unwrap();
        assert_eq!(batch.routes.len(), 1);
        assert_eq!(batch.routes[0].id, "good");
        assert_eq!(batch.rejected.len(), 2);
        assert!(matches!(batch.rejected[0], RouteError::Malformed { index: 1, .. }));
    }

    #[test]
    fn test_partial_tunables_use_defaults() {
        let yaml = r##"
- id: slow
  start: { lat: 1.0, lng: 2.0 }
  destination: { lat: 3.0, lng: 4.0 }
  tunables: { particle_speed: 0.05 }
"##;
        let batch = parse_routes(yaml).unwrap();
        let tunables = batch.routes[0].tunables.unwrap();
        assert_eq!(tunables.particle_speed, 0.05);
        assert_eq!(tunables.trail_length, 30);
        assert_eq!(tunables.arc_bulge, 0.15);
    }

    #[tokio::test]
    async fn test_load_routes_from_file() {
        let path = std::env::temp_dir().join(format!("flight_globe_routes_{}.json", std::process::id()));
        let routes = sample_routes();
        std::fs::write(&path, serde_json::to_string(&routes).unwrap()).unwrap();

        let batch = load_routes(&path).await.unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(batch.routes, routes);
    }

    #[test]
    fn test_default_tunables_are_valid() {
        assert!(RouteTunables::default().validate().is_ok());
    }

    #[test]
    fn test_tunables_reject_bad_values() {
        let base = RouteTunables::default();
        let cases = [
            RouteTunables { particle_speed: -0.2, ..base },
            RouteTunables { particle_speed: f64::NAN, ..base },
            RouteTunables { arc_bulge: f32::NAN, ..base },
            RouteTunables { dash_length: 0.0, ..base },
            RouteTunables { dash_speed: f32::INFINITY, ..base },
            RouteTunables { trail_length: 0, ..base },
            RouteTunables { trail_length: MAX_TRAIL_LENGTH + 1, ..base },
            RouteTunables { path_segments: usize::MAX, ..base },
        ];
        for tunables in cases {
            assert!(
                matches!(tunables.validate(), Err(RouteError::InvalidTunables { .. })),
                "{:?}",
                tunables
            );
        }
    }
}
