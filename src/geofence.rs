use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

/// Where a coordinate falls relative to the configured boundary.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Inside,
    Outside,
    Undefined,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Inside => "inside",
            Zone::Outside => "outside",
            Zone::Undefined => "undefined",
        }
    }
}

impl Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A boundary given as ordered (lat, lon) vertices.
///
/// Classification tests the axis-aligned bounding box of the vertices, not the
/// polygon itself, so points near a slanted edge may count as inside.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Geofence {
    pub polygon: Vec<(f64, f64)>,
}

impl Default for Geofence {
    fn default() -> Self {
        Geofence {
            polygon: vec![
                (30.22923, 31.73212),
                (30.22984, 31.73347),
                (30.22908, 31.73418),
                (30.22851, 31.73325),
            ],
        }
    }
}

impl Geofence {
    pub fn new(polygon: Vec<(f64, f64)>) -> Geofence {
        Geofence { polygon }
    }

    /// Classifies a `"lat,lon"` string. Text that is not exactly two finite
    /// numbers is `Undefined`, including `NaN` and `inf`, which have no place
    /// on the map.
    pub fn classify(&self, coordinates: &str) -> Zone {
        let (Some((lat, lon)), Some(bounds)) = (parse_pair(coordinates), self.bounds()) else {
            return Zone::Undefined;
        };
        let (min_lat, max_lat, min_lon, max_lon) = bounds;
        if (min_lat..=max_lat).contains(&lat) && (min_lon..=max_lon).contains(&lon) {
            Zone::Inside
        } else {
            Zone::Outside
        }
    }

    /// (min lat, max lat, min lon, max lon), or `None` for an empty polygon.
    fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let (first_lat, first_lon) = *self.polygon.first()?;
        Some(self.polygon.iter().fold(
            (first_lat, first_lat, first_lon, first_lon),
            |(min_lat, max_lat, min_lon, max_lon), (lat, lon)| (min_lat.min(*lat), max_lat.max(*lat), min_lon.min(*lon), max_lon.max(*lon)),
        ))
    }
}

fn parse_pair(coordinates: &str) -> Option<(f64, f64)> {
    let mut parts = coordinates.split(',');
    let lat = parts.next()?.trim().parse::<f64>().ok()?;
    let lon = parts.next()?.trim().parse::<f64>().ok()?;
    if parts.next().is_some() || !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    Some((lat, lon))
}
