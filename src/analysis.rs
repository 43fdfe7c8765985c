//! Zone sizing and connectivity analysis.
//!
//! Judges a freshly drawn zone before it is committed: estimated
//! distribution duration against the comfortable half-day band, isolated
//! streets that inflate travel time, and the share of service/residential
//! access roads worth reviewing.

use serde::{Deserialize, Serialize};

use crate::extraction::ExtractedStreet;

/// Door-to-door pace used for zone sizing estimates, in meters of street
/// per hour. Deliberately slower than the partitioner's constant: sizing
/// assumes full letterbox coverage of both sides.
pub const ANALYSIS_M_PER_HOUR: f64 = 300.0;

/// Comfortable zone duration band, in minutes.
pub const TARGET_MIN_MINUTES: f64 = 90.0;
pub const TARGET_MAX_MINUTES: f64 = 150.0;

/// Endpoint proximity for the connectivity check, in degrees (~10 m).
const ENDPOINT_PROXIMITY_DEG: f64 = 0.0001;

/// Share of service/residential roads above which a review is suggested.
const ACCESS_ROAD_SHARE: f64 = 0.3;

/// Advice attached to a zone analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneSuggestion {
    /// Below the target band; grow the polygon by roughly this much.
    TooSmall { expand_pct: u32 },
    /// Above the target band; split into this many zones.
    TooLarge { suggested_splits: u32 },
    /// Streets with no endpoint near any other street.
    Disconnected { names: Vec<String> },
    /// High share of service/residential access roads.
    ManyAccessRoads { count: usize },
}

/// Result of analyzing a candidate zone's streets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneAnalysis {
    pub street_count: usize,
    pub total_length_m: f64,
    pub estimated_minutes: f64,
    /// Whether the estimate falls inside the target band.
    pub well_sized: bool,
    pub suggestions: Vec<ZoneSuggestion>,
}

/// Analyze a street set for sizing and connectivity problems.
pub fn analyze_streets(streets: &[ExtractedStreet]) -> ZoneAnalysis {
    let total_length_m: f64 = streets.iter().map(|s| s.length_m()).sum();
    let estimated_minutes = total_length_m / ANALYSIS_M_PER_HOUR * 60.0;

    if streets.is_empty() {
        return ZoneAnalysis {
            street_count: 0,
            total_length_m: 0.0,
            estimated_minutes: 0.0,
            well_sized: false,
            suggestions: Vec::new(),
        };
    }

    let mut suggestions = Vec::new();
    let mut well_sized = true;

    if estimated_minutes < TARGET_MIN_MINUTES {
        well_sized = false;
        suggestions.push(ZoneSuggestion::TooSmall {
            expand_pct: ((TARGET_MIN_MINUTES / estimated_minutes - 1.0) * 100.0).round() as u32,
        });
    } else if estimated_minutes > TARGET_MAX_MINUTES {
        well_sized = false;
        suggestions.push(ZoneSuggestion::TooLarge {
            suggested_splits: (estimated_minutes / 120.0).ceil() as u32,
        });
    }

    let disconnected = disconnected_streets(streets);
    if !disconnected.is_empty() {
        suggestions.push(ZoneSuggestion::Disconnected {
            names: disconnected
                .iter()
                .map(|s| s.name.clone())
                .take(5)
                .collect(),
        });
    }

    let access_roads = streets
        .iter()
        .filter(|s| {
            matches!(
                s.tags.get("highway").map(String::as_str),
                Some("service") | Some("residential")
            )
        })
        .count();
    if access_roads as f64 > streets.len() as f64 * ACCESS_ROAD_SHARE {
        suggestions.push(ZoneSuggestion::ManyAccessRoads {
            count: access_roads,
        });
    }

    ZoneAnalysis {
        street_count: streets.len(),
        total_length_m,
        estimated_minutes,
        well_sized,
        suggestions,
    }
}

/// Streets with no endpoint within [`ENDPOINT_PROXIMITY_DEG`] of any other
/// street's endpoints. A rough proxy for isolation; a full graph walk is
/// not warranted at zone-drawing time.
fn disconnected_streets<'a>(streets: &'a [ExtractedStreet]) -> Vec<&'a ExtractedStreet> {
    if streets.len() < 2 {
        return Vec::new();
    }

    streets
        .iter()
        .filter(|street| {
            let ends = endpoints(street);
            !streets.iter().any(|other| {
                !std::ptr::eq(*street, other)
                    && endpoints(other).iter().any(|oe| {
                        ends.iter()
                            .any(|e| planar_distance(*e, *oe) < ENDPOINT_PROXIMITY_DEG)
                    })
            })
        })
        .collect()
}

fn endpoints(street: &ExtractedStreet) -> Vec<crate::GeoPoint> {
    let mut ends = Vec::with_capacity(2);
    if let Some(&first) = street.path.first() {
        ends.push(first);
    }
    if let Some(&last) = street.path.last() {
        ends.push(last);
    }
    ends
}

fn planar_distance(a: crate::GeoPoint, b: crate::GeoPoint) -> f64 {
    let dx = a.lon - b.lon;
    let dy = a.lat - b.lat;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeoPoint;
    use std::collections::HashMap;

    fn street(id: &str, start: GeoPoint, end: GeoPoint, highway: &str) -> ExtractedStreet {
        let mut tags = HashMap::new();
        tags.insert("highway".to_string(), highway.to_string());
        ExtractedStreet {
            source_id: id.to_string(),
            name: format!("street {}", id),
            path: vec![start, end],
            tags,
            house_numbers: vec![],
        }
    }

    #[test]
    fn test_empty_zone_analysis() {
        let analysis = analyze_streets(&[]);
        assert_eq!(analysis.street_count, 0);
        assert!(!analysis.well_sized);
        assert!(analysis.suggestions.is_empty());
    }

    #[test]
    fn test_too_small_zone() {
        // ~110m of street is far below the 90min band at 300 m/h.
        let s = street(
            "1",
            GeoPoint::new(2.35, 48.85),
            GeoPoint::new(2.35, 48.851),
            "tertiary",
        );
        let analysis = analyze_streets(&[s]);
        assert!(!analysis.well_sized);
        assert!(matches!(
            analysis.suggestions[0],
            ZoneSuggestion::TooSmall { .. }
        ));
    }

    #[test]
    fn test_too_large_zone_suggests_splits() {
        // Two connected ~2.2km streets: ~890min at 300 m/h.
        let a = GeoPoint::new(2.35, 48.85);
        let b = GeoPoint::new(2.35, 48.87);
        let c = GeoPoint::new(2.37, 48.87);
        let analysis =
            analyze_streets(&[street("1", a, b, "tertiary"), street("2", b, c, "tertiary")]);

        assert!(!analysis.well_sized);
        let Some(ZoneSuggestion::TooLarge { suggested_splits }) = analysis.suggestions.first()
        else {
            panic!("expected a too-large suggestion");
        };
        assert!(*suggested_splits >= 2);
    }

    #[test]
    fn test_disconnected_street_flagged() {
        let a = GeoPoint::new(2.35, 48.85);
        let b = GeoPoint::new(2.35, 48.86);
        let far = GeoPoint::new(2.60, 48.99);
        let far_end = GeoPoint::new(2.60, 49.0);

        let analysis = analyze_streets(&[
            street("1", a, b, "tertiary"),
            street("2", b, GeoPoint::new(2.36, 48.86), "tertiary"),
            street("3", far, far_end, "tertiary"),
        ]);

        let disconnected = analysis
            .suggestions
            .iter()
            .find_map(|s| match s {
                ZoneSuggestion::Disconnected { names } => Some(names),
                _ => None,
            })
            .expect("expected a disconnected suggestion");
        assert_eq!(disconnected, &vec!["street 3".to_string()]);
    }

    #[test]
    fn test_access_road_share() {
        let a = GeoPoint::new(2.35, 48.85);
        let b = GeoPoint::new(2.35, 48.86);
        let analysis = analyze_streets(&[
            street("1", a, b, "service"),
            street("2", b, a, "residential"),
        ]);
        assert!(analysis
            .suggestions
            .iter()
            .any(|s| matches!(s, ZoneSuggestion::ManyAccessRoads { count: 2 })));
    }
}
