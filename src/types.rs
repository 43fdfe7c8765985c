//! Domain records for zones, streets, segments and sessions.
//!
//! These are explicit tagged records with constructors that validate
//! invariants at creation time. Downstream code can rely on a constructed
//! record being well-formed (closed polygon ring, ≥2-point street paths,
//! finite coordinates) instead of re-checking on every read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::geo_utils::polyline_length;
use crate::GeoPoint;

// ============================================================================
// Zones
// ============================================================================

/// A user-drawn distribution zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    /// Closed polygon ring, lon/lat, first vertex repeated at the end.
    pub polygon: Vec<GeoPoint>,
    /// Stored optimized route, written when a route is (re)planned.
    pub route: Option<RouteResult>,
    pub created_at: DateTime<Utc>,
}

/// Validate a polygon ring: finite in-range coordinates, at least 3
/// distinct vertices. An open ring is closed by repeating the first vertex.
pub fn validate_ring(ring: &[GeoPoint]) -> Result<Vec<GeoPoint>> {
    for point in ring {
        if !point.is_valid() {
            return Err(PlannerError::validation(format!(
                "polygon vertex out of range: [{}, {}]",
                point.lon, point.lat
            )));
        }
    }

    let mut closed = ring.to_vec();
    let is_closed = closed.len() >= 2 && closed.first() == closed.last();
    if !is_closed {
        if let Some(&first) = closed.first() {
            closed.push(first);
        }
    }

    // Distinct vertices, excluding the closing repeat.
    let mut distinct = closed.clone();
    distinct.pop();
    distinct.dedup();
    if distinct.len() < 3 {
        return Err(PlannerError::validation(
            "polygon needs at least 3 distinct vertices",
        ));
    }

    Ok(closed)
}

// ============================================================================
// Streets
// ============================================================================

/// Even/odd house-numbering side of a street.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn of(number: u32) -> Self {
        if number % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }
}

/// A house-number observation attached to a street.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseNumber {
    /// Raw tag value, e.g. "12bis".
    pub raw: String,
    /// Parsed leading integer.
    pub number: u32,
    pub parity: Parity,
    pub position: GeoPoint,
}

/// A street stored within a zone. Immutable after creation, removed only by
/// cascading zone deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Street {
    pub id: String,
    pub zone_id: String,
    /// Identifier of the upstream extraction element this street came from.
    pub source_id: String,
    pub name: String,
    /// Ordered polyline with at least 2 valid points.
    pub path: Vec<GeoPoint>,
    pub tags: HashMap<String, String>,
    pub house_numbers: Vec<HouseNumber>,
}

impl Street {
    /// Length of the street's own polyline in meters.
    pub fn length_m(&self) -> f64 {
        polyline_length(&self.path)
    }

    pub fn has_house_numbers(&self) -> bool {
        !self.house_numbers.is_empty()
    }
}

// ============================================================================
// Segments
// ============================================================================

/// Which side of the street a segment covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Even,
    Odd,
    /// Both sides in one pass (short streets, or no house-number data on
    /// either side).
    Undivided,
}

/// Lifecycle status of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Todo,
    InProgress,
    Done,
}

/// A distributable unit: one side of a street, or the whole street.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub street_id: String,
    pub zone_id: String,
    pub side: Side,
    pub path: Vec<GeoPoint>,
    /// Computed from the segment's own (possibly offset) geometry, not
    /// copied from the parent street.
    pub length_m: f64,
    /// 1-based position in the optimized tour; `None` until a route has
    /// been planned.
    pub visit_order: Option<u32>,
    pub status: SegmentStatus,
}

impl Segment {
    /// Reference point used for route planning and GPS detection.
    pub fn midpoint(&self) -> Option<GeoPoint> {
        crate::geo_utils::polyline_midpoint(&self.path)
    }
}

/// A segment produced by the segmentation engine, before the store assigns
/// its identity and initial status.
#[derive(Debug, Clone)]
pub struct SegmentDraft {
    pub street_id: String,
    pub zone_id: String,
    pub side: Side,
    pub path: Vec<GeoPoint>,
    pub length_m: f64,
}

/// Aggregate statistics over a zone's segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentStats {
    pub total: usize,
    pub even: usize,
    pub odd: usize,
    pub undivided: usize,
    pub total_length_m: f64,
    pub average_length_m: f64,
    pub completed: usize,
    pub in_progress: usize,
}

impl SegmentStats {
    pub fn from_segments(segments: &[Segment]) -> Self {
        let mut stats = SegmentStats {
            total: segments.len(),
            ..Default::default()
        };

        for segment in segments {
            match segment.side {
                Side::Even => stats.even += 1,
                Side::Odd => stats.odd += 1,
                Side::Undivided => stats.undivided += 1,
            }
            match segment.status {
                SegmentStatus::Done => stats.completed += 1,
                SegmentStatus::InProgress => stats.in_progress += 1,
                SegmentStatus::Todo => {}
            }
            stats.total_length_m += segment.length_m;
        }

        if stats.total > 0 {
            stats.average_length_m = stats.total_length_m / stats.total as f64;
        }
        stats
    }
}

// ============================================================================
// Routes
// ============================================================================

/// A single turn-by-turn step of a routed path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnInstruction {
    pub instruction: String,
    pub distance_m: f64,
    pub duration_s: f64,
    /// Road name, when the oracle reports one.
    pub name: Option<String>,
}

/// Result of optimizing a set of waypoints into a tour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    /// Waypoints in visiting order.
    pub ordered_waypoints: Vec<GeoPoint>,
    /// Routed line geometry from the directions oracle.
    pub geometry: Vec<GeoPoint>,
    /// Authoritative routed distance in meters.
    pub distance_m: f64,
    /// Authoritative routed duration in seconds.
    pub duration_s: f64,
    /// Permutation over the input: `visit_order[k]` is the original index
    /// of the waypoint visited at position `k`. Callers use it to re-attach
    /// domain ids such as segment ids.
    pub visit_order: Vec<usize>,
    pub instructions: Vec<TurnInstruction>,
}

// ============================================================================
// Sessions
// ============================================================================

/// Lifecycle state of a distribution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Ended,
}

/// A live (or finished) distribution round over one zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub zone_id: String,
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_position: Option<GeoPoint>,
    /// Route snapshot the session was started with, if any.
    pub route: Option<RouteResult>,
}

/// Per-segment completion record scoped to one session. Created atomically
/// with the session; only `done` and the timestamps ever mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionEntry {
    pub segment_id: String,
    pub done: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregates derived from a session's progression set on every read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressionSummary {
    pub total: usize,
    pub completed: usize,
    pub remaining: usize,
    /// 0-100; defined as 0 when the session tracks no segments.
    pub percentage: f64,
}

impl ProgressionSummary {
    pub fn from_entries(entries: &[ProgressionEntry]) -> Self {
        let total = entries.len();
        let completed = entries.iter().filter(|e| e.done).count();
        let percentage = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        Self {
            total,
            completed,
            remaining: total - completed,
            percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ring_closes_open_ring() {
        let ring = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(1.0, 0.0),
            GeoPoint::new(1.0, 1.0),
        ];
        let closed = validate_ring(&ring).unwrap();
        assert_eq!(closed.len(), 4);
        assert_eq!(closed.first(), closed.last());
    }

    #[test]
    fn test_validate_ring_rejects_degenerate() {
        let too_few = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(matches!(
            validate_ring(&too_few),
            Err(PlannerError::Validation { .. })
        ));

        let out_of_range = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(181.0, 0.0),
            GeoPoint::new(1.0, 1.0),
        ];
        assert!(matches!(
            validate_ring(&out_of_range),
            Err(PlannerError::Validation { .. })
        ));
    }

    #[test]
    fn test_parity() {
        assert_eq!(Parity::of(12), Parity::Even);
        assert_eq!(Parity::of(7), Parity::Odd);
    }

    #[test]
    fn test_progression_summary_empty() {
        let summary = ProgressionSummary::from_entries(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.percentage, 0.0);
    }

    #[test]
    fn test_progression_summary_counts() {
        let entries = vec![
            ProgressionEntry {
                segment_id: "s1".into(),
                done: true,
                started_at: None,
                completed_at: None,
            },
            ProgressionEntry {
                segment_id: "s2".into(),
                done: false,
                started_at: None,
                completed_at: None,
            },
        ];
        let summary = ProgressionSummary::from_entries(&entries);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.remaining, 1);
        assert_eq!(summary.percentage, 50.0);
    }

    #[test]
    fn test_segment_stats() {
        let seg = |side, status, len| Segment {
            id: "s".into(),
            street_id: "st".into(),
            zone_id: "z".into(),
            side,
            path: vec![],
            length_m: len,
            visit_order: None,
            status,
        };
        let stats = SegmentStats::from_segments(&[
            seg(Side::Even, SegmentStatus::Done, 100.0),
            seg(Side::Odd, SegmentStatus::InProgress, 80.0),
            seg(Side::Undivided, SegmentStatus::Todo, 20.0),
        ]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.even, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_progress, 1);
        assert!((stats.total_length_m - 200.0).abs() < 1e-9);
        assert!((stats.average_length_m - 200.0 / 3.0).abs() < 1e-9);
    }
}
