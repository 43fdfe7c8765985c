//! # Round Planner
//!
//! Planning and live tracking of door-to-door distribution rounds over a
//! user-drawn geographic zone.
//!
//! This library provides:
//! - Street extraction and normalization from an Overpass-style service
//! - Segmentation of streets into distributable even/odd-side units
//! - Route optimization over external distance/duration oracles
//!   (nearest-neighbor with optional 2-opt, chunked above the oracle limit)
//! - Grid-based partitioning of oversized zones
//! - A per-session tracker for GPS-driven distribution progress
//!
//! Map rendering, authentication and storage schemas are out of scope: the
//! collaborators are consumed through the [`extraction::StreetSource`],
//! [`optimizer::MatrixOracle`], [`optimizer::DirectionsOracle`] and
//! [`store::PlannerStore`] traits.
//!
//! ## Quick Start
//!
//! ```rust
//! use round_planner::{GeoPoint, geo_utils};
//!
//! // A short street in Paris.
//! let street = vec![
//!     GeoPoint::new(2.3522, 48.8566),
//!     GeoPoint::new(2.3530, 48.8571),
//! ];
//!
//! let length = geo_utils::polyline_length(&street);
//! assert!(length > 0.0);
//!
//! // The other side of the street, 3 m to the right.
//! let other_side = geo_utils::offset_polyline(&street, 3.0);
//! assert_eq!(other_side.len(), street.len());
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{PlannerError, Result};

// Geographic utilities (distance, bearing, offsets, polyline helpers)
pub mod geo_utils;

// Domain records with validating constructors
pub mod types;
pub use types::{
    HouseNumber, Parity, ProgressionEntry, ProgressionSummary, RouteResult, Segment,
    SegmentDraft, SegmentStats, SegmentStatus, Session, SessionStatus, Side, Street,
    TurnInstruction, Zone,
};

// Street extraction and normalization
pub mod extraction;
pub use extraction::{
    extract_streets, extraction_stats, normalize_streets, ExtractedStreet, ExtractionStats,
    RawElement, RawElementKind, RawElementSet, StreetNetwork, StreetSource, UNNAMED_STREET,
};

// Street segmentation into distributable units
pub mod segmentation;
pub use segmentation::{
    generate_segments, split_street, MIN_SPLIT_LENGTH_M, SIDE_OFFSET_M,
};

// Route optimization against external oracles
pub mod optimizer;
pub use optimizer::{
    optimize_route, CostMatrix, DirectionsOracle, MatrixOracle, OptimizationQuality,
    OptimizeOptions, RoutedPath, TravelProfile, DEFAULT_CHUNK_SIZE, MAX_ORACLE_LOCATIONS,
};

// Oversized-zone partitioning
pub mod partition;
pub use partition::{
    partition_streets, partition_zone, PartitionConfig, PartitionOutcome, SectorPlan,
    ZoneEstimate, DOOR_TO_DOOR_M_PER_HOUR,
};

// Zone sizing and connectivity analysis
pub mod analysis;
pub use analysis::{analyze_streets, ZoneAnalysis, ZoneSuggestion};

// Live session tracking
pub mod session;
pub use session::{
    PositionUpdate, SessionSnapshot, SessionStats, SessionTracker, TrackerConfig,
    DETECTION_THRESHOLD_M,
};

// Persistence collaborator contract and in-memory reference store
pub mod store;
pub use store::{MemoryStore, PlannerStore};

// HTTP clients for the upstream collaborators
pub mod http;
pub use http::{
    ExtractionOptions, OrsClient, OverpassClient, DEFAULT_ORS_URL, DEFAULT_OVERPASS_URL,
};

// High-level planning flows
pub mod planner;
pub use planner::{
    build_zone, plan_route, quick_tour, PlannedRoute, QuickTour, QuickTourRequest,
    ZoneBuildReport,
};

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate, longitude first as in GeoJSON positions.
///
/// # Example
/// ```
/// use round_planner::GeoPoint;
/// let point = GeoPoint::new(2.3522, 48.8566); // Paris
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Finite and within the valid lon/lat ranges.
    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && self.lon >= -180.0
            && self.lon <= 180.0
            && self.lat >= -90.0
            && self.lat <= 90.0
    }
}

/// Axis-aligned bounding box over lon/lat coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    /// Bounds of a point set. `None` when empty.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let mut bounds = Bounds {
            min_lon: f64::MAX,
            min_lat: f64::MAX,
            max_lon: f64::MIN,
            max_lat: f64::MIN,
        };
        for p in points {
            bounds.min_lon = bounds.min_lon.min(p.lon);
            bounds.min_lat = bounds.min_lat.min(p.lat);
            bounds.max_lon = bounds.max_lon.max(p.lon);
            bounds.max_lat = bounds.max_lat.max(p.lat);
        }
        Some(bounds)
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// Inclusive containment test on both edges.
    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }

    /// The box as a closed polygon ring.
    pub fn to_ring(&self) -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(self.min_lon, self.min_lat),
            GeoPoint::new(self.max_lon, self.min_lat),
            GeoPoint::new(self.max_lon, self.max_lat),
            GeoPoint::new(self.min_lon, self.max_lat),
            GeoPoint::new(self.min_lon, self.min_lat),
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================
