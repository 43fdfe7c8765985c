//! High-level planning flows.
//!
//! These compose the collaborators into the operations callers actually
//! invoke: building a zone from a drawn polygon, planning an optimized
//! route over its segments, and generating an ad-hoc "quick tour" around
//! the user's position. Each flow takes its collaborators explicitly; there
//! is no hidden global state.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::extraction::{extract_streets, extraction_stats, ExtractionStats, StreetSource};
use crate::optimizer::{
    optimize_route, DirectionsOracle, MatrixOracle, OptimizeOptions,
};
use crate::segmentation::generate_segments;
use crate::store::PlannerStore;
use crate::types::{RouteResult, Zone};
use crate::GeoPoint;

/// Door-to-door pace assumed for quick-tour budgeting, meters per hour.
pub const QUICK_TOUR_M_PER_HOUR: f64 = 2_500.0;

/// Share of the time budget spent on segments; the rest covers walking
/// between segments and returning to the start.
const QUICK_TOUR_RESERVE: f64 = 0.8;

/// Oracle-friendly cap on segments per quick tour.
const QUICK_TOUR_MAX_SEGMENTS: usize = 40;

// ============================================================================
// Zone build
// ============================================================================

/// Outcome of building a zone from a drawn polygon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneBuildReport {
    pub zone: Zone,
    pub street_count: usize,
    pub segment_count: usize,
    /// Ways dropped by the normalizer for unusable geometry.
    pub dropped_ways: usize,
    /// Streets that failed to persist (logged and skipped).
    pub failed_streets: usize,
    pub stats: ExtractionStats,
}

/// Create a zone, extract and normalize its streets, and segment each one.
///
/// The polygon is validated before anything happens. An extraction
/// transport failure rolls the freshly created zone back and propagates;
/// a single street failing to persist is logged, counted and skipped so
/// one bad street cannot fail the whole zone.
pub async fn build_zone<S: StreetSource>(
    store: &dyn PlannerStore,
    source: &S,
    name: &str,
    polygon: &[GeoPoint],
) -> Result<ZoneBuildReport> {
    let zone = store.create_zone(name, polygon)?;
    info!("building zone '{}' ({})", zone.name, zone.id);

    let network = match extract_streets(source, &zone.polygon).await {
        Ok(network) => network,
        Err(e) => {
            // Nothing useful can be attached to the zone; roll it back.
            let _ = store.delete_zone(&zone.id);
            return Err(e);
        }
    };

    let stats = extraction_stats(&network.streets);
    let mut street_count = 0;
    let mut segment_count = 0;
    let mut failed_streets = 0;

    for extracted in &network.streets {
        let street = match store.add_street(&zone.id, extracted) {
            Ok(street) => street,
            Err(e) => {
                warn!("skipping street '{}': {}", extracted.name, e);
                failed_streets += 1;
                continue;
            }
        };
        match generate_segments(store, &street) {
            Ok(segments) => {
                street_count += 1;
                segment_count += segments.len();
            }
            Err(e) => {
                warn!("segmentation failed for street '{}': {}", street.name, e);
                failed_streets += 1;
            }
        }
    }

    info!(
        "zone '{}' built: {} streets, {} segments ({} ways dropped)",
        zone.id, street_count, segment_count, network.dropped
    );

    Ok(ZoneBuildReport {
        zone,
        street_count,
        segment_count,
        dropped_ways: network.dropped,
        failed_streets,
        stats,
    })
}

// ============================================================================
// Route planning
// ============================================================================

/// A planned route over a zone's segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub route: RouteResult,
    /// Segment ids in visiting order; visit order 1..=n was written back
    /// to the store in this order.
    pub ordered_segment_ids: Vec<String>,
}

/// Optimize the visiting order of a zone's segments and persist it.
///
/// Waypoints are the segment midpoints, optionally prefixed with a fixed
/// start point (which then seeds the tour and receives no visit order).
/// The optimized 1-based visit order is written back per segment and the
/// route snapshot is stored on the zone.
pub async fn plan_route<M, D>(
    store: &dyn PlannerStore,
    matrix_oracle: &M,
    directions_oracle: &D,
    zone_id: &str,
    start_point: Option<GeoPoint>,
    options: &OptimizeOptions,
) -> Result<PlannedRoute>
where
    M: MatrixOracle,
    D: DirectionsOracle,
{
    store.zone(zone_id)?;
    let segments = store.segments(zone_id)?;

    let targets: Vec<(String, GeoPoint)> = segments
        .iter()
        .filter_map(|s| s.midpoint().map(|m| (s.id.clone(), m)))
        .collect();
    if targets.is_empty() {
        return Err(PlannerError::infeasible(format!(
            "zone '{}' has no segments to route",
            zone_id
        )));
    }

    info!(
        "planning route for zone '{}' over {} segments",
        zone_id,
        targets.len()
    );

    let mut waypoints: Vec<GeoPoint> = Vec::with_capacity(targets.len() + 1);
    let offset = usize::from(start_point.is_some());
    if let Some(start) = start_point {
        waypoints.push(start);
    }
    waypoints.extend(targets.iter().map(|(_, midpoint)| *midpoint));

    let route = optimize_route(matrix_oracle, directions_oracle, &waypoints, options).await?;

    let ordered_segment_ids: Vec<String> = route
        .visit_order
        .iter()
        .filter(|&&original| original >= offset)
        .map(|&original| targets[original - offset].0.clone())
        .collect();

    for (position, segment_id) in ordered_segment_ids.iter().enumerate() {
        store.set_visit_order(segment_id, position as u32 + 1)?;
    }
    store.save_route(zone_id, &route)?;

    info!(
        "route planned for zone '{}': {:.0}m / {:.0}s",
        zone_id, route.distance_m, route.duration_s
    );

    Ok(PlannedRoute {
        route,
        ordered_segment_ids,
    })
}

// ============================================================================
// Quick tours
// ============================================================================

/// Parameters of an ad-hoc tour around the user's position.
#[derive(Debug, Clone, Copy)]
pub struct QuickTourRequest {
    pub start: GeoPoint,
    /// Available time budget in minutes.
    pub duration_minutes: f64,
    /// Candidate search radius in meters.
    pub max_radius_m: f64,
}

impl QuickTourRequest {
    pub fn new(start: GeoPoint) -> Self {
        Self {
            start,
            duration_minutes: 60.0,
            max_radius_m: 2_000.0,
        }
    }
}

/// An ad-hoc closed tour fitted to a time budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickTour {
    pub route: RouteResult,
    /// Selected segment ids in visiting order.
    pub segment_ids: Vec<String>,
    /// Routed duration of the tour in minutes.
    pub planned_minutes: f64,
    pub within_budget: bool,
}

/// Select nearby open segments that fit the time budget and optimize a
/// closed loop from the start position through their midpoints and back.
pub async fn quick_tour<M, D>(
    store: &dyn PlannerStore,
    matrix_oracle: &M,
    directions_oracle: &D,
    request: &QuickTourRequest,
    options: &OptimizeOptions,
) -> Result<QuickTour>
where
    M: MatrixOracle,
    D: DirectionsOracle,
{
    if !request.start.is_valid() {
        return Err(PlannerError::validation("invalid start position"));
    }

    let candidates = store.open_segments_within(request.start, request.max_radius_m)?;
    if candidates.is_empty() {
        return Err(PlannerError::infeasible(format!(
            "no open segments within {:.0}m",
            request.max_radius_m
        )));
    }

    // Segments that fit 80% of the budget at door-to-door pace, nearest
    // first (the store returns candidates ordered by distance).
    let budget_m = request.duration_minutes / 60.0 * QUICK_TOUR_M_PER_HOUR * QUICK_TOUR_RESERVE;
    let mut selected: Vec<(String, GeoPoint)> = Vec::new();
    let mut selected_m = 0.0;
    for candidate in &candidates {
        if selected.len() >= QUICK_TOUR_MAX_SEGMENTS {
            break;
        }
        let Some(midpoint) = candidate.midpoint() else {
            continue;
        };
        if selected_m + candidate.length_m < budget_m {
            selected_m += candidate.length_m;
            selected.push((candidate.id.clone(), midpoint));
        }
    }

    if selected.is_empty() {
        return Err(PlannerError::infeasible(format!(
            "{:.0}min is not enough for any nearby segment",
            request.duration_minutes
        )));
    }

    info!(
        "quick tour: {} of {} candidates fit a {:.0}min budget",
        selected.len(),
        candidates.len(),
        request.duration_minutes
    );

    // Closed loop: start, midpoints, back to start.
    let mut waypoints = Vec::with_capacity(selected.len() + 2);
    waypoints.push(request.start);
    waypoints.extend(selected.iter().map(|(_, midpoint)| *midpoint));
    waypoints.push(request.start);

    let tour_options = OptimizeOptions {
        start_index: 0,
        ..*options
    };
    let route = optimize_route(matrix_oracle, directions_oracle, &waypoints, &tour_options).await?;

    // Map the visit order back to segments, dropping the start and its
    // closing duplicate.
    let segment_ids: Vec<String> = route
        .visit_order
        .iter()
        .filter(|&&original| original >= 1 && original <= selected.len())
        .map(|&original| selected[original - 1].0.clone())
        .collect();

    let planned_minutes = route.duration_s / 60.0;
    Ok(QuickTour {
        within_budget: planned_minutes <= request.duration_minutes,
        route,
        segment_ids,
        planned_minutes,
    })
}
