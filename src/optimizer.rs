//! Route optimization: order waypoints into a short tour under an external
//! distance oracle.
//!
//! The optimizer never computes road distances itself. A pairwise cost
//! matrix comes from a [`MatrixOracle`], the visiting order is computed
//! locally (nearest-neighbor, optionally improved by 2-opt), and the
//! authoritative routed geometry and totals come from a
//! [`DirectionsOracle`]. Instances above the oracle size limit are split
//! into fixed-size chunks optimized independently and concatenated in
//! chunk order: a documented trade of global optimality for oracle
//! compliance.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::types::{RouteResult, TurnInstruction};
use crate::GeoPoint;

/// Hard size limit of a single matrix/directions oracle request.
pub const MAX_ORACLE_LOCATIONS: usize = 50;

/// Default chunk size for oversized instances.
pub const DEFAULT_CHUNK_SIZE: usize = 40;

/// Minimum improvement for a 2-opt reversal to be applied. Guards against
/// floating-point churn that would stall termination.
const IMPROVEMENT_EPSILON: f64 = 1e-6;

/// Travel profile understood by the routing oracles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TravelProfile {
    #[default]
    FootWalking,
    DrivingCar,
    CyclingRegular,
}

impl TravelProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelProfile::FootWalking => "foot-walking",
            TravelProfile::DrivingCar => "driving-car",
            TravelProfile::CyclingRegular => "cycling-regular",
        }
    }
}

/// Full pairwise distance/duration matrix, meters and seconds.
#[derive(Debug, Clone)]
pub struct CostMatrix {
    pub distances: Vec<Vec<f64>>,
    pub durations: Vec<Vec<f64>>,
}

impl CostMatrix {
    /// Validate that both tables are square and of equal size.
    pub fn new(distances: Vec<Vec<f64>>, durations: Vec<Vec<f64>>) -> Result<Self> {
        let n = distances.len();
        let square = |table: &Vec<Vec<f64>>| table.iter().all(|row| row.len() == n);
        if durations.len() != n || !square(&distances) || !square(&durations) {
            return Err(PlannerError::upstream(
                "matrix",
                "malformed matrix response: tables are not square",
            ));
        }
        Ok(Self {
            distances,
            durations,
        })
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

/// A routed path with authoritative totals from the directions oracle.
#[derive(Debug, Clone)]
pub struct RoutedPath {
    pub geometry: Vec<GeoPoint>,
    pub distance_m: f64,
    pub duration_s: f64,
    pub instructions: Vec<TurnInstruction>,
}

/// Contract of the pairwise distance/duration oracle (1-50 locations).
#[allow(async_fn_in_trait)]
pub trait MatrixOracle {
    async fn matrix(&self, locations: &[GeoPoint], profile: TravelProfile) -> Result<CostMatrix>;
}

/// Contract of the directions oracle (2-50 ordered waypoints).
#[allow(async_fn_in_trait)]
pub trait DirectionsOracle {
    async fn directions(&self, waypoints: &[GeoPoint], profile: TravelProfile)
        -> Result<RoutedPath>;
}

/// How hard the optimizer works on the visiting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationQuality {
    /// Nearest-neighbor only.
    #[default]
    Greedy,
    /// Nearest-neighbor followed by 2-opt local search.
    GreedyTwoOpt,
}

/// Options for one optimization request.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeOptions {
    pub profile: TravelProfile,
    pub quality: OptimizationQuality,
    /// Index of the waypoint the greedy order is seeded at. Ignored for
    /// chunked instances, where every chunk is seeded at its first
    /// waypoint.
    pub start_index: usize,
    pub chunk_size: usize,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            profile: TravelProfile::default(),
            quality: OptimizationQuality::default(),
            start_index: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// ============================================================================
// Order heuristics (pure)
// ============================================================================

/// Greedy nearest-neighbor order over a distance matrix, seeded at
/// `start`. Ties break toward the lower input index.
pub fn nearest_neighbor_order(distances: &[Vec<f64>], start: usize) -> Vec<usize> {
    let n = distances.len();
    if n == 0 {
        return Vec::new();
    }

    let start = start.min(n - 1);
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    let mut current = start;
    visited[current] = true;
    order.push(current);

    while order.len() < n {
        let mut nearest = None;
        let mut best = f64::INFINITY;
        for (candidate, seen) in visited.iter().enumerate() {
            if !seen && distances[current][candidate] < best {
                best = distances[current][candidate];
                nearest = Some(candidate);
            }
        }
        // All remaining candidates unreachable: fall back to input order.
        let next = match nearest {
            Some(idx) => idx,
            None => visited.iter().position(|seen| !seen).unwrap(),
        };
        visited[next] = true;
        order.push(next);
        current = next;
    }

    order
}

/// Total matrix distance of an open path in visiting order.
pub fn order_distance(order: &[usize], distances: &[Vec<f64>]) -> f64 {
    order
        .windows(2)
        .map(|w| distances[w[0]][w[1]])
        .sum()
}

/// 2-opt local search: repeatedly scan all edge pairs and reverse the
/// sub-tour between them whenever that strictly shortens the total matrix
/// distance, until a full pass finds no improving reversal.
///
/// Terminates because each applied reversal strictly decreases the total,
/// which is bounded below by zero. Position 0 is pinned so a fixed start
/// point stays first.
pub fn two_opt(order: &mut [usize], distances: &[Vec<f64>]) {
    let n = order.len();
    if n < 3 {
        return;
    }

    let mut improved = true;
    while improved {
        improved = false;
        for i in 1..n - 1 {
            for j in i + 1..n {
                if reversal_gain(order, distances, i, j) > IMPROVEMENT_EPSILON {
                    order[i..=j].reverse();
                    improved = true;
                }
            }
        }
    }
}

/// Exact distance saved by reversing `order[i..=j]`, accounting for interior
/// edges flipping direction (matrices are not assumed symmetric).
fn reversal_gain(order: &[usize], distances: &[Vec<f64>], i: usize, j: usize) -> f64 {
    let mut before = distances[order[i - 1]][order[i]];
    let mut after = distances[order[i - 1]][order[j]];
    if j + 1 < order.len() {
        before += distances[order[j]][order[j + 1]];
        after += distances[order[i]][order[j + 1]];
    }
    for k in i..j {
        before += distances[order[k]][order[k + 1]];
        after += distances[order[k + 1]][order[k]];
    }
    before - after
}

// ============================================================================
// Optimization entry points
// ============================================================================

/// Order a set of waypoints into a short tour.
///
/// Zero waypoints fail with `OptimizationInfeasible`; one waypoint returns
/// a trivial zero-length route. Instances above [`MAX_ORACLE_LOCATIONS`]
/// are chunked (chunk oracle calls run concurrently, results reassemble in
/// input chunk order). Oracle failures propagate typed; the caller never
/// receives a silently unoptimized order.
pub async fn optimize_route<M, D>(
    matrix_oracle: &M,
    directions_oracle: &D,
    waypoints: &[GeoPoint],
    options: &OptimizeOptions,
) -> Result<RouteResult>
where
    M: MatrixOracle,
    D: DirectionsOracle,
{
    if waypoints.len() > MAX_ORACLE_LOCATIONS {
        return optimize_chunked(matrix_oracle, directions_oracle, waypoints, options).await;
    }
    optimize_direct(matrix_oracle, directions_oracle, waypoints, options).await
}

async fn optimize_direct<M, D>(
    matrix_oracle: &M,
    directions_oracle: &D,
    waypoints: &[GeoPoint],
    options: &OptimizeOptions,
) -> Result<RouteResult>
where
    M: MatrixOracle,
    D: DirectionsOracle,
{
    match waypoints.len() {
        0 => {
            return Err(PlannerError::infeasible("no waypoints provided"));
        }
        1 => {
            return Ok(RouteResult {
                ordered_waypoints: waypoints.to_vec(),
                geometry: waypoints.to_vec(),
                distance_m: 0.0,
                duration_s: 0.0,
                visit_order: vec![0],
                instructions: Vec::new(),
            });
        }
        n if n > MAX_ORACLE_LOCATIONS => {
            // Reaching the oracle with an oversized single request is a
            // caller bug; it must never be sent.
            return Err(PlannerError::infeasible(format!(
                "{} waypoints exceed the {}-location oracle limit",
                n, MAX_ORACLE_LOCATIONS
            )));
        }
        _ => {}
    }

    info!("optimizing route for {} waypoints", waypoints.len());

    let matrix = matrix_oracle.matrix(waypoints, options.profile).await?;
    if matrix.len() != waypoints.len() {
        return Err(PlannerError::upstream(
            "matrix",
            format!(
                "matrix size {} does not match {} waypoints",
                matrix.len(),
                waypoints.len()
            ),
        ));
    }

    let mut order = nearest_neighbor_order(&matrix.distances, options.start_index);
    if options.quality == OptimizationQuality::GreedyTwoOpt {
        let greedy = order_distance(&order, &matrix.distances);
        two_opt(&mut order, &matrix.distances);
        debug!(
            "2-opt improved matrix distance {:.0}m -> {:.0}m",
            greedy,
            order_distance(&order, &matrix.distances)
        );
    }

    let ordered_waypoints: Vec<GeoPoint> = order.iter().map(|&i| waypoints[i]).collect();
    let routed = directions_oracle
        .directions(&ordered_waypoints, options.profile)
        .await?;

    debug!(
        "routed {:.0}m / {:.0}s over {} waypoints",
        routed.distance_m,
        routed.duration_s,
        ordered_waypoints.len()
    );

    Ok(RouteResult {
        ordered_waypoints,
        geometry: routed.geometry,
        distance_m: routed.distance_m,
        duration_s: routed.duration_s,
        visit_order: order,
        instructions: routed.instructions,
    })
}

async fn optimize_chunked<M, D>(
    matrix_oracle: &M,
    directions_oracle: &D,
    waypoints: &[GeoPoint],
    options: &OptimizeOptions,
) -> Result<RouteResult>
where
    M: MatrixOracle,
    D: DirectionsOracle,
{
    let chunk_size = options.chunk_size.clamp(1, MAX_ORACLE_LOCATIONS);
    let chunks: Vec<&[GeoPoint]> = waypoints.chunks(chunk_size).collect();

    info!(
        "chunking {} waypoints into {} chunks of up to {}",
        waypoints.len(),
        chunks.len(),
        chunk_size
    );

    // Chunk seeds are local: every chunk starts at its own first waypoint.
    let chunk_options = OptimizeOptions {
        start_index: 0,
        ..*options
    };

    // Per-chunk oracle calls are independent; issue them concurrently and
    // let try_join_all reassemble results in input chunk order.
    let results = futures::future::try_join_all(
        chunks
            .iter()
            .map(|chunk| optimize_direct(matrix_oracle, directions_oracle, chunk, &chunk_options)),
    )
    .await?;

    let mut combined = RouteResult {
        ordered_waypoints: Vec::with_capacity(waypoints.len()),
        geometry: Vec::new(),
        distance_m: 0.0,
        duration_s: 0.0,
        visit_order: Vec::with_capacity(waypoints.len()),
        instructions: Vec::new(),
    };

    let mut base = 0;
    for (chunk, result) in chunks.iter().zip(results) {
        combined.ordered_waypoints.extend(result.ordered_waypoints);
        combined.geometry.extend(result.geometry);
        combined.distance_m += result.distance_m;
        combined.duration_s += result.duration_s;
        combined
            .visit_order
            .extend(result.visit_order.iter().map(|&i| i + base));
        combined.instructions.extend(result.instructions);
        base += chunk.len();
    }

    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::{destination_point, haversine_distance, polyline_length};

    /// Matrix oracle backed by great-circle distances at walking pace.
    struct GeoMatrix;

    impl MatrixOracle for GeoMatrix {
        async fn matrix(
            &self,
            locations: &[GeoPoint],
            _profile: TravelProfile,
        ) -> Result<CostMatrix> {
            let distances: Vec<Vec<f64>> = locations
                .iter()
                .map(|a| locations.iter().map(|b| haversine_distance(*a, *b)).collect())
                .collect();
            let durations = distances
                .iter()
                .map(|row| row.iter().map(|d| d / 1.39).collect())
                .collect();
            CostMatrix::new(distances, durations)
        }
    }

    /// Directions oracle that routes straight lines between waypoints.
    struct StraightLine;

    impl DirectionsOracle for StraightLine {
        async fn directions(
            &self,
            waypoints: &[GeoPoint],
            _profile: TravelProfile,
        ) -> Result<RoutedPath> {
            let distance_m = polyline_length(waypoints);
            Ok(RoutedPath {
                geometry: waypoints.to_vec(),
                distance_m,
                duration_s: distance_m / 1.39,
                instructions: Vec::new(),
            })
        }
    }

    /// Matrix oracle that always fails, to exercise error propagation.
    struct BrokenMatrix;

    impl MatrixOracle for BrokenMatrix {
        async fn matrix(
            &self,
            _locations: &[GeoPoint],
            _profile: TravelProfile,
        ) -> Result<CostMatrix> {
            Err(PlannerError::upstream("matrix", "connection refused"))
        }
    }

    fn grid_waypoints(n: usize) -> Vec<GeoPoint> {
        let origin = GeoPoint::new(2.3522, 48.8566);
        (0..n)
            .map(|i| destination_point(origin, 80.0 * i as f64, ((i * 37) % 360) as f64))
            .collect()
    }

    #[test]
    fn test_nearest_neighbor_tie_breaks_by_input_order() {
        // Node 0 is equidistant from 1 and 2.
        let d = vec![
            vec![0.0, 5.0, 5.0],
            vec![5.0, 0.0, 1.0],
            vec![5.0, 1.0, 0.0],
        ];
        assert_eq!(nearest_neighbor_order(&d, 0), vec![0, 1, 2]);
    }

    #[test]
    fn test_nearest_neighbor_seeded() {
        let d = vec![
            vec![0.0, 2.0, 9.0],
            vec![2.0, 0.0, 3.0],
            vec![9.0, 3.0, 0.0],
        ];
        assert_eq!(nearest_neighbor_order(&d, 2), vec![2, 1, 0]);
        assert_eq!(nearest_neighbor_order(&[], 0), Vec::<usize>::new());
    }

    #[test]
    fn test_two_opt_uncrosses_tour() {
        // Four corners of a square, 0-2-1-3 crosses; 2-opt must fix it.
        let p = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.01, 0.0),
            GeoPoint::new(0.01, 0.01),
            GeoPoint::new(0.0, 0.01),
        ];
        let d: Vec<Vec<f64>> = p
            .iter()
            .map(|a| p.iter().map(|b| haversine_distance(*a, *b)).collect())
            .collect();

        let mut order = vec![0, 2, 1, 3];
        let crossed = order_distance(&order, &d);
        two_opt(&mut order, &d);
        let uncrossed = order_distance(&order, &d);

        assert!(uncrossed < crossed);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
        // Start stays pinned.
        assert_eq!(order[0], 0);
    }

    #[tokio::test]
    async fn test_optimize_empty_fails() {
        let result =
            optimize_route(&GeoMatrix, &StraightLine, &[], &OptimizeOptions::default()).await;
        assert!(matches!(
            result,
            Err(PlannerError::OptimizationInfeasible { .. })
        ));
    }

    #[tokio::test]
    async fn test_optimize_single_waypoint_trivial() {
        let wp = [GeoPoint::new(2.35, 48.85)];
        let result = optimize_route(&GeoMatrix, &StraightLine, &wp, &OptimizeOptions::default())
            .await
            .unwrap();
        assert_eq!(result.visit_order, vec![0]);
        assert_eq!(result.distance_m, 0.0);
        assert_eq!(result.ordered_waypoints, wp.to_vec());
    }

    #[tokio::test]
    async fn test_optimize_visits_every_waypoint_once() {
        let waypoints = grid_waypoints(12);
        let options = OptimizeOptions {
            quality: OptimizationQuality::GreedyTwoOpt,
            ..OptimizeOptions::default()
        };
        let result = optimize_route(&GeoMatrix, &StraightLine, &waypoints, &options)
            .await
            .unwrap();

        let mut sorted = result.visit_order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..12).collect::<Vec<_>>());
        assert_eq!(result.visit_order[0], 0);
        assert!(result.distance_m >= 0.0);
        assert_eq!(result.ordered_waypoints.len(), 12);
    }

    #[tokio::test]
    async fn test_chunked_preserves_chunk_order() {
        let waypoints = grid_waypoints(90);
        let result = optimize_route(
            &GeoMatrix,
            &StraightLine,
            &waypoints,
            &OptimizeOptions::default(),
        )
        .await
        .unwrap();

        // Permutation over all 90 inputs.
        let mut sorted = result.visit_order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..90).collect::<Vec<_>>());

        // Chunks of 40: positions 0-39 hold indices 0-39, and so on.
        assert!(result.visit_order[..40].iter().all(|&i| i < 40));
        assert!(result.visit_order[40..80].iter().all(|&i| (40..80).contains(&i)));
        assert!(result.visit_order[80..].iter().all(|&i| i >= 80));

        // Concatenated totals are finite and ordered waypoints complete.
        assert_eq!(result.ordered_waypoints.len(), 90);
        assert!(result.distance_m.is_finite());
    }

    #[tokio::test]
    async fn test_oracle_failure_propagates() {
        let waypoints = grid_waypoints(5);
        let result = optimize_route(
            &BrokenMatrix,
            &StraightLine,
            &waypoints,
            &OptimizeOptions::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(PlannerError::UpstreamUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_matrix_size_mismatch_is_upstream_error() {
        struct ShortMatrix;
        impl MatrixOracle for ShortMatrix {
            async fn matrix(
                &self,
                _locations: &[GeoPoint],
                _profile: TravelProfile,
            ) -> Result<CostMatrix> {
                CostMatrix::new(vec![vec![0.0]], vec![vec![0.0]])
            }
        }

        let waypoints = grid_waypoints(3);
        let result = optimize_route(
            &ShortMatrix,
            &StraightLine,
            &waypoints,
            &OptimizeOptions::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(PlannerError::UpstreamUnavailable { .. })
        ));
    }
}
