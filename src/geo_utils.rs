//! Geographic utilities: distance, bearing, offsets and polyline helpers.
//!
//! Pure functions, no I/O. Everything operates on WGS84 lon/lat degrees and
//! returns meters. Degenerate inputs (empty or single-point lines) fail
//! closed with zero-length or identity results instead of panicking.

use geo::{algorithm::simplify::Simplify, Coord, LineString};

use crate::{Bounds, GeoPoint};

/// Earth radius in meters (mean radius).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters (haversine).
///
/// Symmetric, zero for identical points, error well under 0.5% for
/// distances below 50 km.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` to `b` in degrees, normalized to `[0, 360)`.
pub fn initial_bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Destination point given a start, a distance in meters and a bearing in
/// degrees. Longitude is normalized to `[-180, 180)`.
pub fn destination_point(origin: GeoPoint, distance_m: f64, bearing_deg: f64) -> GeoPoint {
    let phi1 = origin.lat.to_radians();
    let lambda1 = origin.lon.to_radians();
    let theta = bearing_deg.to_radians();
    let delta = distance_m / EARTH_RADIUS_M;

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos())
            .atan2(delta.cos() - phi1.sin() * phi2.sin());

    GeoPoint::new(
        (lambda2.to_degrees() + 540.0) % 360.0 - 180.0,
        phi2.to_degrees(),
    )
}

/// Total length of a polyline in meters. Empty and single-point lines have
/// length zero.
pub fn polyline_length(line: &[GeoPoint]) -> f64 {
    line.windows(2)
        .map(|w| haversine_distance(w[0], w[1]))
        .sum()
}

/// Point at half the cumulative length of a polyline, linearly interpolated
/// within the straddling segment. `None` for an empty line; a single-point
/// line returns that point.
pub fn polyline_midpoint(line: &[GeoPoint]) -> Option<GeoPoint> {
    if line.is_empty() {
        return None;
    }
    if line.len() == 1 {
        return Some(line[0]);
    }

    let total = polyline_length(line);
    if total == 0.0 {
        return Some(line[0]);
    }

    let half = total / 2.0;
    let mut accumulated = 0.0;

    for w in line.windows(2) {
        let seg = haversine_distance(w[0], w[1]);
        if accumulated + seg >= half && seg > 0.0 {
            let ratio = (half - accumulated) / seg;
            return Some(GeoPoint::new(
                w[0].lon + (w[1].lon - w[0].lon) * ratio,
                w[0].lat + (w[1].lat - w[0].lat) * ratio,
            ));
        }
        accumulated += seg;
    }

    // Rounding pushed us past the end.
    line.last().copied()
}

/// Translate every vertex of a polyline laterally by `offset_m` meters,
/// perpendicular to the local bearing (positive = right of travel
/// direction). Approximates the other side of a street when no authoritative
/// lane geometry exists.
///
/// Known limitation: offset lines can self-intersect on sharp turns. Lines
/// with fewer than 2 points are returned unchanged.
pub fn offset_polyline(line: &[GeoPoint], offset_m: f64) -> Vec<GeoPoint> {
    if line.len() < 2 {
        return line.to_vec();
    }

    let last = line.len() - 1;
    line.iter()
        .enumerate()
        .map(|(i, &point)| {
            let prev = line[i.saturating_sub(1)];
            let next = line[(i + 1).min(last)];
            let bearing = initial_bearing(prev, next);
            let perp = (bearing + 90.0) % 360.0;
            destination_point(point, offset_m, perp)
        })
        .collect()
}

/// Ramer-Douglas-Peucker line simplification.
///
/// `tolerance` is the maximum deviation from the original line in coordinate
/// units (degrees; 0.0001 is roughly 11 m). Uses the geo crate's
/// implementation. Lines with fewer than 3 points are returned unchanged.
pub fn simplify_polyline(line: &[GeoPoint], tolerance: f64) -> Vec<GeoPoint> {
    if line.len() < 3 {
        return line.to_vec();
    }

    let coords: Vec<Coord<f64>> = line.iter().map(|p| Coord { x: p.lon, y: p.lat }).collect();
    let simplified = LineString::new(coords).simplify(&tolerance);

    simplified
        .coords()
        .map(|c| GeoPoint::new(c.x, c.y))
        .collect()
}

/// Nearest point on a polyline to a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoint {
    /// Projected point on the polyline.
    pub point: GeoPoint,
    /// Distance from the query point to the projection in meters.
    pub distance_m: f64,
    /// Index of the segment (between vertex `i` and `i + 1`) holding the
    /// projection.
    pub segment_index: usize,
}

/// Project a point onto a polyline and return the nearest point, its
/// distance and the index of the straddling segment. `None` for an empty
/// line; a single-point line projects onto that point.
pub fn nearest_point_on_polyline(point: GeoPoint, line: &[GeoPoint]) -> Option<NearestPoint> {
    if line.is_empty() {
        return None;
    }
    if line.len() == 1 {
        return Some(NearestPoint {
            point: line[0],
            distance_m: haversine_distance(point, line[0]),
            segment_index: 0,
        });
    }

    let mut best = NearestPoint {
        point: line[0],
        distance_m: f64::INFINITY,
        segment_index: 0,
    };

    for (i, w) in line.windows(2).enumerate() {
        let projected = project_on_segment(point, w[0], w[1]);
        let distance = haversine_distance(point, projected);
        if distance < best.distance_m {
            best = NearestPoint {
                point: projected,
                distance_m: distance,
                segment_index: i,
            };
        }
    }

    Some(best)
}

/// Project a point onto a line segment, clamped to the segment, in plain
/// lon/lat space. Adequate for the short spans this library works with.
fn project_on_segment(point: GeoPoint, start: GeoPoint, end: GeoPoint) -> GeoPoint {
    let dx = end.lon - start.lon;
    let dy = end.lat - start.lat;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return start;
    }

    let t = ((point.lon - start.lon) * dx + (point.lat - start.lat) * dy) / len_sq;
    let t = t.clamp(0.0, 1.0);
    GeoPoint::new(start.lon + t * dx, start.lat + t * dy)
}

/// Axis-aligned bounding box of a point set. `None` when empty.
pub fn compute_bounds(points: &[GeoPoint]) -> Option<Bounds> {
    Bounds::from_points(points)
}

/// Ray-casting point-in-polygon test on a simple ring. The ring may be open
/// or closed; self-intersecting rings are not supported.
pub fn point_in_polygon(point: GeoPoint, ring: &[GeoPoint]) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);

    for i in 0..ring.len() {
        let pi = ring[i];
        let pj = ring[j];
        if (pi.lat > point.lat) != (pj.lat > point.lat)
            && point.lon
                < (pj.lon - pi.lon) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lon
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Centroid of a simple polygon ring (shoelace formula). Falls back to the
/// vertex average for degenerate (zero-area) rings; `None` when empty.
pub fn polygon_centroid(ring: &[GeoPoint]) -> Option<GeoPoint> {
    if ring.is_empty() {
        return None;
    }

    let mut area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;

    for w in ring.windows(2) {
        let cross = w[0].lon * w[1].lat - w[1].lon * w[0].lat;
        area += cross;
        cx += (w[0].lon + w[1].lon) * cross;
        cy += (w[0].lat + w[1].lat) * cross;
    }

    area *= 0.5;
    if area.abs() < f64::EPSILON {
        let n = ring.len() as f64;
        let lon = ring.iter().map(|p| p.lon).sum::<f64>() / n;
        let lat = ring.iter().map(|p| p.lat).sum::<f64>() / n;
        return Some(GeoPoint::new(lon, lat));
    }

    Some(GeoPoint::new(cx / (6.0 * area), cy / (6.0 * area)))
}

/// Closed circle ring around a center point, `steps` vertices plus the
/// closing repeat of the first.
pub fn buffer_point(center: GeoPoint, radius_m: f64, steps: usize) -> Vec<GeoPoint> {
    let steps = steps.max(3);
    let mut ring: Vec<GeoPoint> = (0..steps)
        .map(|i| destination_point(center, radius_m, 360.0 / steps as f64 * i as f64))
        .collect();
    ring.push(ring[0]);
    ring
}

/// Human-readable distance: meters below 1 km, kilometers above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m", meters.round() as i64)
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

/// Human-readable duration from seconds: `"2h 05min"` or `"45min"`.
pub fn format_duration(seconds: f64) -> String {
    let total_minutes = (seconds / 60.0).floor() as i64;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours > 0 {
        format!("{}h {:02}min", hours, minutes)
    } else {
        format!("{}min", minutes)
    }
}
