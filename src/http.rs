//! HTTP clients for the upstream collaborators.
//!
//! [`OverpassClient`] talks to an Overpass-compatible street-extraction
//! endpoint; [`OrsClient`] talks to OpenRouteService-shaped matrix and
//! directions endpoints. Both are explicit client structs injected where
//! they are consumed: base URL, API key and timeout live on the instance,
//! never in process-wide state. Transport failures, non-success statuses
//! and malformed bodies all surface as typed `UpstreamUnavailable` errors.

use std::time::Duration;

use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::extraction::{RawElementSet, StreetSource};
use crate::optimizer::{
    CostMatrix, DirectionsOracle, MatrixOracle, RoutedPath, TravelProfile, MAX_ORACLE_LOCATIONS,
};
use crate::types::TurnInstruction;
use crate::GeoPoint;

/// Public Overpass interpreter endpoint.
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Public OpenRouteService endpoint.
pub const DEFAULT_ORS_URL: &str = "https://api.openrouteservice.org";

/// HTTP timeout margin added on top of the Overpass server-side timeout.
const TRANSPORT_MARGIN_S: u64 = 5;

/// Default HTTP timeout for routing oracle calls.
const ORS_TIMEOUT_S: u64 = 30;

// ============================================================================
// Street extraction client
// ============================================================================

/// Which road classes an extraction query includes.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Server-side query timeout in seconds.
    pub timeout_s: u32,
    /// Include `service` roads.
    pub include_service: bool,
    /// Include footways, paths and cycleways.
    pub include_paths: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            timeout_s: 25,
            include_service: true,
            include_paths: false,
        }
    }
}

/// Client for an Overpass-compatible extraction endpoint.
pub struct OverpassClient {
    client: Client,
    base_url: String,
    options: ExtractionOptions,
}

impl OverpassClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, ExtractionOptions::default())
    }

    pub fn with_options(base_url: impl Into<String>, options: ExtractionOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(
                options.timeout_s as u64 + TRANSPORT_MARGIN_S,
            ))
            .build()
            .map_err(|e| {
                PlannerError::upstream("extraction", format!("failed to build client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            options,
        })
    }

    /// Overpass QL query for all selected road classes within the polygon.
    fn build_query(&self, polygon: &[GeoPoint]) -> String {
        let poly: Vec<String> = polygon
            .iter()
            .map(|p| format!("{} {}", p.lat, p.lon))
            .collect();

        let mut classes = vec![
            "primary",
            "secondary",
            "tertiary",
            "unclassified",
            "residential",
            "living_street",
            "pedestrian",
        ];
        if self.options.include_service {
            classes.push("service");
        }
        if self.options.include_paths {
            classes.extend(["footway", "path", "cycleway"]);
        }

        format!(
            "[out:json][timeout:{}];\n(\n  way[\"highway\"~\"^({})$\"](poly:\"{}\");\n);\nout body;\n>;\nout skel qt;",
            self.options.timeout_s,
            classes.join("|"),
            poly.join(" ")
        )
    }
}

impl StreetSource for OverpassClient {
    async fn extract(&self, polygon: &[GeoPoint]) -> Result<RawElementSet> {
        let query = self.build_query(polygon);
        debug!("executing extraction query ({} bytes)", query.len());

        let response = self
            .client
            .post(&self.base_url)
            .form(&[("data", query.as_str())])
            .send()
            .await
            .map_err(|e| PlannerError::upstream("extraction", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlannerError::upstream_status(
                "extraction",
                body,
                status.as_u16(),
            ));
        }

        let set: RawElementSet = response
            .json()
            .await
            .map_err(|e| PlannerError::upstream("extraction", format!("parse error: {}", e)))?;

        info!("extraction returned {} elements", set.elements.len());
        Ok(set)
    }
}

// ============================================================================
// Routing oracle client
// ============================================================================

/// Client for OpenRouteService-shaped matrix and directions endpoints.
pub struct OrsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OrsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(ORS_TIMEOUT_S))
            .build()
            .map_err(|e| {
                PlannerError::upstream("routing", format!("failed to build client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        service: &'static str,
        url: String,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.api_key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| PlannerError::upstream(service, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlannerError::upstream_status(service, body, status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| PlannerError::upstream(service, format!("parse error: {}", e)))
    }
}

#[derive(Serialize)]
struct MatrixRequest {
    locations: Vec<[f64; 2]>,
    metrics: [&'static str; 2],
    units: &'static str,
}

#[derive(Deserialize)]
struct MatrixResponse {
    distances: Option<Vec<Vec<f64>>>,
    durations: Option<Vec<Vec<f64>>>,
}

impl MatrixOracle for OrsClient {
    async fn matrix(&self, locations: &[GeoPoint], profile: TravelProfile) -> Result<CostMatrix> {
        if locations.is_empty() {
            return Err(PlannerError::infeasible("at least one location is required"));
        }
        if locations.len() > MAX_ORACLE_LOCATIONS {
            return Err(PlannerError::infeasible(format!(
                "{} locations exceed the {}-location matrix limit",
                locations.len(),
                MAX_ORACLE_LOCATIONS
            )));
        }

        let request = MatrixRequest {
            locations: locations.iter().map(|p| [p.lon, p.lat]).collect(),
            metrics: ["distance", "duration"],
            units: "m",
        };
        let url = format!("{}/v2/matrix/{}", self.base_url, profile.as_str());
        let response: MatrixResponse = self.post_json("matrix", url, &request).await?;

        let (Some(distances), Some(durations)) = (response.distances, response.durations) else {
            return Err(PlannerError::upstream(
                "matrix",
                "response is missing distance or duration tables",
            ));
        };
        CostMatrix::new(distances, durations)
    }
}

#[derive(Serialize)]
struct DirectionsRequest {
    coordinates: Vec<[f64; 2]>,
    instructions: bool,
    preference: &'static str,
}

#[derive(Deserialize)]
struct DirectionsResponse {
    features: Vec<DirectionsFeature>,
}

#[derive(Deserialize)]
struct DirectionsFeature {
    geometry: FeatureGeometry,
    properties: FeatureProperties,
}

#[derive(Deserialize)]
struct FeatureGeometry {
    coordinates: Vec<[f64; 2]>,
}

#[derive(Deserialize)]
struct FeatureProperties {
    summary: RouteSummary,
    #[serde(default)]
    segments: Vec<RouteLeg>,
}

#[derive(Deserialize)]
struct RouteSummary {
    distance: f64,
    duration: f64,
}

#[derive(Deserialize)]
struct RouteLeg {
    #[serde(default)]
    steps: Vec<RouteStep>,
}

#[derive(Deserialize)]
struct RouteStep {
    instruction: String,
    distance: f64,
    duration: f64,
    #[serde(default)]
    name: Option<String>,
}

impl DirectionsOracle for OrsClient {
    async fn directions(
        &self,
        waypoints: &[GeoPoint],
        profile: TravelProfile,
    ) -> Result<RoutedPath> {
        if waypoints.len() < 2 {
            return Err(PlannerError::infeasible(
                "at least 2 waypoints are required for directions",
            ));
        }
        if waypoints.len() > MAX_ORACLE_LOCATIONS {
            return Err(PlannerError::infeasible(format!(
                "{} waypoints exceed the {}-waypoint directions limit",
                waypoints.len(),
                MAX_ORACLE_LOCATIONS
            )));
        }

        let request = DirectionsRequest {
            coordinates: waypoints.iter().map(|p| [p.lon, p.lat]).collect(),
            instructions: true,
            preference: "shortest",
        };
        let url = format!(
            "{}/v2/directions/{}/geojson",
            self.base_url,
            profile.as_str()
        );
        let response: DirectionsResponse = self.post_json("directions", url, &request).await?;

        let Some(feature) = response.features.into_iter().next() else {
            return Err(PlannerError::upstream(
                "directions",
                "response contains no route feature",
            ));
        };

        Ok(RoutedPath {
            geometry: feature
                .geometry
                .coordinates
                .iter()
                .map(|c| GeoPoint::new(c[0], c[1]))
                .collect(),
            distance_m: feature.properties.summary.distance,
            duration_s: feature.properties.summary.duration,
            instructions: feature
                .properties
                .segments
                .into_iter()
                .flat_map(|leg| leg.steps)
                .map(|step| TurnInstruction {
                    instruction: step.instruction,
                    distance_m: step.distance,
                    duration_s: step.duration,
                    name: step.name,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(2.34, 48.85),
            GeoPoint::new(2.36, 48.85),
            GeoPoint::new(2.36, 48.87),
            GeoPoint::new(2.34, 48.87),
            GeoPoint::new(2.34, 48.85),
        ]
    }

    #[test]
    fn test_build_query_poly_format() {
        let client = OverpassClient::new(DEFAULT_OVERPASS_URL).unwrap();
        let query = client.build_query(&square());

        // Overpass poly strings are "lat lon" pairs.
        assert!(query.contains("48.85 2.34"));
        assert!(query.contains("[timeout:25]"));
        assert!(query.contains("residential"));
        assert!(query.contains("service"));
        assert!(!query.contains("footway"));
    }

    #[test]
    fn test_build_query_respects_options() {
        let client = OverpassClient::with_options(
            DEFAULT_OVERPASS_URL,
            ExtractionOptions {
                timeout_s: 10,
                include_service: false,
                include_paths: true,
            },
        )
        .unwrap();
        let query = client.build_query(&square());

        assert!(query.contains("[timeout:10]"));
        assert!(!query.contains("service"));
        assert!(query.contains("footway"));
        assert!(query.contains("cycleway"));
    }

    #[tokio::test]
    async fn test_matrix_size_limit_enforced_before_sending() {
        let client = OrsClient::new(DEFAULT_ORS_URL, "test-key").unwrap();
        let locations: Vec<GeoPoint> = (0..51)
            .map(|i| GeoPoint::new(2.3 + i as f64 * 0.001, 48.85))
            .collect();

        let result = client.matrix(&locations, TravelProfile::FootWalking).await;
        assert!(matches!(
            result,
            Err(PlannerError::OptimizationInfeasible { .. })
        ));
    }

    #[tokio::test]
    async fn test_directions_requires_two_waypoints() {
        let client = OrsClient::new(DEFAULT_ORS_URL, "test-key").unwrap();
        let result = client
            .directions(&[GeoPoint::new(2.35, 48.85)], TravelProfile::FootWalking)
            .await;
        assert!(matches!(
            result,
            Err(PlannerError::OptimizationInfeasible { .. })
        ));
    }

    #[test]
    fn test_matrix_response_parses() {
        let body = r#"{
            "durations": [[0.0, 10.0], [10.0, 0.0]],
            "distances": [[0.0, 14.0], [14.0, 0.0]],
            "sources": [],
            "destinations": []
        }"#;
        let response: MatrixResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.distances.unwrap()[0][1], 14.0);
        assert_eq!(response.durations.unwrap()[1][0], 10.0);
    }

    #[test]
    fn test_directions_response_parses() {
        let body = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[2.35, 48.85], [2.36, 48.86]]
                },
                "properties": {
                    "summary": {"distance": 1500.0, "duration": 1080.0},
                    "segments": [{
                        "distance": 1500.0,
                        "duration": 1080.0,
                        "steps": [{
                            "instruction": "Head north",
                            "distance": 1500.0,
                            "duration": 1080.0,
                            "name": "Rue de Test"
                        }]
                    }],
                    "way_points": [0, 1]
                }
            }]
        }"#;
        let response: DirectionsResponse = serde_json::from_str(body).unwrap();
        let feature = &response.features[0];
        assert_eq!(feature.geometry.coordinates.len(), 2);
        assert_eq!(feature.properties.summary.distance, 1500.0);
        assert_eq!(
            feature.properties.segments[0].steps[0].instruction,
            "Head north"
        );
    }

    #[test]
    fn test_raw_element_set_parses_overpass_body() {
        let body = r#"{
            "version": 0.6,
            "generator": "Overpass API",
            "elements": [
                {"type": "node", "id": 1, "lat": 48.85, "lon": 2.35,
                 "tags": {"addr:housenumber": "12"}},
                {"type": "way", "id": 10, "nodes": [1, 2],
                 "tags": {"highway": "residential", "name": "Rue de Test"}}
            ]
        }"#;
        let set: RawElementSet = serde_json::from_str(body).unwrap();
        assert_eq!(set.elements.len(), 2);
    }
}
