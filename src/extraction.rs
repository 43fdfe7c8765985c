//! Street extraction and normalization.
//!
//! Turns raw element collections from the upstream street-extraction
//! service (Overpass-shaped: nodes + ways with tags, optionally inline
//! geometry) into validated, typed streets. Per-street invalid geometry is
//! filtered silently and counted; only a transport/parse-level failure of
//! the collaborator itself fails the whole extraction.

use std::collections::HashMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo_utils::polyline_length;
use crate::types::{HouseNumber, Parity};
use crate::GeoPoint;

/// Display name assigned to streets with no usable name tag.
pub const UNNAMED_STREET: &str = "unnamed";

// ============================================================================
// Raw element model (collaborator wire shape)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawElementKind {
    Node,
    Way,
    Relation,
}

/// Inline per-vertex geometry as some extraction backends return it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawLatLon {
    pub lat: f64,
    pub lon: f64,
}

/// One raw element (node or way) from the extraction service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawElement {
    #[serde(rename = "type")]
    pub kind: RawElementKind,
    pub id: i64,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
    /// Node references, for ways.
    #[serde(default)]
    pub nodes: Option<Vec<i64>>,
    /// Inline geometry, when the backend resolved it already.
    #[serde(default)]
    pub geometry: Option<Vec<RawLatLon>>,
}

/// The raw response of one extraction request. Zero elements is a valid
/// "no streets here" result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawElementSet {
    #[serde(default)]
    pub elements: Vec<RawElement>,
}

/// Contract of the street-extraction collaborator.
#[allow(async_fn_in_trait)]
pub trait StreetSource {
    /// Fetch all raw elements within a simple polygon ring.
    async fn extract(&self, polygon: &[GeoPoint]) -> Result<RawElementSet>;
}

// ============================================================================
// Normalized output
// ============================================================================

/// A street normalized out of the raw element set, not yet attached to a
/// zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedStreet {
    /// Upstream element id.
    pub source_id: String,
    pub name: String,
    pub path: Vec<GeoPoint>,
    pub tags: HashMap<String, String>,
    pub house_numbers: Vec<HouseNumber>,
}

impl ExtractedStreet {
    pub fn length_m(&self) -> f64 {
        polyline_length(&self.path)
    }

    pub fn has_house_numbers(&self) -> bool {
        !self.house_numbers.is_empty()
    }
}

/// Result of normalizing one raw element set.
#[derive(Debug, Clone, Default)]
pub struct StreetNetwork {
    pub streets: Vec<ExtractedStreet>,
    /// Ways dropped for degenerate or out-of-range geometry.
    pub dropped: usize,
}

/// Aggregate extraction statistics for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total: usize,
    pub named: usize,
    pub with_house_numbers: usize,
    pub total_length_m: f64,
}

// ============================================================================
// Normalization
// ============================================================================

/// Resolve a raw element set into typed streets.
///
/// Ways with fewer than 2 resolved coordinates, or with any non-finite or
/// out-of-range coordinate, are discarded and counted in
/// [`StreetNetwork::dropped`]. Display names fall back through
/// `name` → `ref` → `addr:street` → [`UNNAMED_STREET`].
pub fn normalize_streets(set: &RawElementSet) -> StreetNetwork {
    // First pass: index nodes for reference resolution.
    let mut node_index: HashMap<i64, &RawElement> = HashMap::new();
    for element in &set.elements {
        if element.kind == RawElementKind::Node {
            node_index.insert(element.id, element);
        }
    }

    let mut network = StreetNetwork::default();

    // Second pass: build ways.
    for element in &set.elements {
        if element.kind != RawElementKind::Way {
            continue;
        }

        let path = resolve_way_path(element, &node_index);
        if path.len() < 2 || path.iter().any(|p| !p.is_valid()) {
            debug!("dropping way {} with unusable geometry", element.id);
            network.dropped += 1;
            continue;
        }

        let tags = element.tags.clone().unwrap_or_default();
        let name = tags
            .get("name")
            .or_else(|| tags.get("ref"))
            .or_else(|| tags.get("addr:street"))
            .cloned()
            .unwrap_or_else(|| UNNAMED_STREET.to_string());

        network.streets.push(ExtractedStreet {
            source_id: element.id.to_string(),
            name,
            path,
            tags,
            house_numbers: extract_house_numbers(element, &node_index),
        });
    }

    info!(
        "normalized {} streets ({} ways dropped)",
        network.streets.len(),
        network.dropped
    );

    network
}

/// Coordinates of a way: inline geometry when supplied, node references
/// otherwise. Unresolvable references are skipped.
fn resolve_way_path(way: &RawElement, node_index: &HashMap<i64, &RawElement>) -> Vec<GeoPoint> {
    if let Some(geometry) = &way.geometry {
        return geometry
            .iter()
            .map(|c| GeoPoint::new(c.lon, c.lat))
            .collect();
    }

    let Some(node_refs) = &way.nodes else {
        return Vec::new();
    };

    node_refs
        .iter()
        .filter_map(|node_id| {
            let node = node_index.get(node_id)?;
            Some(GeoPoint::new(node.lon?, node.lat?))
        })
        .collect()
}

/// House-number observations from a way's constituent nodes: the leading
/// integer of each `addr:housenumber` value, classified even/odd. Values
/// with no leading integer are ignored.
fn extract_house_numbers(
    way: &RawElement,
    node_index: &HashMap<i64, &RawElement>,
) -> Vec<HouseNumber> {
    let Some(node_refs) = &way.nodes else {
        return Vec::new();
    };

    node_refs
        .iter()
        .filter_map(|node_id| {
            let node = node_index.get(node_id)?;
            let raw = node.tags.as_ref()?.get("addr:housenumber")?;
            let number = parse_leading_number(raw)?;
            Some(HouseNumber {
                raw: raw.clone(),
                number,
                parity: Parity::of(number),
                position: GeoPoint::new(node.lon?, node.lat?),
            })
        })
        .collect()
}

fn parse_leading_number(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Aggregate statistics over a set of extracted streets.
pub fn extraction_stats(streets: &[ExtractedStreet]) -> ExtractionStats {
    let mut stats = ExtractionStats {
        total: streets.len(),
        ..Default::default()
    };

    for street in streets {
        if street.name != UNNAMED_STREET {
            stats.named += 1;
        }
        if street.has_house_numbers() {
            stats.with_house_numbers += 1;
        }
        stats.total_length_m += street.length_m();
    }

    stats
}

/// Fetch and normalize the streets within a polygon in one call.
pub async fn extract_streets<S: StreetSource>(
    source: &S,
    polygon: &[GeoPoint],
) -> Result<StreetNetwork> {
    let raw = source.extract(polygon).await?;
    debug!("extraction returned {} raw elements", raw.elements.len());
    Ok(normalize_streets(&raw))
}
