//! Zone partitioning: split an oversized candidate zone into sectors sized
//! to a target work duration.
//!
//! Street length converts to an estimated door-to-door duration with a
//! fixed speed constant; when the estimate exceeds the target, a roughly
//! square grid is laid over the streets' bounding box and streets are
//! assigned to the cells that capture their vertices. A street straddling
//! a cell boundary can land in more than one sector at this stage;
//! reconciliation only re-homes streets captured by no cell, appending
//! them to the sector with the least total street length.

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extraction::{extract_streets, ExtractedStreet, StreetSource};
use crate::{Bounds, GeoPoint};

/// Door-to-door distribution speed used for duration estimates, in meters
/// of street per hour.
pub const DOOR_TO_DOOR_M_PER_HOUR: f64 = 1_500.0;

/// Default per-sector target duration in minutes.
pub const DEFAULT_TARGET_MINUTES: f64 = 120.0;

/// Estimated distribution duration for a given total street length.
pub fn estimated_minutes(length_m: f64) -> f64 {
    length_m / DOOR_TO_DOOR_M_PER_HOUR * 60.0
}

/// Partitioning parameters.
#[derive(Debug, Clone, Copy)]
pub struct PartitionConfig {
    pub target_minutes: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            target_minutes: DEFAULT_TARGET_MINUTES,
        }
    }
}

/// Size summary of a candidate zone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneEstimate {
    pub street_count: usize,
    pub total_length_m: f64,
    pub estimated_minutes: f64,
}

impl ZoneEstimate {
    fn from_streets(streets: &[ExtractedStreet]) -> Self {
        let total_length_m: f64 = streets.iter().map(|s| s.length_m()).sum();
        Self {
            street_count: streets.len(),
            total_length_m,
            estimated_minutes: estimated_minutes(total_length_m),
        }
    }
}

/// One proposed sub-zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorPlan {
    pub name: String,
    /// The sector's grid-cell rectangle as a closed polygon ring.
    pub polygon: Vec<GeoPoint>,
    pub bounds: Bounds,
    pub streets: Vec<ExtractedStreet>,
    pub total_length_m: f64,
    pub estimated_minutes: f64,
}

/// Outcome of judging a candidate zone against the target duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PartitionOutcome {
    /// The zone already fits the target; no split needed.
    Intact(ZoneEstimate),
    /// The zone should be split into the proposed sectors.
    Split {
        estimate: ZoneEstimate,
        sectors: Vec<SectorPlan>,
    },
}

/// Judge a street set against the target duration and propose sectors when
/// it is too large. An empty street set is reported intact.
pub fn partition_streets(
    streets: &[ExtractedStreet],
    config: &PartitionConfig,
    base_name: &str,
) -> PartitionOutcome {
    let estimate = ZoneEstimate::from_streets(streets);
    let zone_count = (estimate.estimated_minutes / config.target_minutes).ceil() as usize;

    if zone_count <= 1 || streets.is_empty() {
        info!(
            "zone '{}' fits the target ({:.0}min <= {:.0}min)",
            base_name, estimate.estimated_minutes, config.target_minutes
        );
        return PartitionOutcome::Intact(estimate);
    }

    info!(
        "zone '{}' estimated at {:.0}min, splitting into {} sectors",
        base_name, estimate.estimated_minutes, zone_count
    );

    let sectors = grid_split(streets, zone_count, base_name);
    PartitionOutcome::Split { estimate, sectors }
}

fn grid_split(
    streets: &[ExtractedStreet],
    zone_count: usize,
    base_name: &str,
) -> Vec<SectorPlan> {
    let all_points: Vec<GeoPoint> = streets.iter().flat_map(|s| s.path.iter().copied()).collect();
    let Some(bounds) = Bounds::from_points(&all_points) else {
        return Vec::new();
    };

    let cols = (zone_count as f64).sqrt().ceil() as usize;
    let rows = (zone_count as f64 / cols as f64).ceil() as usize;
    let lon_step = (bounds.max_lon - bounds.min_lon) / cols as f64;
    let lat_step = (bounds.max_lat - bounds.min_lat) / rows as f64;

    let mut cells: Vec<(Bounds, Vec<usize>)> = Vec::new();

    'grid: for row in 0..rows {
        for col in 0..cols {
            if cells.len() >= zone_count {
                break 'grid;
            }

            let cell = Bounds {
                min_lon: bounds.min_lon + col as f64 * lon_step,
                max_lon: bounds.min_lon + (col + 1) as f64 * lon_step,
                min_lat: bounds.min_lat + row as f64 * lat_step,
                max_lat: bounds.min_lat + (row + 1) as f64 * lat_step,
            };

            // A street belongs to every cell capturing one of its vertices.
            let captured: Vec<usize> = streets
                .iter()
                .enumerate()
                .filter(|(_, s)| s.path.iter().any(|p| cell.contains(*p)))
                .map(|(i, _)| i)
                .collect();

            if !captured.is_empty() {
                cells.push((cell, captured));
            }
        }
    }

    // Reconcile streets captured by no cell (cells skipped after the sector
    // budget was reached): append each to the currently lightest sector.
    let mut assigned = vec![false; streets.len()];
    for (_, members) in &cells {
        for &i in members {
            assigned[i] = true;
        }
    }

    let mut lengths: Vec<f64> = cells
        .iter()
        .map(|(_, members)| members.iter().map(|&i| streets[i].length_m()).sum())
        .collect();

    for (i, street) in streets.iter().enumerate() {
        if assigned[i] {
            continue;
        }
        let lightest = lengths
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx);
        if let Some(idx) = lightest {
            cells[idx].1.push(i);
            lengths[idx] += street.length_m();
        }
    }

    cells
        .into_iter()
        .enumerate()
        .map(|(index, (cell, members))| {
            let sector_streets: Vec<ExtractedStreet> =
                members.iter().map(|&i| streets[i].clone()).collect();
            let total_length_m: f64 = sector_streets.iter().map(|s| s.length_m()).sum();
            SectorPlan {
                name: format!("{} - Sector {}", base_name, index + 1),
                polygon: cell.to_ring(),
                bounds: cell,
                streets: sector_streets,
                total_length_m,
                estimated_minutes: estimated_minutes(total_length_m),
            }
        })
        .collect()
}

/// Extract the streets of a candidate polygon and judge it against the
/// target duration in one call.
pub async fn partition_zone<S: StreetSource>(
    source: &S,
    polygon: &[GeoPoint],
    config: &PartitionConfig,
    base_name: &str,
) -> Result<PartitionOutcome> {
    let network = extract_streets(source, polygon).await?;
    Ok(partition_streets(&network.streets, config, base_name))
}
