//! Street segmentation: split each street into distributable units.
//!
//! A segment covers one side of a street (even/odd house numbers) or the
//! whole street in a single pass. Side geometry is approximated by a fixed
//! 3 m lateral offset of the street's own polyline; no road-width data is
//! available, so the constant is a known approximation rather than a
//! per-street measurement.

use log::debug;

use crate::error::Result;
use crate::geo_utils::{offset_polyline, polyline_length};
use crate::store::PlannerStore;
use crate::types::{Parity, Segment, SegmentDraft, Side, Street};
use crate::GeoPoint;

/// Lateral offset applied to side segments, in meters.
pub const SIDE_OFFSET_M: f64 = 3.0;

/// Streets shorter than this are never split into sides: the split is not
/// worth a second pass and risks degenerate offsets.
pub const MIN_SPLIT_LENGTH_M: f64 = 20.0;

/// Default maximum piece length for [`split_into_chunks`].
pub const DEFAULT_CHUNK_LENGTH_M: f64 = 200.0;

/// Decide the split strategy for one street and produce its segments.
///
/// With house-number observations, sides are emitted per non-empty parity
/// group (even side offset `+3 m`, odd side `-3 m`); with none on either
/// side, one undivided segment covers the street. Without observations,
/// streets under [`MIN_SPLIT_LENGTH_M`] stay undivided and longer streets
/// get both offset sides unconditionally.
///
/// Each segment's length comes from its own (possibly offset) geometry;
/// offset segments run marginally longer or shorter than the source on
/// curved streets, which is expected.
pub fn split_street(street: &Street) -> Vec<SegmentDraft> {
    if street.has_house_numbers() {
        split_by_house_numbers(street)
    } else {
        split_by_offset(street)
    }
}

fn split_by_house_numbers(street: &Street) -> Vec<SegmentDraft> {
    let even = street
        .house_numbers
        .iter()
        .filter(|h| h.parity == Parity::Even)
        .count();
    let odd = street.house_numbers.len() - even;

    debug!(
        "street '{}': parity split ({} even / {} odd observations)",
        street.name, even, odd
    );

    let mut drafts = Vec::new();
    if even > 0 {
        drafts.push(side_draft(street, Side::Even, SIDE_OFFSET_M));
    }
    if odd > 0 {
        drafts.push(side_draft(street, Side::Odd, -SIDE_OFFSET_M));
    }
    if drafts.is_empty() {
        drafts.push(undivided_draft(street));
    }
    drafts
}

fn split_by_offset(street: &Street) -> Vec<SegmentDraft> {
    let length = street.length_m();
    if length < MIN_SPLIT_LENGTH_M {
        debug!(
            "street '{}' is {:.0}m, keeping a single undivided segment",
            street.name, length
        );
        return vec![undivided_draft(street)];
    }

    vec![
        side_draft(street, Side::Even, SIDE_OFFSET_M),
        side_draft(street, Side::Odd, -SIDE_OFFSET_M),
    ]
}

fn side_draft(street: &Street, side: Side, offset_m: f64) -> SegmentDraft {
    let path = offset_polyline(&street.path, offset_m);
    let length_m = polyline_length(&path);
    SegmentDraft {
        street_id: street.id.clone(),
        zone_id: street.zone_id.clone(),
        side,
        path,
        length_m,
    }
}

fn undivided_draft(street: &Street) -> SegmentDraft {
    SegmentDraft {
        street_id: street.id.clone(),
        zone_id: street.zone_id.clone(),
        side: Side::Undivided,
        path: street.path.clone(),
        length_m: street.length_m(),
    }
}

/// Split a street and persist the resulting segments with their initial
/// `todo` status. Visit order is left unassigned until a route is planned.
pub fn generate_segments(store: &dyn PlannerStore, street: &Street) -> Result<Vec<Segment>> {
    split_street(street)
        .into_iter()
        .map(|draft| store.add_segment(draft))
        .collect()
}

/// Split a polyline into consecutive pieces of at most `max_length_m`
/// meters each. Pieces share their boundary vertex. A line no longer than
/// the limit is returned as a single piece.
pub fn split_into_chunks(path: &[GeoPoint], max_length_m: f64) -> Vec<Vec<GeoPoint>> {
    if path.len() < 2 || polyline_length(path) <= max_length_m {
        return vec![path.to_vec()];
    }

    let mut chunks = Vec::new();
    let mut current = vec![path[0]];
    let mut current_length = 0.0;

    for w in path.windows(2) {
        let seg = crate::geo_utils::haversine_distance(w[0], w[1]);
        if current_length + seg > max_length_m && current.len() > 1 {
            chunks.push(current);
            current = vec![w[0]];
            current_length = 0.0;
        }
        current.push(w[1]);
        current_length += seg;
    }

    if current.len() > 1 {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::destination_point;
    use crate::store::MemoryStore;
    use crate::types::{HouseNumber, SegmentStatus};
    use std::collections::HashMap;

    fn street_with_path(path: Vec<GeoPoint>, house_numbers: Vec<HouseNumber>) -> Street {
        Street {
            id: "street-1".to_string(),
            zone_id: "zone-1".to_string(),
            source_id: "100".to_string(),
            name: "Test street".to_string(),
            path,
            tags: HashMap::new(),
            house_numbers,
        }
    }

    /// Straight street of roughly `length_m` meters heading north.
    fn straight_street(length_m: f64) -> Vec<GeoPoint> {
        let start = GeoPoint::new(2.3522, 48.8566);
        vec![start, destination_point(start, length_m, 0.0)]
    }

    fn observation(number: u32) -> HouseNumber {
        HouseNumber {
            raw: number.to_string(),
            number,
            parity: Parity::of(number),
            position: GeoPoint::new(2.3522, 48.8566),
        }
    }

    #[test]
    fn test_offset_fallback_splits_both_sides() {
        let street = street_with_path(straight_street(100.0), vec![]);
        let drafts = split_street(&street);

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].side, Side::Even);
        assert_eq!(drafts[1].side, Side::Odd);

        // Length conservation: even + odd ≈ 2x the street, well within 5%.
        let street_len = street.length_m();
        let total: f64 = drafts.iter().map(|d| d.length_m).sum();
        let deviation = (total - 2.0 * street_len).abs() / street_len;
        assert!(deviation < 0.05, "deviation was {}", deviation);
    }

    #[test]
    fn test_short_street_stays_undivided() {
        let street = street_with_path(straight_street(12.0), vec![]);
        let drafts = split_street(&street);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].side, Side::Undivided);
        assert_eq!(drafts[0].path, street.path);
    }

    #[test]
    fn test_house_numbers_one_side_only() {
        let street = street_with_path(
            straight_street(100.0),
            vec![observation(2), observation(4)],
        );
        let drafts = split_street(&street);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].side, Side::Even);
    }

    #[test]
    fn test_house_numbers_both_sides() {
        let street = street_with_path(
            straight_street(100.0),
            vec![observation(2), observation(3), observation(5)],
        );
        let drafts = split_street(&street);

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].side, Side::Even);
        assert_eq!(drafts[1].side, Side::Odd);
    }

    #[test]
    fn test_generate_segments_persists_todo() {
        let store = MemoryStore::new();
        let zone = store
            .create_zone(
                "Test",
                &[
                    GeoPoint::new(2.34, 48.85),
                    GeoPoint::new(2.36, 48.85),
                    GeoPoint::new(2.36, 48.87),
                    GeoPoint::new(2.34, 48.87),
                ],
            )
            .unwrap();

        let mut street = street_with_path(straight_street(100.0), vec![]);
        street.zone_id = zone.id.clone();

        let segments = generate_segments(&store, &street).unwrap();
        assert_eq!(segments.len(), 2);
        for segment in &segments {
            assert_eq!(segment.status, SegmentStatus::Todo);
            assert!(segment.visit_order.is_none());
        }

        let stored = store.segments(&zone.id).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_split_into_chunks() {
        let start = GeoPoint::new(2.3522, 48.8566);
        let path: Vec<GeoPoint> = (0..=10)
            .map(|i| destination_point(start, i as f64 * 50.0, 0.0))
            .collect();

        // 500m line into ≤200m pieces: expect 3 chunks covering all vertices.
        let chunks = split_into_chunks(&path, DEFAULT_CHUNK_LENGTH_M);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(polyline_length(chunk) <= DEFAULT_CHUNK_LENGTH_M + 1.0);
        }
        assert_eq!(chunks[0][0], path[0]);
        assert_eq!(chunks[2].last(), path.last());

        let short = split_into_chunks(&path[..2], DEFAULT_CHUNK_LENGTH_M);
        assert_eq!(short.len(), 1);
    }
}
